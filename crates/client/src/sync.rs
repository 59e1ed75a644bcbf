//! Client side of the version-stamped read protocol.
//!
//! A read first consults the local store. Within the resource's staleness
//! window the local copy is served as is. Past it, or when nothing is stored,
//! the client asks the server, sending the version it holds:
//!
//! - `not-modified`: the local copy is still current; its timestamp is touched.
//! - fresh data: the local copy is replaced, whatever version it held. Server
//!   counters restart when the remote store is wiped, so a lower version is
//!   still the current one.
//!
//! A local copy that no longer decodes is dropped and the read proceeds as if
//! nothing was stored. Network-only resources are never persisted.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use versync_core::{ClientPolicy, Error, Resource, ResourceReader, SyncOutcome};

use crate::error::ClientError;
use crate::record::{ClientCacheRecord, ClientTtl, UserScope};
use crate::store::ClientCacheStore;

/// Where the data handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
    /// Local copy served without asking the server.
    Cache,
    /// Local copy confirmed by the server.
    Confirmed,
    /// Fresh payload from the server.
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedView<T> {
    pub data: T,
    pub version: String,
    pub source: ViewSource,
}

pub struct SyncClient<R> {
    reader: R,
    store: ClientCacheStore,
    scope: UserScope,
}

impl<R: ResourceReader> SyncClient<R> {
    pub fn new(reader: R, store: ClientCacheStore, scope: UserScope) -> Self {
        Self { reader, store, scope }
    }

    pub fn store(&self) -> &ClientCacheStore {
        &self.store
    }

    pub fn scope(&self) -> &UserScope {
        &self.scope
    }

    /// Switch to another user's records, e.g. after sign-in or sign-out.
    pub fn set_scope(&mut self, scope: UserScope) {
        self.scope = scope;
    }

    /// The locally stored copy, without contacting the server.
    ///
    /// Lets a view render immediately, stale or not, while a revalidation
    /// runs.
    pub async fn cached_view(&self, resource: &Resource) -> Result<Option<ClientCacheRecord<Value>>, ClientError> {
        if resource.client_policy() == ClientPolicy::NetworkOnly {
            return Ok(None);
        }
        self.store.get(&resource.namespace(), &self.scope).await
    }

    /// Serve from the local copy while it is within the staleness window,
    /// otherwise revalidate with the server.
    pub async fn fetch<T: DeserializeOwned>(&self, resource: &Resource) -> Result<SyncedView<T>, ClientError> {
        if let ClientPolicy::Cached { stale_after } = resource.client_policy()
            && let Some(record) = self.local_copy::<T>(resource).await?
            && !record.is_stale(stale_after, Utc::now())
        {
            tracing::debug!(namespace = %resource.namespace(), version = %record.version, "serving local copy");
            return Ok(SyncedView { data: record.data, version: record.version, source: ViewSource::Cache });
        }

        self.revalidate(resource).await
    }

    /// Ask the server whether the local copy is current, regardless of its
    /// age.
    pub async fn revalidate<T: DeserializeOwned>(&self, resource: &Resource) -> Result<SyncedView<T>, ClientError> {
        let namespace = resource.namespace();
        let cached = self.local_copy::<T>(resource).await?;
        let held = cached.as_ref().map(|record| record.version.as_str());

        let outcome = self.reader.read(resource, held).await?;
        let (data, version) = match (outcome, cached) {
            (SyncOutcome::NotModified { version }, Some(record)) => {
                if !self.store.touch(&namespace, &self.scope).await? {
                    tracing::debug!(namespace = %namespace, "local copy vanished before touch");
                }
                return Ok(SyncedView { data: record.data, version, source: ViewSource::Confirmed });
            }
            (SyncOutcome::NotModified { .. }, None) => {
                // Nothing was held, so there is nothing to confirm. Ask once more.
                tracing::warn!(namespace = %namespace, "not-modified without a client version; retrying");
                match self.reader.read(resource, None).await? {
                    SyncOutcome::Fresh { data, version } => (data, version),
                    SyncOutcome::NotModified { .. } => {
                        return Err(Error::Protocol(format!("not-modified for {namespace} without a client version"))
                            .into());
                    }
                }
            }
            (SyncOutcome::Fresh { data, version }, _) => (data, version),
        };

        let decoded = serde_json::from_value(data.clone())?;
        self.persist(resource, &data, &version).await?;

        Ok(SyncedView { data: decoded, version, source: ViewSource::Network })
    }

    /// The local copy decoded as `T`. A copy that does not decode is dropped.
    async fn local_copy<T: DeserializeOwned>(
        &self, resource: &Resource,
    ) -> Result<Option<ClientCacheRecord<T>>, ClientError> {
        let Some(record) = self.cached_view(resource).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<T>(record.data) {
            Ok(data) => Ok(Some(ClientCacheRecord { data, version: record.version, timestamp: record.timestamp })),
            Err(e) => {
                let namespace = resource.namespace();
                tracing::debug!(namespace = %namespace, error = %e, "discarding undecodable local copy");
                self.store.invalidate(&namespace, &self.scope).await?;
                Ok(None)
            }
        }
    }

    async fn persist(&self, resource: &Resource, data: &Value, version: &str) -> Result<(), ClientError> {
        if resource.client_policy() == ClientPolicy::NetworkOnly {
            return Ok(());
        }

        self.store
            .set(&resource.namespace(), data, &self.scope, version, ClientTtl::Permanent)
            .await
    }
}
