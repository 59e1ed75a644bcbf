//! Version-stamped read protocol and the write path that feeds it.
//!
//! ### Read
//!
//! 1. Look up the resource's current version (lazily initialized).
//! 2. If the client sent that exact version, answer `not-modified`.
//! 3. Otherwise serve the cached payload, or compute it from the source on a
//!    miss and cache it for the resource's TTL.
//!
//! The version lookup and the comparison are not atomic with concurrent
//! increments. A `not-modified` may be answered just before a write lands;
//! the next read catches up.
//!
//! ### Degraded store
//!
//! - Registry unreachable: the version is unknown, the cache is skipped, the
//!   source is queried and the answer is stamped [`UNKNOWN_VERSION`].
//! - Cache unreachable: treated as a miss and the payload is not written back.
//!
//! ### Write
//!
//! The commit runs first. Only a successful commit triggers the cascade, and
//! the cascade's own failures never change the reported outcome.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use schemars::JsonSchema;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;
use crate::cache::ResourceCache;
use crate::cascade::{CascadeReport, InvalidationCascade, InvalidationPlan};
use crate::config::AppConfig;
use crate::keys::Resource;
use crate::registry::{UNKNOWN_VERSION, VersionRegistry};
use crate::store::StoreHandle;

/// Value of the `status` field that marks a not-modified response.
pub const NOT_MODIFIED: &str = "not-modified";

/// Result of one read.
///
/// On the wire, `NotModified` is `{"status":"not-modified","version":"5"}`
/// and `Fresh` is `{"data":...,"version":"5"}`. Readers branch on the
/// presence of `status`; `data` may legitimately be `null`, `[]` or `{}`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    NotModified { version: String },
    Fresh { data: Value, version: String },
}

impl SyncOutcome {
    pub fn version(&self) -> &str {
        match self {
            SyncOutcome::NotModified { version } | SyncOutcome::Fresh { version, .. } => version,
        }
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, SyncOutcome::NotModified { .. })
    }

    /// Payload of a fresh response.
    pub fn data(&self) -> Option<&Value> {
        match self {
            SyncOutcome::Fresh { data, .. } => Some(data),
            SyncOutcome::NotModified { .. } => None,
        }
    }

    /// Decode a fresh payload into `T`. `None` for not-modified.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, Error> {
        self.data()
            .map(|data| serde_json::from_value(data.clone()))
            .transpose()
            .map_err(Error::from)
    }
}

#[derive(Serialize)]
struct NotModifiedWire<'a> {
    status: &'static str,
    version: &'a str,
}

#[derive(Serialize)]
struct FreshWire<'a> {
    data: &'a Value,
    version: &'a str,
}

#[derive(Deserialize)]
struct IncomingWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Value,
    version: String,
}

impl Serialize for SyncOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SyncOutcome::NotModified { version } => {
                NotModifiedWire { status: NOT_MODIFIED, version }.serialize(serializer)
            }
            SyncOutcome::Fresh { data, version } => FreshWire { data, version }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for SyncOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = IncomingWire::deserialize(deserializer)?;
        match wire.status.as_deref() {
            None => Ok(SyncOutcome::Fresh { data: wire.data, version: wire.version }),
            Some(NOT_MODIFIED) => Ok(SyncOutcome::NotModified { version: wire.version }),
            Some(other) => Err(de::Error::custom(format!("unknown sync status: {other}"))),
        }
    }
}

/// Database of record, queried only on cache misses.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn load(&self, resource: &Resource) -> Result<Value, Error>;
}

/// Anything that answers version-stamped reads: an in-process endpoint or a
/// remote transport.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read(&self, resource: &Resource, client_version: Option<&str>) -> Result<SyncOutcome, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

/// Result of a write as reported to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApiResponse {
    pub status: ApiStatus,
    pub message: String,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: ApiStatus::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ApiStatus::Error, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        self.status == ApiStatus::Success
    }
}

/// What a successful commit reports back to the write path.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    pub message: String,
    pub plan: InvalidationPlan,
}

/// Registry, cache and cascade over one shared store.
#[derive(Debug, Clone)]
pub struct SyncService {
    store: StoreHandle,
    registry: VersionRegistry,
    cache: ResourceCache,
    cascade: InvalidationCascade,
}

impl SyncService {
    pub fn new(store: StoreHandle) -> Self {
        let registry = VersionRegistry::new(store.clone());
        let cache = ResourceCache::new(store.clone());
        let cascade = InvalidationCascade::new(registry.clone(), cache.clone());
        Self { store, registry, cache, cascade }
    }

    /// Open the configured store and build the service on it.
    pub async fn connect(config: &AppConfig) -> Result<Self, Error> {
        Ok(Self::new(StoreHandle::open(config).await?))
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.store.close().await
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn cascade(&self) -> &InvalidationCascade {
        &self.cascade
    }

    /// Answer one version-stamped read.
    pub async fn read<S>(
        &self, source: &S, resource: &Resource, client_version: Option<&str>,
    ) -> Result<SyncOutcome, Error>
    where
        S: ResourceSource + ?Sized,
    {
        resource.validate()?;
        let version_key = resource.version_key();
        let cache_key = resource.cache_key();

        let current = match self.registry.get_version(&version_key).await {
            Ok(version) => Some(version),
            Err(e) if e.is_store_failure() => {
                tracing::warn!(key = %version_key, error = %e, "version unknown; recomputing from source");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(current) = current.as_deref()
            && client_version == Some(current)
        {
            tracing::debug!(key = %version_key, version = current, "version match; not modified");
            return Ok(SyncOutcome::NotModified { version: current.to_string() });
        }

        let mut write_back = current.is_some();
        if let Some(version) = current.as_deref() {
            match self.cache.get::<Value>(&cache_key).await {
                Ok(Some(data)) => {
                    tracing::debug!(key = %cache_key, version, "cache hit");
                    return Ok(SyncOutcome::Fresh { data, version: version.to_string() });
                }
                Ok(None) => tracing::debug!(key = %cache_key, "cache miss"),
                Err(e) => {
                    tracing::warn!(key = %cache_key, error = %e, "cache unavailable; treating as miss");
                    write_back = false;
                }
            }
        }

        let started = std::time::Instant::now();
        let data = source.load(resource).await?;
        tracing::debug!(key = %cache_key, elapsed_ms = started.elapsed().as_millis() as u64, "computed from source");

        if write_back && let Err(e) = self.cache.set(&cache_key, &data, resource.remote_ttl()).await {
            tracing::warn!(key = %cache_key, error = %e, "failed to populate cache");
        }

        let version = current.unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        Ok(SyncOutcome::Fresh { data, version })
    }

    /// Answer several reads concurrently, one outcome per request in order.
    pub async fn read_batch<S>(
        &self, source: &S, requests: &[(Resource, Option<String>)],
    ) -> Vec<Result<SyncOutcome, Error>>
    where
        S: ResourceSource + ?Sized,
    {
        join_all(
            requests
                .iter()
                .map(|(resource, version)| self.read(source, resource, version.as_deref())),
        )
        .await
    }

    /// Run a commit, then the cascade it planned.
    ///
    /// A failed commit is reported as an error and triggers nothing. A
    /// successful commit is reported as success whatever the cascade does.
    pub async fn write<F>(&self, commit: F) -> (ApiResponse, Option<CascadeReport>)
    where
        F: Future<Output = Result<Committed, Error>>,
    {
        let committed = match commit.await {
            Ok(committed) => committed,
            Err(e) => {
                if e.is_store_failure() {
                    tracing::warn!(error = %e, "write failed");
                } else {
                    tracing::info!(error = %e, "write rejected");
                }
                return (ApiResponse::error(e.to_string()), None);
            }
        };

        let report = self.cascade.apply(&committed.plan).await;
        if !report.is_complete() {
            tracing::warn!(failures = ?report.failures, "write committed with incomplete invalidation");
        }

        (ApiResponse::success(committed.message), Some(report))
    }
}

/// A [`SyncService`] bound to its database of record.
pub struct SyncEndpoint<S> {
    service: SyncService,
    source: Arc<S>,
}

impl<S> Clone for SyncEndpoint<S> {
    fn clone(&self) -> Self {
        Self { service: self.service.clone(), source: Arc::clone(&self.source) }
    }
}

impl<S: ResourceSource> SyncEndpoint<S> {
    pub fn new(service: SyncService, source: Arc<S>) -> Self {
        Self { service, source }
    }

    pub fn service(&self) -> &SyncService {
        &self.service
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn read_batch(&self, requests: &[(Resource, Option<String>)]) -> Vec<Result<SyncOutcome, Error>> {
        self.service.read_batch(self.source.as_ref(), requests).await
    }
}

#[async_trait]
impl<S: ResourceSource> ResourceReader for SyncEndpoint<S> {
    async fn read(&self, resource: &Resource, client_version: Option<&str>) -> Result<SyncOutcome, Error> {
        self.service.read(self.source.as_ref(), resource, client_version).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::RemoteStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Source whose payloads can be edited between reads and which counts
    /// how often it was queried.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub(crate) rows: Mutex<HashMap<String, Value>>,
        pub(crate) loads: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) async fn put(&self, resource: &Resource, value: Value) {
            self.rows.lock().await.insert(resource.cache_key(), value);
        }

        pub(crate) fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceSource for FakeSource {
        async fn load(&self, resource: &Resource) -> Result<Value, Error> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().await.get(&resource.cache_key()).cloned().unwrap_or(Value::Null))
        }
    }

    /// Store that refuses every operation.
    pub(crate) struct FailingStore;

    #[async_trait]
    impl RemoteStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn set(&self, _key: &str, _payload: String, _ttl: Duration) -> Result<(), Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn get_counter(&self, _key: &str) -> Result<Option<u64>, Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn init_counter(&self, _key: &str, _initial: u64) -> Result<u64, Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn incr(&self, _key: &str) -> Result<u64, Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn purge_expired(&self) -> Result<u64, Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        async fn health_check(&self) -> Result<(), Error> {
            Err(Error::StoreUnavailable("connection refused".into()))
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    /// Store that rejects every key as malformed.
    struct RejectingStore;

    #[async_trait]
    impl RemoteStore for RejectingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            Err(Error::InvalidInput(format!("bad key {key}")))
        }
        async fn set(&self, key: &str, _payload: String, _ttl: Duration) -> Result<(), Error> {
            Err(Error::InvalidInput(format!("bad key {key}")))
        }
        async fn delete(&self, key: &str) -> Result<bool, Error> {
            Err(Error::InvalidInput(format!("bad key {key}")))
        }
        async fn get_counter(&self, key: &str) -> Result<Option<u64>, Error> {
            Err(Error::InvalidInput(format!("bad key {key}")))
        }
        async fn init_counter(&self, key: &str, _initial: u64) -> Result<u64, Error> {
            Err(Error::InvalidInput(format!("bad key {key}")))
        }
        async fn incr(&self, key: &str) -> Result<u64, Error> {
            Err(Error::InvalidInput(format!("bad key {key}")))
        }
        async fn purge_expired(&self) -> Result<u64, Error> {
            Ok(0)
        }
        async fn health_check(&self) -> Result<(), Error> {
            Ok(())
        }
        fn backend_name(&self) -> &'static str {
            "rejecting"
        }
    }

    fn service() -> SyncService {
        SyncService::new(StoreHandle::in_memory())
    }

    fn course_plan() -> InvalidationPlan {
        [Resource::CoursesList].iter().collect()
    }

    #[tokio::test]
    async fn test_first_read_is_fresh_at_version_one() {
        let service = service();
        let source = FakeSource::default();
        source.put(&Resource::CoursesList, json!([{"id": "c1"}])).await;

        let outcome = service.read(&source, &Resource::CoursesList, None).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Fresh { data: json!([{"id": "c1"}]), version: "1".into() });
    }

    #[tokio::test]
    async fn test_not_modified_is_idempotent() {
        let service = service();
        let source = FakeSource::default();
        service.read(&source, &Resource::AdminUsers, None).await.unwrap();

        for _ in 0..5 {
            let outcome = service.read(&source, &Resource::AdminUsers, Some("1")).await.unwrap();
            assert_eq!(outcome, SyncOutcome::NotModified { version: "1".into() });
        }
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_source() {
        let service = service();
        let source = FakeSource::default();
        source.put(&Resource::AdminDashboardStats, json!({"courses": 3})).await;

        service.read(&source, &Resource::AdminDashboardStats, None).await.unwrap();
        source.put(&Resource::AdminDashboardStats, json!({"courses": 99})).await;
        let second = service.read(&source, &Resource::AdminDashboardStats, None).await.unwrap();

        assert_eq!(second.data(), Some(&json!({"courses": 3})));
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn test_scenario_mutation_forces_fresh_read() {
        let service = service();
        let source = FakeSource::default();
        source.put(&Resource::CoursesList, json!(["intro"])).await;

        let first = service.read(&source, &Resource::CoursesList, None).await.unwrap();
        assert_eq!(first.version(), "1");

        source.put(&Resource::CoursesList, json!(["intro", "advanced"])).await;
        let (response, report) = service
            .write(async { Ok(Committed { message: "course created".into(), plan: course_plan() }) })
            .await;
        assert!(response.is_success());
        assert!(report.unwrap().is_complete());

        let second = service.read(&source, &Resource::CoursesList, Some("1")).await.unwrap();
        assert_eq!(second, SyncOutcome::Fresh { data: json!(["intro", "advanced"]), version: "2".into() });
    }

    #[tokio::test]
    async fn test_search_payload_outlives_cascade() {
        let service = service();
        let source = FakeSource::default();
        let search = Resource::CourseSearch { term: "rust".into(), page: 0 };
        source.put(&search, json!(["old"])).await;

        service.read(&source, &search, None).await.unwrap();
        source.put(&search, json!(["new"])).await;
        service
            .write(async { Ok(Committed { message: "ok".into(), plan: course_plan() }) })
            .await;

        let after = service.read(&source, &search, Some("1")).await.unwrap();
        assert_eq!(after.version(), "2");
        assert_eq!(after.data(), Some(&json!(["old"])));
    }

    #[tokio::test]
    async fn test_falsy_payloads_are_fresh() {
        let service = service();
        let source = FakeSource::default();
        let outcome = service.read(&source, &Resource::AdminEnrollments, None).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Fresh { data: Value::Null, version: "1".into() });
    }

    #[tokio::test]
    async fn test_failed_commit_skips_cascade() {
        let service = service();
        service.registry().get_version("courses-version").await.unwrap();

        let (response, report) = service
            .write(async { Err::<Committed, _>(Error::SourceFailed("constraint violated".into())) })
            .await;

        assert!(!response.is_success());
        assert!(report.is_none());
        assert_eq!(service.registry().get_version("courses-version").await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_registry_rejection_is_not_degraded() {
        let service = SyncService::new(StoreHandle::new(Arc::new(RejectingStore), Duration::from_millis(100)));
        let source = FakeSource::default();

        let err = service.read(&source, &Resource::CoursesList, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(source.loads(), 0);
    }

    #[tokio::test]
    async fn test_scenario_failing_store_degrades_gracefully() {
        let service = SyncService::new(StoreHandle::new(Arc::new(FailingStore), Duration::from_millis(100)));
        let source = FakeSource::default();
        source.put(&Resource::CoursesList, json!(["intro"])).await;

        let outcome = service.read(&source, &Resource::CoursesList, Some("1")).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Fresh { data: json!(["intro"]), version: UNKNOWN_VERSION.into() });

        let again = service.read(&source, &Resource::CoursesList, Some(UNKNOWN_VERSION)).await.unwrap();
        assert!(!again.is_not_modified());
        assert_eq!(source.loads(), 2);

        let (response, report) = service
            .write(async { Ok(Committed { message: "saved".into(), plan: course_plan() }) })
            .await;
        assert!(response.is_success());
        let report = report.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.versions_bumped, 0);
    }

    #[tokio::test]
    async fn test_read_batch_preserves_order() {
        let service = service();
        let source = FakeSource::default();
        service.read(&source, &Resource::AdminDashboardStats, None).await.unwrap();

        let outcomes = service
            .read_batch(
                &source,
                &[
                    (Resource::AdminDashboardStats, Some("1".into())),
                    (Resource::AdminEnrollments, None),
                    (Resource::CourseDetail { course_id: "".into() }, None),
                ],
            )
            .await;

        assert!(outcomes[0].as_ref().unwrap().is_not_modified());
        assert!(!outcomes[1].as_ref().unwrap().is_not_modified());
        assert!(matches!(outcomes[2], Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_endpoint_reads_through_source() {
        let source = Arc::new(FakeSource::default());
        source.put(&Resource::ChatMessages { thread_id: "t1".into() }, json!([{"body": "hi"}])).await;
        let endpoint = SyncEndpoint::new(service(), Arc::clone(&source));

        let outcome = endpoint
            .read(&Resource::ChatMessages { thread_id: "t1".into() }, None)
            .await
            .unwrap();
        assert_eq!(outcome.data(), Some(&json!([{"body": "hi"}])));
        assert_eq!(endpoint.source().loads(), 1);
    }

    #[test]
    fn test_wire_shape_is_exact() {
        let nm = SyncOutcome::NotModified { version: "5".into() };
        assert_eq!(serde_json::to_string(&nm).unwrap(), r#"{"status":"not-modified","version":"5"}"#);

        let fresh = SyncOutcome::Fresh { data: json!([]), version: "5".into() };
        assert_eq!(serde_json::to_string(&fresh).unwrap(), r#"{"data":[],"version":"5"}"#);
    }

    #[test]
    fn test_wire_branches_on_status() {
        let fresh: SyncOutcome = serde_json::from_str(r#"{"data":null,"version":"3"}"#).unwrap();
        assert_eq!(fresh, SyncOutcome::Fresh { data: Value::Null, version: "3".into() });

        let missing_data: SyncOutcome = serde_json::from_str(r#"{"version":"3"}"#).unwrap();
        assert!(!missing_data.is_not_modified());

        let nm: SyncOutcome = serde_json::from_str(r#"{"status":"not-modified","version":"3"}"#).unwrap();
        assert!(nm.is_not_modified());

        assert!(serde_json::from_str::<SyncOutcome>(r#"{"status":"gone","version":"3"}"#).is_err());
    }

    #[test]
    fn test_decode_typed_payload() {
        let fresh = SyncOutcome::Fresh { data: json!(["a", "b"]), version: "1".into() };
        let titles: Vec<String> = fresh.decode().unwrap().unwrap();
        assert_eq!(titles, vec!["a", "b"]);

        let nm = SyncOutcome::NotModified { version: "1".into() };
        assert!(nm.decode::<Vec<String>>().unwrap().is_none());
    }

    #[test]
    fn test_api_response_shape() {
        let json = serde_json::to_string(&ApiResponse::success("done")).unwrap();
        assert_eq!(json, r#"{"status":"success","message":"done"}"#);
    }
}
