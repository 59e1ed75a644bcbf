//! Invalidation cascade run after every committed write.
//!
//! A cascade bumps version counters and deletes cached payloads. All
//! operations are issued together and awaited as one batch. Failures are
//! logged and reported back, never retried and never turned into an error:
//! the write they follow has already committed.

use std::collections::BTreeSet;

use futures_util::future::{join, join_all};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::cache::ResourceCache;
use crate::keys::Resource;
use crate::registry::VersionRegistry;

/// De-duplicated set of keys a write invalidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InvalidationPlan {
    pub version_keys: BTreeSet<String>,
    pub cache_keys: BTreeSet<String>,
}

impl InvalidationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan from hand-enumerated keys.
    pub fn from_keys<V, C>(version_keys: V, cache_keys: C) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            version_keys: version_keys.into_iter().map(Into::into).collect(),
            cache_keys: cache_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a resource: its version key always, its cache key only when the
    /// resource participates in cascades.
    pub fn add_resource(&mut self, resource: &Resource) {
        self.version_keys.insert(resource.version_key());
        if resource.cascades() {
            self.cache_keys.insert(resource.cache_key());
        }
    }

    pub fn merge(&mut self, other: InvalidationPlan) {
        self.version_keys.extend(other.version_keys);
        self.cache_keys.extend(other.cache_keys);
    }

    pub fn is_empty(&self) -> bool {
        self.version_keys.is_empty() && self.cache_keys.is_empty()
    }
}

impl<'a> FromIterator<&'a Resource> for InvalidationPlan {
    fn from_iter<I: IntoIterator<Item = &'a Resource>>(iter: I) -> Self {
        let mut plan = InvalidationPlan::new();
        for resource in iter {
            plan.add_resource(resource);
        }
        plan
    }
}

/// Outcome of one cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CascadeReport {
    /// Counters successfully incremented.
    pub versions_bumped: usize,
    /// Cache entries successfully deleted (or already absent).
    pub entries_invalidated: usize,
    /// Keys whose operation failed, with the error message.
    pub failures: Vec<String>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InvalidationCascade {
    registry: VersionRegistry,
    cache: ResourceCache,
}

impl InvalidationCascade {
    pub fn new(registry: VersionRegistry, cache: ResourceCache) -> Self {
        Self { registry, cache }
    }

    /// Bump every version key and delete every cache key, concurrently.
    pub async fn on_mutation(&self, version_keys: &[String], cache_keys: &[String]) -> CascadeReport {
        let bumps = join_all(version_keys.iter().map(|key| async move {
            let result = self.registry.increment_version(key).await.map(|_| ());
            (key.as_str(), result)
        }));
        let deletes = join_all(cache_keys.iter().map(|key| async move {
            let result = self.cache.invalidate(key).await;
            (key.as_str(), result)
        }));

        let (bumped, deleted) = join(bumps, deletes).await;

        let mut report = CascadeReport::default();
        for (key, result) in bumped {
            match result {
                Ok(()) => report.versions_bumped += 1,
                Err(e) => {
                    tracing::warn!(key, error = %e, "version bump failed; stale views may persist until TTL");
                    report.failures.push(format!("version {key}: {e}"));
                }
            }
        }
        for (key, result) in deleted {
            match result {
                Ok(()) => report.entries_invalidated += 1,
                Err(e) => {
                    tracing::warn!(key, error = %e, "cache invalidation failed; stale payload may persist until TTL");
                    report.failures.push(format!("cache {key}: {e}"));
                }
            }
        }

        tracing::info!(
            versions_bumped = report.versions_bumped,
            entries_invalidated = report.entries_invalidated,
            failures = report.failures.len(),
            "invalidation cascade finished"
        );

        report
    }

    pub async fn apply(&self, plan: &InvalidationPlan) -> CascadeReport {
        let version_keys: Vec<String> = plan.version_keys.iter().cloned().collect();
        let cache_keys: Vec<String> = plan.cache_keys.iter().cloned().collect();
        self.on_mutation(&version_keys, &cache_keys).await
    }
}
