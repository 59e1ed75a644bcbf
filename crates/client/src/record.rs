//! Persisted client records and the keys they are stored under.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const GUEST: &str = "guest";

/// Whose copy of a resource a record is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserScope {
    User(String),
    /// No signed-in user. All anonymous sessions share these records.
    Guest,
}

impl UserScope {
    /// Scope for an optional user id. Missing or blank ids fall back to guest.
    pub fn from_user_id(user_id: Option<&str>) -> Self {
        match user_id.map(str::trim) {
            Some(id) if !id.is_empty() => UserScope::User(id.to_string()),
            _ => UserScope::Guest,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UserScope::User(id) => id,
            UserScope::Guest => GUEST,
        }
    }
}

impl std::fmt::Display for UserScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a record survives in the store, independent of staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientTtl {
    /// Kept until invalidated or replaced.
    #[default]
    Permanent,
    /// Dropped on the first read after `timestamp + ttl`.
    Timed(Duration),
}

impl ClientTtl {
    pub(crate) fn as_millis(&self) -> Option<i64> {
        match self {
            ClientTtl::Permanent => None,
            ClientTtl::Timed(ttl) => Some(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
        }
    }
}

/// A resource payload as last seen by this client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCacheRecord<T> {
    pub data: T,
    pub version: String,
    /// Last time the server confirmed or replaced this copy.
    pub timestamp: DateTime<Utc>,
}

impl<T> ClientCacheRecord<T> {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }

    /// Whether the record is older than the caller's staleness window.
    pub fn is_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) >= stale_after
    }
}

/// Storage key for a namespaced, user-scoped record.
pub fn storage_key(namespace: &str, scope: &UserScope) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(scope.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
