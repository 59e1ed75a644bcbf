//! cache_invalidate tool implementation.
//!
//! Runs an invalidation cascade by hand, for keys or resources whose data
//! changed outside the catalog.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use versync_core::{InvalidationPlan, Resource};

use crate::error::ServerError;
use crate::platform::Platform;
use crate::tools::json_success;

/// Parameters for the cache_invalidate tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {
    /// Version keys to bump.
    #[serde(default)]
    pub version_keys: Vec<String>,

    /// Cached payload keys to delete.
    #[serde(default)]
    pub cache_keys: Vec<String>,

    /// Resources to invalidate; expands to their version and cache keys.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl(platform: &Platform, params: CacheInvalidateParams) -> Result<CallToolResult, McpError> {
    for resource in &params.resources {
        resource.validate()?;
    }

    let mut plan = InvalidationPlan::from_keys(params.version_keys, params.cache_keys);
    plan.merge(params.resources.iter().collect());
    if plan.version_keys.iter().chain(&plan.cache_keys).any(|k| k.trim().is_empty()) {
        return Err(ServerError::InvalidInput("keys cannot be empty".into()).into());
    }
    if plan.is_empty() {
        return Err(ServerError::InvalidInput(
            "At least one of version_keys, cache_keys or resources must be specified".into(),
        )
        .into());
    }

    let report = platform.service().cascade().apply(&plan).await;
    json_success(&report)
}
