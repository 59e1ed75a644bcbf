//! cache_purge tool implementation.
//!
//! Deletes cached payloads whose TTL has run out.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::tools::json_success;

/// Output from the cache_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: u64,
}

/// Implementation of the cache_purge tool.
pub async fn purge_impl(platform: &Platform) -> Result<CallToolResult, McpError> {
    let deleted = platform.service().cache().purge_expired().await?;
    json_success(&CachePurgeOutput { deleted })
}
