//! version_get tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use versync_core::Resource;

use crate::error::ServerError;
use crate::platform::Platform;
use crate::tools::json_success;

/// Parameters for the version_get tool. Give either a key or a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VersionGetParams {
    /// Registry key, e.g. `courses-version`.
    #[serde(default)]
    pub key: Option<String>,

    /// Resource whose version key should be looked up.
    #[serde(default)]
    pub resource: Option<Resource>,
}

/// Output from the version_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VersionGetOutput {
    pub key: String,
    pub version: String,
}

/// Implementation of the version_get tool.
pub async fn version_impl(platform: &Platform, params: VersionGetParams) -> Result<CallToolResult, McpError> {
    let key = match (params.key, params.resource) {
        (Some(key), None) if !key.trim().is_empty() => key,
        (None, Some(resource)) => {
            resource.validate()?;
            resource.version_key()
        }
        _ => return Err(ServerError::InvalidInput("exactly one of key or resource must be given".into()).into()),
    };

    let version = platform.service().registry().get_version(&key).await?;
    json_success(&VersionGetOutput { key, version })
}
