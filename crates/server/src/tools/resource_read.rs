//! resource_read tool implementation.
//!
//! Answers one version-stamped read. The output is the wire outcome itself:
//! `{"status":"not-modified","version":..}` or `{"data":..,"version":..}`.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use versync_core::Resource;

use crate::platform::Platform;
use crate::tools::json_success;

/// Parameters for the resource_read tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceReadParams {
    /// Resource to read, e.g. `{"kind":"course_detail","course_id":"c1"}`.
    pub resource: Resource,

    /// Version of the copy the caller already holds, if any.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Implementation of the resource_read tool.
pub async fn read_impl(platform: &Platform, params: ResourceReadParams) -> Result<CallToolResult, McpError> {
    let outcome = platform
        .read(&params.resource, params.client_version.as_deref())
        .await?;
    json_success(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::first_text;
    use versync_core::SyncOutcome;

    #[tokio::test]
    async fn test_read_then_not_modified() {
        let platform = Platform::in_memory(9).await.unwrap();

        let params = ResourceReadParams { resource: Resource::AdminUsers, client_version: None };
        let result = read_impl(&platform, params).await.unwrap();
        assert_eq!(first_text(&result), r#"{"data":[],"version":"1"}"#);

        let params = ResourceReadParams { resource: Resource::AdminUsers, client_version: Some("1".into()) };
        let result = read_impl(&platform, params).await.unwrap();
        let outcome: SyncOutcome = serde_json::from_str(&first_text(&result)).unwrap();
        assert_eq!(outcome, SyncOutcome::NotModified { version: "1".into() });
    }

    #[tokio::test]
    async fn test_invalid_resource() {
        let platform = Platform::in_memory(9).await.unwrap();
        let params = ResourceReadParams { resource: Resource::LessonContent { lesson_id: "".into() }, client_version: None };

        let err = read_impl(&platform, params).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }

    #[test]
    fn test_params_deserialize() {
        let params: ResourceReadParams =
            serde_json::from_str(r#"{"resource":{"kind":"chat_messages","thread_id":"t1"},"client_version":"4"}"#).unwrap();
        assert_eq!(params.resource, Resource::ChatMessages { thread_id: "t1".into() });
        assert_eq!(params.client_version.as_deref(), Some("4"));
    }
}
