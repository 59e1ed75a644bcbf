//! record_write tool implementation.
//!
//! Commits one record to the catalog and runs the invalidation cascade its
//! dependencies call for.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::{Deserialize, Serialize};
use versync_core::{ApiResponse, CascadeReport};

use crate::catalog::RecordWrite;
use crate::platform::Platform;
use crate::tools::json_content;

/// Output from the record_write tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordWriteOutput {
    #[serde(flatten)]
    pub response: ApiResponse,

    /// What the cascade did. Absent when the write was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeReport>,
}

/// Implementation of the record_write tool.
///
/// A rejected write is reported as a tool error carrying the same
/// `{status, message}` shape.
pub async fn write_impl(platform: &Platform, params: RecordWrite) -> Result<CallToolResult, McpError> {
    let (response, cascade) = platform.write(params).await;
    let succeeded = response.is_success();
    let content: Content = json_content(&RecordWriteOutput { response, cascade })?;

    if succeeded {
        Ok(CallToolResult::success(vec![content]))
    } else {
        Ok(CallToolResult::error(vec![content]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::first_text;
    use versync_core::{ApiStatus, EntityKind};

    #[tokio::test]
    async fn test_write_reports_cascade() {
        let platform = Platform::in_memory(9).await.unwrap();
        let params = RecordWrite::upsert(EntityKind::Course, "c1").titled("Intro");

        let result = write_impl(&platform, params).await.unwrap();
        let output: RecordWriteOutput = serde_json::from_str(&first_text(&result)).unwrap();

        assert_eq!(output.response.status, ApiStatus::Success);
        let cascade = output.cascade.unwrap();
        assert!(cascade.is_complete());
        assert!(cascade.versions_bumped >= 3);
    }

    #[tokio::test]
    async fn test_rejected_write_is_tool_error() {
        let platform = Platform::in_memory(9).await.unwrap();
        let params = RecordWrite::upsert(EntityKind::ChatMessage, "m1");

        let result = write_impl(&platform, params).await.unwrap();
        assert_eq!(result.is_error, Some(true));

        let output: RecordWriteOutput = serde_json::from_str(&first_text(&result)).unwrap();
        assert_eq!(output.response.status, ApiStatus::Error);
        assert!(output.response.message.contains("INVALID_INPUT"));
        assert!(output.cascade.is_none());
    }
}
