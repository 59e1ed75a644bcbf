//! MCP tool implementations.
//!
//! This module contains all tools exposed by the versync server.

pub mod cache;
pub mod record_write;
pub mod resource_read;
pub mod resource_read_batch;
pub mod version_get;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ServerError;

/// Encode a tool output as a single JSON text block.
pub(crate) fn json_content<T: Serialize>(output: &T) -> Result<Content, McpError> {
    let json = serde_json::to_string(output).map_err(|e| ServerError::Output(format!("Failed to serialize output: {e}")))?;
    Ok(Content::text(json))
}

pub(crate) fn json_success<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![json_content(output)?]))
}

/// Text of the first content block, for tests.
#[cfg(test)]
pub(crate) fn first_text(result: &CallToolResult) -> String {
    let content_val = serde_json::to_value(&result.content[0]).unwrap();
    content_val
        .get("text")
        .and_then(|v| v.as_str())
        .expect("Expected text field in content")
        .to_string()
}
