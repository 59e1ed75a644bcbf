//! Structured errors for the versync MCP server.
//!
//! Errors raised by the sync layer convert through `versync_core::Error`;
//! these cover what only the tool surface can get wrong.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Structured errors for the versync MCP server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid tool arguments (e.g., empty batch).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Tool output could not be encoded.
    #[error("OUTPUT_FAILED: {0}")]
    Output(String),
}

impl From<ServerError> for McpError {
    fn from(err: ServerError) -> Self {
        let (code, message) = match &err {
            ServerError::InvalidInput(msg) => (-32602, msg.clone()),
            ServerError::Output(msg) => (-32603, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
