//! Unified error types for versync.
//!
//! Every variant carries a stable prefix so log lines and tool errors can be
//! matched without parsing the message body.

use std::time::Duration;

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the sync layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty resource id).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The remote store could not be reached.
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),

    /// A remote store operation did not finish in time.
    #[error("STORE_TIMEOUT: operation exceeded {0:?}")]
    StoreTimeout(Duration),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored version counter could not be read as an integer.
    #[error("CACHE_ERROR: corrupt version counter for {0}")]
    CorruptVersion(String),

    /// Payload could not be serialized or deserialized.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database of record failed to compute a resource.
    #[error("SOURCE_FAILED: {0}")]
    SourceFailed(String),

    /// A sync response did not follow the wire contract.
    #[error("PROTOCOL_ERROR: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether this error means the remote store is degraded rather than the
    /// request being wrong.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::StoreTimeout(_) | Error::Database(_) | Error::CorruptVersion(_)
        )
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::SourceFailed(msg) => (-32000, msg.clone()),
            Error::StoreUnavailable(msg) => (-32001, msg.clone()),
            Error::StoreTimeout(_) => (-32001, err.to_string()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::CorruptVersion(key) => (-32002, format!("corrupt version counter for {key}")),
            Error::Serialization(e) => (-32003, e.to_string()),
            Error::Protocol(msg) => (-32004, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
