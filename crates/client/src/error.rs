//! Client cache error types.

use tokio_rusqlite::rusqlite;

/// Errors from the client cache and the client side of the sync protocol.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Local database operation failed.
    #[error("CLIENT_CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// A record or response payload could not be (de)serialized.
    #[error("CLIENT_CACHE_ERROR: serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by the sync layer or the server it talks to, including
    /// responses that break the wire contract.
    #[error(transparent)]
    Core(#[from] versync_core::Error),
}

impl From<tokio_rusqlite::Error<ClientError>> for ClientError {
    fn from(err: tokio_rusqlite::Error<ClientError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => ClientError::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => ClientError::Database(tokio_rusqlite::Error::Close(c)),
            _ => ClientError::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for ClientError {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        ClientError::Database(err)
    }
}

impl From<rusqlite::Error> for ClientError {
    fn from(err: rusqlite::Error) -> Self {
        ClientError::Database(tokio_rusqlite::Error::Error(err))
    }
}
