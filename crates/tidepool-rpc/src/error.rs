//! RPC error types.

use thiserror::Error;

/// Failure below the JSON-RPC layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the endpoint. Nothing was sent, so this is retried.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    /// The request failed after it may have been sent: the exchange broke
    /// off, timed out, or the answer was not readable HTTP. Not retried.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Non-success HTTP status.
    #[error("JSON RPC failed: {status} {reason}")]
    Http { status: u16, reason: String },

    /// The backend answered with an application error payload.
    #[error("backend error {}: {message}", code.map_or_else(|| "-".to_string(), |c| c.to_string()))]
    Backend { code: Option<i64>, message: String },

    /// Every attempt failed at the connection level.
    #[error("unable to reach backend after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Whether the backend itself rejected the call, as opposed to the call
    /// never reaching it.
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Http { .. })
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
