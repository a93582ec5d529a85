//! Errors from the share and service store.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database could not be created or opened.
    #[error("cannot open state database: {0}")]
    Open(String),

    /// redb failed while a share or service record was being read or written.
    #[error("state database error: {0}")]
    Storage(String),

    /// A share or service record could not be encoded.
    #[error("cannot encode record: {0}")]
    Encode(String),

    /// A stored record does not decode as its type.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The share a scheduling decision refers to does not exist.
    #[error("share not found: {0}")]
    ShareNotFound(String),
}
