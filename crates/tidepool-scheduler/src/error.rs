//! Scheduler error types.

use std::fmt;

use thiserror::Error;
use tidepool_placement::PlacementError;

/// Why no host could be chosen. Reported to the caller as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoValidHostReason {
    /// No backend is reporting as live for the topic.
    NoBackends,
    /// Every live backend was excluded by `ignore_hosts` or earlier attempts.
    AllExcluded,
    /// No backend satisfies the required capacity and capabilities.
    NoneSatisfy { share_id: String },
    /// Fewer eligible backends than instances requested.
    InsufficientHosts { requested: usize, available: usize },
    /// The request has been rescheduled too many times.
    MaxAttemptsExceeded { max_attempts: u32, share_id: String },
    /// A specific host was asked for and does not qualify.
    CannotPlace { share_id: String, host: String },
}

impl fmt::Display for NoValidHostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBackends => f.write_str("no backends are reporting"),
            Self::AllExcluded => f.write_str("all backends excluded by prior attempts"),
            Self::NoneSatisfy { share_id } => write!(
                f,
                "no backend satisfies required capacity/capabilities for share {share_id}"
            ),
            Self::InsufficientHosts {
                requested,
                available,
            } => write!(f, "requested {requested} hosts but only {available} are eligible"),
            Self::MaxAttemptsExceeded {
                max_attempts,
                share_id,
            } => write!(
                f,
                "Exceeded max scheduling attempts {max_attempts} for share {share_id}"
            ),
            Self::CannotPlace { share_id, host } => write!(f, "Cannot place share {share_id} on {host}"),
        }
    }
}

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no valid host was found: {0}")]
    NoValidHost(NoValidHostReason),

    #[error("scheduler host filter(s) not found: {}", .0.join(", "))]
    FilterNotFound(Vec<String>),

    #[error("scheduler host weigher(s) not found: {}", .0.join(", "))]
    WeigherNotFound(Vec<String>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid pool filter {key}: {message}")]
    InvalidPoolFilter { key: String, message: String },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("state store error: {0}")]
    State(#[from] tidepool_state::StateError),
}

impl SchedulerError {
    pub fn no_valid_host(reason: NoValidHostReason) -> Self {
        Self::NoValidHost(reason)
    }

    /// The reason, if this is a NoValidHost error.
    pub fn no_valid_host_reason(&self) -> Option<&NoValidHostReason> {
        match self {
            Self::NoValidHost(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<PlacementError> for SchedulerError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::UnknownFilters(names) => Self::FilterNotFound(names),
            PlacementError::UnknownWeighers(names) => Self::WeigherNotFound(names),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
