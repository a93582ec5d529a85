//! Placement error types.

use thiserror::Error;

/// Errors raised while assembling filter and weigher chains.
///
/// Running a chain never fails; only resolving configured names does.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("scheduler host filter(s) not found: {}", .0.join(", "))]
    UnknownFilters(Vec<String>),

    #[error("scheduler host weigher(s) not found: {}", .0.join(", "))]
    UnknownWeighers(Vec<String>),
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors from evaluating a backend-reported filter or goodness function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluatorError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,
}

pub type EvaluatorResult<T> = Result<T, EvaluatorError>;
