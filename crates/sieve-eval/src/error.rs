use sieve_core::Error as CoreError;
use thiserror::Error;

/// Result type local to sieve-eval.
pub type Result<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("type error: {0}")]
    Type(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("bad partition value: {0}")]
    PartitionValue(String),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for EvalError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Type(m) => EvalError::Type(m),
            CoreError::Analysis(m) => EvalError::UnknownColumn(m),
            CoreError::PartitionMetadata(m) => EvalError::PartitionValue(m),
            other => EvalError::Core(other),
        }
    }
}

impl From<EvalError> for CoreError {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::Type(m) => CoreError::Type(m),
            EvalError::UnknownColumn(m) => CoreError::Analysis(m),
            EvalError::PartitionValue(m) => CoreError::PartitionMetadata(m),
            EvalError::Core(e) => e,
        }
    }
}
