use sieve_core::Error as CoreError;
use sieve_eval::EvalError;
use thiserror::Error;

/// Result type local to sieve-planner.
pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Well-formed YAML describing an invalid plan.
    #[error("invalid plan file: {0}")]
    Dsl(String),
}

impl PlanError {
    /// The core error kind behind this failure, if any.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            PlanError::Core(e) => Some(e),
            _ => None,
        }
    }
}
