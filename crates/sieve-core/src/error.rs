use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Malformed expression or plan: unknown alias/column, dangling edge,
    /// duplicate alias across join inputs.
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Function applied to operand types outside its signature.
    #[error("Type error: {0}")]
    Type(String),

    /// Partition descriptor that cannot be interpreted under the declared
    /// partition schema.
    #[error("Invalid partition metadata: {0}")]
    PartitionMetadata(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}
