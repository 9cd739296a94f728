use thiserror::Error;

/// Source generation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodegenError {
    /// The requested module name is not a Rust identifier.
    #[error("'{0}' is not a valid module name")]
    InvalidName(String),
}

/// Result alias for source generation.
pub type CodegenResult<T> = Result<T, CodegenError>;
