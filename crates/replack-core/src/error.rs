use thiserror::Error;

/// Shared lightweight error type for core primitive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Invalid caller input or malformed primitive value.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Parsing failure for a textual primitive.
    #[error("parse error: {0}")]
    Parse(&'static str),
}
