//! Error kinds surfaced by every fallible engine operation.

use std::io;

use thiserror::Error;

/// Failure raised eagerly at the offending call.
#[derive(Debug, Error)]
pub enum ArrayError {
    /// Incompatible shapes for broadcast, reshape, or construction.
    #[error("shape error: {0}")]
    Shape(String),
    /// Dtype or operand-kind mismatch, or an unsupported dtype/scalar combination.
    #[error("type error: {0}")]
    Type(String),
    /// Unreachable or mismatched device.
    #[error("device error: {0}")]
    Device(String),
    /// Out-of-range axis or index.
    #[error("index error: {0}")]
    Index(String),
    /// Unsupported parameter value or a statistic over an empty set.
    #[error("value error: {0}")]
    Value(String),
    /// Underlying read/write failure during persistence.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ArrayError {
    /// Builds an [`ArrayError::Shape`].
    pub fn shape(message: impl Into<String>) -> Self {
        ArrayError::Shape(message.into())
    }

    /// Builds an [`ArrayError::Type`].
    pub fn type_error(message: impl Into<String>) -> Self {
        ArrayError::Type(message.into())
    }

    /// Builds an [`ArrayError::Device`].
    pub fn device(message: impl Into<String>) -> Self {
        ArrayError::Device(message.into())
    }

    /// Builds an [`ArrayError::Index`].
    pub fn index(message: impl Into<String>) -> Self {
        ArrayError::Index(message.into())
    }

    /// Builds an [`ArrayError::Value`].
    pub fn value(message: impl Into<String>) -> Self {
        ArrayError::Value(message.into())
    }
}

pub type ArrayResult<T> = Result<T, ArrayError>;
