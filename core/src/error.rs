//! Error type shared by the storage core.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by decoding code.
///
/// Cursors keep a copy of the first failure they hit, so the type is `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Stored bytes do not follow the expected encoding.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller asked for something the current state cannot provide,
    /// e.g. the key of an end cursor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}
