//! Error types and result aliases for the core data model.

/// The result type used throughout reshard-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A key range with `start >= end` or otherwise malformed bounds.
    #[error("invalid key range: {message}")]
    InvalidRange {
        /// Description of what made the range invalid.
        message: String,
    },

    /// A topology that fails structural validation.
    #[error("invalid topology: {message}")]
    InvalidTopology {
        /// Description of the validation failure.
        message: String,
    },
}

impl Error {
    /// Creates a new invalid-topology error.
    #[must_use]
    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Creates a new invalid-range error.
    #[must_use]
    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRange {
            message: message.into(),
        }
    }
}
