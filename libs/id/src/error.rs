//! Error types for identifier parsing.

use thiserror::Error;

/// Errors that can occur when parsing an identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The id string is empty.
    #[error("id cannot be empty")]
    Empty,

    /// The id carries another resource type's prefix.
    #[error("invalid id prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        expected: &'static str,
        actual: String,
    },

    /// The id has no `_` between prefix and ULID.
    #[error("id missing underscore separator")]
    MissingSeparator,

    /// The ULID portion is malformed.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    /// Returns true if the id belonged to a different resource type.
    pub fn is_prefix_error(&self) -> bool {
        matches!(self, IdError::InvalidPrefix { .. })
    }
}
