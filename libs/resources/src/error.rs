//! Error types for requirement construction and combination.

use thiserror::Error;

/// A range was constructed with `min > max`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid range: min {min} is greater than max {max}")]
pub struct RangeError {
    pub min: String,
    pub max: String,
}

/// Two requirement sets cannot be satisfied at the same time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CombineError {
    /// Both sides pin a value and the values differ.
    #[error("incompatible {field}: {left} vs {right}")]
    Incompatible {
        field: &'static str,
        left: String,
        right: String,
    },

    /// Two ranges do not overlap.
    #[error("{field} ranges do not intersect")]
    DisjointRanges { field: &'static str },
}

impl CombineError {
    pub(crate) fn incompatible(
        field: &'static str,
        left: impl std::fmt::Debug,
        right: impl std::fmt::Debug,
    ) -> Self {
        Self::Incompatible {
            field,
            left: format!("{left:?}"),
            right: format!("{right:?}"),
        }
    }

    /// Name of the requirement field that failed to combine.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Incompatible { field, .. } | Self::DisjointRanges { field } => field,
        }
    }
}
