//! Closed ranges with optional bounds.

use serde::{Deserialize, Serialize};

use crate::RangeError;

/// A closed interval `[min, max]`; a missing bound is unbounded.
///
/// Invariant: `min <= max` whenever both are present.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy + std::fmt::Debug> Range<T> {
    /// Builds a range, rejecting `min > max`.
    pub fn new(min: Option<T>, max: Option<T>) -> Result<Self, RangeError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(RangeError {
                    min: format!("{lo:?}"),
                    max: format!("{hi:?}"),
                });
            }
        }
        Ok(Self { min, max })
    }

    /// Both bounds set to `value`.
    pub fn exact(value: T) -> Self {
        Self {
            min: Some(value),
            max: Some(value),
        }
    }

    /// `[min, ∞)`.
    pub fn at_least(min: T) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// `(-∞, max]`.
    pub fn at_most(max: T) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Unbounded on both sides.
    pub fn any() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min.is_none_or(|lo| value >= lo) && self.max.is_none_or(|hi| value <= hi)
    }

    /// Intersection of two ranges, `None` when they are disjoint.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(if a >= b { a } else { b }),
            (a, b) => a.or(b),
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(if a <= b { a } else { b }),
            (a, b) => a.or(b),
        };
        Self::new(min, max).ok()
    }
}

impl<T: std::fmt::Display> std::fmt::Display for Range<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.min, &self.max) {
            (Some(lo), Some(hi)) => write!(f, "{lo}..{hi}"),
            (Some(lo), None) => write!(f, "{lo}.."),
            (None, Some(hi)) => write!(f, "..{hi}"),
            (None, None) => write!(f, ".."),
        }
    }
}
