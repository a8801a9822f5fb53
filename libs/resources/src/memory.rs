//! Memory quantities.

use serde::{Deserialize, Serialize};

/// An amount of memory or disk, in GiB.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Memory(f64);

impl Memory {
    pub const fn gib(value: f64) -> Self {
        Self(value)
    }

    pub fn mib(value: u64) -> Self {
        Self(value as f64 / 1024.0)
    }

    pub const fn as_gib(&self) -> f64 {
        self.0
    }
}

impl std::ops::Mul<u32> for Memory {
    type Output = Memory;

    fn mul(self, rhs: u32) -> Memory {
        Memory(self.0 * f64::from(rhs))
    }
}

impl std::iter::Sum for Memory {
    fn sum<I: Iterator<Item = Memory>>(iter: I) -> Memory {
        Memory(iter.map(|m| m.0).sum())
    }
}

impl std::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}GB", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mib_conversion() {
        assert_eq!(Memory::mib(2048), Memory::gib(2.0));
    }

    #[test]
    fn test_sum_and_mul() {
        let total: Memory = [Memory::gib(40.0), Memory::gib(40.0)].into_iter().sum();
        assert_eq!(total, Memory::gib(40.0) * 2);
        assert_eq!(total.to_string(), "80GB");
    }
}
