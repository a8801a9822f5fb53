//! Provisioning policies attached to runs and fleets.

use serde::{Deserialize, Serialize};

/// Whether spot capacity may, must, or must not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpotPolicy {
    Spot,
    OnDemand,
    /// Prefer spot, fall back to on-demand.
    Auto,
}

impl SpotPolicy {
    /// Spot flag to request on each provisioning attempt, in order.
    ///
    /// `Auto` yields two attempts: spot first, then on-demand.
    pub fn attempts(&self) -> &'static [bool] {
        match self {
            Self::Spot => &[true],
            Self::OnDemand => &[false],
            Self::Auto => &[true, false],
        }
    }
}

/// Whether a job may provision new instances or only reuse idle ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreationPolicy {
    Reuse,
    #[default]
    ReuseOrCreate,
}

/// How long an idle instance is kept before termination, in seconds.
///
/// `0` terminates immediately; any negative value disables idle termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdleDuration(i64);

impl IdleDuration {
    pub const DISABLED: Self = Self(-1);
    pub const IMMEDIATE: Self = Self(0);

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    pub const fn is_disabled(&self) -> bool {
        self.0 < 0
    }
}
