//! Persisted resources reconciled by the control plane.
//!
//! Every reconcilable record carries the lease columns
//! ([`LeaseState`](stratus_reconcile::LeaseState)), `last_processed_at` and
//! the soft-delete marker. Records are never hard-deleted by a pipeline.

use thiserror::Error;

/// A status column held a value this build does not know.
#[derive(Debug, Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a snake_case status enum with `as_str`, `Display` and `FromStr`.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::models::UnknownStatus {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Implements the lease plumbing shared by every reconcilable record.
///
/// The record must have `id`, `lease`, `last_processed_at` and `deleted`
/// fields and an inherent `apply_update(&mut self, &$update)`.
macro_rules! leasable_record {
    ($record:ty, $update:ty) => {
        impl stratus_reconcile::Leasable for $record {
            type Update = $update;

            fn key(&self) -> String {
                self.id.to_string()
            }

            fn lease(&self) -> &stratus_reconcile::LeaseState {
                &self.lease
            }

            fn last_processed_at(&self) -> chrono::DateTime<chrono::Utc> {
                self.last_processed_at
            }
        }

        impl stratus_reconcile::MemoryRecord for $record {
            fn lease_mut(&mut self) -> &mut stratus_reconcile::LeaseState {
                &mut self.lease
            }

            fn set_last_processed_at(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.last_processed_at = at;
            }

            fn is_deleted(&self) -> bool {
                self.deleted
            }

            fn apply(&mut self, update: &$update) {
                self.apply_update(update);
            }
        }
    };
}

mod compute_group;
mod fleet;
mod instance;
mod job;
mod placement_group;
mod project;
mod volume;

pub use compute_group::{
    ComputeGroupProvisioningData, ComputeGroupRecord, ComputeGroupStatus, ComputeGroupUpdate,
};
pub use fleet::{FleetRecord, FleetSpec, FleetStatus, FleetUpdate};
pub use instance::{InstanceRecord, InstanceSpec, InstanceStatus, InstanceUpdate};
pub use job::{
    JobProvisioningData, JobRecord, JobSpec, JobStatus, JobTerminationReason, JobUpdate, RunRecord,
};
pub use placement_group::{PlacementGroupRecord, PlacementGroupUpdate};
pub use project::{BackendConfig, OfferFilter, ProjectRecord, SshKeys};
pub use volume::{
    VolumeConfiguration, VolumeProvisioningData, VolumeRecord, VolumeStatus, VolumeUpdate,
};
