//! Compute groups: multi-node clusters provisioned as one cloud object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_id::{ComputeGroupId, FleetId, ProjectId};
use stratus_reconcile::{LeaseState, TerminationRetry};
use stratus_resources::BackendType;

status_enum!(
    ComputeGroupStatus, "compute group" {
        Running => "running",
        Terminating => "terminating",
        Terminated => "terminated",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeGroupProvisioningData {
    /// Provider-side group id.
    pub group_id: String,
    pub region: String,
    pub backend_data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ComputeGroupRecord {
    pub id: ComputeGroupId,
    pub project_id: ProjectId,
    pub fleet_id: Option<FleetId>,
    pub backend: BackendType,
    pub status: ComputeGroupStatus,
    pub provisioning_data: ComputeGroupProvisioningData,
    pub termination_retry: TerminationRetry,
    pub last_processed_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub lease: LeaseState,
}

impl ComputeGroupRecord {
    fn apply_update(&mut self, update: &ComputeGroupUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(retry) = update.termination_retry {
            self.termination_retry = retry;
        }
        if let Some(deleted_at) = update.deleted_at {
            self.deleted = true;
            self.deleted_at = Some(deleted_at);
        }
    }
}

leasable_record!(ComputeGroupRecord, ComputeGroupUpdate);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeGroupUpdate {
    pub status: Option<ComputeGroupStatus>,
    pub termination_retry: Option<TerminationRetry>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ComputeGroupUpdate {
    pub fn terminated(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(ComputeGroupStatus::Terminated),
            deleted_at: Some(now),
            ..Default::default()
        }
    }
}
