//! Fleets: named pools of instances sharing one spec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_id::{FleetId, ProjectId};
use stratus_reconcile::LeaseState;
use stratus_resources::{Range, Requirements, SpotPolicy};

use super::{InstanceSpec, OfferFilter};

status_enum!(
    FleetStatus, "fleet" {
        Submitted => "submitted",
        Active => "active",
        Terminating => "terminating",
        Terminated => "terminated",
        Failed => "failed",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSpec {
    /// Number of instances the fleet keeps.
    pub nodes: Range<u32>,
    pub requirements: Requirements,
    pub spot_policy: SpotPolicy,
    #[serde(default)]
    pub filter: OfferFilter,
}

impl FleetSpec {
    pub fn instance_spec(&self) -> InstanceSpec {
        InstanceSpec {
            requirements: self.requirements.clone(),
            spot_policy: self.spot_policy,
            filter: self.filter.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FleetRecord {
    pub id: FleetId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: FleetStatus,
    pub status_message: Option<String>,
    pub spec: FleetSpec,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub lease: LeaseState,
}

impl FleetRecord {
    pub fn submitted(
        project_id: ProjectId,
        name: impl Into<String>,
        spec: FleetSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: FleetId::new(),
            project_id,
            name: name.into(),
            status: FleetStatus::Submitted,
            status_message: None,
            spec,
            created_at: now,
            last_processed_at: now,
            deleted: false,
            deleted_at: None,
            lease: LeaseState::default(),
        }
    }

    fn apply_update(&mut self, update: &FleetUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(message) = &update.status_message {
            self.status_message = Some(message.clone());
        }
        if let Some(deleted_at) = update.deleted_at {
            self.deleted = true;
            self.deleted_at = Some(deleted_at);
        }
    }
}

leasable_record!(FleetRecord, FleetUpdate);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetUpdate {
    pub status: Option<FleetStatus>,
    pub status_message: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}
