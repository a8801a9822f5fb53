//! Network volumes attached to instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_id::{ProjectId, VolumeId};
use stratus_reconcile::LeaseState;
use stratus_resources::{BackendType, Memory};

status_enum!(
    VolumeStatus, "volume" {
        Submitted => "submitted",
        Provisioning => "provisioning",
        Active => "active",
        Failed => "failed",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfiguration {
    pub backend: BackendType,
    pub region: String,
    pub size: Option<Memory>,
    /// Registers an existing provider volume instead of creating one.
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProvisioningData {
    pub volume_id: String,
    pub size: Memory,
    pub availability_zone: Option<String>,
    pub backend_data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VolumeRecord {
    pub id: VolumeId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: VolumeStatus,
    pub status_message: Option<String>,
    pub configuration: VolumeConfiguration,
    pub provisioning_data: Option<VolumeProvisioningData>,
    /// Deletion was requested; the volume is released once the provider
    /// confirms.
    pub to_be_deleted: bool,
    pub last_processed_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub lease: LeaseState,
}

impl VolumeRecord {
    pub fn submitted(
        project_id: ProjectId,
        name: impl Into<String>,
        configuration: VolumeConfiguration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VolumeId::new(),
            project_id,
            name: name.into(),
            status: VolumeStatus::Submitted,
            status_message: None,
            configuration,
            provisioning_data: None,
            to_be_deleted: false,
            last_processed_at: now,
            deleted: false,
            deleted_at: None,
            lease: LeaseState::default(),
        }
    }

    fn apply_update(&mut self, update: &VolumeUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(message) = &update.status_message {
            self.status_message = Some(message.clone());
        }
        if let Some(data) = &update.provisioning_data {
            self.provisioning_data = Some(data.clone());
        }
        if let Some(deleted_at) = update.deleted_at {
            self.deleted = true;
            self.deleted_at = Some(deleted_at);
        }
    }
}

leasable_record!(VolumeRecord, VolumeUpdate);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeUpdate {
    pub status: Option<VolumeStatus>,
    pub status_message: Option<String>,
    pub provisioning_data: Option<VolumeProvisioningData>,
    pub deleted_at: Option<DateTime<Utc>>,
}
