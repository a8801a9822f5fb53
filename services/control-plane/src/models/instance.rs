//! Cloud instances, either pooled in a fleet or bound to a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_id::{FleetId, InstanceId, JobId, ProjectId};
use stratus_reconcile::{LeaseState, TerminationRetry};
use stratus_resources::{InstanceOfferWithAvailability, Requirements, SpotPolicy};

use super::{JobProvisioningData, OfferFilter};

status_enum!(
    /// Lifecycle of an instance.
    InstanceStatus, "instance" {
        Pending => "pending",
        Provisioning => "provisioning",
        Idle => "idle",
        Busy => "busy",
        Terminating => "terminating",
        Terminated => "terminated",
    }
);

impl InstanceStatus {
    /// Whether the instance exists or is about to exist in the cloud.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Terminating | Self::Terminated)
    }
}

/// What a `pending` instance should be created as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub requirements: Requirements,
    pub spot_policy: SpotPolicy,
    #[serde(default)]
    pub filter: OfferFilter,
}

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub project_id: ProjectId,
    pub fleet_id: Option<FleetId>,
    pub name: String,
    pub instance_num: u32,
    pub status: InstanceStatus,
    pub status_message: Option<String>,
    /// Set for instances the control plane still has to create.
    pub spec: Option<InstanceSpec>,
    pub offer: Option<InstanceOfferWithAvailability>,
    pub job_provisioning_data: Option<JobProvisioningData>,
    pub job_id: Option<JobId>,
    pub termination_retry: TerminationRetry,
    pub created_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub lease: LeaseState,
}

impl InstanceRecord {
    /// An instance the instances pipeline will create from `spec`.
    pub fn pending(
        project_id: ProjectId,
        fleet_id: Option<FleetId>,
        name: impl Into<String>,
        instance_num: u32,
        spec: InstanceSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            project_id,
            fleet_id,
            name: name.into(),
            instance_num,
            status: InstanceStatus::Pending,
            status_message: None,
            spec: Some(spec),
            offer: None,
            job_provisioning_data: None,
            job_id: None,
            termination_retry: TerminationRetry::default(),
            created_at: now,
            last_processed_at: now,
            deleted: false,
            deleted_at: None,
            lease: LeaseState::default(),
        }
    }

    /// An instance that was just provisioned for `job_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn provisioned_for_job(
        project_id: ProjectId,
        fleet_id: Option<FleetId>,
        name: impl Into<String>,
        instance_num: u32,
        job_id: JobId,
        offer: InstanceOfferWithAvailability,
        data: JobProvisioningData,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: InstanceStatus::Busy,
            spec: None,
            offer: Some(offer),
            job_provisioning_data: Some(data),
            job_id: Some(job_id),
            ..Self::pending(
                project_id,
                fleet_id,
                name,
                instance_num,
                InstanceSpec {
                    requirements: Requirements::default(),
                    spot_policy: SpotPolicy::OnDemand,
                    filter: OfferFilter::default(),
                },
                now,
            )
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == InstanceStatus::Idle && self.job_id.is_none() && !self.deleted
    }

    fn apply_update(&mut self, update: &InstanceUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(message) = &update.status_message {
            self.status_message = Some(message.clone());
        }
        if let Some(offer) = &update.offer {
            self.offer = Some(offer.clone());
        }
        if let Some(data) = &update.job_provisioning_data {
            self.job_provisioning_data = Some(data.clone());
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

leasable_record!(InstanceRecord, InstanceUpdate);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceUpdate {
    pub status: Option<InstanceStatus>,
    pub status_message: Option<String>,
    pub offer: Option<InstanceOfferWithAvailability>,
    pub job_provisioning_data: Option<JobProvisioningData>,
    pub termination_retry: Option<TerminationRetry>,
    /// Soft-deletes the row.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InstanceUpdate {
    /// Final state of an instance that no longer exists in the cloud.
    pub fn terminated(now: DateTime<Utc>, message: Option<String>) -> Self {
        Self {
            status: Some(InstanceStatus::Terminated),
            status_message: message,
            deleted_at: Some(now),
            ..Default::default()
        }
    }
}
