//! Runs and the jobs they are split into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratus_id::{FleetId, InstanceId, JobId, ProjectId, RunId};
use stratus_reconcile::LeaseState;
use stratus_resources::{
    BackendType, CreationPolicy, IdleDuration, InstanceType, Requirements, SpotPolicy,
};

use super::OfferFilter;

status_enum!(
    /// Lifecycle of a job.
    JobStatus, "job" {
        Submitted => "submitted",
        Provisioning => "provisioning",
        Pulling => "pulling",
        Running => "running",
        Terminating => "terminating",
        Terminated => "terminated",
        Aborted => "aborted",
        Failed => "failed",
        Done => "done",
    }
);

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Terminated | Self::Aborted | Self::Failed | Self::Done
        )
    }
}

status_enum!(
    /// Why a job left the running path.
    JobTerminationReason, "job termination reason" {
        FailedToStartDueToNoCapacity => "failed_to_start_due_to_no_capacity",
        TerminatedByUser => "terminated_by_user",
        TerminatedByServer => "terminated_by_server",
        InterruptedByNoCapacity => "interrupted_by_no_capacity",
        InstanceUnreachable => "instance_unreachable",
        DoneByRunner => "done_by_runner",
        AbortedByUser => "aborted_by_user",
        ExecutorError => "executor_error",
        MaxDurationExceeded => "max_duration_exceeded",
    }
);

impl JobTerminationReason {
    /// Status a terminating job settles in.
    pub fn final_status(&self) -> JobStatus {
        match self {
            Self::TerminatedByUser | Self::TerminatedByServer => JobStatus::Terminated,
            Self::AbortedByUser => JobStatus::Aborted,
            Self::DoneByRunner => JobStatus::Done,
            Self::FailedToStartDueToNoCapacity
            | Self::InterruptedByNoCapacity
            | Self::InstanceUnreachable
            | Self::ExecutorError
            | Self::MaxDurationExceeded => JobStatus::Failed,
        }
    }
}

/// Run-level record a job belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub project_id: ProjectId,
    pub run_name: String,
    pub deleted: bool,
    pub ssh_public_key: Option<String>,
}

/// What a job asks for and how it may be placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_name: String,
    pub requirements: Requirements,
    #[serde(default = "default_spot_policy")]
    pub spot_policy: SpotPolicy,
    #[serde(default)]
    pub creation_policy: CreationPolicy,
    #[serde(default)]
    pub idle_duration: Option<IdleDuration>,
    #[serde(default)]
    pub backends: Option<Vec<BackendType>>,
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    #[serde(default)]
    pub instance_types: Option<Vec<String>>,
    /// Fleets the job may run in. `None` allows any fleet of the project.
    #[serde(default)]
    pub fleets: Option<Vec<FleetId>>,
    /// Cap on offers tried per provisioning attempt.
    #[serde(default)]
    pub max_offers: Option<usize>,
}

fn default_spot_policy() -> SpotPolicy {
    SpotPolicy::OnDemand
}

impl JobSpec {
    pub const DEFAULT_MAX_OFFERS: usize = 15;

    pub fn new(job_name: impl Into<String>, requirements: Requirements) -> Self {
        Self {
            job_name: job_name.into(),
            requirements,
            spot_policy: default_spot_policy(),
            creation_policy: CreationPolicy::default(),
            idle_duration: None,
            backends: None,
            regions: None,
            instance_types: None,
            fleets: None,
            max_offers: None,
        }
    }

    pub fn offer_filter(&self) -> OfferFilter {
        OfferFilter {
            backends: self.backends.clone(),
            regions: self.regions.clone(),
            instance_types: self.instance_types.clone(),
        }
    }

    pub fn max_offers(&self) -> usize {
        self.max_offers.unwrap_or(Self::DEFAULT_MAX_OFFERS)
    }
}

/// Where and on what a job (or instance) was provisioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProvisioningData {
    pub backend: BackendType,
    pub instance_type: InstanceType,
    /// Provider-side instance id.
    pub instance_id: String,
    pub hostname: Option<String>,
    pub region: String,
    pub availability_zone: Option<String>,
    pub price: f64,
    pub username: String,
    pub ssh_port: Option<u16>,
    /// Opaque provider data needed to tear the instance down.
    pub backend_data: Option<String>,
}

impl JobProvisioningData {
    /// Whether `other` sits in the same backend, region and zone.
    pub fn is_colocated_with(&self, other: &JobProvisioningData) -> bool {
        self.backend == other.backend
            && self.region == other.region
            && match (&self.availability_zone, &other.availability_zone) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub project_id: ProjectId,
    pub run_id: RunId,
    pub fleet_id: Option<FleetId>,
    pub instance_id: Option<InstanceId>,
    pub job_num: u32,
    pub replica_num: u32,
    pub submission_num: u32,
    pub status: JobStatus,
    pub termination_reason: Option<JobTerminationReason>,
    pub termination_reason_message: Option<String>,
    pub spec: JobSpec,
    pub job_provisioning_data: Option<JobProvisioningData>,
    pub submitted_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    pub deleted: bool,
    pub lease: LeaseState,
}

impl JobRecord {
    /// A fresh `submitted` job of `run`.
    pub fn submitted(run: &RunRecord, job_num: u32, spec: JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            project_id: run.project_id,
            run_id: run.id,
            fleet_id: None,
            instance_id: None,
            job_num,
            replica_num: 0,
            submission_num: 0,
            status: JobStatus::Submitted,
            termination_reason: None,
            termination_reason_message: None,
            spec,
            job_provisioning_data: None,
            submitted_at: now,
            last_processed_at: now,
            deleted: false,
            lease: LeaseState::default(),
        }
    }

    fn apply_update(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(reason) = update.termination_reason {
            self.termination_reason = Some(reason);
        }
        if let Some(message) = &update.termination_reason_message {
            self.termination_reason_message = Some(message.clone());
        }
        if let Some(instance_id) = update.instance_id {
            self.instance_id = Some(instance_id);
        }
        if let Some(fleet_id) = update.fleet_id {
            self.fleet_id = Some(fleet_id);
        }
        if let Some(data) = &update.job_provisioning_data {
            self.job_provisioning_data = Some(data.clone());
        }
    }
}

leasable_record!(JobRecord, JobUpdate);

/// Column changes of one job processing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub termination_reason: Option<JobTerminationReason>,
    pub termination_reason_message: Option<String>,
    pub instance_id: Option<InstanceId>,
    pub fleet_id: Option<FleetId>,
    pub job_provisioning_data: Option<JobProvisioningData>,
}

impl JobUpdate {
    /// Moves the job to `terminating` for `reason`.
    pub fn terminate(reason: JobTerminationReason, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Terminating),
            termination_reason: Some(reason),
            termination_reason_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [JobStatus::Submitted, JobStatus::Terminating, JobStatus::Done] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        let err = "exploded".parse::<JobStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown job status: exploded");
    }

    #[test]
    fn test_termination_reason_final_status() {
        assert_eq!(
            JobTerminationReason::FailedToStartDueToNoCapacity.final_status(),
            JobStatus::Failed
        );
        assert_eq!(
            JobTerminationReason::TerminatedByServer.final_status(),
            JobStatus::Terminated
        );
        assert_eq!(
            JobTerminationReason::AbortedByUser.final_status(),
            JobStatus::Aborted
        );
        assert_eq!(
            JobTerminationReason::DoneByRunner.final_status(),
            JobStatus::Done
        );
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: JobSpec = serde_json::from_value(serde_json::json!({
            "job_name": "train-0",
            "requirements": Requirements::default(),
        }))
        .unwrap();
        assert_eq!(spec.spot_policy, SpotPolicy::OnDemand);
        assert_eq!(spec.creation_policy, CreationPolicy::ReuseOrCreate);
        assert_eq!(spec.max_offers(), 15);
    }
}
