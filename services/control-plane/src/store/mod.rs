//! Repositories the pipelines read from and write to.
//!
//! Leased rows go through [`LeaseStore`]; everything else a processor needs
//! (lookups, pool listings, optimistic instance assignment) goes through the
//! domain traits below. Both Postgres ([`crate::db`]) and the in-memory
//! [`MemoryStore`] implement all of them.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use stratus_id::{FleetId, InstanceId, JobId, ProjectId, RunId};
use stratus_reconcile::{LeaseStore, LockToken};

use crate::db::DbError;
use crate::models::{
    BackendConfig, ComputeGroupRecord, FleetRecord, InstanceRecord, JobRecord,
    PlacementGroupRecord, ProjectRecord, RunRecord, VolumeRecord,
};

pub type StoreResult<T> = Result<T, DbError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_project(&self, project_id: &ProjectId) -> StoreResult<Option<ProjectRecord>>;

    async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<RunRecord>>;

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>>;

    /// Latest submission of job 0 of the given replica.
    async fn get_master_job(
        &self,
        run_id: &RunId,
        replica_num: u32,
    ) -> StoreResult<Option<JobRecord>>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_instance(&self, instance_id: &InstanceId) -> StoreResult<Option<InstanceRecord>>;

    /// Idle, unassigned instances of a project, optionally restricted to
    /// `fleets`.
    async fn list_idle_instances(
        &self,
        project_id: &ProjectId,
        fleets: Option<&[FleetId]>,
    ) -> StoreResult<Vec<InstanceRecord>>;

    /// Live instances of a fleet.
    async fn list_fleet_instances(&self, fleet_id: &FleetId) -> StoreResult<Vec<InstanceRecord>>;

    /// The `busy` instance bound to `job_id`, if any.
    async fn find_job_instance(&self, job_id: &JobId) -> StoreResult<Option<InstanceRecord>>;

    /// Flips an idle instance to `busy` for `job_id`.
    ///
    /// Only applies while `job_token` still holds the job's lease. Returns
    /// `false` if the instance was no longer idle or the lease is gone.
    async fn assign_instance(
        &self,
        instance_id: &InstanceId,
        job_id: &JobId,
        job_token: LockToken,
    ) -> StoreResult<bool>;

    /// Returns a `busy` instance held by `job_id` to the idle pool.
    async fn release_instance(
        &self,
        instance_id: &InstanceId,
        job_id: &JobId,
    ) -> StoreResult<bool>;

    /// Moves an instance to `terminating`.
    ///
    /// With `idle_only`, only an idle unassigned instance is affected.
    async fn mark_instance_terminating(
        &self,
        instance_id: &InstanceId,
        idle_only: bool,
        message: &str,
    ) -> StoreResult<bool>;

    async fn create_instance(&self, instance: &InstanceRecord) -> StoreResult<()>;

    /// Inserts an instance bound to its job if `job_token` still holds the
    /// job's lease. Returns `false` when nothing was inserted.
    async fn create_job_instance(
        &self,
        instance: &InstanceRecord,
        job_token: LockToken,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn get_fleet(&self, fleet_id: &FleetId) -> StoreResult<Option<FleetRecord>>;
}

#[async_trait]
pub trait BackendConfigStore: Send + Sync {
    async fn list_backend_configs(&self, project_id: &ProjectId)
        -> StoreResult<Vec<BackendConfig>>;
}

/// Claimable row sets, one per pipeline.
#[derive(Clone)]
pub struct LeaseStores {
    pub submitted_jobs: Arc<dyn LeaseStore<JobRecord>>,
    pub terminating_jobs: Arc<dyn LeaseStore<JobRecord>>,
    pub instances: Arc<dyn LeaseStore<InstanceRecord>>,
    pub fleets: Arc<dyn LeaseStore<FleetRecord>>,
    pub compute_groups: Arc<dyn LeaseStore<ComputeGroupRecord>>,
    pub placement_groups: Arc<dyn LeaseStore<PlacementGroupRecord>>,
    pub volumes: Arc<dyn LeaseStore<VolumeRecord>>,
}

/// Every repository a server process needs.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub instances: Arc<dyn InstanceStore>,
    pub fleets: Arc<dyn FleetStore>,
    pub backend_configs: Arc<dyn BackendConfigStore>,
    pub leases: LeaseStores,
}
