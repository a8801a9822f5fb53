//! In-memory implementation of every store, for tests and local runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use stratus_id::{FleetId, InstanceId, JobId, ProjectId, RunId};
use stratus_reconcile::{LockToken, MemoryLeaseTable};

use super::{
    BackendConfigStore, FleetStore, InstanceStore, JobStore, LeaseStores, StoreResult, Stores,
};
use crate::models::{
    BackendConfig, ComputeGroupRecord, ComputeGroupStatus, FleetRecord, FleetStatus,
    InstanceRecord, InstanceStatus, JobRecord, JobStatus, PlacementGroupRecord, ProjectRecord,
    RunRecord, VolumeRecord, VolumeStatus,
};

#[derive(Default)]
struct Catalog {
    projects: HashMap<ProjectId, ProjectRecord>,
    runs: HashMap<RunId, RunRecord>,
    backend_configs: Vec<BackendConfig>,
}

/// All tables of a control plane, kept in process memory.
#[derive(Default)]
pub struct MemoryStore {
    catalog: Mutex<Catalog>,
    pub jobs: Arc<MemoryLeaseTable<JobRecord>>,
    pub instances: Arc<MemoryLeaseTable<InstanceRecord>>,
    pub fleets: Arc<MemoryLeaseTable<FleetRecord>>,
    pub compute_groups: Arc<MemoryLeaseTable<ComputeGroupRecord>>,
    pub placement_groups: Arc<MemoryLeaseTable<PlacementGroupRecord>>,
    pub volumes: Arc<MemoryLeaseTable<VolumeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_project(&self, project: ProjectRecord) {
        self.catalog().projects.insert(project.id, project);
    }

    pub fn add_run(&self, run: RunRecord) {
        self.catalog().runs.insert(run.id, run);
    }

    pub fn add_backend_config(&self, config: BackendConfig) {
        self.catalog().backend_configs.push(config);
    }

    fn holds_job_lease(&self, job_id: &JobId, token: LockToken) -> bool {
        self.jobs
            .get(&job_id.to_string())
            .is_some_and(|job| job.lease.lock_token == Some(token))
    }

    /// Repositories and lease stores backed by this instance.
    pub fn stores(self: &Arc<Self>) -> Stores {
        let leases = LeaseStores {
            submitted_jobs: Arc::new(
                self.jobs
                    .lease_store(|job: &JobRecord| job.status == JobStatus::Submitted),
            ),
            terminating_jobs: Arc::new(
                self.jobs
                    .lease_store(|job: &JobRecord| job.status == JobStatus::Terminating),
            ),
            instances: Arc::new(self.instances.lease_store(|instance: &InstanceRecord| {
                matches!(
                    instance.status,
                    InstanceStatus::Pending | InstanceStatus::Terminating
                )
            })),
            fleets: Arc::new(self.fleets.lease_store(|fleet: &FleetRecord| {
                matches!(
                    fleet.status,
                    FleetStatus::Submitted | FleetStatus::Active | FleetStatus::Terminating
                )
            })),
            compute_groups: Arc::new(self.compute_groups.lease_store(
                |group: &ComputeGroupRecord| group.status == ComputeGroupStatus::Terminating,
            )),
            placement_groups: Arc::new(
                self.placement_groups
                    .lease_store(|_: &PlacementGroupRecord| true),
            ),
            volumes: Arc::new(self.volumes.lease_store(|volume: &VolumeRecord| {
                volume.status == VolumeStatus::Submitted || volume.to_be_deleted
            })),
        };
        Stores {
            jobs: self.clone(),
            instances: self.clone(),
            fleets: self.clone(),
            backend_configs: self.clone(),
            leases,
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_project(&self, project_id: &ProjectId) -> StoreResult<Option<ProjectRecord>> {
        Ok(self.catalog().projects.get(project_id).cloned())
    }

    async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<RunRecord>> {
        Ok(self.catalog().runs.get(run_id).cloned())
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.jobs.get(&job_id.to_string()))
    }

    async fn get_master_job(
        &self,
        run_id: &RunId,
        replica_num: u32,
    ) -> StoreResult<Option<JobRecord>> {
        Ok(self
            .jobs
            .find(|job| job.run_id == *run_id && job.replica_num == replica_num && job.job_num == 0)
            .into_iter()
            .max_by_key(|job| job.submission_num))
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get_instance(&self, instance_id: &InstanceId) -> StoreResult<Option<InstanceRecord>> {
        Ok(self.instances.get(&instance_id.to_string()))
    }

    async fn list_idle_instances(
        &self,
        project_id: &ProjectId,
        fleets: Option<&[FleetId]>,
    ) -> StoreResult<Vec<InstanceRecord>> {
        Ok(self.instances.find(|instance| {
            instance.project_id == *project_id
                && instance.is_idle()
                && fleets.is_none_or(|fleets| {
                    instance
                        .fleet_id
                        .is_some_and(|fleet_id| fleets.contains(&fleet_id))
                })
        }))
    }

    async fn list_fleet_instances(&self, fleet_id: &FleetId) -> StoreResult<Vec<InstanceRecord>> {
        Ok(self
            .instances
            .find(|instance| instance.fleet_id == Some(*fleet_id) && !instance.deleted))
    }

    async fn find_job_instance(&self, job_id: &JobId) -> StoreResult<Option<InstanceRecord>> {
        Ok(self
            .instances
            .find(|instance| {
                instance.job_id == Some(*job_id)
                    && instance.status == InstanceStatus::Busy
                    && !instance.deleted
            })
            .into_iter()
            .next())
    }

    async fn assign_instance(
        &self,
        instance_id: &InstanceId,
        job_id: &JobId,
        job_token: LockToken,
    ) -> StoreResult<bool> {
        Ok(self
            .instances
            .update(&instance_id.to_string(), |instance| {
                if !instance.is_idle() || !self.holds_job_lease(job_id, job_token) {
                    return false;
                }
                instance.status = InstanceStatus::Busy;
                instance.job_id = Some(*job_id);
                true
            })
            .unwrap_or(false))
    }

    async fn release_instance(
        &self,
        instance_id: &InstanceId,
        job_id: &JobId,
    ) -> StoreResult<bool> {
        Ok(self
            .instances
            .update(&instance_id.to_string(), |instance| {
                if instance.status != InstanceStatus::Busy || instance.job_id != Some(*job_id) {
                    return false;
                }
                instance.status = InstanceStatus::Idle;
                instance.job_id = None;
                true
            })
            .unwrap_or(false))
    }

    async fn mark_instance_terminating(
        &self,
        instance_id: &InstanceId,
        idle_only: bool,
        message: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .instances
            .update(&instance_id.to_string(), |instance| {
                let allowed = if idle_only {
                    instance.is_idle()
                } else {
                    instance.status.is_active() && !instance.deleted
                };
                if !allowed {
                    return false;
                }
                instance.status = InstanceStatus::Terminating;
                instance.status_message = Some(message.to_string());
                true
            })
            .unwrap_or(false))
    }

    async fn create_instance(&self, instance: &InstanceRecord) -> StoreResult<()> {
        self.instances.insert(instance.clone());
        Ok(())
    }

    async fn create_job_instance(
        &self,
        instance: &InstanceRecord,
        job_token: LockToken,
    ) -> StoreResult<bool> {
        let held = instance
            .job_id
            .is_some_and(|job_id| self.holds_job_lease(&job_id, job_token));
        if held {
            self.instances.insert(instance.clone());
        }
        Ok(held)
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn get_fleet(&self, fleet_id: &FleetId) -> StoreResult<Option<FleetRecord>> {
        Ok(self.fleets.get(&fleet_id.to_string()))
    }
}

#[async_trait]
impl BackendConfigStore for MemoryStore {
    async fn list_backend_configs(
        &self,
        project_id: &ProjectId,
    ) -> StoreResult<Vec<BackendConfig>> {
        Ok(self
            .catalog()
            .backend_configs
            .iter()
            .filter(|config| config.project_id == *project_id)
            .cloned()
            .collect())
    }
}
