//! Shared fixtures: an in-memory control plane driven by a manual clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use stratus_control_plane::backends::{
    Backend, BackendCache, BackendRegistry, MockBackend, StaticBackendFactory,
};
use stratus_control_plane::models::{
    BackendConfig, InstanceRecord, InstanceStatus, JobProvisioningData, JobRecord, ProjectRecord,
    RunRecord,
};
use stratus_control_plane::pipelines::{
    compute_groups, fleets, instances, placement_groups, submitted_jobs, terminating_jobs,
    volumes, ComputeGroupsProcessor, FleetsProcessor, InstancesProcessor,
    PlacementGroupsProcessor, SubmittedJobsProcessor, SubmittedJobsState,
    TerminatingJobsProcessor, VolumesProcessor,
};
use stratus_control_plane::state::ServerContext;
use stratus_control_plane::store::MemoryStore;
use stratus_id::{JobId, ProjectId, RunId};
use stratus_reconcile::{
    Clock, ItemOutcome, Leasable, LeaseStore, Leased, LockToken, ManualClock, Pipeline,
    PipelineConfig, Processor,
};
use stratus_resources::{
    BackendType, CpuArch, Disk, Gpu, GpuVendor, InstanceAvailability, InstanceOffer,
    InstanceOfferWithAvailability, InstanceType, Memory, Resources,
};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub ctx: ServerContext,
    pub project: ProjectRecord,
    pub run: RunRecord,
    pub submitted_state: Arc<SubmittedJobsState>,
}

impl Harness {
    /// A project with one run and every backend in `backends` configured.
    pub fn new(backends: &[Arc<MockBackend>]) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(start_time()));

        let project = ProjectRecord {
            id: ProjectId::new(),
            name: "main".to_string(),
            ssh_public_key: "ssh-ed25519 AAAAtest".to_string(),
            ssh_private_key: "private".to_string(),
        };
        let run = RunRecord {
            id: RunId::new(),
            project_id: project.id,
            run_name: "train".to_string(),
            deleted: false,
            ssh_public_key: None,
        };
        store.add_project(project.clone());
        store.add_run(run.clone());

        let mut registry = BackendRegistry::new();
        for backend in backends {
            let backend_type = backend.backend_type();
            registry.register(
                backend_type,
                Arc::new(StaticBackendFactory(backend.clone())),
            );
            store.add_backend_config(BackendConfig {
                project_id: project.id,
                backend_type,
                config: serde_json::json!({}),
            });
        }

        let stores = store.stores();
        let cache = BackendCache::new(registry, stores.backend_configs.clone());
        let ctx = ServerContext::with_clock(stores, Arc::new(cache), clock.clone());

        Self {
            store,
            clock,
            ctx,
            project,
            run,
            submitted_state: Arc::new(SubmittedJobsState::default()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(chrono::TimeDelta::from_std(by).unwrap());
    }

    /// One fetch of everything due, each item handled in claim order.
    async fn drive<T: Leasable>(
        &self,
        name: &str,
        store: Arc<dyn LeaseStore<T>>,
        processor: Arc<dyn Processor<T>>,
    ) -> usize {
        let outcomes = self.drive_with(name, store, processor, |_| {}).await;
        for outcome in &outcomes {
            assert_eq!(*outcome, ItemOutcome::Applied);
        }
        outcomes.len()
    }

    /// Like `drive`, but runs `between` on every claimed item before it is
    /// handled and reports outcomes instead of requiring them to apply.
    async fn drive_with<T: Leasable>(
        &self,
        name: &str,
        store: Arc<dyn LeaseStore<T>>,
        processor: Arc<dyn Processor<T>>,
        between: impl Fn(&Leased<T>),
    ) -> Vec<ItemOutcome> {
        let config = PipelineConfig::new(name).with_min_processing_interval(Duration::ZERO);
        let pipeline = Pipeline::with_clock(config, store, processor, self.clock.clone());
        let items = pipeline.fetcher().fetch(100).await.unwrap();
        let worker = pipeline.worker(0);
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            between(&item);
            outcomes.push(worker.handle(item).await);
        }
        outcomes
    }

    pub async fn submitted_jobs(&self) -> usize {
        let processor =
            SubmittedJobsProcessor::new(self.ctx.clone(), self.submitted_state.clone());
        self.drive(
            submitted_jobs::NAME,
            self.ctx.stores().leases.submitted_jobs.clone(),
            Arc::new(processor),
        )
        .await
    }

    /// A scheduler pass where another holder takes over every claimed job's
    /// lease before it is processed.
    pub async fn submitted_jobs_losing_leases(&self) -> Vec<ItemOutcome> {
        let processor =
            SubmittedJobsProcessor::new(self.ctx.clone(), self.submitted_state.clone());
        let jobs = self.store.jobs.clone();
        self.drive_with(
            submitted_jobs::NAME,
            self.ctx.stores().leases.submitted_jobs.clone(),
            Arc::new(processor),
            move |item: &Leased<JobRecord>| {
                jobs.update(&item.item.id.to_string(), |job| {
                    job.lease.lock_token = Some(LockToken::generate());
                });
            },
        )
        .await
    }

    pub async fn terminating_jobs(&self) -> usize {
        self.drive(
            terminating_jobs::NAME,
            self.ctx.stores().leases.terminating_jobs.clone(),
            Arc::new(TerminatingJobsProcessor::new(self.ctx.clone())),
        )
        .await
    }

    pub async fn instances(&self) -> usize {
        self.drive(
            instances::NAME,
            self.ctx.stores().leases.instances.clone(),
            Arc::new(InstancesProcessor::new(self.ctx.clone())),
        )
        .await
    }

    pub async fn fleets(&self) -> usize {
        self.drive(
            fleets::NAME,
            self.ctx.stores().leases.fleets.clone(),
            Arc::new(FleetsProcessor::new(self.ctx.clone())),
        )
        .await
    }

    pub async fn compute_groups(&self) -> usize {
        self.drive(
            compute_groups::NAME,
            self.ctx.stores().leases.compute_groups.clone(),
            Arc::new(ComputeGroupsProcessor::new(self.ctx.clone())),
        )
        .await
    }

    pub async fn placement_groups(&self) -> usize {
        self.drive(
            placement_groups::NAME,
            self.ctx.stores().leases.placement_groups.clone(),
            Arc::new(PlacementGroupsProcessor::new(self.ctx.clone())),
        )
        .await
    }

    pub async fn volumes(&self) -> usize {
        self.drive(
            volumes::NAME,
            self.ctx.stores().leases.volumes.clone(),
            Arc::new(VolumesProcessor::new(self.ctx.clone())),
        )
        .await
    }

    /// An idle pool instance created from `offer`.
    pub fn add_idle_instance(
        &self,
        name: &str,
        offer: &InstanceOfferWithAvailability,
    ) -> InstanceRecord {
        let data = provisioning_data(offer, name);
        let mut instance = InstanceRecord::provisioned_for_job(
            self.project.id,
            None,
            name,
            0,
            JobId::new(),
            offer.clone(),
            data,
            self.now(),
        );
        instance.status = InstanceStatus::Idle;
        instance.job_id = None;
        self.store.instances.insert(instance.clone());
        instance
    }
}

pub fn provisioning_data(offer: &InstanceOfferWithAvailability, name: &str) -> JobProvisioningData {
    JobProvisioningData {
        backend: offer.offer.backend,
        instance_type: offer.offer.instance.clone(),
        instance_id: format!("i-{name}"),
        hostname: None,
        region: offer.offer.region.clone(),
        availability_zone: offer.offer.availability_zones.first().cloned(),
        price: offer.offer.price,
        username: "ubuntu".to_string(),
        ssh_port: Some(22),
        backend_data: None,
    }
}

/// A CPU-only offer large enough for the default resource spec.
pub fn cpu_offer(
    backend: BackendType,
    name: &str,
    region: &str,
    price: f64,
    spot: bool,
) -> InstanceOfferWithAvailability {
    InstanceOfferWithAvailability {
        offer: InstanceOffer {
            backend,
            region: region.to_string(),
            availability_zones: vec![format!("{region}a"), format!("{region}b")],
            instance: InstanceType {
                name: name.to_string(),
                resources: Resources {
                    cpus: 8,
                    cpu_arch: CpuArch::X86,
                    memory: Memory::gib(32.0),
                    gpus: vec![],
                    spot,
                    disk: Disk {
                        size: Memory::gib(200.0),
                    },
                },
            },
            price,
        },
        availability: InstanceAvailability::Available,
    }
}

/// A single-GPU offer.
pub fn gpu_offer(
    backend: BackendType,
    gpu: &str,
    price: f64,
    availability: InstanceAvailability,
) -> InstanceOfferWithAvailability {
    let mut offer = cpu_offer(backend, &format!("{backend}-{gpu}"), "us-east-1", price, false);
    offer.offer.instance.resources.gpus = vec![Gpu {
        vendor: GpuVendor::Nvidia,
        name: gpu.to_string(),
        memory: Memory::gib(80.0),
        compute_capability: Some((8, 0)),
    }];
    offer.availability = availability;
    offer
}
