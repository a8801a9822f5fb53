//! One reconciliation pipeline per resource type.
//!
//! Pipelines share nothing in memory except the [`ServerContext`]; they
//! interact only through the store.

pub mod compute_groups;
pub mod fleets;
pub mod instances;
pub mod placement_groups;
pub mod submitted_jobs;
pub mod terminating_jobs;
pub mod volumes;

pub use compute_groups::ComputeGroupsProcessor;
pub use fleets::FleetsProcessor;
pub use instances::InstancesProcessor;
pub use placement_groups::PlacementGroupsProcessor;
pub use submitted_jobs::{SubmittedJobsProcessor, SubmittedJobsState};
pub use terminating_jobs::TerminatingJobsProcessor;
pub use volumes::VolumesProcessor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stratus_reconcile::{Leasable, LeaseStore, Pipeline, PipelineConfig, Processor};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::ServerContext;

/// Tuning of every pipeline.
#[derive(Debug, Clone)]
pub struct PipelinesConfig {
    pub submitted_jobs: PipelineConfig,
    pub terminating_jobs: PipelineConfig,
    pub instances: PipelineConfig,
    pub fleets: PipelineConfig,
    pub compute_groups: PipelineConfig,
    pub placement_groups: PipelineConfig,
    pub volumes: PipelineConfig,
}

fn pipeline(name: &str, workers: usize, interval_secs: u64) -> PipelineConfig {
    PipelineConfig::new(name)
        .with_workers(workers)
        .with_min_processing_interval(Duration::from_secs(interval_secs))
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            submitted_jobs: pipeline(submitted_jobs::NAME, 10, 5),
            terminating_jobs: pipeline(terminating_jobs::NAME, 5, 5),
            instances: pipeline(instances::NAME, 10, 10),
            fleets: pipeline(fleets::NAME, 5, 10),
            compute_groups: pipeline(compute_groups::NAME, 5, 15),
            placement_groups: pipeline(placement_groups::NAME, 2, 30),
            volumes: pipeline(volumes::NAME, 5, 10),
        }
    }
}

impl PipelinesConfig {
    /// Defaults with `STRATUS_<PIPELINE>_WORKERS` overrides applied.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        for pipeline in config.all_mut() {
            let var = format!("STRATUS_{}_WORKERS", pipeline.name.to_uppercase());
            if let Some(value) = lookup(&var) {
                let workers: usize = value
                    .parse()
                    .with_context(|| format!("invalid {var}: {value}"))?;
                anyhow::ensure!(workers > 0, "{var} must be at least 1");
                pipeline.workers = workers;
            }
        }
        Ok(config)
    }

    fn all_mut(&mut self) -> [&mut PipelineConfig; 7] {
        [
            &mut self.submitted_jobs,
            &mut self.terminating_jobs,
            &mut self.instances,
            &mut self.fleets,
            &mut self.compute_groups,
            &mut self.placement_groups,
            &mut self.volumes,
        ]
    }
}

fn spawn<T: Leasable>(
    ctx: &ServerContext,
    config: PipelineConfig,
    store: Arc<dyn LeaseStore<T>>,
    processor: Arc<dyn Processor<T>>,
    shutdown: &watch::Receiver<bool>,
) -> JoinHandle<()> {
    let pipeline = Pipeline::with_clock(config, store, processor, ctx.clock());
    tokio::spawn(pipeline.run(shutdown.clone()))
}

/// Starts every pipeline; the handles finish once `shutdown` flips.
pub fn spawn_pipelines(
    ctx: &ServerContext,
    config: PipelinesConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let leases = ctx.stores().leases.clone();
    vec![
        spawn(
            ctx,
            config.submitted_jobs,
            leases.submitted_jobs,
            Arc::new(SubmittedJobsProcessor::new(
                ctx.clone(),
                Arc::new(SubmittedJobsState::default()),
            )),
            &shutdown,
        ),
        spawn(
            ctx,
            config.terminating_jobs,
            leases.terminating_jobs,
            Arc::new(TerminatingJobsProcessor::new(ctx.clone())),
            &shutdown,
        ),
        spawn(
            ctx,
            config.instances,
            leases.instances,
            Arc::new(InstancesProcessor::new(ctx.clone())),
            &shutdown,
        ),
        spawn(
            ctx,
            config.fleets,
            leases.fleets,
            Arc::new(FleetsProcessor::new(ctx.clone())),
            &shutdown,
        ),
        spawn(
            ctx,
            config.compute_groups,
            leases.compute_groups,
            Arc::new(ComputeGroupsProcessor::new(ctx.clone())),
            &shutdown,
        ),
        spawn(
            ctx,
            config.placement_groups,
            leases.placement_groups,
            Arc::new(PlacementGroupsProcessor::new(ctx.clone())),
            &shutdown,
        ),
        spawn(
            ctx,
            config.volumes,
            leases.volumes,
            Arc::new(VolumesProcessor::new(ctx.clone())),
            &shutdown,
        ),
    ]
}
