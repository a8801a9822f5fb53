//! Finishes `terminating` jobs.

use async_trait::async_trait;
use stratus_reconcile::{BoxError, Leased, Processor};
use tracing::{info, instrument, warn};

use crate::models::{JobRecord, JobTerminationReason, JobUpdate};
use crate::state::ServerContext;

pub const NAME: &str = "terminating_jobs";

/// Returns the job's instance to the pool and settles the final status.
///
/// An instance of a job with a zero idle duration is terminated right away
/// instead of going back to the pool.
pub struct TerminatingJobsProcessor {
    ctx: ServerContext,
}

impl TerminatingJobsProcessor {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Processor<JobRecord> for TerminatingJobsProcessor {
    #[instrument(skip_all, fields(job_id = %item.item.id, job = %item.item.spec.job_name))]
    async fn process(&self, item: &Leased<JobRecord>) -> Result<JobUpdate, BoxError> {
        let job = &item.item;
        let reason = job.termination_reason.unwrap_or_else(|| {
            warn!("Terminating job has no termination reason");
            JobTerminationReason::TerminatedByServer
        });

        let instances = &self.ctx.stores().instances;
        // A scheduler pass that lost its lease may have bound an instance
        // without recording it on the job.
        let instance_id = match job.instance_id {
            Some(id) => Some(id),
            None => instances.find_job_instance(&job.id).await?.map(|i| i.id),
        };
        if let Some(instance_id) = instance_id {
            if instances.release_instance(&instance_id, &job.id).await? {
                info!(instance_id = %instance_id, "Released instance");
                let immediate = job
                    .spec
                    .idle_duration
                    .is_some_and(|idle| idle.as_secs() == 0);
                if immediate {
                    instances
                        .mark_instance_terminating(&instance_id, true, "Idle duration expired")
                        .await?;
                }
            }
        }

        let status = reason.final_status();
        info!(%status, reason = %reason, "Job finished");
        Ok(JobUpdate {
            status: Some(status),
            termination_reason: job.termination_reason.is_none().then_some(reason),
            ..Default::default()
        })
    }
}
