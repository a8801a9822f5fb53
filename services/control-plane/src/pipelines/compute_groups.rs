//! Compute group teardown with retry-with-deadline.

use async_trait::async_trait;
use stratus_reconcile::{BoxError, Leased, Processor, RetryOutcome};
use tracing::{error, info, instrument, warn};

use crate::models::{ComputeGroupRecord, ComputeGroupStatus, ComputeGroupUpdate};
use crate::state::ServerContext;

pub const NAME: &str = "compute_groups";

pub struct ComputeGroupsProcessor {
    ctx: ServerContext,
}

impl ComputeGroupsProcessor {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Processor<ComputeGroupRecord> for ComputeGroupsProcessor {
    #[instrument(skip_all, fields(compute_group_id = %item.item.id))]
    async fn process(
        &self,
        item: &Leased<ComputeGroupRecord>,
    ) -> Result<ComputeGroupUpdate, BoxError> {
        let group = &item.item;
        if group.status != ComputeGroupStatus::Terminating {
            return Ok(ComputeGroupUpdate::default());
        }

        let now = self.ctx.now();
        if !group.termination_retry.should_attempt(now) {
            return Ok(ComputeGroupUpdate::default());
        }

        let Some(backend) = self
            .ctx
            .backends()
            .get_project_backend(&group.project_id, group.backend)
            .await?
        else {
            error!(
                backend = %group.backend,
                group_id = %group.provisioning_data.group_id,
                "Backend is no longer configured, compute group must be terminated manually"
            );
            return Ok(ComputeGroupUpdate::terminated(now));
        };

        let Err(e) = backend.compute().terminate_compute_group(group).await else {
            info!("Terminated compute group");
            return Ok(ComputeGroupUpdate::terminated(now));
        };

        match group.termination_retry.record_failure(now) {
            RetryOutcome::Retry(next) => {
                warn!(error = %e, "Failed to terminate compute group, will retry");
                Ok(ComputeGroupUpdate {
                    termination_retry: Some(next),
                    ..Default::default()
                })
            }
            RetryOutcome::GiveUp => {
                error!(
                    error = %e,
                    group_id = %group.provisioning_data.group_id,
                    "Failed to terminate compute group within the retry deadline, marking terminated; manual cleanup required"
                );
                Ok(ComputeGroupUpdate::terminated(now))
            }
        }
    }
}
