//! Instance provisioning and termination.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stratus_reconcile::{BoxError, Leased, Processor, RetryOutcome};
use tracing::{debug, error, info, instrument, warn};

use crate::backends::{ComputeError, InstanceConfiguration};
use crate::models::{InstanceRecord, InstanceStatus, InstanceUpdate, JobSpec};
use crate::offers::get_offers_by_requirements;
use crate::state::ServerContext;

pub const NAME: &str = "instances";

/// Drives `pending` instances to `idle` and `terminating` ones to
/// `terminated`.
pub struct InstancesProcessor {
    ctx: ServerContext,
}

impl InstancesProcessor {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }

    async fn create(&self, instance: &InstanceRecord) -> Result<InstanceUpdate, BoxError> {
        let now = self.ctx.now();
        let Some(spec) = &instance.spec else {
            error!("Pending instance has no spec");
            return Ok(InstanceUpdate::terminated(
                now,
                Some("Instance has no spec".to_string()),
            ));
        };
        let Some(project) = self
            .ctx
            .stores()
            .jobs
            .get_project(&instance.project_id)
            .await?
        else {
            return Ok(InstanceUpdate::terminated(
                now,
                Some("Project was deleted".to_string()),
            ));
        };

        let backends = self
            .ctx
            .backends()
            .get_project_backends(&project.id)
            .await?;
        let config = InstanceConfiguration {
            project_name: project.name.clone(),
            instance_name: instance.name.clone(),
            ssh_keys: project.ssh_keys(),
        };

        for &spot in spec.spot_policy.attempts() {
            let requirements = spec.requirements.with_spot(spot);
            let offers =
                get_offers_by_requirements(&backends, &spec.filter, &requirements, true, None)
                    .await;
            debug!(spot, offers = offers.len(), "Trying offers");

            for (backend, offer) in offers.into_iter().take(JobSpec::DEFAULT_MAX_OFFERS) {
                match backend.compute().create_instance(&offer.offer, &config).await {
                    Ok(data) => {
                        info!(
                            backend = %data.backend,
                            region = %data.region,
                            instance_type = %offer.offer.instance.name,
                            "Created instance"
                        );
                        return Ok(InstanceUpdate {
                            status: Some(InstanceStatus::Idle),
                            offer: Some(offer),
                            job_provisioning_data: Some(data),
                            ..Default::default()
                        });
                    }
                    Err(e) if e.is_backend_error() || matches!(e, ComputeError::NotSupported(_)) => {
                        warn!(
                            backend = %backend.backend_type(),
                            instance_type = %offer.offer.instance.name,
                            error = %e,
                            "Failed to create instance on offer"
                        );
                    }
                    Err(e) => {
                        error!(
                            backend = %backend.backend_type(),
                            instance_type = %offer.offer.instance.name,
                            error = ?e,
                            "Unexpected error creating instance"
                        );
                    }
                }
            }
        }

        info!("No offer could be provisioned for the instance");
        Ok(InstanceUpdate::terminated(
            now,
            Some("All offers failed".to_string()),
        ))
    }

    async fn terminate(&self, instance: &InstanceRecord) -> Result<InstanceUpdate, BoxError> {
        let now = self.ctx.now();
        let retry = instance.termination_retry;
        if !retry.should_attempt(now) {
            return Ok(InstanceUpdate::default());
        }
        let Some(data) = &instance.job_provisioning_data else {
            info!("Instance was never provisioned, marking terminated");
            return Ok(InstanceUpdate::terminated(now, None));
        };

        let Some(backend) = self
            .ctx
            .backends()
            .get_project_backend(&instance.project_id, data.backend)
            .await?
        else {
            error!(
                backend = %data.backend,
                instance_id = %data.instance_id,
                "Backend is no longer configured, instance must be terminated manually"
            );
            return Ok(InstanceUpdate::terminated(now, None));
        };

        let result = backend
            .compute()
            .terminate_instance(&data.instance_id, &data.region, data.backend_data.as_deref())
            .await;
        match result {
            Ok(()) => {
                info!(instance_id = %data.instance_id, "Terminated instance");
                Ok(InstanceUpdate::terminated(now, None))
            }
            Err(e) => Ok(retry_or_give_up(instance, &e, now)),
        }
    }
}

fn retry_or_give_up(
    instance: &InstanceRecord,
    err: &ComputeError,
    now: DateTime<Utc>,
) -> InstanceUpdate {
    match instance.termination_retry.record_failure(now) {
        RetryOutcome::Retry(next) => {
            warn!(error = %err, "Failed to terminate instance, will retry");
            InstanceUpdate {
                termination_retry: Some(next),
                ..Default::default()
            }
        }
        RetryOutcome::GiveUp => {
            error!(
                error = %err,
                "Failed to terminate instance within the retry deadline, marking terminated; manual cleanup required"
            );
            InstanceUpdate::terminated(now, Some(format!("Termination failed: {err}")))
        }
    }
}

#[async_trait]
impl Processor<InstanceRecord> for InstancesProcessor {
    #[instrument(skip_all, fields(instance_id = %item.item.id, instance = %item.item.name))]
    async fn process(&self, item: &Leased<InstanceRecord>) -> Result<InstanceUpdate, BoxError> {
        let instance = &item.item;
        match instance.status {
            InstanceStatus::Pending => self.create(instance).await,
            InstanceStatus::Terminating => self.terminate(instance).await,
            status => {
                debug!(%status, "Nothing to do for instance");
                Ok(InstanceUpdate::default())
            }
        }
    }
}
