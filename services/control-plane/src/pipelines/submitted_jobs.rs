//! Provisioning scheduler: places `submitted` jobs.
//!
//! A job is placed either on an idle pool instance (no cloud call) or on a
//! freshly provisioned instance from the cheapest working offer. Jobs that
//! cannot be placed are moved to `terminating` with a no-capacity reason and
//! finished by the terminating-jobs pipeline.
//!
//! Instance writes are conditioned on the job's lock token, so a pass whose
//! lease was taken over cannot bind an instance. An instance bound by a pass
//! that lost its lease afterwards is adopted by the next pass.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stratus_id::{FleetId, JobId};
use stratus_reconcile::{BoxError, Leased, LockToken, Processor};
use stratus_resources::{
    combine_requirements, combine_spot_policy, CreationPolicy, InstanceOfferWithAvailability,
    Requirements, SpotPolicy,
};
use tracing::{debug, error, info, instrument, warn};

use crate::backends::Backend;
use crate::models::{
    FleetStatus, InstanceRecord, JobProvisioningData, JobRecord, JobStatus, JobTerminationReason,
    JobUpdate, OfferFilter, ProjectRecord, RunRecord,
};
use crate::offers::get_offers_by_requirements;
use crate::state::ServerContext;

pub const NAME: &str = "submitted_jobs";

/// Jobs this pipeline instance is working on right now.
///
/// Complements the lease: the lease keeps other processes away, this set
/// keeps a job from being handled twice inside one process.
#[derive(Debug, Default)]
pub struct SubmittedJobsState {
    processing: Mutex<HashSet<JobId>>,
}

impl SubmittedJobsState {
    /// Marks `job_id` as in flight; `None` if it already is.
    fn start(&self, job_id: JobId) -> Option<ProcessingGuard<'_>> {
        let mut processing = self.processing.lock().unwrap_or_else(|e| e.into_inner());
        processing
            .insert(job_id)
            .then_some(ProcessingGuard { state: self, job_id })
    }

    pub fn is_processing(&self, job_id: &JobId) -> bool {
        self.processing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }
}

struct ProcessingGuard<'a> {
    state: &'a SubmittedJobsState,
    job_id: JobId,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.state
            .processing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

/// Where and with which constraints a job may run.
#[derive(Debug, Clone)]
struct Placement {
    requirements: Requirements,
    spot_policy: SpotPolicy,
    filter: OfferFilter,
    fleet_id: Option<FleetId>,
}

pub struct SubmittedJobsProcessor {
    ctx: ServerContext,
    state: Arc<SubmittedJobsState>,
}

impl SubmittedJobsProcessor {
    pub fn new(ctx: ServerContext, state: Arc<SubmittedJobsState>) -> Self {
        Self { ctx, state }
    }

    async fn process_job(&self, job: &JobRecord, token: LockToken) -> Result<JobUpdate, BoxError> {
        let stores = self.ctx.stores();

        let run = match stores.jobs.get_run(&job.run_id).await? {
            Some(run) if !run.deleted => run,
            _ => {
                warn!("Run of the job no longer exists");
                return Ok(JobUpdate::terminate(
                    JobTerminationReason::TerminatedByServer,
                    "Run was deleted",
                ));
            }
        };
        let Some(project) = stores.jobs.get_project(&job.project_id).await? else {
            warn!("Project of the job no longer exists");
            return Ok(JobUpdate::terminate(
                JobTerminationReason::TerminatedByServer,
                "Project was deleted",
            ));
        };

        if let Some(instance) = stores.instances.find_job_instance(&job.id).await? {
            info!(instance = %instance.name, "Job already holds an instance");
            return Ok(JobUpdate {
                status: Some(JobStatus::Provisioning),
                instance_id: Some(instance.id),
                fleet_id: instance.fleet_id,
                job_provisioning_data: instance.job_provisioning_data,
                ..Default::default()
            });
        }

        let master = if job.job_num == 0 {
            None
        } else {
            let master = stores
                .jobs
                .get_master_job(&job.run_id, job.replica_num)
                .await?
                .and_then(|master| master.job_provisioning_data);
            match master {
                Some(data) => Some(data),
                None => {
                    debug!("Waiting for the master job to be provisioned");
                    return Ok(JobUpdate::default());
                }
            }
        };

        let placement = match self.placement(job).await? {
            Ok(placement) => placement,
            Err(update) => return Ok(update),
        };

        if let Some(update) = self
            .reuse_pool_instance(job, token, &placement, master.as_ref())
            .await?
        {
            return Ok(update);
        }

        if job.spec.creation_policy == CreationPolicy::Reuse {
            info!("No idle instance matches and the profile forbids new instances");
            return Ok(JobUpdate::terminate(
                JobTerminationReason::FailedToStartDueToNoCapacity,
                "No idle instance matches the job requirements",
            ));
        }

        self.provision_new_instance(job, token, &run, &project, &placement, master.as_ref())
            .await
    }

    /// Resolves requirements against the fleets the job targets.
    ///
    /// `Err` carries the update that terminates an unplaceable job.
    async fn placement(&self, job: &JobRecord) -> Result<Result<Placement, JobUpdate>, BoxError> {
        let spec = &job.spec;
        let own = Placement {
            requirements: spec.requirements.clone(),
            spot_policy: spec.spot_policy,
            filter: spec.offer_filter(),
            fleet_id: None,
        };
        let Some(fleet_ids) = spec.fleets.as_deref() else {
            return Ok(Ok(own));
        };

        let mut last_error = None;
        for fleet_id in fleet_ids {
            let Some(fleet) = self.ctx.stores().fleets.get_fleet(fleet_id).await? else {
                continue;
            };
            if fleet.deleted || fleet.status != FleetStatus::Active {
                continue;
            }
            let combined = combine_requirements(&fleet.spec.requirements, &own.requirements)
                .and_then(|requirements| {
                    let spot_policy =
                        combine_spot_policy(Some(fleet.spec.spot_policy), Some(own.spot_policy))?
                            .unwrap_or(own.spot_policy);
                    Ok((requirements, spot_policy))
                });
            match combined {
                Ok((requirements, spot_policy)) => {
                    return Ok(Ok(Placement {
                        requirements,
                        spot_policy,
                        filter: own.filter.intersect(&fleet.spec.filter),
                        fleet_id: Some(fleet.id),
                    }));
                }
                Err(e) => {
                    debug!(fleet = %fleet.name, error = %e, "Fleet cannot satisfy the job");
                    last_error = Some(e);
                }
            }
        }

        let update = match last_error {
            Some(e) => JobUpdate::terminate(
                JobTerminationReason::TerminatedByServer,
                format!("Job requirements are incompatible with the fleet: {e}"),
            ),
            None => JobUpdate::terminate(
                JobTerminationReason::FailedToStartDueToNoCapacity,
                "No active fleet to run the job on",
            ),
        };
        Ok(Err(update))
    }

    /// Assigns the smallest-named matching idle instance to the job.
    async fn reuse_pool_instance(
        &self,
        job: &JobRecord,
        token: LockToken,
        placement: &Placement,
        master: Option<&JobProvisioningData>,
    ) -> Result<Option<JobUpdate>, BoxError> {
        let instances = self.ctx.stores().instances.clone();
        let _pool = self.ctx.lock_instance_pool().await;

        let mut candidates: Vec<_> = instances
            .list_idle_instances(&job.project_id, job.spec.fleets.as_deref())
            .await?
            .into_iter()
            .filter(|instance| fits(instance, placement, master))
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        for instance in candidates {
            if !instances.assign_instance(&instance.id, &job.id, token).await? {
                debug!(instance = %instance.name, "Instance was taken or the job lease is gone");
                continue;
            }
            info!(instance = %instance.name, "Assigned idle instance to job");
            return Ok(Some(JobUpdate {
                status: Some(JobStatus::Provisioning),
                instance_id: Some(instance.id),
                fleet_id: instance.fleet_id,
                job_provisioning_data: instance.job_provisioning_data,
                ..Default::default()
            }));
        }
        Ok(None)
    }

    async fn provision_new_instance(
        &self,
        job: &JobRecord,
        token: LockToken,
        run: &RunRecord,
        project: &ProjectRecord,
        placement: &Placement,
        master: Option<&JobProvisioningData>,
    ) -> Result<JobUpdate, BoxError> {
        let backends = self.ctx.backends().get_project_backends(&project.id).await?;
        let ssh_keys = project.ssh_keys();

        for &spot in placement.spot_policy.attempts() {
            let requirements = placement.requirements.with_spot(spot);
            let offers = get_offers_by_requirements(
                &backends,
                &placement.filter,
                &requirements,
                true,
                master,
            )
            .await;
            debug!(spot, offers = offers.len(), "Trying offers");

            for (backend, offer) in offers.into_iter().take(job.spec.max_offers()) {
                let result = backend
                    .compute()
                    .run_job(run, job, &offer.offer, &ssh_keys)
                    .await;
                match result {
                    Ok(data) => {
                        return self
                            .record_new_instance(job, token, run, placement, &backend, offer, data)
                            .await;
                    }
                    Err(e) if e.is_backend_error() => {
                        warn!(
                            backend = %backend.backend_type(),
                            region = %offer.offer.region,
                            instance_type = %offer.offer.instance.name,
                            error = %e,
                            "Failed to run job on offer"
                        );
                    }
                    Err(e) => {
                        error!(
                            backend = %backend.backend_type(),
                            region = %offer.offer.region,
                            instance_type = %offer.offer.instance.name,
                            error = ?e,
                            "Unexpected error running job on offer"
                        );
                    }
                }
            }
        }

        info!("No offer could be provisioned");
        Ok(JobUpdate::terminate(
            JobTerminationReason::FailedToStartDueToNoCapacity,
            "No offer could be provisioned",
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_new_instance(
        &self,
        job: &JobRecord,
        token: LockToken,
        run: &RunRecord,
        placement: &Placement,
        backend: &Arc<dyn Backend>,
        offer: InstanceOfferWithAvailability,
        data: JobProvisioningData,
    ) -> Result<JobUpdate, BoxError> {
        let instance_num = match placement.fleet_id {
            Some(fleet_id) => self
                .ctx
                .stores()
                .instances
                .list_fleet_instances(&fleet_id)
                .await?
                .iter()
                .map(|i| i.instance_num + 1)
                .max()
                .unwrap_or(0),
            None => 0,
        };
        let name = format!("{}-{}-{}", run.run_name, job.job_num, job.submission_num);
        let instance = InstanceRecord::provisioned_for_job(
            job.project_id,
            placement.fleet_id,
            name,
            instance_num,
            job.id,
            offer,
            data.clone(),
            self.ctx.now(),
        );

        let recorded = self
            .ctx
            .stores()
            .instances
            .create_job_instance(&instance, token)
            .await;
        match recorded {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    instance_id = %data.instance_id,
                    "Job lease lost while provisioning, terminating the new instance"
                );
                terminate_unrecorded(backend, &data).await;
                return Ok(JobUpdate::default());
            }
            Err(e) => {
                error!(
                    instance_id = %data.instance_id,
                    error = %e,
                    "Failed to record provisioned instance, terminating it"
                );
                terminate_unrecorded(backend, &data).await;
                return Err(e.into());
            }
        }

        info!(
            instance = %instance.name,
            backend = %data.backend,
            region = %data.region,
            price = data.price,
            "Provisioned new instance for job"
        );
        Ok(JobUpdate {
            status: Some(JobStatus::Provisioning),
            instance_id: Some(instance.id),
            fleet_id: placement.fleet_id,
            job_provisioning_data: Some(data),
            ..Default::default()
        })
    }
}

/// Best-effort cleanup of a cloud instance that has no row.
async fn terminate_unrecorded(backend: &Arc<dyn Backend>, data: &JobProvisioningData) {
    if let Err(e) = backend
        .compute()
        .terminate_instance(&data.instance_id, &data.region, data.backend_data.as_deref())
        .await
    {
        error!(
            instance_id = %data.instance_id,
            error = %e,
            "Failed to terminate unrecorded instance, manual cleanup required"
        );
    }
}

/// Whether an idle instance can take a job with `placement`.
fn fits(
    instance: &InstanceRecord,
    placement: &Placement,
    master: Option<&JobProvisioningData>,
) -> bool {
    let (Some(offer), Some(data)) = (&instance.offer, &instance.job_provisioning_data) else {
        return false;
    };
    let requirements = match placement.spot_policy {
        SpotPolicy::Spot => placement.requirements.with_spot(true),
        SpotPolicy::OnDemand => placement.requirements.with_spot(false),
        SpotPolicy::Auto => placement.requirements.clone(),
    };
    offer.offer.matches(&requirements)
        && placement.filter.allows(&offer.offer)
        && master.is_none_or(|master| data.is_colocated_with(master))
}

#[async_trait]
impl Processor<JobRecord> for SubmittedJobsProcessor {
    #[instrument(skip_all, fields(job_id = %item.item.id, job = %item.item.spec.job_name))]
    async fn process(&self, item: &Leased<JobRecord>) -> Result<JobUpdate, BoxError> {
        let job = &item.item;
        let Some(_guard) = self.state.start(job.id) else {
            debug!("Job is already being processed");
            return Ok(JobUpdate::default());
        };
        self.process_job(job, item.token).await
    }
}
