//! Provisioning scheduler scenarios against mock backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cpu_offer, gpu_offer, Harness};
use stratus_control_plane::backends::{MockBackend, MockFailure, MockOperation};
use stratus_control_plane::models::{
    FleetRecord, FleetSpec, FleetStatus, InstanceStatus, JobRecord, JobSpec, JobStatus,
    JobTerminationReason,
};
use stratus_control_plane::offers::get_instance_offers;
use stratus_reconcile::ItemOutcome;
use stratus_resources::{
    BackendType, CpuArch, CreationPolicy, GpuSpec, IdleDuration, InstanceAvailability, Range,
    Requirements, ResourcesSpec, SpotPolicy,
};

fn a100_requirements() -> Requirements {
    Requirements::new(ResourcesSpec {
        gpu: Some(GpuSpec {
            name: Some(vec!["A100".to_string()]),
            count: Range::exact(1),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn submit(h: &Harness, job_num: u32, spec: JobSpec) -> JobRecord {
    let job = JobRecord::submitted(&h.run, job_num, spec, h.now());
    h.store.jobs.insert(job.clone());
    job
}

fn job(h: &Harness, job: &JobRecord) -> JobRecord {
    h.store.jobs.get(&job.id.to_string()).unwrap()
}

#[tokio::test]
async fn test_available_offer_wins_over_cheaper_no_quota_offer() {
    let a = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![gpu_offer(
        BackendType::Aws,
        "A100",
        2.50,
        InstanceAvailability::Available,
    )]));
    let b = Arc::new(MockBackend::new(BackendType::Gcp).with_offers(vec![gpu_offer(
        BackendType::Gcp,
        "A100",
        2.00,
        InstanceAvailability::NoQuota,
    )]));
    let h = Harness::new(&[a.clone(), b.clone()]);

    let backends: Vec<Arc<dyn stratus_control_plane::backends::Backend>> =
        vec![a.clone(), b.clone()];
    let ranked = get_instance_offers(&backends, &a100_requirements(), false).await;
    let ranked: Vec<_> = ranked
        .iter()
        .map(|(_, o)| (o.offer.backend, o.price(), o.availability))
        .collect();
    assert_eq!(
        ranked,
        vec![
            (BackendType::Aws, 2.50, InstanceAvailability::Available),
            (BackendType::Gcp, 2.00, InstanceAvailability::NoQuota),
        ]
    );

    let submitted = submit(&h, 0, JobSpec::new("a100", a100_requirements()));
    assert_eq!(h.submitted_jobs().await, 1);

    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Provisioning);
    let data = job.job_provisioning_data.unwrap();
    assert_eq!(data.backend, BackendType::Aws);
    assert_eq!(data.price, 2.50);
    assert_eq!(a.count(MockOperation::RunJob), 1);
    assert_eq!(b.count(MockOperation::RunJob), 0);

    let instance = h
        .store
        .instances
        .get(&job.instance_id.unwrap().to_string())
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Busy);
    assert_eq!(instance.job_id, Some(job.id));
}

#[tokio::test]
async fn test_auto_spot_policy_makes_exactly_two_attempts() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5.xlarge",
        "us-east-1",
        0.2,
        false,
    )]));
    let gcp = Arc::new(MockBackend::new(BackendType::Gcp));
    aws.fail(MockOperation::RunJob, MockFailure::NoCapacity);
    let h = Harness::new(&[aws.clone(), gcp.clone()]);

    let mut spec = JobSpec::new("cpu", Requirements::default());
    spec.spot_policy = SpotPolicy::Auto;
    let submitted = submit(&h, 0, spec);
    h.submitted_jobs().await;

    for backend in [&aws, &gcp] {
        let spots: Vec<_> = backend
            .calls()
            .iter()
            .filter(|c| c.operation == MockOperation::GetOffers)
            .map(|c| c.spot)
            .collect();
        assert_eq!(spots, vec![Some(true), Some(false)]);
    }
    assert_eq!(aws.count(MockOperation::RunJob), 1);

    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Terminating);
    assert_eq!(
        job.termination_reason,
        Some(JobTerminationReason::FailedToStartDueToNoCapacity)
    );
}

#[tokio::test]
async fn test_auto_spot_policy_falls_back_to_on_demand() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5.xlarge",
        "us-east-1",
        0.2,
        false,
    )]));
    let h = Harness::new(&[aws.clone()]);

    let mut spec = JobSpec::new("cpu", Requirements::default());
    spec.spot_policy = SpotPolicy::Auto;
    let submitted = submit(&h, 0, spec);
    h.submitted_jobs().await;

    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Provisioning);
    assert!(!job.job_provisioning_data.unwrap().instance_type.resources.spot);
}

#[tokio::test]
async fn test_failing_offers_are_skipped_up_to_the_cap() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![
        cpu_offer(BackendType::Aws, "a", "us-east-1", 0.1, false),
        cpu_offer(BackendType::Aws, "b", "us-east-1", 0.2, false),
        cpu_offer(BackendType::Aws, "c", "us-east-1", 0.3, false),
        cpu_offer(BackendType::Aws, "d", "us-east-1", 0.4, false),
    ]));
    aws.fail_for(MockOperation::RunJob, "a", MockFailure::Backend);
    aws.fail_for(MockOperation::RunJob, "b", MockFailure::Unexpected);
    let h = Harness::new(&[aws.clone()]);

    let submitted = submit(&h, 0, JobSpec::new("cpu", Requirements::default()));
    h.submitted_jobs().await;
    let placed = job(&h, &submitted);
    assert_eq!(
        placed.job_provisioning_data.unwrap().instance_type.name,
        "c"
    );

    aws.fail(MockOperation::RunJob, MockFailure::NoCapacity);
    let mut spec = JobSpec::new("capped", Requirements::default());
    spec.max_offers = Some(2);
    let capped = submit(&h, 0, spec);
    let before = aws.count(MockOperation::RunJob);
    h.submitted_jobs().await;
    assert_eq!(aws.count(MockOperation::RunJob) - before, 2);
    assert_eq!(job(&h, &capped).status, JobStatus::Terminating);
}

#[tokio::test]
async fn test_pool_reuse_picks_smallest_matching_name() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![gpu_offer(
        BackendType::Aws,
        "A100",
        2.5,
        InstanceAvailability::Available,
    )]));
    let h = Harness::new(&[aws.clone()]);

    let a100 = gpu_offer(BackendType::Aws, "A100", 2.5, InstanceAvailability::Idle);
    let cpu_only = cpu_offer(BackendType::Aws, "m5", "us-east-1", 0.2, false);
    h.add_idle_instance("pool-0", &cpu_only);
    h.add_idle_instance("pool-c", &a100);
    let expected = h.add_idle_instance("pool-a", &a100);
    h.add_idle_instance("pool-b", &a100);

    let submitted = submit(&h, 0, JobSpec::new("a100", a100_requirements()));
    h.submitted_jobs().await;

    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Provisioning);
    assert_eq!(job.instance_id, Some(expected.id));
    let instance = h.store.instances.get(&expected.id.to_string()).unwrap();
    assert_eq!(instance.status, InstanceStatus::Busy);
    assert_eq!(instance.job_id, Some(job.id));
    assert!(aws.calls().is_empty());
}

#[tokio::test]
async fn test_reuse_only_profile_fails_fast() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5",
        "us-east-1",
        0.2,
        false,
    )]));
    let h = Harness::new(&[aws.clone()]);

    let mut spec = JobSpec::new("reuse", Requirements::default());
    spec.creation_policy = CreationPolicy::Reuse;
    let submitted = submit(&h, 0, spec);
    h.submitted_jobs().await;

    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Terminating);
    assert_eq!(
        job.termination_reason,
        Some(JobTerminationReason::FailedToStartDueToNoCapacity)
    );
    assert!(aws.calls().is_empty());
}

#[tokio::test]
async fn test_worker_job_waits_for_master_and_lands_next_to_it() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![
        cpu_offer(BackendType::Aws, "m-us", "us-east-1", 1.0, false),
        cpu_offer(BackendType::Aws, "m-eu", "eu-west-1", 0.9, false),
    ]));
    let h = Harness::new(&[aws.clone()]);

    let worker = submit(&h, 1, JobSpec::new("node-1", Requirements::default()));
    h.submitted_jobs().await;
    assert_eq!(job(&h, &worker).status, JobStatus::Submitted);
    assert!(aws.calls().is_empty());

    // The master is older, so the next pass handles it first.
    let master = JobRecord::submitted(
        &h.run,
        0,
        JobSpec::new("node-0", Requirements::default()),
        h.now() - chrono::TimeDelta::minutes(1),
    );
    h.store.jobs.insert(master.clone());
    aws.fail_for(MockOperation::RunJob, "m-eu", MockFailure::NoCapacity);

    h.advance(Duration::from_secs(5));
    assert_eq!(h.submitted_jobs().await, 2);

    let master = job(&h, &master);
    let master_data = master.job_provisioning_data.unwrap();
    assert_eq!(master_data.region, "us-east-1");

    let worker = job(&h, &worker);
    assert_eq!(worker.status, JobStatus::Provisioning);
    let worker_data = worker.job_provisioning_data.unwrap();
    assert!(worker_data.is_colocated_with(&master_data));
    assert_eq!(worker_data.availability_zone, master_data.availability_zone);
}

#[tokio::test]
async fn test_job_of_deleted_run_is_terminated_by_server() {
    let h = Harness::new(&[]);
    let submitted = submit(&h, 0, JobSpec::new("orphan", Requirements::default()));
    let mut run = h.run.clone();
    run.deleted = true;
    h.store.add_run(run);

    h.submitted_jobs().await;
    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Terminating);
    assert_eq!(
        job.termination_reason,
        Some(JobTerminationReason::TerminatedByServer)
    );
}

#[tokio::test]
async fn test_fleet_jobs_combine_requirements() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5",
        "us-east-1",
        0.2,
        false,
    )]));
    let h = Harness::new(&[aws.clone()]);

    let mut fleet = FleetRecord::submitted(
        h.project.id,
        "workers",
        FleetSpec {
            nodes: Range::any(),
            requirements: Requirements::default(),
            spot_policy: SpotPolicy::OnDemand,
            filter: Default::default(),
        },
        h.now(),
    );
    fleet.status = FleetStatus::Active;
    h.store.fleets.insert(fleet.clone());

    let mut spec = JobSpec::new("in-fleet", Requirements::default());
    spec.fleets = Some(vec![fleet.id]);
    let placed = submit(&h, 0, spec);

    let mut arm = Requirements::default();
    arm.resources.cpu.arch = Some(CpuArch::Arm);
    let mut arm_fleet = fleet.clone();
    arm_fleet.id = stratus_id::FleetId::new();
    arm_fleet.spec.requirements = arm;
    h.store.fleets.insert(arm_fleet.clone());
    let mut spec = JobSpec::new("x86-on-arm", Requirements::default());
    spec.requirements.resources.cpu.arch = Some(CpuArch::X86);
    spec.fleets = Some(vec![arm_fleet.id]);
    let incompatible = submit(&h, 0, spec);

    h.submitted_jobs().await;

    let placed = job(&h, &placed);
    assert_eq!(placed.status, JobStatus::Provisioning);
    assert_eq!(placed.fleet_id, Some(fleet.id));
    let instance = h
        .store
        .instances
        .get(&placed.instance_id.unwrap().to_string())
        .unwrap();
    assert_eq!(instance.fleet_id, Some(fleet.id));

    let incompatible = job(&h, &incompatible);
    assert_eq!(incompatible.status, JobStatus::Terminating);
    assert_eq!(
        incompatible.termination_reason,
        Some(JobTerminationReason::TerminatedByServer)
    );
}

#[tokio::test]
async fn test_terminating_jobs_release_instances_and_settle() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5",
        "us-east-1",
        0.2,
        false,
    )]));
    let h = Harness::new(&[aws.clone()]);
    let offer = cpu_offer(BackendType::Aws, "m5", "us-east-1", 0.2, false);
    let pooled = h.add_idle_instance("pool-a", &offer);
    let immediate = h.add_idle_instance("pool-b", &offer);

    let kept = submit(&h, 0, JobSpec::new("kept", Requirements::default()));
    h.submitted_jobs().await;
    assert_eq!(job(&h, &kept).instance_id, Some(pooled.id));

    let mut spec = JobSpec::new("immediate", Requirements::default());
    spec.idle_duration = Some(IdleDuration::IMMEDIATE);
    let dropped = submit(&h, 0, spec);
    h.submitted_jobs().await;
    assert_eq!(job(&h, &dropped).instance_id, Some(immediate.id));

    for j in [&kept, &dropped] {
        h.store.jobs.update(&j.id.to_string(), |job| {
            job.status = JobStatus::Terminating;
            job.termination_reason = Some(JobTerminationReason::DoneByRunner);
        });
    }
    h.advance(Duration::from_secs(5));
    assert_eq!(h.terminating_jobs().await, 2);

    assert_eq!(job(&h, &kept).status, JobStatus::Done);
    assert_eq!(job(&h, &dropped).status, JobStatus::Done);
    let pooled = h.store.instances.get(&pooled.id.to_string()).unwrap();
    assert!(pooled.is_idle());
    let immediate = h.store.instances.get(&immediate.id.to_string()).unwrap();
    assert_eq!(immediate.status, InstanceStatus::Terminating);
    assert!(aws.calls().is_empty());
}

#[tokio::test]
async fn test_lost_lease_leaves_pool_instance_idle_until_next_pass() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws));
    let h = Harness::new(&[aws.clone()]);
    let pooled = h.add_idle_instance(
        "pool-0",
        &cpu_offer(BackendType::Aws, "m5", "us-east-1", 0.2, false),
    );

    let mut spec = JobSpec::new("reuse", Requirements::default());
    spec.creation_policy = CreationPolicy::Reuse;
    let submitted = submit(&h, 0, spec);

    assert_eq!(
        h.submitted_jobs_losing_leases().await,
        vec![ItemOutcome::LeaseLost]
    );
    let instance = h.store.instances.get(&pooled.id.to_string()).unwrap();
    assert_eq!(instance.status, InstanceStatus::Idle);
    assert_eq!(instance.job_id, None);
    let stuck = job(&h, &submitted);
    assert_eq!(stuck.status, JobStatus::Submitted);
    assert_eq!(stuck.instance_id, None);

    // Once the other holder's lease runs out the job lands on the pool.
    h.advance(Duration::from_secs(31));
    assert_eq!(h.submitted_jobs().await, 1);
    let placed = job(&h, &submitted);
    assert_eq!(placed.status, JobStatus::Provisioning);
    assert_eq!(placed.instance_id, Some(pooled.id));
    let instance = h.store.instances.get(&pooled.id.to_string()).unwrap();
    assert_eq!(instance.status, InstanceStatus::Busy);
    assert_eq!(instance.job_id, Some(placed.id));
    assert!(aws.calls().is_empty());
}

#[tokio::test]
async fn test_lost_lease_terminates_freshly_provisioned_instance() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5",
        "us-east-1",
        0.2,
        false,
    )]));
    let h = Harness::new(&[aws.clone()]);
    let submitted = submit(&h, 0, JobSpec::new("cpu", Requirements::default()));

    assert_eq!(
        h.submitted_jobs_losing_leases().await,
        vec![ItemOutcome::LeaseLost]
    );
    assert_eq!(aws.count(MockOperation::RunJob), 1);
    assert_eq!(aws.count(MockOperation::TerminateInstance), 1);
    assert!(h.store.instances.all().is_empty());
    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Submitted);
    assert_eq!(job.instance_id, None);
}

#[tokio::test]
async fn test_instance_already_bound_to_job_is_adopted() {
    let aws = Arc::new(MockBackend::new(BackendType::Aws).with_offers(vec![cpu_offer(
        BackendType::Aws,
        "m5",
        "us-east-1",
        0.2,
        false,
    )]));
    let h = Harness::new(&[aws.clone()]);
    let submitted = submit(&h, 0, JobSpec::new("cpu", Requirements::default()));
    let bound = h.add_idle_instance(
        "train-0-0",
        &cpu_offer(BackendType::Aws, "m5", "us-east-1", 0.2, false),
    );
    h.store.instances.update(&bound.id.to_string(), |instance| {
        instance.status = InstanceStatus::Busy;
        instance.job_id = Some(submitted.id);
    });

    assert_eq!(h.submitted_jobs().await, 1);

    let job = job(&h, &submitted);
    assert_eq!(job.status, JobStatus::Provisioning);
    assert_eq!(job.instance_id, Some(bound.id));
    assert_eq!(
        job.job_provisioning_data.map(|d| d.instance_id),
        Some("i-train-0-0".to_string())
    );
    assert_eq!(h.store.instances.all().len(), 1);
    assert!(aws.calls().is_empty());
}

#[tokio::test]
async fn test_terminating_job_releases_instance_bound_only_on_instance_side() {
    let h = Harness::new(&[]);
    let mut failed = JobRecord::submitted(
        &h.run,
        0,
        JobSpec::new("cpu", Requirements::default()),
        h.now(),
    );
    failed.status = JobStatus::Terminating;
    failed.termination_reason = Some(JobTerminationReason::FailedToStartDueToNoCapacity);
    h.store.jobs.insert(failed.clone());

    let bound = h.add_idle_instance(
        "train-0-0",
        &cpu_offer(BackendType::Aws, "m5", "us-east-1", 0.2, false),
    );
    h.store.instances.update(&bound.id.to_string(), |instance| {
        instance.status = InstanceStatus::Busy;
        instance.job_id = Some(failed.id);
    });

    assert_eq!(h.terminating_jobs().await, 1);

    let instance = h.store.instances.get(&bound.id.to_string()).unwrap();
    assert_eq!(instance.status, InstanceStatus::Idle);
    assert_eq!(instance.job_id, None);
    assert_eq!(job(&h, &failed).status, JobStatus::Failed);
}
