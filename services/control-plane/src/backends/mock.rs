//! In-process backend with scriptable offers and failures.
//!
//! Records every call so tests can assert which cloud operations ran, and
//! doubles as the `mock` backend of local development setups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;
use stratus_resources::{BackendType, InstanceOffer, InstanceOfferWithAvailability, Requirements};

use super::{
    Backend, BackendFactory, Compute, ComputeError, ComputeResult, InstanceConfiguration,
};
use crate::models::{
    BackendConfig, ComputeGroupRecord, JobProvisioningData, JobRecord, PlacementGroupRecord,
    RunRecord, SshKeys, VolumeProvisioningData, VolumeRecord,
};

/// Operations a [`MockBackend`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetOffers,
    RunJob,
    CreateInstance,
    TerminateInstance,
    DeletePlacementGroup,
    CreateVolume,
    DeleteVolume,
    TerminateComputeGroup,
}

/// Error a scripted failure raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Backend,
    NoCapacity,
    PlacementGroupInUse,
    Unexpected,
}

impl MockFailure {
    fn to_error(self, target: &str) -> ComputeError {
        match self {
            Self::Backend => ComputeError::Backend(format!("mock failure on {target}")),
            Self::NoCapacity => ComputeError::NoCapacity(format!("mock has no capacity for {target}")),
            Self::PlacementGroupInUse => ComputeError::PlacementGroupInUse(target.to_string()),
            Self::Unexpected => {
                ComputeError::Unexpected(anyhow::anyhow!("mock crashed on {target}"))
            }
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub operation: MockOperation,
    /// Instance type, instance id, group or volume name the call was about.
    pub target: String,
    /// Spot flag of the requirements, for `GetOffers`.
    pub spot: Option<bool>,
}

#[derive(Default)]
struct MockState {
    offers: Vec<InstanceOfferWithAvailability>,
    failures: HashMap<MockOperation, MockFailure>,
    /// Failures scoped to one target, checked before `failures`.
    target_failures: HashMap<(MockOperation, String), MockFailure>,
    calls: Vec<MockCall>,
}

pub struct MockBackend {
    backend_type: BackendType,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_offers(self, offers: Vec<InstanceOfferWithAvailability>) -> Self {
        self.state().offers = offers;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every call of `operation` fail until cleared.
    pub fn fail(&self, operation: MockOperation, failure: MockFailure) {
        self.state().failures.insert(operation, failure);
    }

    /// Makes `operation` fail only for `target`.
    pub fn fail_for(&self, operation: MockOperation, target: impl Into<String>, failure: MockFailure) {
        self.state()
            .target_failures
            .insert((operation, target.into()), failure);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.target_failures.clear();
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, operation: MockOperation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn record(&self, operation: MockOperation, target: &str, spot: Option<bool>) -> ComputeResult<()> {
        let mut state = self.state();
        state.calls.push(MockCall {
            operation,
            target: target.to_string(),
            spot,
        });
        let failure = state
            .target_failures
            .get(&(operation, target.to_string()))
            .or_else(|| state.failures.get(&operation))
            .copied();
        match failure {
            Some(failure) => Err(failure.to_error(target)),
            None => Ok(()),
        }
    }

    fn provisioning_data(&self, offer: &InstanceOffer, name: &str) -> JobProvisioningData {
        JobProvisioningData {
            backend: self.backend_type,
            instance_type: offer.instance.clone(),
            instance_id: format!("{}-{}", self.backend_type, name),
            hostname: Some(format!("{name}.{}.mock", offer.region)),
            region: offer.region.clone(),
            availability_zone: offer.availability_zones.first().cloned(),
            price: offer.price,
            username: "ubuntu".to_string(),
            ssh_port: Some(22),
            backend_data: None,
        }
    }
}

impl Backend for MockBackend {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn compute(&self) -> &dyn Compute {
        self
    }
}

#[async_trait]
impl Compute for MockBackend {
    async fn get_offers(
        &self,
        requirements: &Requirements,
    ) -> ComputeResult<Vec<InstanceOfferWithAvailability>> {
        self.record(MockOperation::GetOffers, "offers", requirements.spot)?;
        let mut offers: Vec<_> = self
            .state()
            .offers
            .iter()
            .filter(|o| o.offer.matches(requirements))
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.price().total_cmp(&b.price()));
        Ok(offers)
    }

    async fn run_job(
        &self,
        _run: &RunRecord,
        job: &JobRecord,
        offer: &InstanceOffer,
        _ssh_keys: &SshKeys,
    ) -> ComputeResult<JobProvisioningData> {
        self.record(MockOperation::RunJob, &offer.instance.name, None)?;
        Ok(self.provisioning_data(offer, &job.spec.job_name))
    }

    async fn create_instance(
        &self,
        offer: &InstanceOffer,
        config: &InstanceConfiguration,
    ) -> ComputeResult<JobProvisioningData> {
        self.record(MockOperation::CreateInstance, &offer.instance.name, None)?;
        Ok(self.provisioning_data(offer, &config.instance_name))
    }

    async fn terminate_instance(
        &self,
        instance_id: &str,
        _region: &str,
        _backend_data: Option<&str>,
    ) -> ComputeResult<()> {
        self.record(MockOperation::TerminateInstance, instance_id, None)
    }

    async fn delete_placement_group(&self, group: &PlacementGroupRecord) -> ComputeResult<()> {
        self.record(MockOperation::DeletePlacementGroup, &group.name, None)
    }

    async fn create_volume(&self, volume: &VolumeRecord) -> ComputeResult<VolumeProvisioningData> {
        self.record(MockOperation::CreateVolume, &volume.name, None)?;
        let config = &volume.configuration;
        Ok(VolumeProvisioningData {
            volume_id: config
                .volume_id
                .clone()
                .unwrap_or_else(|| format!("vol-{}", volume.name)),
            size: config.size.unwrap_or(stratus_resources::Memory::gib(100.0)),
            availability_zone: None,
            backend_data: None,
        })
    }

    async fn delete_volume(&self, volume: &VolumeRecord) -> ComputeResult<()> {
        self.record(MockOperation::DeleteVolume, &volume.name, None)
    }

    async fn terminate_compute_group(&self, group: &ComputeGroupRecord) -> ComputeResult<()> {
        self.record(
            MockOperation::TerminateComputeGroup,
            &group.provisioning_data.group_id,
            None,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct MockBackendSettings {
    #[serde(default)]
    offers: Vec<InstanceOfferWithAvailability>,
}

/// Builds a [`MockBackend`] whose offers come from the stored configuration.
#[derive(Debug, Default)]
pub struct MockBackendFactory;

impl BackendFactory for MockBackendFactory {
    fn create(&self, config: &BackendConfig) -> ComputeResult<Arc<dyn Backend>> {
        let settings: MockBackendSettings = serde_json::from_value(config.config.clone())
            .map_err(|e| ComputeError::Unexpected(e.into()))?;
        Ok(Arc::new(
            MockBackend::new(config.backend_type).with_offers(settings.offers),
        ))
    }
}
