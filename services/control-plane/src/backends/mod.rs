//! Backend capability interface.
//!
//! The core never talks to a cloud SDK directly: every provider implements
//! [`Backend`] and exposes its operations through [`Compute`]. Providers are
//! constructed by a [`BackendRegistry`] from stored configuration and cached
//! per project by [`BackendCache`].

mod cache;
mod error;
pub mod mock;
mod registry;

pub use cache::{BackendCache, ProjectBackends};
pub use error::ComputeError;
pub use mock::{MockBackend, MockBackendFactory, MockCall, MockFailure, MockOperation};
pub use registry::{BackendFactory, BackendRegistry, StaticBackendFactory};

use async_trait::async_trait;
use stratus_resources::{BackendType, InstanceOffer, InstanceOfferWithAvailability, Requirements};

use crate::models::{
    ComputeGroupRecord, JobProvisioningData, JobRecord, PlacementGroupRecord, RunRecord, SshKeys,
    VolumeProvisioningData, VolumeRecord,
};

/// Result of a backend compute operation.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Settings for an instance created outside of a job.
#[derive(Debug, Clone)]
pub struct InstanceConfiguration {
    pub project_name: String,
    pub instance_name: String,
    pub ssh_keys: SshKeys,
}

/// A configured cloud provider.
pub trait Backend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    fn compute(&self) -> &dyn Compute;
}

/// Cloud operations of one backend.
#[async_trait]
pub trait Compute: Send + Sync {
    /// Offers matching `requirements`, sorted by ascending price.
    async fn get_offers(
        &self,
        requirements: &Requirements,
    ) -> ComputeResult<Vec<InstanceOfferWithAvailability>>;

    /// Provisions an instance and starts `job` on it.
    async fn run_job(
        &self,
        run: &RunRecord,
        job: &JobRecord,
        offer: &InstanceOffer,
        ssh_keys: &SshKeys,
    ) -> ComputeResult<JobProvisioningData>;

    async fn create_instance(
        &self,
        _offer: &InstanceOffer,
        _config: &InstanceConfiguration,
    ) -> ComputeResult<JobProvisioningData> {
        Err(ComputeError::NotSupported("create_instance"))
    }

    async fn terminate_instance(
        &self,
        instance_id: &str,
        region: &str,
        backend_data: Option<&str>,
    ) -> ComputeResult<()>;

    async fn delete_placement_group(&self, _group: &PlacementGroupRecord) -> ComputeResult<()> {
        Err(ComputeError::NotSupported("delete_placement_group"))
    }

    async fn create_volume(&self, _volume: &VolumeRecord) -> ComputeResult<VolumeProvisioningData> {
        Err(ComputeError::NotSupported("create_volume"))
    }

    async fn delete_volume(&self, _volume: &VolumeRecord) -> ComputeResult<()> {
        Err(ComputeError::NotSupported("delete_volume"))
    }

    async fn terminate_compute_group(&self, _group: &ComputeGroupRecord) -> ComputeResult<()> {
        Err(ComputeError::NotSupported("terminate_compute_group"))
    }
}
