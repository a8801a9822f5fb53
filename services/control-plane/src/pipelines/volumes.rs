//! Volume creation and deletion.

use async_trait::async_trait;
use stratus_reconcile::{BoxError, Leased, Processor};
use tracing::{error, info, instrument, warn};

use crate::models::{VolumeRecord, VolumeStatus, VolumeUpdate};
use crate::state::ServerContext;

pub const NAME: &str = "volumes";

pub struct VolumesProcessor {
    ctx: ServerContext,
}

impl VolumesProcessor {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }

    async fn create(&self, volume: &VolumeRecord) -> Result<VolumeUpdate, BoxError> {
        let backend_type = volume.configuration.backend;
        let Some(backend) = self
            .ctx
            .backends()
            .get_project_backend(&volume.project_id, backend_type)
            .await?
        else {
            warn!(backend = %backend_type, "Volume backend is not configured");
            return Ok(failed(format!("Backend {backend_type} is not configured")));
        };

        match backend.compute().create_volume(volume).await {
            Ok(data) => {
                info!(volume_id = %data.volume_id, "Created volume");
                Ok(VolumeUpdate {
                    status: Some(VolumeStatus::Active),
                    provisioning_data: Some(data),
                    ..Default::default()
                })
            }
            Err(e) if e.is_backend_error() => {
                warn!(error = %e, "Failed to create volume");
                Ok(failed(e.to_string()))
            }
            Err(e) => {
                error!(error = ?e, "Unexpected error creating volume");
                Ok(failed("Unexpected error".to_string()))
            }
        }
    }

    async fn delete(&self, volume: &VolumeRecord) -> Result<VolumeUpdate, BoxError> {
        let deleted = VolumeUpdate {
            deleted_at: Some(self.ctx.now()),
            ..Default::default()
        };
        if volume.provisioning_data.is_none() {
            info!("Volume was never provisioned, marking deleted");
            return Ok(deleted);
        }

        let backend_type = volume.configuration.backend;
        let Some(backend) = self
            .ctx
            .backends()
            .get_project_backend(&volume.project_id, backend_type)
            .await?
        else {
            error!(
                backend = %backend_type,
                "Backend is no longer configured, volume must be deleted manually"
            );
            return Ok(deleted);
        };

        match backend.compute().delete_volume(volume).await {
            Ok(()) => {
                info!("Deleted volume");
                Ok(deleted)
            }
            Err(e) if e.is_backend_error() => {
                warn!(error = %e, "Failed to delete volume, will retry");
                Ok(VolumeUpdate::default())
            }
            Err(e) => {
                error!(
                    error = ?e,
                    "Failed to delete volume, marking deleted; manual cleanup required"
                );
                Ok(deleted)
            }
        }
    }
}

fn failed(message: String) -> VolumeUpdate {
    VolumeUpdate {
        status: Some(VolumeStatus::Failed),
        status_message: Some(message),
        ..Default::default()
    }
}

#[async_trait]
impl Processor<VolumeRecord> for VolumesProcessor {
    #[instrument(skip_all, fields(volume_id = %item.item.id, volume = %item.item.name))]
    async fn process(&self, item: &Leased<VolumeRecord>) -> Result<VolumeUpdate, BoxError> {
        let volume = &item.item;
        if volume.to_be_deleted {
            return self.delete(volume).await;
        }
        match volume.status {
            VolumeStatus::Submitted => self.create(volume).await,
            _ => Ok(VolumeUpdate::default()),
        }
    }
}
