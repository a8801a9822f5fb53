//! Deletes placement groups whose fleet is gone.

use async_trait::async_trait;
use stratus_reconcile::{BoxError, Leased, Processor};
use tracing::{debug, error, info, instrument};

use crate::backends::ComputeError;
use crate::models::{PlacementGroupRecord, PlacementGroupUpdate};
use crate::state::ServerContext;

pub const NAME: &str = "placement_groups";

pub struct PlacementGroupsProcessor {
    ctx: ServerContext,
}

impl PlacementGroupsProcessor {
    pub fn new(ctx: ServerContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Processor<PlacementGroupRecord> for PlacementGroupsProcessor {
    #[instrument(skip_all, fields(placement_group = %item.item.name))]
    async fn process(
        &self,
        item: &Leased<PlacementGroupRecord>,
    ) -> Result<PlacementGroupUpdate, BoxError> {
        let group = &item.item;
        let fleet = self.ctx.stores().fleets.get_fleet(&group.fleet_id).await?;
        if fleet.is_some_and(|fleet| !fleet.deleted) {
            return Ok(PlacementGroupUpdate::default());
        }

        let deleted = PlacementGroupUpdate {
            deleted_at: Some(self.ctx.now()),
        };
        let Some(backend) = self
            .ctx
            .backends()
            .get_project_backend(&group.project_id, group.backend)
            .await?
        else {
            error!(
                backend = %group.backend,
                "Backend is no longer configured, placement group must be deleted manually"
            );
            return Ok(deleted);
        };

        match backend.compute().delete_placement_group(group).await {
            Ok(()) => {
                info!("Deleted placement group");
                Ok(deleted)
            }
            Err(ComputeError::PlacementGroupInUse(_)) => {
                debug!("Placement group is still in use");
                Ok(PlacementGroupUpdate::default())
            }
            Err(e) => {
                error!(
                    error = ?e,
                    region = %group.region,
                    "Failed to delete placement group, marking deleted; manual cleanup required"
                );
                Ok(deleted)
            }
        }
    }
}
