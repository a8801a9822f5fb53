//! Placement groups created for cluster fleets.

use chrono::{DateTime, Utc};
use stratus_id::{FleetId, PlacementGroupId, ProjectId};
use stratus_reconcile::LeaseState;
use stratus_resources::BackendType;

#[derive(Debug, Clone)]
pub struct PlacementGroupRecord {
    pub id: PlacementGroupId,
    pub project_id: ProjectId,
    pub fleet_id: FleetId,
    pub name: String,
    pub backend: BackendType,
    pub region: String,
    pub backend_data: Option<String>,
    pub last_processed_at: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub lease: LeaseState,
}

impl PlacementGroupRecord {
    fn apply_update(&mut self, update: &PlacementGroupUpdate) {
        if let Some(deleted_at) = update.deleted_at {
            self.deleted = true;
            self.deleted_at = Some(deleted_at);
        }
    }
}

leasable_record!(PlacementGroupRecord, PlacementGroupUpdate);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementGroupUpdate {
    pub deleted_at: Option<DateTime<Utc>>,
}
