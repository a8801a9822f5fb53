//! `fleets` table.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres, Row};
use stratus_id::FleetId;

use super::rows::{json, lease, parse};
use super::{PgResource, PgStore};
use crate::models::{FleetRecord, FleetUpdate};
use crate::store::{FleetStore, StoreResult};

impl<'r> FromRow<'r, PgRow> for FleetRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            name: row.try_get("name")?,
            status: parse(row, "status")?,
            status_message: row.try_get("status_message")?,
            spec: json(row, "spec")?,
            created_at: row.try_get("created_at")?,
            last_processed_at: row.try_get("last_processed_at")?,
            deleted: row.try_get("deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            lease: lease(row)?,
        })
    }
}

impl PgResource for FleetRecord {
    const TABLE: &'static str = "fleets";

    fn push_update(update: &FleetUpdate, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(message) = &update.status_message {
            set.push("status_message = ")
                .push_bind_unseparated(message.clone());
        }
        if let Some(deleted_at) = update.deleted_at {
            set.push("deleted = TRUE");
            set.push("deleted_at = ").push_bind_unseparated(deleted_at);
        }
    }
}

#[async_trait]
impl FleetStore for PgStore {
    async fn get_fleet(&self, fleet_id: &FleetId) -> StoreResult<Option<FleetRecord>> {
        let fleet = sqlx::query_as::<_, FleetRecord>("SELECT * FROM fleets WHERE id = $1")
            .bind(fleet_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(fleet)
    }
}
