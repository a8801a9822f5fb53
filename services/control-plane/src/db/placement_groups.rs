//! `placement_groups` table.

use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres, Row};

use super::rows::{lease, parse};
use super::PgResource;
use crate::models::{PlacementGroupRecord, PlacementGroupUpdate};

impl<'r> FromRow<'r, PgRow> for PlacementGroupRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            fleet_id: parse(row, "fleet_id")?,
            name: row.try_get("name")?,
            backend: parse(row, "backend")?,
            region: row.try_get("region")?,
            backend_data: row.try_get("backend_data")?,
            last_processed_at: row.try_get("last_processed_at")?,
            deleted: row.try_get("deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            lease: lease(row)?,
        })
    }
}

impl PgResource for PlacementGroupRecord {
    const TABLE: &'static str = "placement_groups";

    fn push_update(
        update: &PlacementGroupUpdate,
        set: &mut Separated<'_, '_, Postgres, &'static str>,
    ) {
        if let Some(deleted_at) = update.deleted_at {
            set.push("deleted = TRUE");
            set.push("deleted_at = ").push_bind_unseparated(deleted_at);
        }
    }
}
