//! `compute_groups` table.

use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres, Row};

use super::rows::{json, lease, parse, parse_opt, termination_retry};
use super::PgResource;
use crate::models::{ComputeGroupRecord, ComputeGroupUpdate};

impl<'r> FromRow<'r, PgRow> for ComputeGroupRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            fleet_id: parse_opt(row, "fleet_id")?,
            backend: parse(row, "backend")?,
            status: parse(row, "status")?,
            provisioning_data: json(row, "provisioning_data")?,
            termination_retry: termination_retry(row)?,
            last_processed_at: row.try_get("last_processed_at")?,
            deleted: row.try_get("deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            lease: lease(row)?,
        })
    }
}

impl PgResource for ComputeGroupRecord {
    const TABLE: &'static str = "compute_groups";

    fn push_update(
        update: &ComputeGroupUpdate,
        set: &mut Separated<'_, '_, Postgres, &'static str>,
    ) {
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(retry) = update.termination_retry {
            set.push("first_termination_retry_at = ")
                .push_bind_unseparated(retry.first_retry_at);
            set.push("last_termination_retry_at = ")
                .push_bind_unseparated(retry.last_retry_at);
        }
        if let Some(deleted_at) = update.deleted_at {
            set.push("deleted = TRUE");
            set.push("deleted_at = ").push_bind_unseparated(deleted_at);
        }
    }
}
