//! `volumes` table.

use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Row};

use super::rows::{json, json_opt, lease, parse};
use super::PgResource;
use crate::models::{VolumeRecord, VolumeUpdate};

impl<'r> FromRow<'r, PgRow> for VolumeRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            name: row.try_get("name")?,
            status: parse(row, "status")?,
            status_message: row.try_get("status_message")?,
            configuration: json(row, "configuration")?,
            provisioning_data: json_opt(row, "provisioning_data")?,
            to_be_deleted: row.try_get("to_be_deleted")?,
            last_processed_at: row.try_get("last_processed_at")?,
            deleted: row.try_get("deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            lease: lease(row)?,
        })
    }
}

impl PgResource for VolumeRecord {
    const TABLE: &'static str = "volumes";

    fn push_update(update: &VolumeUpdate, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(message) = &update.status_message {
            set.push("status_message = ")
                .push_bind_unseparated(message.clone());
        }
        if let Some(data) = &update.provisioning_data {
            set.push("provisioning_data = ")
                .push_bind_unseparated(Json(data.clone()));
        }
        if let Some(deleted_at) = update.deleted_at {
            set.push("deleted = TRUE");
            set.push("deleted_at = ").push_bind_unseparated(deleted_at);
        }
    }
}
