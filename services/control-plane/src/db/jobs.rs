//! `jobs`, `runs` and `projects` tables.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Row};
use stratus_id::{JobId, ProjectId, RunId};

use super::rows::{json, json_opt, lease, parse, parse_opt, unsigned};
use super::{PgResource, PgStore};
use crate::models::{JobRecord, JobUpdate, ProjectRecord, RunRecord};
use crate::store::{JobStore, StoreResult};

impl<'r> FromRow<'r, PgRow> for JobRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            run_id: parse(row, "run_id")?,
            fleet_id: parse_opt(row, "fleet_id")?,
            instance_id: parse_opt(row, "instance_id")?,
            job_num: unsigned(row, "job_num")?,
            replica_num: unsigned(row, "replica_num")?,
            submission_num: unsigned(row, "submission_num")?,
            status: parse(row, "status")?,
            termination_reason: parse_opt(row, "termination_reason")?,
            termination_reason_message: row.try_get("termination_reason_message")?,
            spec: json(row, "spec")?,
            job_provisioning_data: json_opt(row, "job_provisioning_data")?,
            submitted_at: row.try_get("submitted_at")?,
            last_processed_at: row.try_get("last_processed_at")?,
            deleted: row.try_get("deleted")?,
            lease: lease(row)?,
        })
    }
}

impl PgResource for JobRecord {
    const TABLE: &'static str = "jobs";

    fn push_update(update: &JobUpdate, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(reason) = update.termination_reason {
            set.push("termination_reason = ")
                .push_bind_unseparated(reason.as_str());
        }
        if let Some(message) = &update.termination_reason_message {
            set.push("termination_reason_message = ")
                .push_bind_unseparated(message.clone());
        }
        if let Some(instance_id) = update.instance_id {
            set.push("instance_id = ")
                .push_bind_unseparated(instance_id.to_string());
        }
        if let Some(fleet_id) = update.fleet_id {
            set.push("fleet_id = ")
                .push_bind_unseparated(fleet_id.to_string());
        }
        if let Some(data) = &update.job_provisioning_data {
            set.push("job_provisioning_data = ")
                .push_bind_unseparated(Json(data.clone()));
        }
    }
}

impl<'r> FromRow<'r, PgRow> for RunRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            run_name: row.try_get("run_name")?,
            deleted: row.try_get("deleted")?,
            ssh_public_key: row.try_get("ssh_public_key")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for ProjectRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            name: row.try_get("name")?,
            ssh_public_key: row.try_get("ssh_public_key")?,
            ssh_private_key: row.try_get("ssh_private_key")?,
        })
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn get_project(&self, project_id: &ProjectId) -> StoreResult<Option<ProjectRecord>> {
        let project = sqlx::query_as::<_, ProjectRecord>(
            r#"
            SELECT id, name, ssh_public_key, ssh_private_key
            FROM projects
            WHERE id = $1 AND deleted = FALSE
            "#,
        )
        .bind(project_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        Ok(project)
    }

    async fn get_run(&self, run_id: &RunId) -> StoreResult<Option<RunRecord>> {
        let run = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT id, project_id, run_name, deleted, ssh_public_key
            FROM runs
            WHERE id = $1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        Ok(run)
    }

    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(job)
    }

    async fn get_master_job(
        &self,
        run_id: &RunId,
        replica_num: u32,
    ) -> StoreResult<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE run_id = $1 AND replica_num = $2 AND job_num = 0
            ORDER BY submission_num DESC
            LIMIT 1
            "#,
        )
        .bind(run_id.to_string())
        .bind(replica_num as i32)
        .fetch_optional(self.pool())
        .await?;
        Ok(job)
    }
}
