//! `instances` table.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, Row};
use stratus_id::{FleetId, InstanceId, JobId, ProjectId};
use stratus_reconcile::LockToken;

use super::rows::{json_opt, lease, parse, parse_opt, termination_retry, unsigned};
use super::{PgResource, PgStore};
use crate::models::{InstanceRecord, InstanceUpdate};
use crate::store::{InstanceStore, StoreResult};

impl<'r> FromRow<'r, PgRow> for InstanceRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: parse(row, "id")?,
            project_id: parse(row, "project_id")?,
            fleet_id: parse_opt(row, "fleet_id")?,
            name: row.try_get("name")?,
            instance_num: unsigned(row, "instance_num")?,
            status: parse(row, "status")?,
            status_message: row.try_get("status_message")?,
            spec: json_opt(row, "spec")?,
            offer: json_opt(row, "offer")?,
            job_provisioning_data: json_opt(row, "job_provisioning_data")?,
            job_id: parse_opt(row, "job_id")?,
            termination_retry: termination_retry(row)?,
            created_at: row.try_get("created_at")?,
            last_processed_at: row.try_get("last_processed_at")?,
            deleted: row.try_get("deleted")?,
            deleted_at: row.try_get("deleted_at")?,
            lease: lease(row)?,
        })
    }
}

impl PgResource for InstanceRecord {
    const TABLE: &'static str = "instances";

    fn push_update(update: &InstanceUpdate, set: &mut Separated<'_, '_, Postgres, &'static str>) {
        if let Some(status) = update.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(message) = &update.status_message {
            set.push("status_message = ")
                .push_bind_unseparated(message.clone());
        }
        if let Some(offer) = &update.offer {
            set.push("offer = ")
                .push_bind_unseparated(Json(offer.clone()));
        }
        if let Some(data) = &update.job_provisioning_data {
            set.push("job_provisioning_data = ")
                .push_bind_unseparated(Json(data.clone()));
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

#[async_trait]
impl InstanceStore for PgStore {
    async fn get_instance(&self, instance_id: &InstanceId) -> StoreResult<Option<InstanceRecord>> {
        let instance = sqlx::query_as::<_, InstanceRecord>("SELECT * FROM instances WHERE id = $1")
            .bind(instance_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(instance)
    }

    async fn list_idle_instances(
        &self,
        project_id: &ProjectId,
        fleets: Option<&[FleetId]>,
    ) -> StoreResult<Vec<InstanceRecord>> {
        let fleet_ids: Option<Vec<String>> =
            fleets.map(|fleets| fleets.iter().map(ToString::to_string).collect());
        let instances = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT * FROM instances
            WHERE project_id = $1
              AND status = 'idle'
              AND job_id IS NULL
              AND deleted = FALSE
              AND ($2::text[] IS NULL OR fleet_id = ANY($2))
            ORDER BY name
            "#,
        )
        .bind(project_id.to_string())
        .bind(fleet_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(instances)
    }

    async fn list_fleet_instances(&self, fleet_id: &FleetId) -> StoreResult<Vec<InstanceRecord>> {
        let instances = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT * FROM instances
            WHERE fleet_id = $1 AND deleted = FALSE
            ORDER BY instance_num
            "#,
        )
        .bind(fleet_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(instances)
    }

    async fn find_job_instance(&self, job_id: &JobId) -> StoreResult<Option<InstanceRecord>> {
        let instance = sqlx::query_as::<_, InstanceRecord>(
            r#"
            SELECT * FROM instances
            WHERE job_id = $1 AND status = 'busy' AND deleted = FALSE
            LIMIT 1
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        Ok(instance)
    }

    async fn assign_instance(
        &self,
        instance_id: &InstanceId,
        job_id: &JobId,
        job_token: LockToken,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = 'busy', job_id = $2
            WHERE id = $1 AND status = 'idle' AND job_id IS NULL AND deleted = FALSE
              AND EXISTS (SELECT 1 FROM jobs WHERE id = $2 AND lock_token = $3)
            "#,
        )
        .bind(instance_id.to_string())
        .bind(job_id.to_string())
        .bind(job_token.as_uuid())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_instance(
        &self,
        instance_id: &InstanceId,
        job_id: &JobId,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = 'idle', job_id = NULL
            WHERE id = $1 AND status = 'busy' AND job_id = $2
            "#,
        )
        .bind(instance_id.to_string())
        .bind(job_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_instance_terminating(
        &self,
        instance_id: &InstanceId,
        idle_only: bool,
        message: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = 'terminating', status_message = $2
            WHERE id = $1
              AND deleted = FALSE
              AND CASE WHEN $3
                    THEN status = 'idle' AND job_id IS NULL
                    ELSE status NOT IN ('terminating', 'terminated')
                  END
            "#,
        )
        .bind(instance_id.to_string())
        .bind(message)
        .bind(idle_only)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_instance(&self, instance: &InstanceRecord) -> StoreResult<()> {
        insert_instance(self, instance, None).await?;
        Ok(())
    }

    async fn create_job_instance(
        &self,
        instance: &InstanceRecord,
        job_token: LockToken,
    ) -> StoreResult<bool> {
        insert_instance(self, instance, Some(job_token)).await
    }
}

/// Inserts `instance`; with `job_token`, only while that token holds the
/// lease of the instance's job.
async fn insert_instance(
    store: &PgStore,
    instance: &InstanceRecord,
    job_token: Option<LockToken>,
) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO instances (
            id, project_id, fleet_id, name, instance_num, status, status_message,
            spec, offer, job_provisioning_data, job_id, created_at, last_processed_at
        )
        SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
        WHERE $14::uuid IS NULL
           OR EXISTS (SELECT 1 FROM jobs WHERE id = $11 AND lock_token = $14)
        "#,
    )
    .bind(instance.id.to_string())
    .bind(instance.project_id.to_string())
    .bind(instance.fleet_id.map(|id| id.to_string()))
    .bind(&instance.name)
    .bind(instance.instance_num as i32)
    .bind(instance.status.as_str())
    .bind(&instance.status_message)
    .bind(instance.spec.clone().map(Json))
    .bind(instance.offer.clone().map(Json))
    .bind(instance.job_provisioning_data.clone().map(Json))
    .bind(instance.job_id.map(|id| id.to_string()))
    .bind(instance.created_at)
    .bind(instance.last_processed_at)
    .bind(job_token.map(|token| token.as_uuid()))
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected() == 1)
}
