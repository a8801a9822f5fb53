//! `backends` table: per-project backend configuration.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use stratus_id::ProjectId;

use super::rows::{json, parse};
use super::PgStore;
use crate::models::BackendConfig;
use crate::store::{BackendConfigStore, StoreResult};

impl<'r> FromRow<'r, PgRow> for BackendConfig {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            project_id: parse(row, "project_id")?,
            backend_type: parse(row, "type")?,
            config: json(row, "config")?,
        })
    }
}

#[async_trait]
impl BackendConfigStore for PgStore {
    async fn list_backend_configs(
        &self,
        project_id: &ProjectId,
    ) -> StoreResult<Vec<BackendConfig>> {
        let configs = sqlx::query_as::<_, BackendConfig>(
            r#"
            SELECT project_id, type, config
            FROM backends
            WHERE project_id = $1
            ORDER BY type
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(configs)
    }
}
