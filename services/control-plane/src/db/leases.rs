//! Lease claims over reconcilable tables.
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so concurrent fetchers (in this
//! process or another) never wait on each other: each one takes whatever
//! due rows are not locked at that moment.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres, QueryBuilder};
use stratus_reconcile::{
    ClaimRequest, LeaseStore, Leasable, Leased, LockToken, ReconcileError, ReconcileResult,
};
use tracing::debug;

use super::DbError;

/// A table whose rows carry the lease columns.
pub trait PgResource: Leasable + for<'r> FromRow<'r, PgRow> + Send + Unpin {
    const TABLE: &'static str;

    /// Appends `column = value` assignments for every field `update` sets.
    fn push_update(update: &Self::Update, set: &mut Separated<'_, '_, Postgres, &'static str>);
}

fn store_error(err: sqlx::Error) -> ReconcileError {
    ReconcileError::store(DbError::Query(err))
}

/// [`LeaseStore`] over one table, restricted by a SQL predicate.
pub struct PgLeaseStore<R> {
    pool: PgPool,
    filter: &'static str,
    _resource: PhantomData<fn() -> R>,
}

impl<R: PgResource> PgLeaseStore<R> {
    /// `filter` is ANDed into the claim query, e.g. `status = 'submitted'`.
    pub fn new(pool: PgPool, filter: &'static str) -> Self {
        Self {
            pool,
            filter,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<R: PgResource> LeaseStore<R> for PgLeaseStore<R> {
    async fn claim(&self, request: &ClaimRequest) -> ReconcileResult<Vec<Leased<R>>> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let select = format!(
            r#"
            SELECT id FROM {table}
            WHERE deleted = FALSE
              AND last_processed_at <= $1
              AND (lock_expires_at IS NULL OR lock_expires_at < $2)
              AND (lock_owner IS NULL OR lock_owner = $3)
              AND ({filter})
            ORDER BY last_processed_at ASC
            LIMIT $4
            FOR UPDATE SKIP LOCKED
            "#,
            table = R::TABLE,
            filter = self.filter,
        );
        let ids: Vec<String> = sqlx::query_scalar(&select)
            .bind(request.due_before())
            .bind(request.now)
            .bind(&request.owner)
            .bind(i64::try_from(request.limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await
            .map_err(store_error)?;

        if ids.is_empty() {
            tx.commit().await.map_err(store_error)?;
            return Ok(Vec::new());
        }

        let tokens: Vec<uuid::Uuid> = ids
            .iter()
            .map(|_| LockToken::generate().as_uuid())
            .collect();
        let expires_at = request.lease_expires_at();
        let stamp = format!(
            r#"
            UPDATE {table} AS t
            SET lock_token = c.token, lock_expires_at = $1, lock_owner = $2
            FROM UNNEST($3::text[], $4::uuid[]) AS c(id, token)
            WHERE t.id = c.id
            RETURNING t.*
            "#,
            table = R::TABLE,
        );
        let mut rows: Vec<R> = sqlx::query_as::<_, R>(&stamp)
            .bind(expires_at)
            .bind(&request.owner)
            .bind(&ids)
            .bind(&tokens)
            .fetch_all(&mut *tx)
            .await
            .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;

        rows.sort_by_key(|row| row.last_processed_at());
        debug!(table = R::TABLE, owner = %request.owner, claimed = rows.len(), "Claimed rows");

        rows.into_iter()
            .map(|item| {
                let token = item
                    .lease()
                    .lock_token
                    .ok_or_else(|| ReconcileError::InvalidRow {
                        key: item.key(),
                        message: "claimed row has no lock token".to_string(),
                    })?;
                Ok(Leased {
                    item,
                    token,
                    expires_at,
                })
            })
            .collect()
    }

    async fn extend(
        &self,
        key: &str,
        token: LockToken,
        expires_at: DateTime<Utc>,
    ) -> ReconcileResult<bool> {
        let query = format!(
            "UPDATE {} SET lock_expires_at = $1 WHERE id = $2 AND lock_token = $3",
            R::TABLE
        );
        let result = sqlx::query(&query)
            .bind(expires_at)
            .bind(key)
            .bind(token.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn write_back(
        &self,
        key: &str,
        token: LockToken,
        update: &R::Update,
        processed_at: DateTime<Utc>,
    ) -> ReconcileResult<bool> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", R::TABLE));
        let mut set = builder.separated(", ");
        R::push_update(update, &mut set);
        set.push("lock_token = NULL");
        set.push("lock_expires_at = NULL");
        set.push("lock_owner = NULL");
        set.push("last_processed_at = ")
            .push_bind_unseparated(processed_at);
        builder
            .push(" WHERE id = ")
            .push_bind(key.to_string())
            .push(" AND lock_token = ")
            .push_bind(token.as_uuid());

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }
}
