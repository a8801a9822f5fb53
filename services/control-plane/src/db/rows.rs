//! Column decoding shared by the table modules.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::error::BoxDynError;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use stratus_reconcile::{LeaseState, LockToken, TerminationRetry};

fn column_error(column: &str, source: impl Into<BoxDynError>) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: source.into(),
    }
}

/// Parses a TEXT column (ids, statuses, backend types).
pub(crate) fn parse<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: Into<BoxDynError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| column_error(column, e))
}

pub(crate) fn parse_opt<T>(row: &PgRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: FromStr,
    T::Err: Into<BoxDynError>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| raw.parse().map_err(|e| column_error(column, e)))
        .transpose()
}

pub(crate) fn json<T: DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, sqlx::Error> {
    let Json(value): Json<T> = row.try_get(column)?;
    Ok(value)
}

pub(crate) fn json_opt<T: DeserializeOwned>(
    row: &PgRow,
    column: &str,
) -> Result<Option<T>, sqlx::Error> {
    let value: Option<Json<T>> = row.try_get(column)?;
    Ok(value.map(|Json(v)| v))
}

/// Reads a non-negative INTEGER column.
pub(crate) fn unsigned(row: &PgRow, column: &str) -> Result<u32, sqlx::Error> {
    let value: i32 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| column_error(column, e))
}

pub(crate) fn lease(row: &PgRow) -> Result<LeaseState, sqlx::Error> {
    let token: Option<uuid::Uuid> = row.try_get("lock_token")?;
    Ok(LeaseState {
        lock_token: token.map(LockToken::from_uuid),
        lock_expires_at: row.try_get("lock_expires_at")?,
        lock_owner: row.try_get("lock_owner")?,
    })
}

pub(crate) fn termination_retry(row: &PgRow) -> Result<TerminationRetry, sqlx::Error> {
    let first: Option<DateTime<Utc>> = row.try_get("first_termination_retry_at")?;
    let last: Option<DateTime<Utc>> = row.try_get("last_termination_retry_at")?;
    Ok(TerminationRetry {
        first_retry_at: first,
        last_retry_at: last,
    })
}
