//! The multi-row insert helper: composes a parameterised
//! `INSERT ... VALUES (...),(...) [RETURNING id]` statement safely.
//!
//! Table and column names pass through [`revoker_core::validate_identifier`]
//! before they are ever concatenated into SQL text. Row values always
//! travel as bound parameters via [`sqlx::QueryBuilder::push_bind`], never
//! interpolated directly.

use chrono::{DateTime, Utc};
use revoker_core::{validate_identifier, RevokerError};
use sqlx::MySqlPool;

/// A single bound value in a row passed to [`insert_many`].
#[derive(Debug, Clone)]
pub enum SqlValue {
    Str(String),
    I64(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
}

/// Inserts `rows` into `table` across `columns`, in one statement.
///
/// If `returning_id_column` is set, that column is validated the same way
/// as `table`/`columns` and scanned back out as an `i64` per inserted row,
/// in row order. Returns an empty vec immediately if `rows` is empty,
/// without issuing a query.
///
/// # Errors
/// - [`RevokerError::BadRequest`] if any identifier fails validation, or
///   any row doesn't have exactly one value per column.
/// - [`RevokerError::Storage`] on a store error.
pub async fn insert_many(
    pool: &MySqlPool,
    table: &str,
    columns: &[&str],
    rows: &[Vec<SqlValue>],
    returning_id_column: Option<&str>,
) -> Result<Vec<i64>, RevokerError> {
    validate_identifier(table)?;
    for column in columns {
        validate_identifier(column)?;
    }
    if let Some(returning) = returning_id_column {
        validate_identifier(returning)?;
    }
    for row in rows {
        if row.len() != columns.len() {
            return Err(RevokerError::BadRequest(format!(
                "row has {} values, expected {} to match columns",
                row.len(),
                columns.len()
            )));
        }
    }
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: sqlx::QueryBuilder<sqlx::MySql> =
        sqlx::QueryBuilder::new(format!("INSERT INTO {table} ({}) ", columns.join(", ")));

    builder.push_values(rows, |mut separated, row| {
        for value in row {
            match value {
                SqlValue::Str(s) => {
                    separated.push_bind(s.clone());
                }
                SqlValue::I64(i) => {
                    separated.push_bind(*i);
                }
                SqlValue::Bool(b) => {
                    separated.push_bind(*b);
                }
                SqlValue::Bytes(b) => {
                    separated.push_bind(b.clone());
                }
                SqlValue::DateTime(dt) => {
                    separated.push_bind(*dt);
                }
            }
        }
    });

    if let Some(returning) = returning_id_column {
        builder.push(format!(" RETURNING {returning}"));
        let ids: Vec<(i64,)> = builder
            .build_query_as()
            .fetch_all(pool)
            .await
            .map_err(RevokerError::from)?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    } else {
        builder
            .build()
            .execute(pool)
            .await
            .map_err(RevokerError::from)?;
        Ok(Vec::new())
    }
}
