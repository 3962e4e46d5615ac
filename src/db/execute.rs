//! Run a SQL statement and marshal its rows into generic JSON records.
//!
//! This is the execution path that sits next to the translator. It makes
//! no decisions beyond telling row-returning statements apart from
//! commands.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::Pool;
use serde::Serialize;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio_postgres::{types::Type, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
}

impl QueryRows {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Whether a statement is expected to return rows, judged by its first
/// keyword after any leading comments and opening parentheses.
pub fn returns_rows(sql: &str) -> bool {
    matches!(
        leading_keyword(sql).as_str(),
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "TABLE" | "VALUES"
    )
}

fn leading_keyword(sql: &str) -> String {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix('(') {
            rest = after;
        } else {
            return trimmed
                .chars()
                .take_while(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_uppercase();
        }
    }
}

pub async fn execute_sql(pool: &Pool, sql: &str, timeout: Duration) -> Result<QueryRows> {
    let sql_trimmed = sql.trim().trim_end_matches(';').trim_end();
    if sql_trimmed.is_empty() {
        anyhow::bail!("Refusing to execute an empty statement");
    }

    let started = Instant::now();
    let client = pool
        .get()
        .await
        .context("Failed to get a database connection")?;

    let run = async {
        let statement = client
            .prepare(sql_trimmed)
            .await
            .context("Failed to prepare statement")?;
        // INSERT ... RETURNING has columns too.
        if returns_rows(sql_trimmed) || !statement.columns().is_empty() {
            let columns = statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect();
            let rows = client.query(&statement, &[]).await.context("Query failed")?;
            Ok::<_, anyhow::Error>(rows_to_records(columns, &rows))
        } else {
            let affected = client
                .execute(&statement, &[])
                .await
                .context("Statement failed")?;
            Ok(QueryRows {
                affected_rows: Some(affected),
                ..Default::default()
            })
        }
    };
    let mut result = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| anyhow::anyhow!("Statement timed out after {:?}", timeout))??;

    result.execution_time_ms = started.elapsed().as_millis() as u64;
    info!(
        rows = result.row_count(),
        affected = ?result.affected_rows,
        elapsed_ms = result.execution_time_ms,
        "statement executed"
    );
    Ok(result)
}

/// Marshal rows into records. `columns` comes from the prepared
/// statement so an empty result still names its columns.
fn rows_to_records(columns: Vec<String>, rows: &[Row]) -> QueryRows {
    debug!(columns = columns.len(), rows = rows.len(), "marshalling rows");

    let mut undecodable = HashSet::new();
    let records = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(idx, column)| {
                    let value = match extract_value(row, idx, column.type_()) {
                        Ok(value) => value,
                        Err(err) => {
                            if undecodable.insert(idx) {
                                warn!(
                                    column = column.name(),
                                    pg_type = %column.type_(),
                                    error = %err,
                                    "cannot decode column, reporting null"
                                );
                            }
                            Value::Null
                        }
                    };
                    (column.name().to_string(), value)
                })
                .collect::<Map<String, Value>>()
        })
        .collect();

    QueryRows {
        columns,
        rows: records,
        ..Default::default()
    }
}

/// NUMERIC keeps its exact digits and scale, so it travels as a string.
fn numeric_value(value: Decimal) -> Value {
    Value::from(value.to_string())
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> Result<Value, tokio_postgres::Error> {
    fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>, tokio_postgres::Error>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx)
    }

    let value = match *pg_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::from),
        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::OID => get::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|f| Value::from(f as f64)),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::from),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(numeric_value),
        Type::UUID => get::<Uuid>(row, idx)?.map(|u| Value::from(u.to_string())),
        // The single-byte "char" type.
        Type::CHAR => get::<i8>(row, idx)?.map(|c| Value::from(char::from(c as u8).to_string())),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::BPCHAR => {
            get::<String>(row, idx)?.map(Value::from)
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|b| Value::from(format!("[{} bytes]", b.len()))),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(|d| Value::from(d.to_string())),
        Type::TIME => get::<NaiveTime>(row, idx)?.map(|t| Value::from(t.to_string())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(|dt| Value::from(dt.to_string())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(|dt| Value::from(dt.to_rfc3339())),
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<String>>(row, idx)?.map(Value::from),
        Type::INT4_ARRAY => get::<Vec<i32>>(row, idx)?.map(Value::from),
        Type::INT8_ARRAY => get::<Vec<i64>>(row, idx)?.map(Value::from),
        // Anything else is attempted as text.
        _ => get::<String>(row, idx)?.map(Value::from),
    };

    Ok(value.unwrap_or(Value::Null))
}
