use serde::{Deserialize, Serialize};
use tokio_postgres::Client;

/// A table as seen by the catalog, with its descriptive comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default)]
    pub comment: String,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: comment.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub comment: String,
}

impl ColumnDescriptor {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            comment: comment.into(),
        }
    }
}

/// A described table: the descriptor plus its columns in ordinal order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub table: TableDescriptor,
    pub columns: Vec<ColumnDescriptor>,
}

pub async fn fetch_tables(
    client: &Client,
    schema: &str,
) -> Result<Vec<TableDescriptor>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
            SELECT
                c.relname::text as name,
                COALESCE(pg_catalog.obj_description(c.oid, 'pg_class'), '') as comment
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
            ORDER BY c.relname
            "#,
            &[&schema],
        )
        .await?;

    let tables = rows
        .iter()
        .map(|row| TableDescriptor {
            name: row.get("name"),
            comment: row.get("comment"),
        })
        .collect();

    Ok(tables)
}

pub async fn fetch_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
            SELECT
                a.attname::text as name,
                pg_catalog.format_type(a.atttypid, a.atttypmod) as data_type,
                COALESCE(pg_catalog.col_description(a.attrelid, a.attnum), '') as comment
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relname = $2
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
            &[&schema, &table],
        )
        .await?;

    let columns = rows
        .iter()
        .map(|row| ColumnDescriptor {
            name: row.get("name"),
            data_type: row.get("data_type"),
            comment: row.get("comment"),
        })
        .collect();

    Ok(columns)
}
