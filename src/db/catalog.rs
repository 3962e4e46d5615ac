//! Read-only access to the target database's metadata.
//!
//! The translation pipeline only needs two operations from a database: the
//! list of tables with their comments, and the columns of one table. They
//! are expressed as the [`SchemaCatalog`] trait so that other engines (or
//! in-memory fixtures) can stand in for PostgreSQL.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::connection::{build_pool, ConnectionConfig};
use super::schema::{fetch_columns, fetch_tables, ColumnDescriptor, TableDescriptor};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not get a database connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("catalog query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
    #[error("catalog query timed out after {0:?}")]
    Timeout(Duration),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// All tables visible to the translator, in a stable order.
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>, CatalogError>;

    /// Columns of one table in ordinal order. Unknown tables yield an
    /// empty list.
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, CatalogError>;
}

/// PostgreSQL catalog backed by a connection pool.
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
    schema: String,
    timeout: Duration,
}

impl PgCatalog {
    pub fn new(pool: Pool, schema: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pool,
            schema: schema.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> anyhow::Result<Self> {
        let pool = build_pool(config)?;
        Ok(Self::new(pool, config.schema.clone(), config.statement_timeout()))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, CatalogError>
    where
        F: Future<Output = Result<T, CatalogError>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| CatalogError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl SchemaCatalog for PgCatalog {
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>, CatalogError> {
        let tables = self
            .bounded(async {
                let client = self.pool.get().await?;
                Ok::<_, CatalogError>(fetch_tables(&client, &self.schema).await?)
            })
            .await?;
        debug!(schema = %self.schema, count = tables.len(), "listed catalog tables");
        Ok(tables)
    }

    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, CatalogError> {
        let columns = self
            .bounded(async {
                let client = self.pool.get().await?;
                Ok::<_, CatalogError>(fetch_columns(&client, &self.schema, table).await?)
            })
            .await?;
        debug!(table, count = columns.len(), "described table columns");
        Ok(columns)
    }
}
