//! src/services/metadata_store.rs
//!
//! Metadata store client. `MetadataStore` models a key-value table service:
//! tables have a single string partition key, `put_item` overwrites any item
//! with the same partition value. `SqliteMetadataStore` keeps tables and items
//! in SQLite, with items stored as JSON documents.

use crate::models::metadata::MetadataItem;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const TABLE_NAME_MIN_LEN: usize = 3;
const TABLE_NAME_MAX_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("table `{0}` not found")]
    TableNotFound(String),
    #[error("table name `{0}` is invalid")]
    InvalidTableName(String),
    #[error("partition key field name must not be empty")]
    EmptyPartitionKeyName,
    #[error("table `{table}` is keyed by `{existing}`, not `{requested}`")]
    KeySchemaMismatch {
        table: String,
        existing: String,
        requested: String,
    },
    #[error("item is missing partition key `{0}`")]
    MissingPartitionKey(String),
    #[error("partition key `{0}` must be a non-empty string")]
    InvalidPartitionKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Key-value table service keyed by a partition key.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Create `table` keyed by `partition_key`, or confirm an existing one matches.
    async fn ensure_table(&self, table: &str, partition_key: &str) -> MetadataResult<()>;

    /// Write `item`, replacing whatever shared its partition value.
    async fn put_item(&self, table: &str, item: &MetadataItem) -> MetadataResult<()>;

    async fn health_check(&self) -> MetadataResult<()>;
}

#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the SQLite database behind `database_url`.
    pub async fn connect(database_url: &str) -> MetadataResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let db_path = options.get_filename();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !Path::new(parent).exists() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                info!("Created missing directory {:?}", parent);
            }
        }
        debug!("Interpreted SQLite path => {}", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Run the embedded schema statements. Safe to repeat.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    async fn partition_key_of(&self, table: &str) -> MetadataResult<Option<String>> {
        let key = sqlx::query_scalar::<_, String>(
            "SELECT partition_key FROM metadata_tables WHERE name = ?",
        )
        .bind(table)
        .fetch_optional(&*self.db)
        .await?;
        Ok(key)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn ensure_table(&self, table: &str, partition_key: &str) -> MetadataResult<()> {
        ensure_table_name_valid(table)?;
        if partition_key.is_empty() {
            return Err(MetadataError::EmptyPartitionKeyName);
        }

        sqlx::query(
            "INSERT INTO metadata_tables (name, partition_key, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(table)
        .bind(partition_key)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        match self.partition_key_of(table).await? {
            Some(existing) if existing == partition_key => Ok(()),
            Some(existing) => Err(MetadataError::KeySchemaMismatch {
                table: table.to_string(),
                existing,
                requested: partition_key.to_string(),
            }),
            None => Err(MetadataError::TableNotFound(table.to_string())),
        }
    }

    async fn put_item(&self, table: &str, item: &MetadataItem) -> MetadataResult<()> {
        let partition_key = self
            .partition_key_of(table)
            .await?
            .ok_or_else(|| MetadataError::TableNotFound(table.to_string()))?;

        let partition_value = match item.attributes.get(&partition_key) {
            None => return Err(MetadataError::MissingPartitionKey(partition_key)),
            Some(value) => match value.as_str() {
                Some(s) if !s.is_empty() => s,
                _ => return Err(MetadataError::InvalidPartitionKey(partition_key)),
            },
        };

        let document = serde_json::to_string(item)?;
        sqlx::query(
            r#"
            INSERT INTO metadata_items (table_name, partition_value, item, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(table_name, partition_value) DO UPDATE SET
                item = excluded.item,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(table)
        .bind(partition_value)
        .bind(document)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!(table, partition_value, "put metadata item");
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(MetadataError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected result: {}",
                one
            ))));
        }
        Ok(())
    }
}

/// Table names: 3–255 characters of `[A-Za-z0-9_.-]`.
fn ensure_table_name_valid(name: &str) -> MetadataResult<()> {
    let len_ok = (TABLE_NAME_MIN_LEN..=TABLE_NAME_MAX_LEN).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(MetadataError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
impl SqliteMetadataStore {
    pub(crate) async fn get_item(
        &self,
        table: &str,
        partition_value: &str,
    ) -> MetadataResult<Option<MetadataItem>> {
        if self.partition_key_of(table).await?.is_none() {
            return Err(MetadataError::TableNotFound(table.to_string()));
        }
        let document = sqlx::query_scalar::<_, String>(
            "SELECT item FROM metadata_items WHERE table_name = ? AND partition_value = ?",
        )
        .bind(table)
        .bind(partition_value)
        .fetch_optional(&*self.db)
        .await?;

        document
            .map(|doc| serde_json::from_str(&doc).map_err(MetadataError::from))
            .transpose()
    }

    pub(crate) async fn count_items(&self, table: &str) -> MetadataResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM metadata_items WHERE table_name = ?",
        )
        .bind(table)
        .fetch_one(&*self.db)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
pub(crate) async fn in_memory_store() -> SqliteMetadataStore {
    // One connection: every in-memory connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteMetadataStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}
