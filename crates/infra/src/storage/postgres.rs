//! Postgres-backed session.
//!
//! Statements are generated from the [`TableSchema`]; values never appear in
//! SQL text. Each statement binds the whole document as one `jsonb` parameter
//! and lets `jsonb_populate_record` cast it to the table's row type, so column
//! types come from the database. Rows are read back with `row_to_json`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StorageError |
//! |------------|----------------------|--------------|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` |
//! | Database (not null / check violation) | `23502`, `23514` | `Constraint` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Connection` |
//! | Other | N/A | `Database` |

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::Mutex;
use tracing::instrument;

use shipyard_core::Document;

use super::schema::TableSchema;
use super::{Session, StorageError};
use crate::config::{ConfigError, InfraConfig};

/// DDL for every table; idempotent.
pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

type PgTransaction = Transaction<'static, Postgres>;

/// Session over a Postgres pool.
///
/// Holds at most one open transaction, begun lazily by the first statement.
pub struct PgSession {
    pool: PgPool,
    tx: Mutex<Option<PgTransaction>>,
    unit: Mutex<()>,
}

impl core::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgSession")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
            unit: Mutex::new(()),
        }
    }

    /// Build a pool from `config` and wrap it.
    pub async fn connect(config: &InfraConfig) -> Result<Self, StorageError> {
        let url = config
            .require_database_url()
            .map_err(|e: ConfigError| StorageError::Connection(e.to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn apply_schema(&self) -> Result<(), StorageError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("apply_schema", e))?;
        Ok(())
    }

    /// The open transaction, beginning one if needed.
    async fn open<'a>(&self, slot: &'a mut Option<PgTransaction>) -> Result<&'a mut PgTransaction, StorageError> {
        let tx = match slot.take() {
            Some(tx) => tx,
            None => self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?,
        };
        Ok(slot.insert(tx))
    }
}

// ─── SQL generation ───

fn populate(table: &TableSchema, param: usize) -> String {
    format!("jsonb_populate_record(NULL::{}, ${param}::jsonb)", table.name)
}

fn select_sql(table: &TableSchema, filter: &Document) -> String {
    let columns = table.ordered_columns(filter);
    let mut sql = format!("SELECT row_to_json(t)::jsonb AS doc FROM {} AS t", table.name);
    if !columns.is_empty() {
        let predicates: Vec<String> = columns
            .iter()
            .map(|c| format!("t.{c} IS NOT DISTINCT FROM r.{c}"))
            .collect();
        sql.push_str(&format!(", {} AS r WHERE {}", populate(table, 1), predicates.join(" AND ")));
    }
    sql
}

fn insert_sql(table: &TableSchema, values: &Document) -> String {
    let columns = table.ordered_columns(values);
    if columns.is_empty() {
        return format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}::text",
            table.name, table.primary_key
        );
    }
    let list = columns.join(", ");
    let projected: Vec<String> = columns.iter().map(|c| format!("r.{c}")).collect();
    format!(
        "INSERT INTO {} ({list}) SELECT {} FROM {} AS r RETURNING {}::text",
        table.name,
        projected.join(", "),
        populate(table, 1),
        table.primary_key
    )
}

fn update_sql(table: &TableSchema, changes: &Document) -> String {
    let assignments: Vec<String> = table
        .ordered_columns(changes)
        .iter()
        .map(|c| format!("{c} = r.{c}"))
        .collect();
    format!(
        "UPDATE {} AS t SET {} FROM {} AS r WHERE t.{} = $2::uuid",
        table.name,
        assignments.join(", "),
        populate(table, 1),
        table.primary_key
    )
}

fn delete_sql(table: &TableSchema) -> String {
    format!("DELETE FROM {} WHERE {} = $1::uuid", table.name, table.primary_key)
}

#[async_trait]
impl Session for PgSession {
    fn unit_lock(&self) -> &Mutex<()> {
        &self.unit
    }

    #[instrument(skip(self, table, filter), fields(table = table.name), err)]
    async fn find(&self, table: &TableSchema, filter: &Document) -> Result<Vec<Document>, StorageError> {
        table.check_columns(filter)?;
        let sql = select_sql(table, filter);

        let mut slot = self.tx.lock().await;
        let tx = self.open(&mut slot).await?;
        let rows = sqlx::query(&sql)
            .bind(JsonValue::Object(filter.clone()))
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("find", e))?;

        rows.iter()
            .map(|row| {
                let doc: JsonValue = row
                    .try_get("doc")
                    .map_err(|e| StorageError::Decode(e.to_string()))?;
                match doc {
                    JsonValue::Object(map) => Ok(map),
                    other => Err(StorageError::Decode(format!("expected a row object, got {other}"))),
                }
            })
            .collect()
    }

    #[instrument(skip(self, table, values), fields(table = table.name), err)]
    async fn insert(&self, table: &TableSchema, values: Document) -> Result<String, StorageError> {
        table.check_columns(&values)?;
        let sql = insert_sql(table, &values);

        let mut slot = self.tx.lock().await;
        let tx = self.open(&mut slot).await?;
        let row = sqlx::query(&sql)
            .bind(JsonValue::Object(values))
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;

        row.try_get::<String, _>(0)
            .map_err(|e| StorageError::Decode(e.to_string()))
    }

    #[instrument(skip(self, table, changes), fields(table = table.name), err)]
    async fn update(&self, table: &TableSchema, id: &str, changes: Document) -> Result<u64, StorageError> {
        table.check_columns(&changes)?;
        if changes.is_empty() {
            return Ok(0);
        }
        let sql = update_sql(table, &changes);

        let mut slot = self.tx.lock().await;
        let tx = self.open(&mut slot).await?;
        let result = sqlx::query(&sql)
            .bind(JsonValue::Object(changes))
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, table), fields(table = table.name), err)]
    async fn delete(&self, table: &TableSchema, id: &str) -> Result<u64, StorageError> {
        let sql = delete_sql(table);

        let mut slot = self.tx.lock().await;
        let tx = self.open(&mut slot).await?;
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn commit(&self) -> Result<(), StorageError> {
        match self.tx.lock().await.take() {
            Some(tx) => tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e)),
            None => Ok(()),
        }
    }

    #[instrument(skip(self), err)]
    async fn rollback(&self) -> Result<(), StorageError> {
        match self.tx.lock().await.take() {
            Some(tx) => tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e)),
            None => Ok(()),
        }
    }
}

/// Map SQLx errors to StorageError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{} in {}", db_err.message(), operation);
            match db_err.code().as_deref() {
                Some("23505") => StorageError::UniqueViolation(msg),
                Some("23503") => StorageError::ForeignKeyViolation(msg),
                Some("23502") | Some("23514") => StorageError::Constraint(msg),
                _ => StorageError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StorageError::Connection(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StorageError::Connection(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::Io(e) => StorageError::Connection(format!("io error in {operation}: {e}")),
        _ => StorageError::Database(format!("sqlx error in {operation}: {err}")),
    }
}
