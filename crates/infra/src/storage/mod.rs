//! Storage collaborator boundary.
//!
//! Repositories drive storage through the [`Session`] trait: a transactional
//! handle over tables described by [`TableSchema`]. Rows cross the boundary as
//! [`Document`]s keyed by column name.
//!
//! ## Transactions
//!
//! A session has at most one open transaction. It begins implicitly with the
//! first statement after construction, `commit()` or `rollback()`, and ends at
//! the next `commit()` or `rollback()`. Reads join the open transaction and
//! see its uncommitted writes.
//!
//! The transaction belongs to the session, not to a caller. Callers sharing a
//! session must hold [`Session::unit_lock`] from their first statement until
//! their `commit()` or `rollback()`, so one caller's rollback never discards
//! another caller's writes. The repositories in [`crate::repos`] do this.
//!
//! ## Implementations
//!
//! - [`InMemorySession`]: tests/dev, with a call log and fault injection
//! - [`PgSession`]: PostgreSQL via SQLx

pub mod in_memory;
pub mod postgres;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use shipyard_core::Document;

pub use in_memory::{InMemorySession, SessionCall};
pub use postgres::PgSession;
pub use schema::{ColumnDefault, ForeignKey, OnDelete, PROJECTS, TableSchema, USERS};

/// Session operation kind (for call logs and fault injection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOp {
    Find,
    Insert,
    Update,
    Delete,
    Commit,
    Rollback,
}

impl core::fmt::Display for SessionOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            SessionOp::Find => "find",
            SessionOp::Insert => "insert",
            SessionOp::Update => "update",
            SessionOp::Delete => "delete",
            SessionOp::Commit => "commit",
            SessionOp::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// Storage operation error.
///
/// These are **infrastructure errors** (transport, constraints, transaction
/// state) as opposed to domain errors (validation).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("injected failure during {0}")]
    Injected(SessionOp),
}

/// Transactional storage session.
///
/// Methods take `&self`; implementations keep transaction state behind a lock
/// so one session can be shared (e.g. via `Arc`) by several repositories.
#[async_trait]
pub trait Session: Send + Sync {
    /// Lock serializing units of work (first statement through commit or
    /// rollback) on this session. Statements themselves do not take it.
    fn unit_lock(&self) -> &Mutex<()>;

    /// Rows of `table` whose columns equal every entry of `filter`.
    async fn find(&self, table: &TableSchema, filter: &Document) -> Result<Vec<Document>, StorageError>;

    /// Insert one row. Columns missing from `values` take their defaults.
    /// Returns the assigned primary key.
    async fn insert(&self, table: &TableSchema, values: Document) -> Result<String, StorageError>;

    /// Overwrite the columns in `changes` on the row with primary key `id`.
    /// Returns the number of rows touched.
    async fn update(&self, table: &TableSchema, id: &str, changes: Document) -> Result<u64, StorageError>;

    /// Delete the row with primary key `id`, cascading per the schema's foreign keys.
    /// Returns the number of rows deleted from `table`.
    async fn delete(&self, table: &TableSchema, id: &str) -> Result<u64, StorageError>;

    async fn commit(&self) -> Result<(), StorageError>;

    async fn rollback(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<S> Session for Arc<S>
where
    S: Session + ?Sized,
{
    fn unit_lock(&self) -> &Mutex<()> {
        (**self).unit_lock()
    }

    async fn find(&self, table: &TableSchema, filter: &Document) -> Result<Vec<Document>, StorageError> {
        (**self).find(table, filter).await
    }

    async fn insert(&self, table: &TableSchema, values: Document) -> Result<String, StorageError> {
        (**self).insert(table, values).await
    }

    async fn update(&self, table: &TableSchema, id: &str, changes: Document) -> Result<u64, StorageError> {
        (**self).update(table, id, changes).await
    }

    async fn delete(&self, table: &TableSchema, id: &str) -> Result<u64, StorageError> {
        (**self).delete(table, id).await
    }

    async fn commit(&self) -> Result<(), StorageError> {
        (**self).commit().await
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        (**self).rollback().await
    }
}
