//! Repositories over a storage [`Session`].
//!
//! ## Unit of work
//!
//! Every operation is one unit of work on the session:
//!
//! 1. Validate arguments (no storage call on failure)
//! 2. Take the session's [`Session::unit_lock`] and hold it to the end
//! 3. Read the target row (update/delete) and return `false` if it is absent,
//!    without writing or committing
//! 4. Write and commit
//!
//! Whatever did not end in a commit (reads, not-found paths, failures) ends in
//! a rollback, so no transaction outlives the call and the session stays
//! usable. A failing rollback is logged and the original result wins.
//!
//! Not-found is never an error: `get` returns `None`, `update`/`delete` return
//! `false`.

pub mod noop;
pub mod project;
pub mod user;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use shipyard_core::{
    Document, DomainError, Project, ProjectCreateArgs, ProjectId, ProjectUpdateArgs, User,
    UserCreateArgs, UserId, UserUpdateArgs,
};

use crate::storage::{Session, StorageError};

pub use noop::{NoopProjectRepository, NoopUserRepository};
pub use project::SqlProjectRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("failed to decode {kind} record: {message}")]
    Decode { kind: &'static str, message: String },

    #[error("{kind} {id} was not readable after commit")]
    MissingAfterWrite { kind: &'static str, id: String },
}

impl RepositoryError {
    /// The storage failure behind this error, if any.
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            RepositoryError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Capability required to enumerate every user.
///
/// User listing is an administrative operation; callers must mint this token
/// explicitly, which keeps it visible at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminScope {
    _private: (),
}

impl AdminScope {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for AdminScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Projects, always scoped to their owner.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get(&self, owner: UserId, id: ProjectId) -> RepoResult<Option<Project>>;

    async fn get_all(&self, owner: UserId) -> RepoResult<Vec<Project>>;

    /// Insert, commit and return the stored project (storage defaults applied).
    async fn create(&self, owner: UserId, args: ProjectCreateArgs) -> RepoResult<Project>;

    async fn update(&self, owner: UserId, id: ProjectId, args: ProjectUpdateArgs) -> RepoResult<bool>;

    async fn delete(&self, owner: UserId, id: ProjectId) -> RepoResult<bool>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: UserId) -> RepoResult<Option<User>>;

    async fn get_all(&self, scope: AdminScope) -> RepoResult<Vec<User>>;

    async fn create(&self, args: UserCreateArgs) -> RepoResult<User>;

    async fn update(&self, id: UserId, args: UserUpdateArgs) -> RepoResult<bool>;

    /// Delete the user and, through the storage foreign key, every project it owns.
    async fn delete(&self, id: UserId) -> RepoResult<bool>;
}

#[async_trait]
impl<R> ProjectRepository for Arc<R>
where
    R: ProjectRepository + ?Sized,
{
    async fn get(&self, owner: UserId, id: ProjectId) -> RepoResult<Option<Project>> {
        (**self).get(owner, id).await
    }

    async fn get_all(&self, owner: UserId) -> RepoResult<Vec<Project>> {
        (**self).get_all(owner).await
    }

    async fn create(&self, owner: UserId, args: ProjectCreateArgs) -> RepoResult<Project> {
        (**self).create(owner, args).await
    }

    async fn update(&self, owner: UserId, id: ProjectId, args: ProjectUpdateArgs) -> RepoResult<bool> {
        (**self).update(owner, id, args).await
    }

    async fn delete(&self, owner: UserId, id: ProjectId) -> RepoResult<bool> {
        (**self).delete(owner, id).await
    }
}

#[async_trait]
impl<R> UserRepository for Arc<R>
where
    R: UserRepository + ?Sized,
{
    async fn get(&self, id: UserId) -> RepoResult<Option<User>> {
        (**self).get(id).await
    }

    async fn get_all(&self, scope: AdminScope) -> RepoResult<Vec<User>> {
        (**self).get_all(scope).await
    }

    async fn create(&self, args: UserCreateArgs) -> RepoResult<User> {
        (**self).create(args).await
    }

    async fn update(&self, id: UserId, args: UserUpdateArgs) -> RepoResult<bool> {
        (**self).update(id, args).await
    }

    async fn delete(&self, id: UserId) -> RepoResult<bool> {
        (**self).delete(id).await
    }
}

// ─── Shared helpers ───

/// Roll back whatever `session` still has open, then return `result`.
pub(crate) async fn release<S, T>(session: &S, operation: &'static str, result: RepoResult<T>) -> RepoResult<T>
where
    S: Session + ?Sized,
{
    if let Err(rollback_error) = session.rollback().await {
        match &result {
            Err(error) => warn!(operation, error = %error, rollback_error = %rollback_error, "rollback failed"),
            Ok(_) => warn!(operation, rollback_error = %rollback_error, "rollback failed"),
        }
    }
    result
}

/// [`release`] unless the unit of work committed.
pub(crate) async fn release_uncommitted<S>(session: &S, operation: &'static str, result: RepoResult<bool>) -> RepoResult<bool>
where
    S: Session + ?Sized,
{
    match result {
        Ok(true) => Ok(true),
        other => release(session, operation, other).await,
    }
}

/// Serialize `value` into a storage document.
pub(crate) fn to_document<T: Serialize>(kind: &'static str, value: &T) -> RepoResult<Document> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(RepositoryError::Decode {
            kind,
            message: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(RepositoryError::Decode {
            kind,
            message: e.to_string(),
        }),
    }
}

/// Decode one storage row.
pub(crate) fn from_document<T: DeserializeOwned>(kind: &'static str, row: Document) -> RepoResult<T> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| RepositoryError::Decode {
        kind,
        message: e.to_string(),
    })
}

/// Build a filter document from `(column, value)` pairs.
pub(crate) fn filter<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Document {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
