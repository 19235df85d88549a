//! Infrastructure layer: storage sessions, repositories, broker adapters, config.

pub mod broker;
pub mod config;
pub mod repos;
pub mod storage;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, InfraConfig};
pub use repos::{
    AdminScope, NoopProjectRepository, NoopUserRepository, ProjectRepository, RepoResult,
    RepositoryError, SqlProjectRepository, SqlUserRepository, UserRepository,
};
pub use storage::{InMemorySession, PgSession, Session, SessionOp, StorageError};
