//! `shipyard-core`: domain records shared by storage and event layers.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod patch;
pub mod project;
pub mod user;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{ProjectId, UserId};
pub use patch::Patch;
pub use project::{EnvVars, Project, ProjectCreateArgs, ProjectStatus, ProjectUpdateArgs};
pub use user::{User, UserCreateArgs, UserUpdateArgs, validate_email};

/// A structured document: ordered mapping of field name to JSON value.
///
/// This is the shape records take at the storage boundary and the shape event
/// payloads take on the wire.
pub type Document = serde_json::Map<String, serde_json::Value>;
