//! Project records: a repository deployed on behalf of its owning user.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::{ProjectId, UserId};
use crate::patch::Patch;

/// Environment variables handed to a project build. Values may be any JSON
/// scalar or structure.
pub type EnvVars = BTreeMap<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Build/run status, written by an external workflow.
///
/// Transitions are not validated here; only membership in this set is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Building,
    Running,
    Success,
    Failure,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 4] = [
        ProjectStatus::Building,
        ProjectStatus::Running,
        ProjectStatus::Success,
        ProjectStatus::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Building => "building",
            ProjectStatus::Running => "running",
            ProjectStatus::Success => "success",
            ProjectStatus::Failure => "failure",
        }
    }
}

impl core::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::unknown_value("project status", s))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Project
// ─────────────────────────────────────────────────────────────────────────────

/// A deployable project owned by exactly one user.
///
/// A project never outlives its owner: deleting the user deletes its projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub repo_url: String,
    #[serde(default)]
    pub environment_variables: EnvVars,
    pub status: ProjectStatus,
    pub owner_id: UserId,
}

impl Entity for Project {
    type Id = ProjectId;
    const KIND: &'static str = "project";

    fn id(&self) -> &ProjectId {
        &self.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCreateArgs {
    pub repo_url: String,
    #[serde(default)]
    pub environment_variables: EnvVars,
}

impl ProjectCreateArgs {
    pub fn validate(&self) -> DomainResult<()> {
        if self.repo_url.trim().is_empty() {
            return Err(DomainError::validation("repo_url must not be empty"));
        }
        Ok(())
    }
}

/// Patch for a project.
///
/// Narrower than [`crate::UserUpdateArgs`]: `repo_url` is fixed at creation.
/// `environment_variables` is replaced as a whole when set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdateArgs {
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub environment_variables: Patch<EnvVars>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub status: Patch<ProjectStatus>,
}

impl ProjectUpdateArgs {
    pub fn environment_variables(vars: EnvVars) -> Self {
        Self {
            environment_variables: Patch::Set(vars),
            ..Default::default()
        }
    }

    pub fn status(status: ProjectStatus) -> Self {
        Self {
            status: Patch::Set(status),
            ..Default::default()
        }
    }
}
