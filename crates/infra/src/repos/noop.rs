//! Repositories that never touch storage.
//!
//! Reads return canned records, writes succeed. Useful for wiring services in
//! tests that do not exercise persistence.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use shipyard_core::{
    EnvVars, Project, ProjectCreateArgs, ProjectId, ProjectStatus, ProjectUpdateArgs, User,
    UserCreateArgs, UserId, UserUpdateArgs,
};

use super::{AdminScope, ProjectRepository, RepoResult, UserRepository};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProjectRepository;

impl NoopProjectRepository {
    pub fn new() -> Self {
        Self
    }
}

fn canned_project(id: ProjectId, owner: UserId, n: usize) -> Project {
    let mut environment_variables = EnvVars::new();
    environment_variables.insert("TEST_ENV".to_string(), json!(format!("test_value_{n}")));
    Project {
        id,
        repo_url: format!("https://example.com/test-repo-{n}.git"),
        environment_variables,
        status: ProjectStatus::default(),
        owner_id: owner,
    }
}

#[async_trait]
impl ProjectRepository for NoopProjectRepository {
    async fn get(&self, owner: UserId, id: ProjectId) -> RepoResult<Option<Project>> {
        Ok(Some(canned_project(id, owner, 1)))
    }

    async fn get_all(&self, owner: UserId) -> RepoResult<Vec<Project>> {
        Ok((1..=2).map(|n| canned_project(ProjectId::new(), owner, n)).collect())
    }

    async fn create(&self, owner: UserId, args: ProjectCreateArgs) -> RepoResult<Project> {
        Ok(Project {
            id: ProjectId::new(),
            repo_url: args.repo_url,
            environment_variables: args.environment_variables,
            status: ProjectStatus::default(),
            owner_id: owner,
        })
    }

    async fn update(&self, _owner: UserId, _id: ProjectId, _args: ProjectUpdateArgs) -> RepoResult<bool> {
        Ok(true)
    }

    async fn delete(&self, _owner: UserId, _id: ProjectId) -> RepoResult<bool> {
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUserRepository;

impl NoopUserRepository {
    pub fn new() -> Self {
        Self
    }
}

fn canned_user(id: UserId) -> User {
    let now = Utc::now();
    User {
        id,
        username: "test_user".to_string(),
        email: Some("test@example.com".to_string()),
        oauth_provider: "test_provider".to_string(),
        encrypted_oauth_token: "encrypted_token".to_string(),
        encrypted_refresh_token: Some("encrypted_refresh_token".to_string()),
        oauth_token_expires_at: Some(now + Duration::hours(1)),
        created_at: now,
    }
}

#[async_trait]
impl UserRepository for NoopUserRepository {
    async fn get(&self, id: UserId) -> RepoResult<Option<User>> {
        Ok(Some(canned_user(id)))
    }

    async fn get_all(&self, _scope: AdminScope) -> RepoResult<Vec<User>> {
        Ok(vec![canned_user(UserId::new())])
    }

    async fn create(&self, args: UserCreateArgs) -> RepoResult<User> {
        Ok(User {
            id: UserId::new(),
            username: args.username,
            email: args.email,
            oauth_provider: args.oauth_provider,
            encrypted_oauth_token: args.encrypted_oauth_token,
            encrypted_refresh_token: args.encrypted_refresh_token,
            oauth_token_expires_at: args.oauth_token_expires_at,
            created_at: Utc::now(),
        })
    }

    async fn update(&self, _id: UserId, _args: UserUpdateArgs) -> RepoResult<bool> {
        Ok(true)
    }

    async fn delete(&self, _id: UserId) -> RepoResult<bool> {
        Ok(true)
    }
}
