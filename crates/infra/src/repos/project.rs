//! Session-backed project repository.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use shipyard_core::{
    DomainError, Entity, Project, ProjectCreateArgs, ProjectId, ProjectUpdateArgs, UserId,
};

use super::{
    ProjectRepository, RepoResult, RepositoryError, filter, from_document, release,
    release_uncommitted, to_document,
};
use crate::storage::{PROJECTS, Session};

#[derive(Debug)]
pub struct SqlProjectRepository<S> {
    session: S,
}

impl<S: Session> SqlProjectRepository<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    async fn find_owned(&self, owner: UserId, id: ProjectId) -> RepoResult<Option<Project>> {
        let rows = self
            .session
            .find(&PROJECTS, &filter([("id", json!(id)), ("owner_id", json!(owner))]))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| from_document(Project::KIND, row))
            .transpose()
    }
}

#[async_trait]
impl<S: Session> ProjectRepository for SqlProjectRepository<S> {
    #[instrument(skip(self), fields(owner = %owner, project = %id), err)]
    async fn get(&self, owner: UserId, id: ProjectId) -> RepoResult<Option<Project>> {
        let _unit = self.session.unit_lock().lock().await;
        let result = self.find_owned(owner, id).await;
        release(&self.session, "get", result).await
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn get_all(&self, owner: UserId) -> RepoResult<Vec<Project>> {
        let _unit = self.session.unit_lock().lock().await;
        let result = async {
            let rows = self
                .session
                .find(&PROJECTS, &filter([("owner_id", json!(owner))]))
                .await?;
            rows.into_iter()
                .map(|row| from_document(Project::KIND, row))
                .collect::<RepoResult<Vec<Project>>>()
        }
        .await;
        release(&self.session, "get_all", result).await
    }

    #[instrument(skip(self, args), fields(owner = %owner), err)]
    async fn create(&self, owner: UserId, args: ProjectCreateArgs) -> RepoResult<Project> {
        args.validate()?;
        let mut values = to_document(Project::KIND, &args)?;
        values.insert("owner_id".to_string(), json!(owner));

        let _unit = self.session.unit_lock().lock().await;
        let result: RepoResult<Project> = async {
            let raw_id = self.session.insert(&PROJECTS, values).await?;
            self.session.commit().await?;

            let id: ProjectId = raw_id.parse().map_err(|e: DomainError| RepositoryError::Decode {
                kind: Project::KIND,
                message: e.to_string(),
            })?;
            self.find_owned(owner, id)
                .await?
                .ok_or(RepositoryError::MissingAfterWrite {
                    kind: Project::KIND,
                    id: raw_id,
                })
        }
        .await;
        let project = release(&self.session, "create", result).await?;
        debug!(kind = Project::KIND, id = %project.id(), "created");
        Ok(project)
    }

    #[instrument(skip(self, args), fields(owner = %owner, project = %id), err)]
    async fn update(&self, owner: UserId, id: ProjectId, args: ProjectUpdateArgs) -> RepoResult<bool> {
        let _unit = self.session.unit_lock().lock().await;
        let result: RepoResult<bool> = async {
            if self.find_owned(owner, id).await?.is_none() {
                return Ok(false);
            }
            let changes = to_document(Project::KIND, &args)?;
            if !changes.is_empty() {
                self.session.update(&PROJECTS, &id.to_string(), changes).await?;
            }
            self.session.commit().await?;
            Ok(true)
        }
        .await;
        release_uncommitted(&self.session, "update", result).await
    }

    #[instrument(skip(self), fields(owner = %owner, project = %id), err)]
    async fn delete(&self, owner: UserId, id: ProjectId) -> RepoResult<bool> {
        let _unit = self.session.unit_lock().lock().await;
        let result: RepoResult<bool> = async {
            if self.find_owned(owner, id).await?.is_none() {
                return Ok(false);
            }
            self.session.delete(&PROJECTS, &id.to_string()).await?;
            self.session.commit().await?;
            Ok(true)
        }
        .await;
        release_uncommitted(&self.session, "delete", result).await
    }
}
