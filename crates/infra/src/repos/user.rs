//! Session-backed user repository.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, instrument};

use shipyard_core::{DomainError, Entity, User, UserCreateArgs, UserId, UserUpdateArgs};

use super::{
    AdminScope, RepoResult, RepositoryError, UserRepository, filter, from_document, release,
    release_uncommitted, to_document,
};
use crate::storage::{Session, USERS};

#[derive(Debug)]
pub struct SqlUserRepository<S> {
    session: S,
}

impl<S: Session> SqlUserRepository<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    async fn find(&self, id: UserId) -> RepoResult<Option<User>> {
        let rows = self.session.find(&USERS, &filter([("id", json!(id))])).await?;
        rows.into_iter()
            .next()
            .map(|row| from_document(User::KIND, row))
            .transpose()
    }
}

#[async_trait]
impl<S: Session> UserRepository for SqlUserRepository<S> {
    #[instrument(skip(self), fields(user = %id), err)]
    async fn get(&self, id: UserId) -> RepoResult<Option<User>> {
        let _unit = self.session.unit_lock().lock().await;
        let result = self.find(id).await;
        release(&self.session, "get", result).await
    }

    #[instrument(skip(self, _scope), err)]
    async fn get_all(&self, _scope: AdminScope) -> RepoResult<Vec<User>> {
        let _unit = self.session.unit_lock().lock().await;
        let result = async {
            let rows = self.session.find(&USERS, &filter([])).await?;
            rows.into_iter()
                .map(|row| from_document(User::KIND, row))
                .collect::<RepoResult<Vec<User>>>()
        }
        .await;
        release(&self.session, "get_all", result).await
    }

    #[instrument(skip(self, args), fields(username = %args.username), err)]
    async fn create(&self, args: UserCreateArgs) -> RepoResult<User> {
        args.validate()?;
        let values = to_document(User::KIND, &args)?;

        let _unit = self.session.unit_lock().lock().await;
        let result: RepoResult<User> = async {
            let raw_id = self.session.insert(&USERS, values).await?;
            self.session.commit().await?;

            let id: UserId = raw_id.parse().map_err(|e: DomainError| RepositoryError::Decode {
                kind: User::KIND,
                message: e.to_string(),
            })?;
            self.find(id).await?.ok_or(RepositoryError::MissingAfterWrite {
                kind: User::KIND,
                id: raw_id,
            })
        }
        .await;
        let user = release(&self.session, "create", result).await?;
        debug!(kind = User::KIND, id = %user.id(), "created");
        Ok(user)
    }

    #[instrument(skip(self, args), fields(user = %id), err)]
    async fn update(&self, id: UserId, args: UserUpdateArgs) -> RepoResult<bool> {
        args.validate()?;

        let _unit = self.session.unit_lock().lock().await;
        let result: RepoResult<bool> = async {
            if self.find(id).await?.is_none() {
                return Ok(false);
            }
            let changes = to_document(User::KIND, &args)?;
            if !changes.is_empty() {
                self.session.update(&USERS, &id.to_string(), changes).await?;
            }
            self.session.commit().await?;
            Ok(true)
        }
        .await;
        release_uncommitted(&self.session, "update", result).await
    }

    #[instrument(skip(self), fields(user = %id), err)]
    async fn delete(&self, id: UserId) -> RepoResult<bool> {
        let _unit = self.session.unit_lock().lock().await;
        let result: RepoResult<bool> = async {
            if self.find(id).await?.is_none() {
                return Ok(false);
            }
            self.session.delete(&USERS, &id.to_string()).await?;
            self.session.commit().await?;
            Ok(true)
        }
        .await;
        release_uncommitted(&self.session, "delete", result).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use shipyard_core::{EnvVars, Patch, ProjectCreateArgs};

    use super::*;
    use crate::repos::{ProjectRepository, SqlProjectRepository};
    use crate::storage::{InMemorySession, SessionOp, StorageError};

    fn repo() -> (Arc<InMemorySession>, SqlUserRepository<Arc<InMemorySession>>) {
        let session = Arc::new(InMemorySession::new());
        (session.clone(), SqlUserRepository::new(session))
    }

    fn args(username: &str) -> UserCreateArgs {
        UserCreateArgs {
            username: username.to_string(),
            email: Some(format!("{username}@example.com")),
            oauth_provider: "github".to_string(),
            encrypted_oauth_token: "enc-access".to_string(),
            encrypted_refresh_token: Some("enc-refresh".to_string()),
            oauth_token_expires_at: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_, users) = repo();
        let before = Utc::now() - Duration::seconds(1);

        let created = users.create(args("octocat")).await.unwrap();

        assert_eq!(created.username, "octocat");
        assert_eq!(created.email.as_deref(), Some("octocat@example.com"));
        assert_eq!(created.encrypted_refresh_token.as_deref(), Some("enc-refresh"));
        assert!(created.created_at >= before);
        assert_eq!(users.get(created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn get_of_unknown_user_is_none() {
        let (_, users) = repo();
        assert_eq!(users.get(UserId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_all_lists_every_user() {
        let (_, users) = repo();
        let a = users.create(args("a")).await.unwrap();
        let b = users.create(args("b")).await.unwrap();

        let all = users.get_all(AdminScope::new()).await.unwrap();
        assert_eq!(all, vec![a, b]);
    }

    #[tokio::test]
    async fn update_applies_patch_semantics() {
        let (_, users) = repo();
        let user = users.create(args("octocat")).await.unwrap();

        let patch = UserUpdateArgs {
            encrypted_oauth_token: Patch::Set("rotated".to_string()),
            encrypted_refresh_token: Patch::Set(None),
            ..UserUpdateArgs::default()
        };
        assert!(users.update(user.id, patch.clone()).await.unwrap());

        let mut expected = user.clone();
        patch.apply_to(&mut expected);
        let stored = users.get(user.id).await.unwrap().unwrap();
        assert_eq!(stored, expected);
        assert_eq!(stored.encrypted_refresh_token, None);
        assert_eq!(stored.email, user.email);
    }

    #[tokio::test]
    async fn update_validates_email_before_storage() {
        let (session, users) = repo();
        let user = users.create(args("octocat")).await.unwrap();
        session.clear_calls();

        let patch = UserUpdateArgs {
            email: Patch::Set(Some("not-an-email".to_string())),
            ..UserUpdateArgs::default()
        };
        let err = users.update(user.id, patch).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_user_neither_writes_nor_commits() {
        let (session, users) = repo();
        let patch = UserUpdateArgs {
            username: Patch::Set("ghost".to_string()),
            ..UserUpdateArgs::default()
        };

        assert!(!users.update(UserId::new(), patch).await.unwrap());
        assert_eq!(session.count_calls(SessionOp::Update), 0);
        assert_eq!(session.count_calls(SessionOp::Commit), 0);
    }

    #[tokio::test]
    async fn delete_of_missing_user_neither_deletes_nor_commits() {
        let (session, users) = repo();

        assert!(!users.delete(UserId::new()).await.unwrap());
        assert_eq!(session.count_calls(SessionOp::Delete), 0);
        assert_eq!(session.count_calls(SessionOp::Commit), 0);
        assert_eq!(session.count_calls(SessionOp::Rollback), 1);
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_projects() {
        let (session, users) = repo();
        let projects = SqlProjectRepository::new(session.clone());
        let owner = users.create(args("owner")).await.unwrap();
        let bystander = users.create(args("bystander")).await.unwrap();
        for user in [&owner, &owner, &bystander] {
            projects
                .create(
                    user.id,
                    ProjectCreateArgs {
                        repo_url: "https://github.com/acme/widget.git".to_string(),
                        environment_variables: EnvVars::new(),
                    },
                )
                .await
                .unwrap();
        }

        assert!(users.delete(owner.id).await.unwrap());

        assert_eq!(users.get(owner.id).await.unwrap(), None);
        assert!(projects.get_all(owner.id).await.unwrap().is_empty());
        assert_eq!(projects.get_all(bystander.id).await.unwrap().len(), 1);
        assert_eq!(session.committed_rows("projects").len(), 1);
    }

    #[tokio::test]
    async fn duplicate_username_rolls_back_and_leaves_one_row() {
        let (session, users) = repo();
        users.create(args("octocat")).await.unwrap();
        session.clear_calls();

        let mut dup = args("octocat");
        dup.email = None;
        let err = users.create(dup).await.unwrap_err();

        assert!(matches!(err.storage_error(), Some(StorageError::UniqueViolation(_))));
        assert_eq!(session.count_calls(SessionOp::Rollback), 1);
        assert_eq!(session.committed_rows("users").len(), 1);
        assert_eq!(users.get_all(AdminScope::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_on_update() {
        let (_, users) = repo();
        let a = users.create(args("a")).await.unwrap();
        users.create(args("b")).await.unwrap();

        let patch = UserUpdateArgs {
            email: Patch::Set(Some("b@example.com".to_string())),
            ..UserUpdateArgs::default()
        };
        let err = users.update(a.id, patch).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Storage(StorageError::UniqueViolation(_))));

        let stored = users.get(a.id).await.unwrap().unwrap();
        assert_eq!(stored.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn failed_create_leaves_zero_rows() {
        let (session, users) = repo();
        session.fail_next(SessionOp::Commit);

        let err = users.create(args("octocat")).await.unwrap_err();

        assert_eq!(err.storage_error(), Some(&StorageError::Injected(SessionOp::Commit)));
        assert!(session.committed_rows("users").is_empty());
        assert!(users.get_all(AdminScope::new()).await.unwrap().is_empty());
    }
}
