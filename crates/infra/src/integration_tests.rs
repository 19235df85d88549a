//! Integration tests for the persist-then-notify flow.
//!
//! Tests: Repository → Session → (commit) → EventEmitter → Broker → Subscription
//!
//! Verifies:
//! - Events are emitted only for committed changes and reach subscribers
//! - Deleting a user removes its projects
//! - A failed write emits nothing and leaves storage untouched
//! - Concurrent units of work on one session do not undo each other

use std::sync::Arc;

use async_trait::async_trait;
use shipyard_core::{
    Document, EnvVars, Patch, Project, ProjectCreateArgs, ProjectStatus, ProjectUpdateArgs,
    UserCreateArgs, UserId, UserUpdateArgs,
};
use shipyard_events::{
    EventEmitter, FanoutEventEmitter, InMemoryBroker, NoopEventEmitter, ProjectCreated, ProjectDeleted,
    ProjectUpdated,
};
use shipyard_observability::ObservabilityConfig;

use crate::repos::{ProjectRepository, SqlProjectRepository, SqlUserRepository, UserRepository};
use crate::storage::{InMemorySession, Session, SessionOp, StorageError, TableSchema};

/// Minimal use-case layer: persist, then emit.
struct ProjectService<R, E> {
    projects: R,
    emitter: E,
}

impl<R: ProjectRepository, E: EventEmitter> ProjectService<R, E> {
    async fn create(&self, owner: UserId, args: ProjectCreateArgs) -> anyhow::Result<Project> {
        let project = self.projects.create(owner, args).await?;
        self.emitter.emit(&ProjectCreated::new(project.id)).await?;
        Ok(project)
    }

    async fn set_status(&self, owner: UserId, project: &Project, status: ProjectStatus) -> anyhow::Result<bool> {
        let updated = self
            .projects
            .update(owner, project.id, ProjectUpdateArgs::status(status))
            .await?;
        if updated {
            self.emitter.emit(&ProjectUpdated::new(project.id)).await?;
        }
        Ok(updated)
    }

    async fn delete(&self, owner: UserId, project: &Project) -> anyhow::Result<bool> {
        let deleted = self.projects.delete(owner, project.id).await?;
        if deleted {
            self.emitter.emit(&ProjectDeleted::new(project.id)).await?;
        }
        Ok(deleted)
    }
}

/// Session that yields to the scheduler before every statement, so concurrent
/// callers interleave at each await point.
struct Yielding(Arc<InMemorySession>);

#[async_trait]
impl Session for Yielding {
    fn unit_lock(&self) -> &tokio::sync::Mutex<()> {
        self.0.unit_lock()
    }

    async fn find(&self, table: &TableSchema, filter: &Document) -> Result<Vec<Document>, StorageError> {
        tokio::task::yield_now().await;
        self.0.find(table, filter).await
    }

    async fn insert(&self, table: &TableSchema, values: Document) -> Result<String, StorageError> {
        tokio::task::yield_now().await;
        self.0.insert(table, values).await
    }

    async fn update(&self, table: &TableSchema, id: &str, changes: Document) -> Result<u64, StorageError> {
        tokio::task::yield_now().await;
        self.0.update(table, id, changes).await
    }

    async fn delete(&self, table: &TableSchema, id: &str) -> Result<u64, StorageError> {
        tokio::task::yield_now().await;
        self.0.delete(table, id).await
    }

    async fn commit(&self) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.0.commit().await
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.0.rollback().await
    }
}

fn init_tracing() {
    shipyard_observability::init_with(&ObservabilityConfig::pretty("shipyard_infra=debug"));
}

async fn owner(session: Arc<InMemorySession>, username: &str) -> UserId {
    SqlUserRepository::new(session)
        .create(UserCreateArgs {
            username: username.to_string(),
            email: None,
            oauth_provider: "github".to_string(),
            encrypted_oauth_token: "enc".to_string(),
            encrypted_refresh_token: None,
            oauth_token_expires_at: None,
        })
        .await
        .unwrap()
        .id
}

fn args() -> ProjectCreateArgs {
    ProjectCreateArgs {
        repo_url: "https://github.com/acme/widget.git".to_string(),
        environment_variables: EnvVars::new(),
    }
}

#[tokio::test]
async fn lifecycle_events_reach_subscribers_in_order() {
    init_tracing();
    let session = Arc::new(InMemorySession::new());
    let broker = InMemoryBroker::new();
    let created = broker.subscribe("project.created");
    let updated = broker.subscribe("project.updated");
    let deleted = broker.subscribe("project.deleted");
    let service = ProjectService {
        projects: SqlProjectRepository::new(session.clone()),
        emitter: Arc::new(FanoutEventEmitter::new(broker.clone())),
    };
    let user = owner(session.clone(), "octocat").await;

    let project = service.create(user, args()).await.unwrap();
    assert!(service.set_status(user, &project, ProjectStatus::Running).await.unwrap());
    assert!(service.set_status(user, &project, ProjectStatus::Success).await.unwrap());
    assert!(service.delete(user, &project).await.unwrap());

    let expected = serde_json::json!({ "project_id": project.id.to_string() });
    assert_eq!(created.drain().len(), 1);
    let updates = updated.drain();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|d| d.json().unwrap() == expected));
    assert_eq!(deleted.try_recv().unwrap().json().unwrap(), expected);

    assert_eq!(broker.declarations(), 3);
    assert!(session.committed_rows("projects").is_empty());
}

#[tokio::test]
async fn failed_write_emits_nothing() {
    init_tracing();
    let session = Arc::new(InMemorySession::new());
    let emitter = Arc::new(NoopEventEmitter::new());
    let service = ProjectService {
        projects: SqlProjectRepository::new(session.clone()),
        emitter: emitter.clone(),
    };
    let user = owner(session.clone(), "octocat").await;
    session.fail_next(SessionOp::Insert);

    assert!(service.create(user, args()).await.is_err());

    assert!(emitter.events().is_empty());
    assert!(session.committed_rows("projects").is_empty());
    assert!(!session.in_transaction());
}

#[tokio::test]
async fn update_of_missing_project_emits_nothing() {
    let session = Arc::new(InMemorySession::new());
    let emitter = Arc::new(NoopEventEmitter::new());
    let service = ProjectService {
        projects: SqlProjectRepository::new(session.clone()),
        emitter: emitter.clone(),
    };
    let user = owner(session.clone(), "octocat").await;
    let stranger = owner(session.clone(), "stranger").await;
    let project = service.create(user, args()).await.unwrap();

    assert!(!service.set_status(stranger, &project, ProjectStatus::Failure).await.unwrap());

    let types: Vec<String> = emitter.events().into_iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec!["project.created".to_string()]);
}

#[tokio::test]
async fn user_delete_cascades_through_shared_session() {
    let session = Arc::new(InMemorySession::new());
    let users = SqlUserRepository::new(session.clone());
    let projects = SqlProjectRepository::new(session.clone());
    let user = owner(session.clone(), "octocat").await;
    for _ in 0..3 {
        projects.create(user, args()).await.unwrap();
    }

    assert!(users.delete(user).await.unwrap());

    assert!(projects.get_all(user).await.unwrap().is_empty());
    assert!(session.committed_rows("users").is_empty());
    assert!(session.committed_rows("projects").is_empty());
}

#[tokio::test]
async fn failing_unit_of_work_does_not_undo_a_concurrent_one() {
    let inner = Arc::new(InMemorySession::new());
    let a = owner(inner.clone(), "a").await;
    owner(inner.clone(), "b").await;
    let project = SqlProjectRepository::new(inner.clone()).create(a, args()).await.unwrap();

    let session = Arc::new(Yielding(inner.clone()));
    let projects = SqlProjectRepository::new(session.clone());
    let users = SqlUserRepository::new(session);
    let rename = UserUpdateArgs {
        username: Patch::Set("b".to_string()),
        ..UserUpdateArgs::default()
    };

    let (status, renamed) = tokio::join!(
        projects.update(a, project.id, ProjectUpdateArgs::status(ProjectStatus::Running)),
        users.update(a, rename),
    );

    assert!(status.unwrap());
    assert!(matches!(renamed.unwrap_err().storage_error(), Some(StorageError::UniqueViolation(_))));
    assert!(!inner.in_transaction());
    let stored = projects.get(a, project.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProjectStatus::Running);
    assert_eq!(inner.committed_rows("projects")[0]["status"], serde_json::json!("running"));
}
