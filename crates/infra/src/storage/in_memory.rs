//! In-memory transactional session for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex as UnitLock;
use uuid::Uuid;

use shipyard_core::Document;

use super::schema::{ALL_TABLES, ColumnDefault, OnDelete, TableSchema};
use super::{Session, SessionOp, StorageError};

type Tables = HashMap<&'static str, Vec<Document>>;

/// One recorded call against an [`InMemorySession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCall {
    pub op: SessionOp,
    /// Table name; `None` for commit/rollback.
    pub table: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    committed: Tables,
    /// Working copy while a transaction is open.
    pending: Option<Tables>,
    calls: Vec<SessionCall>,
    faults: HashSet<SessionOp>,
}

/// In-memory session.
///
/// - Transactions are copy-on-begin snapshots: `commit` publishes the working
///   copy, `rollback` drops it
/// - Enforces NOT NULL, UNIQUE, allowed-value and foreign-key rules from the
///   [`TableSchema`]s it was built with
/// - Cascading deletes run as an explicit children-then-parent step inside the
///   open transaction
/// - Records every call and supports one-shot fault injection per operation
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemorySession {
    schemas: Vec<&'static TableSchema>,
    state: Mutex<State>,
    unit: UnitLock<()>,
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::with_schemas(ALL_TABLES.to_vec())
    }
}

impl InMemorySession {
    /// Session over the user and project tables.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schemas(schemas: Vec<&'static TableSchema>) -> Self {
        let committed = schemas.iter().map(|s| (s.name, Vec::new())).collect();
        Self {
            schemas,
            state: Mutex::new(State {
                committed,
                ..State::default()
            }),
            unit: UnitLock::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of kind `op` fail with [`StorageError::Injected`].
    pub fn fail_next(&self, op: SessionOp) {
        self.state().faults.insert(op);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, op: SessionOp) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Committed rows of `table` (what another session would see).
    pub fn committed_rows(&self, table: &str) -> Vec<Document> {
        self.state()
            .committed
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn schema(&self, name: &str) -> Result<&'static TableSchema, StorageError> {
        self.schemas
            .iter()
            .copied()
            .find(|s| s.name == name)
            .ok_or_else(|| StorageError::Database(format!("relation \"{name}\" does not exist")))
    }

    /// Record the call and fire any pending fault for it.
    fn enter(state: &mut State, op: SessionOp, table: Option<&str>) -> Result<(), StorageError> {
        state.calls.push(SessionCall {
            op,
            table: table.map(str::to_string),
        });
        if state.faults.remove(&op) {
            return Err(StorageError::Injected(op));
        }
        Ok(())
    }
}

/// Working copy of the tables, beginning a transaction if none is open.
fn working(state: &mut State) -> &mut Tables {
    let committed = &state.committed;
    state.pending.get_or_insert_with(|| committed.clone())
}

fn primary_key_of<'a>(schema: &TableSchema, row: &'a Document) -> Option<&'a str> {
    row.get(schema.primary_key).and_then(JsonValue::as_str)
}

fn default_value(default: ColumnDefault) -> JsonValue {
    match default {
        ColumnDefault::Uuid => JsonValue::String(Uuid::new_v4().to_string()),
        ColumnDefault::Now => {
            JsonValue::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        }
        ColumnDefault::Text(text) => JsonValue::String(text.to_string()),
        ColumnDefault::EmptyObject => JsonValue::Object(Document::new()),
    }
}

/// Check NOT NULL, allowed values and UNIQUE for `row` against `others`.
fn check_row<'a>(
    schema: &TableSchema,
    row: &Document,
    mut others: impl Iterator<Item = &'a Document>,
) -> Result<(), StorageError> {
    for column in schema.required {
        if row.get(*column).is_none_or(JsonValue::is_null) {
            return Err(StorageError::Constraint(format!(
                "null value in column \"{column}\" of relation \"{}\"",
                schema.name
            )));
        }
    }

    for (column, allowed) in schema.allowed {
        if let Some(value) = row.get(*column).filter(|v| !v.is_null()) {
            let ok = value.as_str().is_some_and(|s| allowed.contains(&s));
            if !ok {
                return Err(StorageError::Constraint(format!(
                    "value {value} not allowed in column \"{column}\" of relation \"{}\"",
                    schema.name
                )));
            }
        }
    }

    let others: Vec<&Document> = others.by_ref().collect();
    for column in schema.unique {
        let Some(value) = row.get(*column).filter(|v| !v.is_null()) else {
            continue;
        };
        if others.iter().any(|other| other.get(*column) == Some(value)) {
            return Err(StorageError::UniqueViolation(format!(
                "duplicate key value violates unique constraint \"{}_{column}_key\"",
                schema.name
            )));
        }
    }

    Ok(())
}

impl InMemorySession {
    fn check_foreign_key(
        &self,
        tables: &Tables,
        schema: &TableSchema,
        row: &Document,
    ) -> Result<(), StorageError> {
        let Some(fk) = schema.foreign_key else {
            return Ok(());
        };
        let Some(value) = row.get(fk.column).and_then(JsonValue::as_str) else {
            return Ok(());
        };
        let parent = self.schema(fk.references)?;
        let exists = tables
            .get(parent.name)
            .is_some_and(|rows| rows.iter().any(|r| primary_key_of(parent, r) == Some(value)));
        if !exists {
            return Err(StorageError::ForeignKeyViolation(format!(
                "key ({})=({value}) is not present in table \"{}\"",
                fk.column, parent.name
            )));
        }
        Ok(())
    }

    /// Delete `id` from `schema`, children first.
    fn delete_cascading(
        &self,
        tables: &mut Tables,
        schema: &TableSchema,
        id: &str,
    ) -> Result<u64, StorageError> {
        let exists = tables
            .get(schema.name)
            .is_some_and(|rows| rows.iter().any(|r| primary_key_of(schema, r) == Some(id)));
        if !exists {
            return Ok(0);
        }

        for child in self.schemas.iter().copied() {
            let Some(fk) = child.foreign_key.filter(|fk| fk.references == schema.name) else {
                continue;
            };
            let child_ids: Vec<String> = tables
                .get(child.name)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| r.get(fk.column).and_then(JsonValue::as_str) == Some(id))
                        .filter_map(|r| primary_key_of(child, r).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            if child_ids.is_empty() {
                continue;
            }
            match fk.on_delete {
                OnDelete::Restrict => {
                    return Err(StorageError::ForeignKeyViolation(format!(
                        "key ({})=({id}) is still referenced from table \"{}\"",
                        schema.primary_key, child.name
                    )));
                }
                OnDelete::Cascade => {
                    for child_id in &child_ids {
                        self.delete_cascading(tables, child, child_id)?;
                    }
                }
            }
        }

        let rows = tables.entry(schema.name).or_default();
        let before = rows.len();
        rows.retain(|r| primary_key_of(schema, r) != Some(id));
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl Session for InMemorySession {
    fn unit_lock(&self) -> &UnitLock<()> {
        &self.unit
    }

    async fn find(&self, table: &TableSchema, filter: &Document) -> Result<Vec<Document>, StorageError> {
        let mut state = self.state();
        Self::enter(&mut state, SessionOp::Find, Some(table.name))?;
        table.check_columns(filter)?;
        let schema = self.schema(table.name)?;

        let rows = working(&mut state)
            .get(schema.name)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.iter().all(|(k, v)| row.get(k) == Some(v)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, table: &TableSchema, mut values: Document) -> Result<String, StorageError> {
        let mut state = self.state();
        Self::enter(&mut state, SessionOp::Insert, Some(table.name))?;
        table.check_columns(&values)?;
        let schema = self.schema(table.name)?;

        for (column, default) in schema.defaults {
            if !values.contains_key(*column) {
                values.insert(column.to_string(), default_value(*default));
            }
        }
        // Missing nullable columns read back as null, like a real row.
        for column in schema.columns {
            values.entry(column.to_string()).or_insert(JsonValue::Null);
        }

        let tables = working(&mut state);
        let existing = tables.get(schema.name).map(Vec::as_slice).unwrap_or_default();
        let pk = primary_key_of(schema, &values)
            .ok_or_else(|| StorageError::Constraint(format!("missing primary key for \"{}\"", schema.name)))?
            .to_string();
        if existing.iter().any(|r| primary_key_of(schema, r) == Some(pk.as_str())) {
            return Err(StorageError::UniqueViolation(format!(
                "duplicate key value violates unique constraint \"{}_pkey\"",
                schema.name
            )));
        }
        check_row(schema, &values, existing.iter())?;
        self.check_foreign_key(tables, schema, &values)?;

        tables.entry(schema.name).or_default().push(values);
        Ok(pk)
    }

    async fn update(&self, table: &TableSchema, id: &str, changes: Document) -> Result<u64, StorageError> {
        let mut state = self.state();
        Self::enter(&mut state, SessionOp::Update, Some(table.name))?;
        table.check_columns(&changes)?;
        let schema = self.schema(table.name)?;
        if changes.contains_key(schema.primary_key) {
            return Err(StorageError::Constraint(format!(
                "primary key of \"{}\" is immutable",
                schema.name
            )));
        }

        let tables = working(&mut state);
        let rows = tables.get(schema.name).map(Vec::as_slice).unwrap_or_default();
        let Some(index) = rows.iter().position(|r| primary_key_of(schema, r) == Some(id)) else {
            return Ok(0);
        };

        let mut candidate = rows[index].clone();
        candidate.extend(changes);
        let others = rows
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, r)| r);
        check_row(schema, &candidate, others)?;
        self.check_foreign_key(tables, schema, &candidate)?;

        if let Some(rows) = tables.get_mut(schema.name) {
            rows[index] = candidate;
        }
        Ok(1)
    }

    async fn delete(&self, table: &TableSchema, id: &str) -> Result<u64, StorageError> {
        let mut state = self.state();
        Self::enter(&mut state, SessionOp::Delete, Some(table.name))?;
        let schema = self.schema(table.name)?;

        // Cascade on a scratch copy so a restricted child leaves the
        // transaction untouched.
        let mut scratch = working(&mut state).clone();
        let deleted = self.delete_cascading(&mut scratch, schema, id)?;
        state.pending = Some(scratch);
        Ok(deleted)
    }

    async fn commit(&self) -> Result<(), StorageError> {
        let mut state = self.state();
        Self::enter(&mut state, SessionOp::Commit, None)?;
        if let Some(pending) = state.pending.take() {
            state.committed = pending;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        let mut state = self.state();
        Self::enter(&mut state, SessionOp::Rollback, None)?;
        state.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{ForeignKey, PROJECTS, USERS};
    use serde_json::json;

    static TEAMS: TableSchema = TableSchema {
        name: "teams",
        primary_key: "id",
        columns: &["id", "name"],
        required: &["id", "name"],
        unique: &[],
        defaults: &[("id", ColumnDefault::Uuid)],
        allowed: &[],
        foreign_key: None,
    };

    static MEMBERS: TableSchema = TableSchema {
        name: "members",
        primary_key: "id",
        columns: &["id", "team_id"],
        required: &["id", "team_id"],
        unique: &[],
        defaults: &[("id", ColumnDefault::Uuid)],
        allowed: &[],
        foreign_key: Some(ForeignKey {
            column: "team_id",
            references: "teams",
            on_delete: OnDelete::Restrict,
        }),
    };

    fn doc(value: JsonValue) -> Document {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn user(username: &str) -> Document {
        doc(json!({
            "username": username,
            "oauth_provider": "github",
            "encrypted_oauth_token": "enc",
        }))
    }

    #[tokio::test]
    async fn insert_applies_defaults_and_nulls() {
        let session = InMemorySession::new();
        let id = session.insert(&USERS, user("octocat")).await.unwrap();
        session.commit().await.unwrap();

        let rows = session.committed_rows("users");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(id));
        assert!(rows[0]["created_at"].is_string());
        assert!(rows[0]["email"].is_null());
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn uncommitted_writes_are_visible_inside_the_transaction_only() {
        let session = InMemorySession::new();
        session.insert(&USERS, user("octocat")).await.unwrap();

        let seen = session.find(&USERS, &Document::new()).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert!(session.committed_rows("users").is_empty());

        session.rollback().await.unwrap();
        assert!(!session.in_transaction());
        assert!(session.find(&USERS, &Document::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unique_columns_reject_duplicates_but_allow_nulls() {
        let session = InMemorySession::new();
        session.insert(&USERS, user("a")).await.unwrap();
        session.insert(&USERS, user("b")).await.unwrap();

        let err = session.insert(&USERS, user("a")).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn required_and_allowed_values_are_enforced() {
        let session = InMemorySession::new();
        let owner = session.insert(&USERS, user("a")).await.unwrap();

        let missing = doc(json!({ "owner_id": owner }));
        assert!(matches!(
            session.insert(&PROJECTS, missing).await,
            Err(StorageError::Constraint(_))
        ));

        let bad_status = doc(json!({ "repo_url": "https://x.git", "owner_id": owner, "status": "testing" }));
        assert!(matches!(
            session.insert(&PROJECTS, bad_status).await,
            Err(StorageError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn foreign_key_must_reference_an_existing_row() {
        let session = InMemorySession::new();
        let orphan = doc(json!({ "repo_url": "https://x.git", "owner_id": Uuid::new_v4().to_string() }));

        assert!(matches!(
            session.insert(&PROJECTS, orphan).await,
            Err(StorageError::ForeignKeyViolation(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_parent_cascades_to_children() {
        let session = InMemorySession::new();
        let owner = session.insert(&USERS, user("a")).await.unwrap();
        let other = session.insert(&USERS, user("b")).await.unwrap();
        for o in [&owner, &owner, &other] {
            session
                .insert(&PROJECTS, doc(json!({ "repo_url": "https://x.git", "owner_id": o })))
                .await
                .unwrap();
        }
        session.commit().await.unwrap();

        assert_eq!(session.delete(&USERS, &owner).await.unwrap(), 1);
        session.commit().await.unwrap();

        let projects = session.committed_rows("projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["owner_id"], json!(other));
    }

    #[tokio::test]
    async fn restricted_parent_cannot_be_deleted_while_referenced() {
        let session = InMemorySession::with_schemas(vec![&TEAMS, &MEMBERS]);
        let team = session.insert(&TEAMS, doc(json!({ "name": "core" }))).await.unwrap();
        let member = session
            .insert(&MEMBERS, doc(json!({ "team_id": team })))
            .await
            .unwrap();
        session.commit().await.unwrap();

        let err = session.delete(&TEAMS, &team).await.unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation(_)));
        assert_eq!(session.find(&TEAMS, &Document::new()).await.unwrap().len(), 1);

        assert_eq!(session.delete(&MEMBERS, &member).await.unwrap(), 1);
        assert_eq!(session.delete(&TEAMS, &team).await.unwrap(), 1);
        session.commit().await.unwrap();
        assert!(session.committed_rows("teams").is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_rows() {
        let session = InMemorySession::new();
        let missing = Uuid::new_v4().to_string();

        assert_eq!(session.update(&USERS, &missing, user("x")).await.unwrap(), 0);
        assert_eq!(session.delete(&USERS, &missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_cannot_change_the_primary_key() {
        let session = InMemorySession::new();
        let id = session.insert(&USERS, user("a")).await.unwrap();

        let changes = doc(json!({ "id": Uuid::new_v4().to_string() }));
        assert!(matches!(
            session.update(&USERS, &id, changes).await,
            Err(StorageError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let session = InMemorySession::new();
        let err = session
            .find(&USERS, &doc(json!({ "password": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn injected_faults_fire_once_and_are_logged() {
        let session = InMemorySession::new();
        session.fail_next(SessionOp::Commit);

        assert_eq!(
            session.commit().await,
            Err(StorageError::Injected(SessionOp::Commit))
        );
        assert!(session.commit().await.is_ok());
        assert_eq!(session.count_calls(SessionOp::Commit), 2);
    }
}
