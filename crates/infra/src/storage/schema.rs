//! Table descriptions shared by every storage backend.
//!
//! The in-memory session enforces these rules itself; the Postgres session
//! relies on the equivalent DDL in `sql/schema.sql` and uses the schema only to
//! whitelist column names.

use shipyard_core::Document;

use super::StorageError;

/// Value a column takes when an insert leaves it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    /// Random UUID, rendered as a string.
    Uuid,
    /// Current UTC timestamp (RFC 3339).
    Now,
    /// Fixed text value.
    Text(&'static str),
    /// Empty JSON object.
    EmptyObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    Restrict,
}

/// `column` references the primary key of `references`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub columns: &'static [&'static str],
    /// NOT NULL columns (checked after defaults are applied).
    pub required: &'static [&'static str],
    /// Columns unique across non-null values.
    pub unique: &'static [&'static str],
    pub defaults: &'static [(&'static str, ColumnDefault)],
    /// Columns restricted to a fixed set of text values.
    pub allowed: &'static [(&'static str, &'static [&'static str])],
    pub foreign_key: Option<ForeignKey>,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Reject any key of `doc` that is not a column of this table.
    pub fn check_columns(&self, doc: &Document) -> Result<(), StorageError> {
        match doc.keys().find(|k| !self.has_column(k)) {
            Some(column) => Err(StorageError::UnknownColumn {
                table: self.name.to_string(),
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Columns of `doc` in schema order (stable SQL generation).
    pub fn ordered_columns(&self, doc: &Document) -> Vec<&'static str> {
        self.columns
            .iter()
            .copied()
            .filter(|c| doc.contains_key(*c))
            .collect()
    }
}

pub static USERS: TableSchema = TableSchema {
    name: "users",
    primary_key: "id",
    columns: &[
        "id",
        "username",
        "email",
        "oauth_provider",
        "encrypted_oauth_token",
        "encrypted_refresh_token",
        "oauth_token_expires_at",
        "created_at",
    ],
    required: &[
        "id",
        "username",
        "oauth_provider",
        "encrypted_oauth_token",
        "created_at",
    ],
    unique: &["username", "email"],
    defaults: &[("id", ColumnDefault::Uuid), ("created_at", ColumnDefault::Now)],
    allowed: &[],
    foreign_key: None,
};

pub static PROJECTS: TableSchema = TableSchema {
    name: "projects",
    primary_key: "id",
    columns: &["id", "repo_url", "environment_variables", "status", "owner_id"],
    required: &["id", "repo_url", "environment_variables", "status", "owner_id"],
    unique: &[],
    defaults: &[
        ("id", ColumnDefault::Uuid),
        ("environment_variables", ColumnDefault::EmptyObject),
        ("status", ColumnDefault::Text("building")),
    ],
    allowed: &[("status", &["building", "running", "success", "failure"])],
    foreign_key: Some(ForeignKey {
        column: "owner_id",
        references: "users",
        on_delete: OnDelete::Cascade,
    }),
};

/// Every table, parents before children.
pub static ALL_TABLES: [&TableSchema; 2] = [&USERS, &PROJECTS];
