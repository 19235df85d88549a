//! User records and the arguments used to create and patch them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::UserId;
use crate::patch::Patch;

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A user account linked to an OAuth provider.
///
/// # Invariants
/// - `id` is assigned by storage at creation and never changes.
/// - `username` is unique across all users; `email` is unique when present.
/// - Tokens are stored already encrypted; this layer never sees plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub oauth_provider: String,
    pub encrypted_oauth_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub oauth_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;
    const KIND: &'static str = "user";

    fn id(&self) -> &UserId {
        &self.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreateArgs {
    pub username: String,
    pub email: Option<String>,
    pub oauth_provider: String,
    pub encrypted_oauth_token: String,
    #[serde(default)]
    pub encrypted_refresh_token: Option<String>,
    #[serde(default)]
    pub oauth_token_expires_at: Option<DateTime<Utc>>,
}

impl UserCreateArgs {
    pub fn validate(&self) -> DomainResult<()> {
        require_non_empty("username", &self.username)?;
        require_non_empty("oauth_provider", &self.oauth_provider)?;
        require_non_empty("encrypted_oauth_token", &self.encrypted_oauth_token)?;
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

/// Patch for a user. Every field, credentials included, may be rotated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdateArgs {
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub username: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub email: Patch<Option<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub oauth_provider: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub encrypted_oauth_token: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub encrypted_refresh_token: Patch<Option<String>>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub oauth_token_expires_at: Patch<Option<DateTime<Utc>>>,
}

impl UserUpdateArgs {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(username) = self.username.as_set() {
            require_non_empty("username", username)?;
        }
        if let Some(provider) = self.oauth_provider.as_set() {
            require_non_empty("oauth_provider", provider)?;
        }
        if let Some(token) = self.encrypted_oauth_token.as_set() {
            require_non_empty("encrypted_oauth_token", token)?;
        }
        if let Some(Some(email)) = self.email.as_set() {
            validate_email(email)?;
        }
        Ok(())
    }

    /// Apply the patch to an in-memory copy (mirrors what storage does).
    pub fn apply_to(self, user: &mut User) {
        self.username.apply_to(&mut user.username);
        self.email.apply_to(&mut user.email);
        self.oauth_provider.apply_to(&mut user.oauth_provider);
        self.encrypted_oauth_token.apply_to(&mut user.encrypted_oauth_token);
        self.encrypted_refresh_token
            .apply_to(&mut user.encrypted_refresh_token);
        self.oauth_token_expires_at
            .apply_to(&mut user.oauth_token_expires_at);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

fn require_non_empty(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Check that `email` has the `local@domain.tld` shape.
///
/// Shape check only: one `@`, non-empty local part, a dotted domain with
/// no empty labels, and no whitespace.
pub fn validate_email(email: &str) -> DomainResult<()> {
    let invalid = || DomainError::validation(format!("invalid email address: {email:?}"));

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}
