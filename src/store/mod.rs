//! User records.
//!
//! Plain CRUD keyed by id or (normalized) email. Postgres backs production; the
//! in-memory store backs tests and local runs without a database.

mod memory;
mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::{PgUserStore, SCHEMA_SQL, connect, ensure_schema};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// RFC 3339, UTC.
    pub email_verified_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(User),
    EmailTaken,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; a duplicate email yields [`CreateOutcome::EmailTaken`].
    async fn create(&self, user: NewUser) -> Result<CreateOutcome>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Set `email_verified_at` if unset. Returns `false` when the user is missing.
    async fn mark_verified(&self, id: Uuid) -> Result<bool>;

    /// Returns `false` when the user is missing.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verified_follows_timestamp() {
        let mut user = User {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: "hash".to_string(),
            email_verified_at: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert!(!user.email_verified());
        user.email_verified_at = Some("2024-01-02T00:00:00Z".to_string());
        assert!(user.email_verified());
    }

    #[test]
    fn password_hash_is_never_serialized() -> anyhow::Result<()> {
        let user = User {
            id: Uuid::nil(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            email_verified_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let json = serde_json::to_string(&user)?;
        assert!(!json.contains("argon2id"));
        Ok(())
    }

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
