use super::{CreateOutcome, NewUser, User, UserStore};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, User>> {
        self.users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<CreateOutcome> {
        let mut users = self.lock();
        if users.values().any(|existing| existing.email == user.email) {
            return Ok(CreateOutcome::EmailTaken);
        }
        let timestamp = now();
        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            email_verified_at: None,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        users.insert(created.id, created.clone());
        Ok(CreateOutcome::Created(created))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .lock()
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn mark_verified(&self, id: Uuid) -> Result<bool> {
        let mut users = self.lock();
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        let timestamp = now();
        if user.email_verified_at.is_none() {
            user.email_verified_at = Some(timestamp.clone());
        }
        user.updated_at = timestamp;
        Ok(true)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool> {
        let mut users = self.lock();
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        user.password_hash = password_hash.to_string();
        user.updated_at = now();
        Ok(true)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ada".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() -> Result<()> {
        let store = MemoryUserStore::new();
        assert!(matches!(
            store.create(new_user("ada@example.com")).await?,
            CreateOutcome::Created(_)
        ));
        assert_eq!(
            store.create(new_user("ada@example.com")).await?,
            CreateOutcome::EmailTaken
        );
        Ok(())
    }

    #[tokio::test]
    async fn mark_verified_and_update_password() -> Result<()> {
        let store = MemoryUserStore::new();
        let CreateOutcome::Created(user) = store.create(new_user("ada@example.com")).await? else {
            panic!("expected a new user");
        };

        assert!(store.mark_verified(user.id).await?);
        assert!(store.update_password(user.id, "new-hash").await?);

        let found = store
            .find_by_email("ada@example.com")
            .await?
            .ok_or_else(|| anyhow::anyhow!("user missing"))?;
        assert!(found.email_verified());
        assert_eq!(found.password_hash, "new-hash");
        assert!(OffsetDateTime::parse(&found.created_at, &Rfc3339).is_ok());

        assert!(!store.mark_verified(Uuid::new_v4()).await?);
        Ok(())
    }
}
