//! In-memory user registry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::playback::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub active: bool,
}

/// Body of `POST /users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("User {0} not found")]
    NotFound(UserId),
}

/// Storage behind the user registry.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, RegistryError>;

    async fn get(&self, id: UserId) -> Result<User, RegistryError>;

    async fn exists(&self, id: UserId) -> bool {
        self.get(id).await.is_ok()
    }
}

/// Users keyed by id. Ids start at 1 and are never reused.
pub struct InMemoryUserStore {
    table: RwLock<UserTable>,
}

struct UserTable {
    next_id: UserId,
    users: BTreeMap<UserId, User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(UserTable {
                next_id: 1,
                users: BTreeMap::new(),
            }),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<User, RegistryError> {
        let mut table = self.table.write().await;

        if table.users.values().any(|u| u.email == user.email) {
            return Err(RegistryError::DuplicateEmail(user.email));
        }

        let id = table.next_id;
        table.next_id += 1;

        let created = User {
            id,
            name: user.name,
            email: user.email,
            active: user.active,
        };
        table.users.insert(id, created.clone());

        info!(user_id = id, "User registered");
        Ok(created)
    }

    async fn get(&self, id: UserId) -> Result<User, RegistryError> {
        self.table
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: email.to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increment() {
        let store = InMemoryUserStore::new();

        let first = store.create(new_user("Ana", "ana@example.com")).await.unwrap();
        let second = store.create(new_user("Bia", "bia@example.com")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.get(2).await.unwrap().name, "Bia");
        assert!(store.exists(1).await);
        assert!(!store.exists(3).await);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_without_consuming_id() {
        let store = InMemoryUserStore::new();
        store.create(new_user("Ana", "ana@example.com")).await.unwrap();

        let err = store
            .create(new_user("Other", "ana@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateEmail("ana@example.com".to_string()));

        let next = store.create(new_user("Bia", "bia@example.com")).await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = InMemoryUserStore::new();
        assert_eq!(store.get(42).await, Err(RegistryError::NotFound(42)));
    }

    #[test]
    fn test_active_defaults_to_true() {
        let user: NewUser =
            serde_json::from_str(r#"{"name":"Ana","email":"ana@example.com"}"#).unwrap();
        assert!(user.active);
    }
}
