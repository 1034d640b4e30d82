use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    model::{User, UserPatch},
    repo::{offset, StoreError, StoreResult, UserStore},
};

/// Process-local store used by tests and when no database is configured.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(users: &[User], skip: Option<Uuid>, username: &str, email: &str) -> Option<StoreError> {
    let others = users.iter().filter(|u| Some(u.id) != skip);
    for u in others {
        if u.email == email {
            return Some(StoreError::DuplicateKey("email".into()));
        }
        if u.username == username {
            return Some(StoreError::DuplicateKey("username".into()));
        }
    }
    None
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        let users = self.users.read().await;
        users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: User) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if let Some(err) = conflict(&users, None, &user.username, &user.email) {
            return Err(err);
        }
        users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        let mut users = self.users.write().await;
        let idx = users
            .iter()
            .position(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;

        let mut updated = users[idx].clone();
        patch.apply(&mut updated, OffsetDateTime::now_utc());
        if let Some(err) = conflict(&users, Some(id), &updated.username, &updated.email) {
            return Err(err);
        }
        users[idx] = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        if users.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, page: u32, page_size: u32) -> StoreResult<(Vec<User>, u64)> {
        let users = self.users.read().await;
        let mut sorted: Vec<&User> = users.iter().collect();
        sorted.sort_by_key(|u| (u.created_at, u.id));

        let skip = usize::try_from(offset(page, page_size)).unwrap_or(usize::MAX);
        let items = sorted
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .cloned()
            .collect();
        Ok((items, users.len() as u64))
    }
}
