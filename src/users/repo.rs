use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::model::{User, UserPatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// A uniqueness constraint was violated; carries the field name.
    #[error("duplicate value for {0}")]
    DuplicateKey(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for user records.
///
/// `list` pages are ordered by `(created_at, id)` so repeated calls see the
/// same order when nothing is written in between. `page` is 1-based.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<User>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn insert(&self, user: User) -> StoreResult<User>;
    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn list(&self, page: u32, page_size: u32) -> StoreResult<(Vec<User>, u64)>;
}

pub(crate) fn offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}
