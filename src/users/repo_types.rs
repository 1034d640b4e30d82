use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Role, User};

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String, // 'admin' | 'user', enforced by a CHECK constraint
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role: Role = r.role.parse().map_err(anyhow::Error::msg)?;
        Ok(Self {
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            first_name: r.first_name,
            last_name: r.last_name,
            role,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}
