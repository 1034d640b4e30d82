use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    model::{User, UserPatch},
    repo::{offset, StoreError, StoreResult, UserStore},
    repo_types::UserRow,
};

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, \
                            role, is_active, created_at, updated_at";

/// `UserStore` backed by the `users` table in PostgreSQL.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Maps a constraint name from the migration to the offending field.
fn duplicate_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_key") => "email",
        Some("users_username_key") => "username",
        _ => "unique field",
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::DuplicateKey(duplicate_field(db.constraint()).to_string())
        }
        other => StoreError::Backend(other.into()),
    }
}

fn into_user(row: UserRow) -> StoreResult<User> {
    User::try_from(row).map_err(StoreError::Backend)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_error)?;
        into_user(row)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_error)?;
        row.map(into_user).transpose()
    }

    async fn insert(&self, user: User) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name,
                               role, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_error)?;
        into_user(row)
    }

    async fn update(&self, id: Uuid, patch: UserPatch) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                username   = COALESCE($2, username),
                email      = COALESCE($3, email),
                first_name = COALESCE($4, first_name),
                last_name  = COALESCE($5, last_name),
                role       = COALESCE($6, role),
                is_active  = COALESCE($7, is_active),
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.username)
        .bind(patch.email)
        .bind(patch.first_name)
        .bind(patch.last_name)
        .bind(patch.role.map(|r| r.as_str()))
        .bind(patch.is_active)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_error)?
        .ok_or(StoreError::NotFound)?;
        into_user(row)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(map_db_error)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, page: u32, page_size: u32) -> StoreResult<(Vec<User>, u64)> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY created_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(page_size))
        .bind(offset(page, page_size) as i64)
        .fetch_all(&self.db)
        .await
        .map_err(map_db_error)?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .context("count users")?;

        let users = rows
            .into_iter()
            .map(into_user)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((users, total as u64))
    }
}
