use std::sync::Arc;

use lazy_static::lazy_static;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{CreateUserRequest, PagedUsers, UpdateUserRequest},
    model::{PublicUser, Role, User},
    repo::UserStore,
};
use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest},
        jwt::JwtKeys,
        password::{self, hash_password_async, verify_password_async},
    },
    config::BootstrapAdmin,
    error::{AppError, AppResult},
    validation::normalize_email,
};

lazy_static! {
    // Verified against when the email is unknown so both login failures cost the same.
    static ref DUMMY_HASH: Option<String> = password::hash_password("not-a-real-password").ok();
}

/// Business rules for accounts: uniqueness, hashing, token issue, admin CRUD.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    jwt: JwtKeys,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, jwt: JwtKeys) -> Self {
        Self { store, jwt }
    }

    pub async fn register(&self, req: CreateUserRequest) -> AppResult<AuthResponse> {
        // Public sign-up never grants elevated roles.
        let user = self.insert_new(req, Role::User).await?;
        let token = self.jwt.issue(user.id, user.role)?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(AuthResponse {
            token,
            user: user.into(),
        })
    }

    pub async fn login(&self, mut req: LoginRequest) -> AppResult<AuthResponse> {
        req.normalize_and_validate()?;

        let Some(user) = self.store.find_by_email(&req.email).await? else {
            burn_dummy_verify(req.password).await;
            warn!(email = %req.email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        let ok = verify_password_async(req.password, user.password_hash.clone())
            .await
            .map_err(AppError::internal)?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "login to disabled account");
            return Err(AppError::Forbidden("Account is disabled".into()));
        }

        let token = self.jwt.issue(user.id, user.role)?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthResponse {
            token,
            user: user.into(),
        })
    }

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<PublicUser> {
        Ok(self.store.find_by_id(id).await?.into())
    }

    pub async fn create(&self, req: CreateUserRequest) -> AppResult<PublicUser> {
        let role = req.role.unwrap_or_default();
        let user = self.insert_new(req, role).await?;
        info!(user_id = %user.id, %role, "user created by admin");
        Ok(user.into())
    }

    pub async fn update(&self, id: Uuid, req: UpdateUserRequest) -> AppResult<PublicUser> {
        let patch = req.into_patch()?;
        if patch.is_empty() {
            return self.get_by_id(id).await;
        }
        let user = self.store.update(id, patch).await?;
        info!(user_id = %user.id, "user updated");
        Ok(user.into())
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        self.store.delete(id).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    pub async fn list(&self, page: u32, limit: u32) -> AppResult<PagedUsers> {
        let (users, total) = self.store.list(page, limit).await?;
        let users = users.into_iter().map(PublicUser::from).collect();
        Ok(PagedUsers::new(users, total, page, limit))
    }

    /// Creates the configured administrator unless the email already exists.
    /// Returns whether a new account was created.
    pub async fn ensure_admin(&self, admin: &BootstrapAdmin) -> AppResult<bool> {
        let req = CreateUserRequest {
            username: admin.username.clone(),
            email: admin.email.clone(),
            password: admin.password.clone(),
            first_name: "Admin".into(),
            last_name: "User".into(),
            role: Some(Role::Admin),
        };
        match self.insert_new(req, Role::Admin).await {
            Ok(user) => {
                info!(user_id = %user.id, "bootstrap admin created");
                Ok(true)
            }
            Err(AppError::EmailTaken) => {
                let email = normalize_email(&admin.email);
                match self.store.find_by_email(&email).await? {
                    Some(existing) if existing.role != Role::Admin => warn!(
                        user_id = %existing.id,
                        role = %existing.role,
                        "bootstrap admin email belongs to a non-admin account; no admin was created"
                    ),
                    _ => info!("bootstrap admin already present"),
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_new(&self, mut req: CreateUserRequest, role: Role) -> AppResult<User> {
        req.normalize_and_validate()?;

        if self.store.find_by_email(&req.email).await?.is_some() {
            warn!(email = %req.email, "email already registered");
            return Err(AppError::EmailTaken);
        }

        let CreateUserRequest {
            username,
            email,
            password,
            first_name,
            last_name,
            role: _,
        } = req;
        let password_hash = hash_password_async(password)
            .await
            .map_err(AppError::internal)?;

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            first_name,
            last_name,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        Ok(self.store.insert(user).await?)
    }
}

async fn burn_dummy_verify(plain: String) {
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(hash) = DUMMY_HASH.as_ref() {
            let _ = password::verify_password(&plain, hash);
        }
    })
    .await;
}
