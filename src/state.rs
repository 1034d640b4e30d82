use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::jwt::JwtKeys;
use crate::config::{AppConfig, DatabaseConfig};
use crate::users::{
    memory::MemoryUserStore, pg::PgUserStore, repo::UserStore, services::UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: JwtKeys,
    pub users: UserService,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn UserStore> = match &config.database {
            Some(db) => Arc::new(PgUserStore::new(connect(db).await?)),
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory user store");
                Arc::new(MemoryUserStore::new())
            }
        };

        let state = Self::from_parts(Arc::new(config), store);
        if let Some(admin) = &state.config.admin {
            state
                .users
                .ensure_admin(admin)
                .await
                .context("bootstrap admin")?;
        }
        Ok(state)
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn UserStore>) -> Self {
        let jwt = JwtKeys::new(&config.jwt);
        let users = UserService::new(store, jwt.clone());
        Self { config, jwt, users }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::from_parts(
            Arc::new(AppConfig::for_tests()),
            Arc::new(MemoryUserStore::new()),
        )
    }
}

async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<sqlx::PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.timeout_secs))
        .connect(&cfg.url)
        .await
        .context("connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("run migrations")?;
    tracing::info!("database connected and migrated");
    Ok(db)
}
