use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Optional administrator created on startup when the email is still free.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` runs the service against the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub jwt: JwtConfig,
    pub admin: Option<BootstrapAdmin>,
}

/// Upper bound for `JWT_TTL_MINUTES` (one year).
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let server = ServerConfig {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 5),
        };

        let database = std::env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
            url,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            timeout_secs: env_or("DATABASE_TIMEOUT_SECS", 10),
        });

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "usersvc".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "usersvc-clients".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
        };

        let admin = match (std::env::var("ADMIN_EMAIL"), std::env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(BootstrapAdmin {
                username: std::env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".into()),
                email,
                password,
            }),
            _ => None,
        };

        let config = Self {
            server,
            database,
            jwt,
            admin,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt.secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        if self.is_production() && self.jwt.secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes in production");
        }
        if self.jwt.ttl_minutes <= 0 {
            bail!("JWT_TTL_MINUTES must be positive");
        }
        if self.jwt.ttl_minutes > MAX_TTL_MINUTES {
            bail!("JWT_TTL_MINUTES must be at most {MAX_TTL_MINUTES}");
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.env.eq_ignore_ascii_case("production")
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Configuration used by unit and router tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                env: "test".into(),
                shutdown_timeout_secs: 1,
            },
            database: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            admin: None,
        }
    }
}
