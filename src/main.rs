use std::net::SocketAddr;

use anyhow::Context;

mod app;
mod auth;
mod config;
mod error;
mod state;
mod users;
mod validation;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "usersvc=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load configuration")?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parse listen address")?;
    let grace = config.shutdown_timeout();
    tracing::info!(env = %config.server.env, "starting user service");

    let state = AppState::init(config).await?;
    app::serve(app::build_app(state), addr, grace).await
}
