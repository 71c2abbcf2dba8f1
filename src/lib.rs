//! Event delivery core for the play-session monitor.
//!
//! Process watchers and session timers raise notifications for desktop
//! clients. This crate gets them there: over a live WebSocket when the
//! client is connected, through a poll/acknowledge fallback when it is not.
//!
//! # Architecture
//!
//! - `bus`: recipients, envelopes, queues, routing, push and pull channels
//! - `db`: SQLite envelope log backing replay and restart recovery
//! - `relay`: coordinator facade used by event sources and the servers
//! - `server`: WebSocket push listener and line-delimited JSON control socket
//! - `config`: file and environment configuration

pub mod bus;
pub mod config;
pub mod db;
pub mod recovery;
pub mod relay;
pub mod server;

use std::sync::Arc;

use config::RelayConfig;
use relay::Relay;

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Db(#[from] db::DbError),
    #[error("{0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Initialise logging, load configuration and serve until ctrl-c.
pub async fn run() -> Result<(), AppError> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(AppError::Other(format!("failed to load .env: {e}")));
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("playwatch_lib=debug,info")),
        )
        .init();

    let config = RelayConfig::load()?;
    tracing::info!(
        push_addr = %config.push_addr,
        control_addr = %config.control_addr,
        max_queue_depth = config.max_queue_depth,
        "starting playwatch relay"
    );

    let relay = Arc::new(Relay::open(config)?);
    server::run(relay).await
}
