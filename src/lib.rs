//! Magpie - incremental ingestion engine for a followed-accounts feed
//!
//! Periodically pulls new posts from a set of followed upstream
//! accounts and lands them in a local SQLite store, with an optional
//! JSON backup mirror. Runs are incremental: each account carries a
//! watermark of the newest content ever accepted, and a run stops
//! paging as soon as it reaches known territory.
//!
//! # Modules
//!
//! - `client`: authenticated session bootstrap and platform API calls
//! - `feed`: raw payload decoding and cursor pagination
//! - `normalize`: raw item to canonical content item conversion
//! - `lookup`: multi-tier handle-to-numeric-ID resolution
//! - `sync`: per-account incremental run orchestration
//! - `data`: SQLite store (registry, content, identity cache)
//! - `storage`: JSON backup file
//! - `config`: configuration management
//! - `error`: error types

pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod feed;
pub mod lookup;
pub mod normalize;
pub mod storage;
pub mod sync;

use std::sync::Arc;

/// Shared application state.
///
/// Holds the long-lived resources every command needs; network session
/// setup is deferred to the commands that actually hit the platform.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for platform requests
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Errors
    /// Returns error if the database or HTTP client cannot be set up
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let http_client = reqwest::Client::builder()
            .user_agent(config.platform.user_agent.clone())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            http_client: Arc::new(http_client),
        })
    }
}
