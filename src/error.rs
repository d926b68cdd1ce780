//! Error types for Magpie
//!
//! All errors in the engine are converted to `AppError`.
//! The sync controller is the propagation boundary: every variant is
//! caught there and folded into a per-account run report, so a single
//! failing account never aborts a multi-account run.

use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Session bootstrap failed or the anti-forgery token is missing.
    /// Fatal for the current account run, not for sibling runs.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Identity could not be resolved through any cache tier.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A page request failed. Terminates the current fetch early;
    /// items fetched before the failure are preserved.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable-store write failed; the batch reports zero successes.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short machine-readable tag used in run reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "auth",
            AppError::Resolution(_) => "resolution",
            AppError::Transport(_) => "transport",
            AppError::Persistence(_) => "persistence",
            AppError::Database(_) => "database",
            AppError::HttpClient(_) => "http_client",
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Internal(_) => "internal",
        }
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
