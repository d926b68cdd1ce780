//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Default bearer token of the platform's public web client.
///
/// This is not a secret; every browser session uses the same value.
/// Overridable via `platform.bearer_token` if the platform rotates it.
const DEFAULT_BEARER_TOKEN: &str =
    "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub platform: PlatformConfig,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub backup: BackupConfig,
    pub logging: LoggingConfig,
}

/// Upstream platform configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Platform base URL (e.g., "https://x.com")
    pub base_url: String,
    /// Bearer token sent with every API request
    pub bearer_token: String,
    /// User agent presented to the platform
    pub user_agent: String,
}

impl PlatformConfig {
    /// Base URL with any trailing slash removed
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Authentication configuration
///
/// The session token is a raw credential supplied externally
/// (config file or environment); Magpie never acquires one itself.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub session_token: String,
}

/// Sync run parameters
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum items fetched per account per run
    pub max_items_per_run: usize,
    /// Blocking delay between page requests, in seconds
    pub page_delay_seconds: u64,
    /// Consecutive empty pages before the fetch gives up
    pub empty_page_limit: u32,
    /// Items requested per page
    pub page_size: u32,
    /// Skip cache tiers when resolving account identities
    pub force_refresh: bool,
    /// What to do when an item timestamp fails to parse
    pub timestamp_policy: TimestampPolicy,
    /// Page-level retry attempts (0 = no retries)
    pub retry_max_attempts: u32,
    /// Explicit handles to sync; empty means "use the followed registry"
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// Policy for items whose published timestamp cannot be parsed.
///
/// `SubstituteNow` mirrors the historical behavior of stamping the item
/// with the current wall-clock time. That corrupts watermark ordering
/// whenever the feed is not strictly descending, so `Reject` is offered
/// as the safe alternative.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampPolicy {
    #[default]
    SubstituteNow,
    Reject,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Identity file-cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding per-handle identity JSON files
    pub dir: PathBuf,
}

/// JSON backup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Mirror persisted items into a JSON backup file
    pub enabled: bool,
    /// Backup file path for this content domain
    pub path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (MAGPIE_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("platform.base_url", "https://x.com")?
            .set_default("platform.bearer_token", DEFAULT_BEARER_TOKEN)?
            .set_default("platform.user_agent", DEFAULT_USER_AGENT)?
            .set_default("auth.session_token", "")?
            .set_default("sync.max_items_per_run", 50)?
            .set_default("sync.page_delay_seconds", 2)?
            .set_default("sync.empty_page_limit", 3)?
            .set_default("sync.page_size", 20)?
            .set_default("sync.force_refresh", false)?
            .set_default("sync.timestamp_policy", "substitute-now")?
            .set_default("sync.retry_max_attempts", 0)?
            .set_default("database.path", "data/magpie.db")?
            .set_default("cache.dir", "data/cache")?
            .set_default("backup.enabled", true)?
            .set_default("backup.path", "data/backup/content.json")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (MAGPIE_*)
            .add_source(
                Environment::with_prefix("MAGPIE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.platform.base_url.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "platform.base_url must not be empty".to_string(),
            ));
        }

        url::Url::parse(&self.platform.base_url).map_err(|e| {
            crate::error::AppError::Config(format!("platform.base_url is not a valid URL: {}", e))
        })?;

        if self.sync.page_size == 0 {
            return Err(crate::error::AppError::Config(
                "sync.page_size must be at least 1".to_string(),
            ));
        }

        if self.sync.empty_page_limit == 0 {
            return Err(crate::error::AppError::Config(
                "sync.empty_page_limit must be at least 1".to_string(),
            ));
        }

        if self.auth.session_token.is_empty() {
            tracing::warn!("auth.session_token is empty; commands that hit the network will fail");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            platform: PlatformConfig {
                base_url: "https://x.com".to_string(),
                bearer_token: DEFAULT_BEARER_TOKEN.to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            auth: AuthConfig {
                session_token: "token".to_string(),
            },
            sync: SyncConfig {
                max_items_per_run: 50,
                page_delay_seconds: 2,
                empty_page_limit: 3,
                page_size: 20,
                force_refresh: false,
                timestamp_policy: TimestampPolicy::SubstituteNow,
                retry_max_attempts: 0,
                accounts: Vec::new(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/magpie-test.db"),
            },
            cache: CacheConfig {
                dir: PathBuf::from("/tmp/magpie-cache"),
            },
            backup: BackupConfig {
                enabled: false,
                path: PathBuf::from("/tmp/magpie-backup.json"),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_invalid_base_url() {
        let mut config = valid_config();
        config.platform.base_url = "not a url".to_string();

        let error = config
            .validate()
            .expect_err("malformed base URL must fail validation");
        assert!(matches!(error, crate::error::AppError::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let mut config = valid_config();
        config.sync.page_size = 0;

        let error = config.validate().expect_err("page_size 0 must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("sync.page_size")
        ));
    }

    #[test]
    fn timestamp_policy_parses_kebab_case() {
        let policy: TimestampPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, TimestampPolicy::Reject);
        let policy: TimestampPolicy = serde_json::from_str("\"substitute-now\"").unwrap();
        assert_eq!(policy, TimestampPolicy::SubstituteNow);
    }
}
