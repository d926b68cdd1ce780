//! Magpie binary entry point

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magpie::client::{PlatformApi, Session};
use magpie::config::AppConfig;
use magpie::feed::{FetchOptions, RetryPolicy};
use magpie::lookup::MultiTierLookup;
use magpie::normalize::{NormalizerOptions, to_reference_timezone};
use magpie::storage::JsonBackup;
use magpie::sync::{SyncController, SyncOptions};
use magpie::AppState;

#[derive(Parser)]
#[command(name = "magpie", version, about = "Incremental ingestion engine for followed accounts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an incremental sync over followed accounts
    Sync {
        /// Sync only this handle; repeatable
        #[arg(long = "account", value_name = "HANDLE")]
        accounts: Vec<String>,
        /// Maximum items fetched per account this run
        #[arg(long)]
        limit: Option<usize>,
        /// Seconds to wait between page requests
        #[arg(long)]
        delay: Option<u64>,
        /// Skip identity cache tiers and re-resolve every account
        #[arg(long)]
        force_refresh: bool,
    },
    /// Mark a handle as followed
    Follow {
        /// Handle to follow, with or without the leading '@'
        handle: String,
        /// Also ingest the account's retweets
        #[arg(long)]
        include_retweets: bool,
        /// Also ingest the account's quote posts
        #[arg(long)]
        include_quotes: bool,
    },
    /// Load a JSON backup file back into the content store
    Restore {
        /// Backup file to read
        path: PathBuf,
    },
}

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Dispatch the requested command
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("MAGPIE__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "magpie=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "magpie=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    // 2. Load configuration
    let config = AppConfig::load()?;
    tracing::info!(
        platform = %config.platform.base(),
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    // 3. Initialize application state
    let state = AppState::new(config).await?;

    // 4. Dispatch
    match cli.command {
        Command::Sync {
            accounts,
            limit,
            delay,
            force_refresh,
        } => run_sync(state, accounts, limit, delay, force_refresh).await,
        Command::Follow {
            handle,
            include_retweets,
            include_quotes,
        } => run_follow(state, &handle, include_retweets, include_quotes).await,
        Command::Restore { path } => run_restore(state, &path).await,
    }
}

/// Build the handle list for a sync run.
///
/// CLI handles win outright; otherwise the followed registry is merged
/// with any handles pinned in configuration, registry first.
async fn sync_handles(
    state: &AppState,
    cli_accounts: Vec<String>,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    if !cli_accounts.is_empty() {
        return Ok(cli_accounts.iter().map(|h| normalize_handle(h)).collect());
    }

    let mut handles: Vec<String> = state
        .db
        .list_followed_accounts()
        .await?
        .into_iter()
        .map(|account| account.handle)
        .collect();

    for pinned in &state.config.sync.accounts {
        let pinned = normalize_handle(pinned);
        if !handles.contains(&pinned) {
            handles.push(pinned);
        }
    }

    Ok(handles)
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_string()
}

async fn run_sync(
    state: AppState,
    cli_accounts: Vec<String>,
    limit: Option<usize>,
    delay: Option<u64>,
    force_refresh: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let handles = sync_handles(&state, cli_accounts).await?;
    if handles.is_empty() {
        tracing::warn!("No followed accounts and no accounts configured; nothing to sync");
        return Ok(());
    }

    // Session bootstrap happens once per run; every account shares it.
    let session = Session::initialize(
        &state.http_client,
        &state.config.platform,
        &state.config.auth.session_token,
    )
    .await?;
    let api = PlatformApi::new(
        state.http_client.clone(),
        session,
        state.config.platform.base(),
        state.config.sync.page_size,
    );

    let lookup = MultiTierLookup::new(
        state.db.clone(),
        state.config.cache.dir.clone(),
        api.clone(),
    );
    let backup = state
        .config
        .backup
        .enabled
        .then(|| JsonBackup::new(state.config.backup.path.clone()));

    let options = SyncOptions {
        fetch: FetchOptions {
            limit: limit.unwrap_or(state.config.sync.max_items_per_run),
            page_delay: Duration::from_secs(delay.unwrap_or(state.config.sync.page_delay_seconds)),
            empty_page_limit: state.config.sync.empty_page_limit,
            retry: RetryPolicy {
                max_attempts: state.config.sync.retry_max_attempts,
            },
        },
        normalizer: NormalizerOptions {
            platform_base: state.config.platform.base().to_string(),
            timestamp_policy: state.config.sync.timestamp_policy,
        },
        force_refresh: force_refresh || state.config.sync.force_refresh,
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing current page, then stopping");
            signal_cancel.cancel();
        }
    });

    let controller = SyncController::new(
        state.db.clone(),
        api.clone(),
        lookup,
        backup,
        options,
        cancel,
    );

    tracing::info!(accounts = handles.len(), "Sync run starting");
    let reports = controller.run_all(&handles).await;

    let mut failures = 0usize;
    for report in &reports {
        if report.success {
            let newest = state
                .db
                .get_followed_account(&report.handle)
                .await?
                .and_then(|account| account.watermark.last_content_at)
                .map(|at| to_reference_timezone(at).to_rfc3339());
            tracing::info!(
                handle = %report.handle,
                fetched = report.items_fetched,
                persisted = report.items_persisted,
                newest_content = newest.as_deref().unwrap_or("none"),
                "Account synced"
            );
        } else {
            failures += 1;
            tracing::error!(
                handle = %report.handle,
                fetched = report.items_fetched,
                persisted = report.items_persisted,
                error = report.error.as_deref().unwrap_or("unknown"),
                "Account sync failed"
            );
        }
    }

    tracing::info!(
        accounts = reports.len(),
        failures,
        persisted = reports.iter().map(|r| r.items_persisted).sum::<usize>(),
        "Sync run finished"
    );

    if !reports.is_empty() && failures == reports.len() {
        return Err("all accounts failed to sync".into());
    }
    Ok(())
}

async fn run_follow(
    state: AppState,
    handle: &str,
    include_retweets: bool,
    include_quotes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = normalize_handle(handle);
    if handle.is_empty() {
        return Err(magpie::error::AppError::Validation("handle must not be empty".to_string()).into());
    }

    let account = state
        .db
        .upsert_followed_account(&handle, include_retweets, include_quotes)
        .await?;

    tracing::info!(
        handle = %account.handle,
        include_retweets = account.include_retweets,
        include_quotes = account.include_quotes,
        "Account followed"
    );
    Ok(())
}

async fn run_restore(state: AppState, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let backup = JsonBackup::new(path);
    let items = backup.load().await?;
    if items.is_empty() {
        tracing::warn!(path = %path.display(), "Backup contains no items");
        return Ok(());
    }

    let written = state.db.upsert_content_batch(&items).await?;
    let total = state.db.count_content_items().await?;

    tracing::info!(
        path = %path.display(),
        loaded = items.len(),
        written,
        total_in_store = total,
        "Backup restored"
    );
    Ok(())
}
