//! Incremental sync controller
//!
//! Orchestrates one sync run per followed account: resolve the handle,
//! page through the timeline, normalize and filter, stop at the stored
//! watermark, persist, and advance the watermark. Accounts are synced
//! strictly one at a time; a failing account never blocks the rest of
//! the run.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::data::{ContentItem, Database, FollowedAccount};
use crate::error::AppError;
use crate::feed::{FetchOptions, TimelineCursor, TimelineSource};
use crate::lookup::{IdentityResolver, MultiTierLookup};
use crate::normalize::{NormalizerOptions, normalize};
use crate::storage::JsonBackup;

/// Phases of one account's sync run.
///
/// Linear progression; `Failed` can be entered from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Resolving,
    Fetching,
    Evaluating,
    Persisting,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Resolving => "resolving",
            RunState::Fetching => "fetching",
            RunState::Evaluating => "evaluating",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

/// Outcome of one account's sync run.
#[derive(Debug, Clone)]
pub struct AccountRunReport {
    pub handle: String,
    pub success: bool,
    /// Raw items yielded by pagination, before filtering
    pub items_fetched: usize,
    /// Rows actually written (created or media-refreshed)
    pub items_persisted: usize,
    pub state: RunState,
    pub error: Option<String>,
}

/// Run-wide parameters, derived from config and CLI overrides.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub fetch: FetchOptions,
    pub normalizer: NormalizerOptions,
    /// Skip cache tiers during identity resolution
    pub force_refresh: bool,
}

/// Drives incremental sync runs against a timeline source.
pub struct SyncController<S, R> {
    db: Arc<Database>,
    source: S,
    lookup: MultiTierLookup<R>,
    /// `None` when the JSON backup mirror is disabled
    backup: Option<JsonBackup>,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl<S: TimelineSource, R: IdentityResolver> SyncController<S, R> {
    pub fn new(
        db: Arc<Database>,
        source: S,
        lookup: MultiTierLookup<R>,
        backup: Option<JsonBackup>,
        options: SyncOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            source,
            lookup,
            backup,
            options,
            cancel,
        }
    }

    /// Sync the given handles sequentially.
    ///
    /// Every handle yields a report; a failed account is recorded and
    /// the run moves on. Cancellation stops before the next account.
    pub async fn run_all(&self, handles: &[String]) -> Vec<AccountRunReport> {
        let mut reports = Vec::with_capacity(handles.len());

        for handle in handles {
            if self.cancel.is_cancelled() {
                tracing::info!(remaining = handles.len() - reports.len(), "Run cancelled");
                break;
            }
            reports.push(self.run_account(handle).await);
        }

        reports
    }

    /// Sync one account end to end. Never returns an error; failures
    /// are captured in the report.
    pub async fn run_account(&self, handle: &str) -> AccountRunReport {
        tracing::info!(handle, "Account sync starting");

        let account = match self.load_or_register(handle).await {
            Ok(account) => account,
            Err(e) => return Self::failed(handle, RunState::Idle, 0, 0, e),
        };

        // Resolving. A failure here leaves the account untouched, the
        // attempt timestamp included: nothing was actually tried upstream.
        let identity = match self.lookup.resolve(handle, self.options.force_refresh).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(handle, %e, "Identity resolution failed");
                return Self::failed(handle, RunState::Resolving, 0, 0, e);
            }
        };
        if account.numeric_id.as_deref() != Some(identity.numeric_id.as_str()) {
            if let Err(e) = self
                .db
                .set_account_numeric_id(handle, &identity.numeric_id)
                .await
            {
                tracing::warn!(handle, %e, "Recording numeric ID failed");
            }
        }

        // Fetching and evaluating, interleaved page by page so the
        // watermark can stop pagination early.
        let outcome = self
            .fetch_and_evaluate(&account, &identity.numeric_id)
            .await;

        // Persisting. The attempt timestamp is recorded from here on,
        // whatever the outcome.
        let attempted_at = Utc::now();
        if let Err(e) = self.db.touch_sync_attempt(handle, attempted_at).await {
            tracing::warn!(handle, %e, "Recording sync attempt failed");
        }

        let persisted = match self.persist(handle, &outcome.accepted).await {
            Ok(persisted) => persisted,
            Err(e) => {
                return Self::failed(handle, RunState::Persisting, outcome.fetched, 0, e);
            }
        };

        match outcome.fetch_error {
            None => {
                tracing::info!(
                    handle,
                    fetched = outcome.fetched,
                    accepted = outcome.accepted.len(),
                    persisted,
                    stopped_at_watermark = outcome.reached_watermark,
                    "Account sync done"
                );
                AccountRunReport {
                    handle: handle.to_string(),
                    success: true,
                    items_fetched: outcome.fetched,
                    items_persisted: persisted,
                    state: RunState::Done,
                    error: None,
                }
            }
            Some(e) => {
                // Partial run: accepted items are already persisted and
                // the watermark advanced, so the next run resumes from
                // the newest item that made it through.
                tracing::warn!(
                    handle,
                    fetched = outcome.fetched,
                    persisted,
                    %e,
                    "Account sync failed after partial fetch"
                );
                AccountRunReport {
                    handle: handle.to_string(),
                    success: false,
                    items_fetched: outcome.fetched,
                    items_persisted: persisted,
                    state: RunState::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn load_or_register(&self, handle: &str) -> Result<FollowedAccount, AppError> {
        if let Some(account) = self.db.get_followed_account(handle).await? {
            return Ok(account);
        }
        tracing::info!(handle, "Handle not in registry, creating with default filters");
        self.db.upsert_followed_account(handle, false, false).await
    }

    async fn fetch_and_evaluate(&self, account: &FollowedAccount, user_id: &str) -> FetchOutcome {
        let filters = account.filters();
        let watermark = account.watermark.last_content_at;
        let mut cursor = TimelineCursor::new(
            &self.source,
            user_id,
            self.options.fetch.clone(),
            self.cancel.clone(),
        );

        let mut outcome = FetchOutcome::default();
        loop {
            let items = match cursor.next_page().await {
                Ok(Some(items)) => items,
                Ok(None) => break,
                Err(e) => {
                    outcome.fetch_error = Some(e);
                    break;
                }
            };

            outcome.fetched += items.len();
            for raw in &items {
                let Some(item) = normalize(raw, &filters, &self.options.normalizer) else {
                    continue;
                };

                // Pages arrive newest first, so the first item at or
                // below the watermark means everything further is known.
                if let Some(mark) = watermark {
                    if item.published_at <= mark {
                        tracing::info!(
                            handle = %account.handle,
                            published_at = %item.published_at,
                            watermark = %mark,
                            "Reached watermark, stopping"
                        );
                        outcome.reached_watermark = true;
                        break;
                    }
                }

                outcome.accepted.push(item);
            }

            if outcome.reached_watermark {
                break;
            }
        }

        outcome
    }

    /// Write accepted items to the store, mirror them to the backup and
    /// advance the watermark. The backup is best-effort; the watermark
    /// only moves after the store write succeeded.
    async fn persist(&self, handle: &str, accepted: &[ContentItem]) -> Result<usize, AppError> {
        if accepted.is_empty() {
            tracing::debug!(handle, "No new items to persist");
            return Ok(0);
        }

        let persisted = self.db.upsert_content_batch(accepted).await?;

        if let Some(backup) = &self.backup {
            if let Err(e) = backup.merge(accepted).await {
                tracing::warn!(handle, %e, "Backup merge failed, continuing");
            }
        }

        if let Some(newest) = accepted.iter().map(|i| i.published_at).max() {
            match self.db.advance_content_watermark(handle, newest).await {
                Ok(true) => tracing::debug!(handle, watermark = %newest, "Watermark advanced"),
                Ok(false) => tracing::debug!(handle, "Watermark unchanged"),
                Err(e) => tracing::warn!(handle, %e, "Advancing watermark failed"),
            }
        }

        Ok(persisted)
    }

    fn failed(
        handle: &str,
        phase: RunState,
        fetched: usize,
        persisted: usize,
        error: AppError,
    ) -> AccountRunReport {
        tracing::error!(
            handle,
            phase = phase.as_str(),
            kind = error.kind(),
            %error,
            "Account sync failed"
        );
        AccountRunReport {
            handle: handle.to_string(),
            success: false,
            items_fetched: fetched,
            items_persisted: persisted,
            state: RunState::Failed,
            error: Some(format!("{}: {}", phase.as_str(), error)),
        }
    }
}

#[derive(Default)]
struct FetchOutcome {
    accepted: Vec<ContentItem>,
    fetched: usize,
    reached_watermark: bool,
    fetch_error: Option<AppError>,
}
