//! Cursor-based pagination loop
//!
//! Drives the upstream feed page by page, yielding raw items lazily.
//! The sequence is finite and non-restartable; termination policy
//! (first satisfied wins):
//!
//! 1. Accumulated item count reached the caller-supplied limit.
//! 2. Three consecutive pages returned zero items.
//! 3. A page returned no next cursor.
//! 4. A page request failed after the configured retries; the partial
//!    result obtained so far is preserved and the error surfaced.
//!
//! A fixed inter-page delay is enforced before every page after the
//! first. The wait blocks the calling worker on purpose: accounts are
//! synced one at a time to present a single, low-frequency client
//! fingerprint to the upstream.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::raw::{RawItem, TimelinePage};
use crate::error::AppError;

/// Source of timeline pages.
///
/// The production implementation is the platform API client; tests
/// drive the loop with scripted fakes.
#[allow(async_fn_in_trait)]
pub trait TimelineSource {
    async fn fetch_page(
        &self,
        user_id: &str,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, AppError>;
}

/// Page-level retry policy.
///
/// Defaults to zero retries: a failed page aborts the fetch, matching
/// the engine's historical no-retry behavior. Retries re-request only
/// the failing page.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

/// Parameters of one pagination run.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Maximum raw items to yield
    pub limit: usize,
    /// Delay before every page after the first
    pub page_delay: Duration,
    /// Consecutive empty pages before giving up
    pub empty_page_limit: u32,
    pub retry: RetryPolicy,
}

/// Lazy, finite, non-restartable cursor over one account's timeline.
pub struct TimelineCursor<'a, S> {
    source: &'a S,
    user_id: String,
    options: FetchOptions,
    cancel: CancellationToken,
    cursor: Option<String>,
    yielded: usize,
    empty_pages: u32,
    pages_fetched: u32,
    done: bool,
}

impl<'a, S: TimelineSource> TimelineCursor<'a, S> {
    pub fn new(
        source: &'a S,
        user_id: impl Into<String>,
        options: FetchOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            user_id: user_id.into(),
            options,
            cancel,
            cursor: None,
            yielded: 0,
            empty_pages: 0,
            pages_fetched: 0,
            done: false,
        }
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Fetch the next page of raw items.
    ///
    /// Returns `Ok(None)` once the sequence is exhausted. A returned
    /// error is terminal: items from earlier pages remain valid, but no
    /// further pages will be fetched.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawItem>>, AppError> {
        loop {
            if self.done || self.yielded >= self.options.limit {
                self.done = true;
                return Ok(None);
            }

            if self.cancel.is_cancelled() {
                tracing::info!(user_id = %self.user_id, "Fetch cancelled between pages");
                self.done = true;
                return Ok(None);
            }

            if self.pages_fetched > 0 && !self.options.page_delay.is_zero() {
                tracing::debug!(
                    delay_secs = self.options.page_delay.as_secs(),
                    "Waiting before next page"
                );
                tokio::time::sleep(self.options.page_delay).await;
            }

            let page = match self.fetch_with_retry().await {
                Ok(page) => page,
                Err(error) => {
                    self.done = true;
                    return Err(error);
                }
            };
            self.pages_fetched += 1;

            if page.items.is_empty() {
                self.empty_pages += 1;
                tracing::debug!(
                    empty_pages = self.empty_pages,
                    limit = self.options.empty_page_limit,
                    "Empty page"
                );
                if self.empty_pages >= self.options.empty_page_limit {
                    tracing::info!(
                        user_id = %self.user_id,
                        "Stopping: {} consecutive empty pages",
                        self.empty_pages
                    );
                    self.done = true;
                    return Ok(None);
                }
            } else {
                self.empty_pages = 0;
            }

            match page.next_cursor {
                Some(cursor) => self.cursor = Some(cursor),
                None => {
                    tracing::debug!(user_id = %self.user_id, "No further pages");
                    self.done = true;
                }
            }

            if page.items.is_empty() {
                if self.done {
                    return Ok(None);
                }
                // Empty page under the threshold: keep paging.
                continue;
            }

            let mut items = page.items;
            let remaining = self.options.limit - self.yielded;
            if items.len() > remaining {
                items.truncate(remaining);
            }
            self.yielded += items.len();
            if self.yielded >= self.options.limit {
                tracing::info!(
                    user_id = %self.user_id,
                    limit = self.options.limit,
                    "Stopping: item limit reached"
                );
                self.done = true;
            }

            return Ok(Some(items));
        }
    }

    async fn fetch_with_retry(&self) -> Result<TimelinePage, AppError> {
        let attempts = 1 + self.options.retry.max_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self
                .source
                .fetch_page(&self.user_id, self.cursor.as_deref())
                .await
            {
                Ok(page) => return Ok(page),
                Err(error) => {
                    tracing::warn!(
                        user_id = %self.user_id,
                        attempt,
                        attempts,
                        %error,
                        "Page request failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AppError::Transport("page request failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn item(id: &str) -> RawItem {
        serde_json::from_value(serde_json::json!({ "rest_id": id })).unwrap()
    }

    /// Scripted page source; each entry is one page response.
    struct ScriptedSource {
        pages: Mutex<Vec<Result<TimelinePage, AppError>>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Result<TimelinePage, AppError>>) -> Self {
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    impl TimelineSource for ScriptedSource {
        async fn fetch_page(
            &self,
            _user_id: &str,
            _cursor: Option<&str>,
        ) -> Result<TimelinePage, AppError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(TimelinePage::default());
            }
            pages.remove(0)
        }
    }

    fn options(limit: usize) -> FetchOptions {
        FetchOptions {
            limit,
            page_delay: Duration::ZERO,
            empty_page_limit: 3,
            retry: RetryPolicy::default(),
        }
    }

    fn page(ids: &[&str], cursor: Option<&str>) -> TimelinePage {
        TimelinePage {
            items: ids.iter().map(|id| item(id)).collect(),
            next_cursor: cursor.map(str::to_string),
        }
    }

    async fn drain<S: TimelineSource>(cursor: &mut TimelineCursor<'_, S>) -> Vec<RawItem> {
        let mut all = Vec::new();
        while let Ok(Some(items)) = cursor.next_page().await {
            all.extend(items);
        }
        all
    }

    #[tokio::test]
    async fn stops_at_item_limit() {
        let source = ScriptedSource::new(vec![
            Ok(page(&["1", "2"], Some("c1"))),
            Ok(page(&["3", "4"], Some("c2"))),
            Ok(page(&["5", "6"], Some("c3"))),
        ]);
        let mut cursor =
            TimelineCursor::new(&source, "u1", options(3), CancellationToken::new());

        let items = drain(&mut cursor).await;
        assert_eq!(items.len(), 3);
        assert_eq!(cursor.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn stops_after_three_consecutive_empty_pages() {
        let source = ScriptedSource::new(vec![
            Ok(page(&["1"], Some("c1"))),
            Ok(page(&[], Some("c2"))),
            Ok(page(&[], Some("c3"))),
            Ok(page(&[], Some("c4"))),
            Ok(page(&["never"], Some("c5"))),
        ]);
        let mut cursor =
            TimelineCursor::new(&source, "u1", options(50), CancellationToken::new());

        let items = drain(&mut cursor).await;
        assert_eq!(items.len(), 1);
        assert_eq!(cursor.pages_fetched(), 4);
    }

    #[tokio::test]
    async fn empty_page_counter_resets_on_items() {
        let source = ScriptedSource::new(vec![
            Ok(page(&[], Some("c1"))),
            Ok(page(&[], Some("c2"))),
            Ok(page(&["1"], Some("c3"))),
            Ok(page(&[], Some("c4"))),
            Ok(page(&[], Some("c5"))),
            Ok(page(&["2"], None)),
        ]);
        let mut cursor =
            TimelineCursor::new(&source, "u1", options(50), CancellationToken::new());

        let items = drain(&mut cursor).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn stops_when_cursor_is_absent() {
        let source = ScriptedSource::new(vec![Ok(page(&["1", "2"], None))]);
        let mut cursor =
            TimelineCursor::new(&source, "u1", options(50), CancellationToken::new());

        let items = drain(&mut cursor).await;
        assert_eq!(items.len(), 2);
        assert_eq!(cursor.pages_fetched(), 1);
    }

    #[tokio::test]
    async fn page_error_is_terminal_but_preserves_earlier_pages() {
        let source = ScriptedSource::new(vec![
            Ok(page(&["1"], Some("c1"))),
            Err(AppError::Transport("boom".to_string())),
        ]);
        let mut cursor =
            TimelineCursor::new(&source, "u1", options(50), CancellationToken::new());

        let first = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        let error = cursor.next_page().await.unwrap_err();
        assert!(matches!(error, AppError::Transport(_)));

        // Terminal: subsequent calls yield no more pages.
        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_policy_reattempts_failing_page() {
        let source = ScriptedSource::new(vec![
            Err(AppError::Transport("flaky".to_string())),
            Ok(page(&["1"], None)),
        ]);
        let mut opts = options(50);
        opts.retry = RetryPolicy { max_attempts: 1 };
        let mut cursor = TimelineCursor::new(&source, "u1", opts, CancellationToken::new());

        let items = drain(&mut cursor).await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_pages() {
        let cancel = CancellationToken::new();
        let source = ScriptedSource::new(vec![
            Ok(page(&["1"], Some("c1"))),
            Ok(page(&["2"], Some("c2"))),
        ]);
        let mut cursor = TimelineCursor::new(&source, "u1", options(50), cancel.clone());

        let first = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        cancel.cancel();
        assert!(cursor.next_page().await.unwrap().is_none());
    }
}
