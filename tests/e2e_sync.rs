//! End-to-end sync controller tests
//!
//! Drive full account runs against a real SQLite store with scripted
//! timeline and identity fakes.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use magpie::data::Database;
use magpie::data::CacheEntry;
use magpie::error::AppError;
use magpie::feed::{FetchOptions, RawItem, RetryPolicy, TimelinePage, TimelineSource};
use magpie::lookup::{IdentityResolver, MultiTierLookup};
use magpie::normalize::NormalizerOptions;
use magpie::storage::JsonBackup;
use magpie::sync::{RunState, SyncController, SyncOptions};
use magpie::config::TimestampPolicy;

/// Timestamp in the platform's native format, at second precision.
fn published(ts: DateTime<Utc>) -> String {
    ts.format("%a %b %d %H:%M:%S %z %Y").to_string()
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

fn raw_item(handle: &str, id: &str, text: &str, ts: DateTime<Utc>) -> RawItem {
    serde_json::from_value(json!({
        "rest_id": id,
        "legacy": {
            "id_str": id,
            "full_text": text,
            "created_at": published(ts),
            "is_quote_status": false
        },
        "core": { "user_results": { "result": {
            "legacy": { "screen_name": handle, "name": handle }
        }}}
    }))
    .unwrap()
}

fn page(items: Vec<RawItem>, cursor: Option<&str>) -> TimelinePage {
    TimelinePage {
        items,
        next_cursor: cursor.map(str::to_string),
    }
}

/// Scripted timeline; pops one scripted page per request.
struct FakeTimeline {
    pages: Mutex<Vec<Result<TimelinePage, AppError>>>,
    calls: AtomicU32,
}

impl FakeTimeline {
    fn new(pages: Vec<Result<TimelinePage, AppError>>) -> Self {
        Self {
            pages: Mutex::new(pages),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TimelineSource for &FakeTimeline {
    async fn fetch_page(
        &self,
        _user_id: &str,
        _cursor: Option<&str>,
    ) -> Result<TimelinePage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            return Ok(TimelinePage::default());
        }
        pages.remove(0)
    }
}

/// Resolver that knows every handle except the ones listed as unknown.
struct FakeResolver {
    unknown: Vec<String>,
}

impl FakeResolver {
    fn new() -> Self {
        Self {
            unknown: Vec::new(),
        }
    }

    fn unknown(handles: &[&str]) -> Self {
        Self {
            unknown: handles.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl IdentityResolver for FakeResolver {
    async fn resolve_identity(&self, handle: &str) -> Result<CacheEntry, AppError> {
        if self.unknown.iter().any(|h| h == handle) {
            return Err(AppError::Resolution(format!(
                "no user record for handle {}",
                handle
            )));
        }
        Ok(CacheEntry {
            handle: handle.to_string(),
            numeric_id: format!("id-{}", handle),
            display_name: None,
            resolved_at: Utc::now(),
        })
    }
}

struct Harness {
    db: Arc<Database>,
    backup_path: std::path::PathBuf,
    _temp_dir: TempDir,
    cache_dir: std::path::PathBuf,
}

impl Harness {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let backup_path = temp_dir.path().join("backup.json");
        let cache_dir = temp_dir.path().join("cache");
        Self {
            db,
            backup_path,
            cache_dir,
            _temp_dir: temp_dir,
        }
    }

    fn controller<'a>(
        &self,
        source: &'a FakeTimeline,
        resolver: FakeResolver,
        limit: usize,
    ) -> SyncController<&'a FakeTimeline, FakeResolver> {
        let lookup = MultiTierLookup::new(self.db.clone(), self.cache_dir.clone(), resolver);
        let options = SyncOptions {
            fetch: FetchOptions {
                limit,
                page_delay: Duration::ZERO,
                empty_page_limit: 3,
                retry: RetryPolicy::default(),
            },
            normalizer: NormalizerOptions {
                platform_base: "https://x.com".to_string(),
                timestamp_policy: TimestampPolicy::Reject,
            },
            force_refresh: false,
        };
        SyncController::new(
            self.db.clone(),
            source,
            lookup,
            Some(JsonBackup::new(self.backup_path.clone())),
            options,
            CancellationToken::new(),
        )
    }
}

#[tokio::test]
async fn first_sync_ingests_everything_and_sets_watermark() {
    let harness = Harness::new().await;

    let source = FakeTimeline::new(vec![
        Ok(page(
            vec![
                raw_item("alice", "3", "third", at(12, 0)),
                raw_item("alice", "2", "second", at(11, 0)),
            ],
            Some("c1"),
        )),
        Ok(page(vec![raw_item("alice", "1", "first", at(10, 0))], None)),
    ]);
    let controller = harness.controller(&source, FakeResolver::new(), 50);

    let report = controller.run_account("alice").await;
    assert!(report.success, "report: {:?}", report);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.items_fetched, 3);
    assert_eq!(report.items_persisted, 3);

    // Registry row was auto-created and fully stamped.
    let account = harness
        .db
        .get_followed_account("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.numeric_id.as_deref(), Some("id-alice"));
    assert_eq!(account.watermark.last_content_at, Some(at(12, 0)));
    assert!(account.watermark.last_attempt_at.is_some());

    // Items landed in the store and the backup mirror.
    assert_eq!(harness.db.count_content_items().await.unwrap(), 3);
    let backup = JsonBackup::new(&harness.backup_path);
    assert_eq!(backup.load().await.unwrap().len(), 3);
}

#[tokio::test]
async fn incremental_sync_stops_paging_at_watermark() {
    let harness = Harness::new().await;

    harness
        .db
        .upsert_followed_account("alice", false, false)
        .await
        .unwrap();
    harness
        .db
        .advance_content_watermark("alice", at(11, 0))
        .await
        .unwrap();

    // First page already crosses the watermark; the second page must
    // never be requested.
    let source = FakeTimeline::new(vec![
        Ok(page(
            vec![
                raw_item("alice", "4", "new", at(13, 0)),
                raw_item("alice", "3", "known", at(11, 0)),
                raw_item("alice", "2", "older", at(10, 0)),
            ],
            Some("c1"),
        )),
        Ok(page(vec![raw_item("alice", "1", "oldest", at(9, 0))], None)),
    ]);
    let controller = harness.controller(&source, FakeResolver::new(), 50);

    let report = controller.run_account("alice").await;
    assert!(report.success);
    assert_eq!(report.items_persisted, 1);
    assert_eq!(source.calls(), 1);

    let account = harness
        .db
        .get_followed_account("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.watermark.last_content_at, Some(at(13, 0)));
}

#[tokio::test]
async fn rerun_with_no_new_content_is_a_clean_noop() {
    let harness = Harness::new().await;

    let pages = || {
        vec![Ok(page(
            vec![
                raw_item("alice", "2", "second", at(11, 0)),
                raw_item("alice", "1", "first", at(10, 0)),
            ],
            None,
        ))]
    };

    let source = FakeTimeline::new(pages());
    let controller = harness.controller(&source, FakeResolver::new(), 50);
    let report = controller.run_account("alice").await;
    assert_eq!(report.items_persisted, 2);

    // Same timeline again: watermark stops evaluation, nothing written.
    let source = FakeTimeline::new(pages());
    let controller = harness.controller(&source, FakeResolver::new(), 50);
    let report = controller.run_account("alice").await;
    assert!(report.success);
    assert_eq!(report.items_persisted, 0);
    assert_eq!(harness.db.count_content_items().await.unwrap(), 2);
}

#[tokio::test]
async fn item_limit_truncates_the_run() {
    let harness = Harness::new().await;

    let source = FakeTimeline::new(vec![Ok(page(
        vec![
            raw_item("bob", "5", "e", at(14, 0)),
            raw_item("bob", "4", "d", at(13, 0)),
            raw_item("bob", "3", "c", at(12, 0)),
            raw_item("bob", "2", "b", at(11, 0)),
            raw_item("bob", "1", "a", at(10, 0)),
        ],
        Some("c1"),
    ))]);
    let controller = harness.controller(&source, FakeResolver::new(), 3);

    let report = controller.run_account("bob").await;
    assert!(report.success);
    assert_eq!(report.items_fetched, 3);
    assert_eq!(report.items_persisted, 3);
    assert_eq!(harness.db.count_content_items().await.unwrap(), 3);
}

#[tokio::test]
async fn account_filters_drop_retweets() {
    let harness = Harness::new().await;

    harness
        .db
        .upsert_followed_account("alice", false, false)
        .await
        .unwrap();

    let source = FakeTimeline::new(vec![Ok(page(
        vec![
            raw_item("alice", "2", "RT @bob: reposted", at(11, 0)),
            raw_item("alice", "1", "own post", at(10, 0)),
        ],
        None,
    ))]);
    let controller = harness.controller(&source, FakeResolver::new(), 50);

    let report = controller.run_account("alice").await;
    assert!(report.success);
    assert_eq!(report.items_fetched, 2);
    assert_eq!(report.items_persisted, 1);

    // The watermark tracks accepted items only.
    let account = harness
        .db
        .get_followed_account("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.watermark.last_content_at, Some(at(10, 0)));
}

#[tokio::test]
async fn fetch_error_preserves_partial_progress() {
    let harness = Harness::new().await;

    let source = FakeTimeline::new(vec![
        Ok(page(vec![raw_item("alice", "2", "kept", at(11, 0))], Some("c1"))),
        Err(AppError::Transport("upstream 500".to_string())),
    ]);
    let controller = harness.controller(&source, FakeResolver::new(), 50);

    let report = controller.run_account("alice").await;
    assert!(!report.success);
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.items_persisted, 1);

    // The page that made it through is durable and the watermark moved,
    // so the next run does not refetch it.
    assert_eq!(harness.db.count_content_items().await.unwrap(), 1);
    let account = harness
        .db
        .get_followed_account("alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.watermark.last_content_at, Some(at(11, 0)));
    assert!(account.watermark.last_attempt_at.is_some());
}

#[tokio::test]
async fn resolution_failure_leaves_account_untouched() {
    let harness = Harness::new().await;

    let source = FakeTimeline::new(vec![]);
    let controller = harness.controller(&source, FakeResolver::unknown(&["ghost"]), 50);

    let report = controller.run_account("ghost").await;
    assert!(!report.success);
    assert_eq!(report.items_fetched, 0);
    assert_eq!(source.calls(), 0);

    // No attempt is recorded: nothing was tried upstream.
    let account = harness
        .db
        .get_followed_account("ghost")
        .await
        .unwrap()
        .unwrap();
    assert!(account.watermark.last_attempt_at.is_none());
    assert!(account.watermark.last_content_at.is_none());
}

#[tokio::test]
async fn failed_account_does_not_block_the_rest_of_the_run() {
    let harness = Harness::new().await;

    let source = FakeTimeline::new(vec![
        // ghost never fetches; both pages belong to alice and bob.
        Ok(page(vec![raw_item("alice", "1", "a", at(10, 0))], None)),
        Ok(page(vec![raw_item("bob", "2", "b", at(11, 0))], None)),
    ]);
    let controller = harness.controller(&source, FakeResolver::unknown(&["ghost"]), 50);

    let handles = vec![
        "alice".to_string(),
        "ghost".to_string(),
        "bob".to_string(),
    ];
    let reports = controller.run_all(&handles).await;

    assert_eq!(reports.len(), 3);
    assert!(reports[0].success);
    assert!(!reports[1].success);
    assert!(reports[2].success);
    assert_eq!(harness.db.count_content_items().await.unwrap(), 2);
}

#[tokio::test]
async fn backup_mirror_merges_across_runs() {
    let harness = Harness::new().await;

    let source = FakeTimeline::new(vec![Ok(page(
        vec![raw_item("alice", "1", "first", at(10, 0))],
        None,
    ))]);
    let controller = harness.controller(&source, FakeResolver::new(), 50);
    controller.run_account("alice").await;

    let source = FakeTimeline::new(vec![Ok(page(
        vec![
            raw_item("alice", "2", "second", at(11, 0)),
            raw_item("alice", "1", "first", at(10, 0)),
        ],
        None,
    ))]);
    let controller = harness.controller(&source, FakeResolver::new(), 50);
    controller.run_account("alice").await;

    let backup = JsonBackup::new(&harness.backup_path);
    let entries = backup.load().await.unwrap();
    assert_eq!(entries.len(), 2);
}
