//! Data models
//!
//! Rust structs representing database entities and cache items.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Followed accounts and watermarks
// =============================================================================

/// Per-account sync watermark.
///
/// `last_content_at` is the published timestamp of the newest item ever
/// accepted for the account; it only moves forward. `last_attempt_at`
/// records every run regardless of outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Watermark {
    pub last_content_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// A followed upstream account.
///
/// Rows are created when an operator marks a handle as followed;
/// the sync controller only reads them and updates the watermark.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowedAccount {
    pub id: String,
    /// Stable handle (screen name, without the leading '@')
    pub handle: String,
    /// Upstream numeric ID, filled in on first resolution
    pub numeric_id: Option<String>,
    pub include_retweets: bool,
    pub include_quotes: bool,
    #[sqlx(flatten)]
    pub watermark: Watermark,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FollowedAccount {
    /// Inclusion/exclusion filters for the normalizer.
    pub fn filters(&self) -> FilterOptions {
        FilterOptions {
            include_retweets: self.include_retweets,
            include_quotes: self.include_quotes,
        }
    }
}

/// Per-account normalization filters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub include_retweets: bool,
    pub include_quotes: bool,
}

// =============================================================================
// Content items
// =============================================================================

/// Canonical content record, created once per unique canonical URL.
///
/// Immutable after creation except for the media lists, which may be
/// refreshed by a later upsert when the upstream attachment set changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(skip, default)]
    pub id: String,
    /// Handle of the account the item was fetched from
    pub source_handle: String,
    /// Unique business key: `{base}/{handle}/status/{item_id}`
    pub canonical_url: String,
    pub text: String,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub is_retweet: bool,
    pub is_quote: bool,
}

// =============================================================================
// Identity cache
// =============================================================================

/// Memo of an identity resolution.
///
/// Stored in the durable store and mirrored to a per-handle JSON file;
/// lives until explicitly refreshed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheEntry {
    pub handle: String,
    pub numeric_id: String,
    pub display_name: Option<String>,
    pub resolved_at: DateTime<Utc>,
}
