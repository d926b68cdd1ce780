//! SQLite database operations
//!
//! All database access goes through this module.
//! The pool is safe for concurrent use from independent account workers.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

fn decode_url_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn encode_url_list(urls: &[String]) -> String {
    serde_json::to_string(urls).unwrap_or_else(|_| "[]".to_string())
}

fn content_item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ContentItem, AppError> {
    Ok(ContentItem {
        id: row.try_get("id")?,
        canonical_url: row.try_get("canonical_url")?,
        source_handle: row.try_get("source_handle")?,
        text: row.try_get("text")?,
        images: decode_url_list(row.try_get::<String, _>("images")?.as_str()),
        videos: decode_url_list(row.try_get::<String, _>("videos")?.as_str()),
        published_at: row.try_get("published_at")?,
        is_retweet: row.try_get("is_retweet")?,
        is_quote: row.try_get("is_quote")?,
    })
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Followed-account registry
    // =========================================================================

    /// All accounts marked as followed, the controller's work list.
    pub async fn list_followed_accounts(&self) -> Result<Vec<FollowedAccount>, AppError> {
        let accounts = sqlx::query_as::<_, FollowedAccount>(
            "SELECT * FROM followed_accounts ORDER BY handle",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    /// Look up a followed account by handle.
    pub async fn get_followed_account(
        &self,
        handle: &str,
    ) -> Result<Option<FollowedAccount>, AppError> {
        let account = sqlx::query_as::<_, FollowedAccount>(
            "SELECT * FROM followed_accounts WHERE handle = ?",
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Mark a handle as followed, or update its filter overrides.
    ///
    /// Watermark fields are preserved on conflict.
    pub async fn upsert_followed_account(
        &self,
        handle: &str,
        include_retweets: bool,
        include_quotes: bool,
    ) -> Result<FollowedAccount, AppError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO followed_accounts (
                id, handle, numeric_id, include_retweets, include_quotes,
                last_content_at, last_attempt_at, created_at, updated_at
            ) VALUES (?, ?, NULL, ?, ?, NULL, NULL, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                include_retweets = excluded.include_retweets,
                include_quotes = excluded.include_quotes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(EntityId::new().0)
        .bind(handle)
        .bind(include_retweets)
        .bind(include_quotes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_followed_account(handle).await?.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "followed account vanished after upsert: {handle}"
            ))
        })
    }

    /// Record the numeric ID learned during identity resolution.
    pub async fn set_account_numeric_id(
        &self,
        handle: &str,
        numeric_id: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE followed_accounts SET numeric_id = ?, updated_at = ? WHERE handle = ?",
        )
        .bind(numeric_id)
        .bind(Utc::now())
        .bind(handle)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Watermarks
    // =========================================================================

    /// Record a sync attempt. Called on every run regardless of outcome.
    pub async fn touch_sync_attempt(
        &self,
        handle: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE followed_accounts SET last_attempt_at = ?, updated_at = ? WHERE handle = ?",
        )
        .bind(at)
        .bind(Utc::now())
        .bind(handle)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Advance the content watermark. Never moves it backward; the guard
    /// is in the statement so concurrent workers cannot regress it.
    ///
    /// # Returns
    /// `true` if the watermark moved forward.
    pub async fn advance_content_watermark(
        &self,
        handle: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE followed_accounts
            SET last_content_at = ?, updated_at = ?
            WHERE handle = ? AND (last_content_at IS NULL OR last_content_at < ?)
            "#,
        )
        .bind(at)
        .bind(Utc::now())
        .bind(handle)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Content items
    // =========================================================================

    /// Get a content item by its canonical URL.
    pub async fn get_content_by_url(
        &self,
        canonical_url: &str,
    ) -> Result<Option<ContentItem>, AppError> {
        let row = sqlx::query("SELECT * FROM content_items WHERE canonical_url = ?")
            .bind(canonical_url)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(content_item_from_row).transpose()
    }

    /// All content items for one source handle, newest first.
    pub async fn list_content_for_handle(
        &self,
        handle: &str,
    ) -> Result<Vec<ContentItem>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM content_items WHERE source_handle = ? ORDER BY published_at DESC",
        )
        .bind(handle)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(content_item_from_row).collect()
    }

    /// Idempotent batch upsert keyed by canonical URL.
    ///
    /// An existing row is only rewritten when its media lists changed;
    /// unchanged rows are left alone so `updated_at` stays an accurate
    /// audit trail.
    ///
    /// # Returns
    /// Number of rows inserted or updated.
    pub async fn upsert_content_batch(&self, items: &[ContentItem]) -> Result<usize, AppError> {
        let mut written = 0usize;

        for item in items {
            let existing = sqlx::query(
                "SELECT images, videos FROM content_items WHERE canonical_url = ?",
            )
            .bind(&item.canonical_url)
            .fetch_optional(&self.pool)
            .await?;

            match existing {
                None => {
                    let now = Utc::now();
                    sqlx::query(
                        r#"
                        INSERT INTO content_items (
                            id, canonical_url, source_handle, text, images, videos,
                            published_at, is_retweet, is_quote, created_at, updated_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(EntityId::new().0)
                    .bind(&item.canonical_url)
                    .bind(&item.source_handle)
                    .bind(&item.text)
                    .bind(encode_url_list(&item.images))
                    .bind(encode_url_list(&item.videos))
                    .bind(item.published_at)
                    .bind(item.is_retweet)
                    .bind(item.is_quote)
                    .bind(now)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                    written += 1;
                }
                Some(row) => {
                    let stored_images = decode_url_list(row.try_get::<String, _>("images")?.as_str());
                    let stored_videos = decode_url_list(row.try_get::<String, _>("videos")?.as_str());

                    if stored_images == item.images && stored_videos == item.videos {
                        tracing::debug!(
                            canonical_url = %item.canonical_url,
                            "Content item unchanged, skipping"
                        );
                        continue;
                    }

                    sqlx::query(
                        r#"
                        UPDATE content_items
                        SET images = ?, videos = ?, updated_at = ?
                        WHERE canonical_url = ?
                        "#,
                    )
                    .bind(encode_url_list(&item.images))
                    .bind(encode_url_list(&item.videos))
                    .bind(Utc::now())
                    .bind(&item.canonical_url)
                    .execute(&self.pool)
                    .await?;
                    written += 1;
                }
            }
        }

        Ok(written)
    }

    /// Total number of stored content items.
    pub async fn count_content_items(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM content_items")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Identity cache (durable tier)
    // =========================================================================

    /// Get the cached identity for a handle.
    pub async fn get_cached_identity(&self, handle: &str) -> Result<Option<CacheEntry>, AppError> {
        let entry =
            sqlx::query_as::<_, CacheEntry>("SELECT * FROM identity_cache WHERE handle = ?")
                .bind(handle)
                .fetch_optional(&self.pool)
                .await?;

        Ok(entry)
    }

    /// Write-through an identity resolution into the durable tier.
    pub async fn put_cached_identity(&self, entry: &CacheEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO identity_cache (handle, numeric_id, display_name, resolved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                numeric_id = excluded.numeric_id,
                display_name = excluded.display_name,
                resolved_at = excluded.resolved_at
            "#,
        )
        .bind(&entry.handle)
        .bind(&entry.numeric_id)
        .bind(&entry.display_name)
        .bind(entry.resolved_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
