//! Multi-tier identity lookup
//!
//! Resolves a handle to its upstream numeric ID through three tiers:
//! the durable store, a per-handle JSON file, and finally the network.
//! A hit in an outer tier is written back through the tiers above it so
//! subsequent lookups stay local. Entries never expire; a forced
//! refresh is the only invalidation mechanism.

use std::path::PathBuf;
use std::sync::Arc;

use crate::data::{CacheEntry, Database};
use crate::error::AppError;
use crate::storage::write_atomic;

/// Source of authoritative identity records.
///
/// The production implementation is the platform API client; tests
/// substitute scripted fakes.
#[allow(async_fn_in_trait)]
pub trait IdentityResolver {
    async fn resolve_identity(&self, handle: &str) -> Result<CacheEntry, AppError>;
}

/// Tiered identity cache in front of an [`IdentityResolver`].
pub struct MultiTierLookup<R> {
    db: Arc<Database>,
    cache_dir: PathBuf,
    resolver: R,
}

impl<R: IdentityResolver> MultiTierLookup<R> {
    pub fn new(db: Arc<Database>, cache_dir: impl Into<PathBuf>, resolver: R) -> Self {
        Self {
            db,
            cache_dir: cache_dir.into(),
            resolver,
        }
    }

    fn cache_file(&self, handle: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", handle))
    }

    /// Resolve a handle, consulting tiers in order.
    ///
    /// With `force_refresh` the cache tiers are skipped for reading but
    /// still refreshed from the network result. Cache write-back
    /// failures are logged and swallowed; only a network resolution
    /// failure with no usable tier surfaces as an error.
    pub async fn resolve(&self, handle: &str, force_refresh: bool) -> Result<CacheEntry, AppError> {
        if !force_refresh {
            if let Some(entry) = self.db.get_cached_identity(handle).await? {
                tracing::debug!(handle, numeric_id = %entry.numeric_id, "Identity cache hit (store)");
                return Ok(entry);
            }

            if let Some(entry) = self.read_file_tier(handle).await {
                tracing::debug!(handle, numeric_id = %entry.numeric_id, "Identity cache hit (file)");
                self.write_store_tier(&entry).await;
                return Ok(entry);
            }
        }

        let entry = self.resolver.resolve_identity(handle).await?;
        tracing::info!(handle, numeric_id = %entry.numeric_id, "Identity resolved via network");

        self.write_store_tier(&entry).await;
        self.write_file_tier(&entry).await;
        Ok(entry)
    }

    async fn read_file_tier(&self, handle: &str) -> Option<CacheEntry> {
        let path = self.cache_file(handle);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(handle, path = %path.display(), %e, "Identity cache file unreadable");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(handle, path = %path.display(), %e, "Identity cache file corrupt, ignoring");
                None
            }
        }
    }

    async fn write_store_tier(&self, entry: &CacheEntry) {
        if let Err(e) = self.db.put_cached_identity(entry).await {
            tracing::warn!(handle = %entry.handle, %e, "Identity cache store write failed");
        }
    }

    async fn write_file_tier(&self, entry: &CacheEntry) {
        if let Err(e) = self.try_write_file_tier(entry).await {
            tracing::warn!(
                handle = %entry.handle,
                path = %self.cache_file(&entry.handle).display(),
                %e,
                "Identity cache file write failed"
            );
        }
    }

    async fn try_write_file_tier(&self, entry: &CacheEntry) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let body = serde_json::to_vec_pretty(entry).map_err(std::io::Error::other)?;
        write_atomic(&self.cache_file(&entry.handle), &body).await
    }
}
