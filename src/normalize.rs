//! Content normalization
//!
//! Converts a raw feed item into a canonical `ContentItem`, applying
//! the account's inclusion/exclusion filters. Rejections are evaluated
//! in order, fail fast: structural validation, retweet filter, quote
//! filter. A `None` return is not an error; the sync loop just skips
//! the item.

use chrono::{DateTime, FixedOffset, Utc};

use crate::config::TimestampPolicy;
use crate::data::{ContentItem, FilterOptions};
use crate::feed::{RawItem, RawMedia};

/// The platform's native timestamp format, e.g.
/// "Wed Oct 10 20:19:24 +0000 2018".
const NATIVE_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Text prefix marking an item as a retweet.
const RETWEET_MARKER: &str = "RT @";

/// Fixed reference timezone (UTC+8) for operator-facing timestamps.
///
/// Watermark comparisons are instant-based, so storage stays in UTC;
/// this offset only affects how timestamps are rendered.
const REFERENCE_TZ_SECONDS: i32 = 8 * 3600;

/// Normalizer parameters shared across one run.
#[derive(Debug, Clone)]
pub struct NormalizerOptions {
    /// Platform base URL used to build canonical URLs
    pub platform_base: String,
    pub timestamp_policy: TimestampPolicy,
}

/// Render a stored timestamp in the reference timezone.
pub fn to_reference_timezone(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(REFERENCE_TZ_SECONDS) {
        Some(offset) => at.with_timezone(&offset),
        None => at.fixed_offset(),
    }
}

fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, NATIVE_TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn extract_images(media: &[RawMedia]) -> Vec<String> {
    media
        .iter()
        .filter(|m| m.media_type.as_deref() == Some("photo"))
        .filter_map(|m| m.media_url_https.clone())
        .collect()
}

/// Pick the highest-bitrate MP4 variant per attachment.
///
/// Ties are broken by first-seen order, so the comparison is strictly
/// greater-than rather than `max_by_key` (which keeps the last max).
fn best_video_url(media: &RawMedia) -> Option<String> {
    let variants = &media.video_info.as_ref()?.variants;

    let mut best: Option<(u64, &str)> = None;
    for variant in variants {
        if variant.content_type.as_deref() != Some("video/mp4") {
            continue;
        }
        let Some(url) = variant.url.as_deref() else {
            continue;
        };
        let bitrate = variant.bitrate.unwrap_or(0);
        if best.is_none_or(|(b, _)| bitrate > b) {
            best = Some((bitrate, url));
        }
    }

    best.map(|(_, url)| url.to_string())
}

fn extract_videos(media: &[RawMedia]) -> Vec<String> {
    media
        .iter()
        .filter(|m| {
            matches!(
                m.media_type.as_deref(),
                Some("video") | Some("animated_gif")
            )
        })
        .filter_map(best_video_url)
        .collect()
}

/// Normalize one raw item.
///
/// Returns `None` when the item is malformed or excluded by the
/// account's filters. Retweet media handling: when the account is
/// configured to process retweets, media is taken from the
/// retweeted-from item so retweeted photos and videos are not dropped.
pub fn normalize(
    raw: &RawItem,
    filters: &FilterOptions,
    options: &NormalizerOptions,
) -> Option<ContentItem> {
    let Some(handle) = raw.author_handle() else {
        tracing::warn!("Malformed item: missing author handle, skipping");
        return None;
    };
    let Some(text) = raw.text() else {
        tracing::warn!(handle, "Malformed item: missing text body, skipping");
        return None;
    };

    let is_retweet = text.trim_start().starts_with(RETWEET_MARKER);
    if !filters.include_retweets && is_retweet {
        tracing::debug!(handle, "Filtered: retweet");
        return None;
    }

    let is_quote = raw.is_quote();
    if !filters.include_quotes && is_quote {
        tracing::debug!(handle, "Filtered: quote");
        return None;
    }

    let Some(item_id) = raw.item_id() else {
        tracing::warn!(handle, "Malformed item: no item ID, skipping");
        return None;
    };

    let published_at = match raw.created_at_raw().and_then(parse_published_at) {
        Some(at) => at,
        None => match options.timestamp_policy {
            TimestampPolicy::Reject => {
                tracing::warn!(
                    handle,
                    raw = ?raw.created_at_raw(),
                    "Timestamp parse failed, rejecting item"
                );
                return None;
            }
            TimestampPolicy::SubstituteNow => {
                tracing::warn!(
                    handle,
                    raw = ?raw.created_at_raw(),
                    "Timestamp parse failed, substituting current time"
                );
                Utc::now()
            }
        },
    };

    // Retweet wrappers usually carry no media of their own; pull from
    // the retweeted-from item when retweets are being processed.
    let media = if is_retweet && filters.include_retweets {
        raw.retweeted_item()
            .map(|original| original.media())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| raw.media())
    } else {
        raw.media()
    };

    let canonical_url = format!(
        "{}/{}/status/{}",
        options.platform_base.trim_end_matches('/'),
        handle,
        item_id
    );

    Some(ContentItem {
        id: String::new(),
        source_handle: handle.to_string(),
        canonical_url,
        text: text.to_string(),
        images: extract_images(media),
        videos: extract_videos(media),
        published_at,
        is_retweet,
        is_quote,
    })
}
