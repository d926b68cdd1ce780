//! Typed, tolerant decoder for raw feed payloads
//!
//! The upstream API is an opaque paginated JSON contract; this module
//! maps the known fields into `RawItem` and treats unknown or missing
//! fields as explicit `Option`s instead of silently substituting
//! defaults. Raw items are ephemeral and never persisted.

use serde::Deserialize;

/// One raw item as returned by the upstream feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub rest_id: Option<String>,
    #[serde(default)]
    pub legacy: Option<RawLegacy>,
    #[serde(default)]
    pub core: Option<RawCore>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLegacy {
    #[serde(default)]
    pub id_str: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_quote_status: bool,
    #[serde(default)]
    pub extended_entities: Option<RawEntities>,
    #[serde(default)]
    pub entities: Option<RawEntities>,
    #[serde(default)]
    pub retweeted_status_result: Option<RawStatusResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntities {
    #[serde(default)]
    pub media: Vec<RawMedia>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMedia {
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media_url_https: Option<String>,
    #[serde(default)]
    pub video_info: Option<RawVideoInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    #[serde(default)]
    pub variants: Vec<RawVideoVariant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoVariant {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Wrapper around an embedded item (the retweeted-from original).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStatusResult {
    #[serde(default)]
    pub result: Option<Box<RawItem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCore {
    #[serde(default)]
    pub user_results: Option<RawUserResults>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUserResults {
    #[serde(default)]
    pub result: Option<RawUserResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUserResult {
    #[serde(default)]
    pub rest_id: Option<String>,
    #[serde(default)]
    pub legacy: Option<RawUserLegacy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUserLegacy {
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RawItem {
    /// Handle of the item's author, if present.
    pub fn author_handle(&self) -> Option<&str> {
        self.core
            .as_ref()?
            .user_results
            .as_ref()?
            .result
            .as_ref()?
            .legacy
            .as_ref()?
            .screen_name
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    /// Display name of the item's author, if present.
    pub fn author_name(&self) -> Option<&str> {
        self.core
            .as_ref()?
            .user_results
            .as_ref()?
            .result
            .as_ref()?
            .legacy
            .as_ref()?
            .name
            .as_deref()
    }

    /// Text body, if present.
    pub fn text(&self) -> Option<&str> {
        self.legacy.as_ref()?.full_text.as_deref()
    }

    /// Item ID: the legacy `id_str`, falling back to `rest_id`.
    pub fn item_id(&self) -> Option<&str> {
        let legacy_id = self
            .legacy
            .as_ref()
            .and_then(|l| l.id_str.as_deref())
            .filter(|s| !s.is_empty());
        legacy_id.or(self.rest_id.as_deref().filter(|s| !s.is_empty()))
    }

    /// Raw published timestamp in the platform's native format.
    pub fn created_at_raw(&self) -> Option<&str> {
        self.legacy.as_ref()?.created_at.as_deref()
    }

    /// Whether the item is flagged as a quote of another item.
    pub fn is_quote(&self) -> bool {
        self.legacy.as_ref().is_some_and(|l| l.is_quote_status)
    }

    /// Media attachments, preferring the extended entity set.
    pub fn media(&self) -> &[RawMedia] {
        let Some(legacy) = self.legacy.as_ref() else {
            return &[];
        };
        if let Some(extended) = legacy.extended_entities.as_ref() {
            if !extended.media.is_empty() {
                return &extended.media;
            }
        }
        legacy
            .entities
            .as_ref()
            .map(|e| e.media.as_slice())
            .unwrap_or(&[])
    }

    /// The retweeted-from item when this item wraps a retweet.
    pub fn retweeted_item(&self) -> Option<&RawItem> {
        self.legacy
            .as_ref()?
            .retweeted_status_result
            .as_ref()?
            .result
            .as_deref()
    }
}

/// One page of the upstream feed.
#[derive(Debug, Default)]
pub struct TimelinePage {
    pub items: Vec<RawItem>,
    /// Opaque continuation token; `None` means no further pages.
    pub next_cursor: Option<String>,
}

/// Decode a timeline GraphQL response into a page.
///
/// Walks the timeline instructions: `tweet-` entries become items,
/// the `cursor-bottom-` entry supplies the next cursor. Anything the
/// decoder does not recognize is skipped.
pub fn decode_timeline_page(body: &serde_json::Value) -> TimelinePage {
    let mut page = TimelinePage::default();

    let instructions = body
        .pointer("/data/user/result/timeline_v2/timeline/instructions")
        .and_then(|v| v.as_array());
    let Some(instructions) = instructions else {
        return page;
    };

    for instruction in instructions {
        if instruction.get("type").and_then(|t| t.as_str()) != Some("TimelineAddEntries") {
            continue;
        }
        let Some(entries) = instruction.get("entries").and_then(|e| e.as_array()) else {
            continue;
        };

        for entry in entries {
            let entry_id = entry.get("entryId").and_then(|v| v.as_str()).unwrap_or("");

            if entry_id.starts_with("tweet-") {
                let result = entry.pointer("/content/itemContent/tweet_results/result");
                let Some(result) = result else { continue };
                if result.get("__typename").and_then(|t| t.as_str()) != Some("Tweet") {
                    continue;
                }
                match serde_json::from_value::<RawItem>(result.clone()) {
                    Ok(item) => page.items.push(item),
                    Err(error) => {
                        tracing::warn!(%error, entry_id, "Failed to decode feed item, skipping");
                    }
                }
            } else if entry_id.starts_with("cursor-bottom-") {
                page.next_cursor = entry
                    .pointer("/content/value")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
            }
        }
    }

    page
}
