//! Platform API calls
//!
//! GraphQL endpoints of the platform's private web API. The response
//! shapes are an opaque contract; decoding tolerates missing fields and
//! extracts only what the engine needs.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::session::Session;
use crate::data::CacheEntry;
use crate::error::AppError;
use crate::feed::{TimelinePage, TimelineSource, decode_timeline_page};
use crate::lookup::IdentityResolver;

const USER_BY_SCREEN_NAME_ENDPOINT: &str = "/i/api/graphql/G3KGOASz96M-Qu0nwmGXNg/UserByScreenName";
const USER_TIMELINE_ENDPOINT: &str = "/i/api/graphql/V7H0Ap3_Hh2FyS75OCDO3Q/UserTweets";

/// Authenticated client for the platform's private API.
#[derive(Clone)]
pub struct PlatformApi {
    http_client: Arc<reqwest::Client>,
    session: Session,
    base: String,
    page_size: u32,
}

impl PlatformApi {
    pub fn new(
        http_client: Arc<reqwest::Client>,
        session: Session,
        base: &str,
        page_size: u32,
    ) -> Self {
        Self {
            http_client,
            session,
            base: base.trim_end_matches('/').to_string(),
            page_size,
        }
    }

    async fn graphql_get(
        &self,
        endpoint: &str,
        variables: serde_json::Value,
        features: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let headers = self.session.api_headers()?;
        let url = format!("{}{}", self.base, endpoint);

        let response = self
            .http_client
            .get(&url)
            .headers(headers)
            .query(&[
                ("variables", variables.to_string()),
                ("features", features.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("request to {} failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(AppError::Transport(format!(
                "{} returned {}: {}",
                endpoint, status, snippet
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AppError::Transport(format!("{} returned invalid JSON: {}", endpoint, e)))
    }

    /// Resolve a handle to its identity record over the network.
    pub async fn user_by_screen_name(&self, screen_name: &str) -> Result<CacheEntry, AppError> {
        tracing::info!(handle = %screen_name, "Resolving identity via API");

        let variables = json!({
            "screen_name": screen_name,
            "withSafetyModeUserFields": true,
        });
        let features = json!({
            "hidden_profile_likes_enabled": true,
            "hidden_profile_subscriptions_enabled": true,
            "responsive_web_graphql_exclude_directive_enabled": true,
            "verified_phone_label_enabled": false,
            "subscriptions_verification_info_is_identity_verified_enabled": true,
            "subscriptions_verification_info_verified_since_enabled": true,
            "highlights_tweets_tab_ui_enabled": true,
            "responsive_web_twitter_article_notes_tab_enabled": true,
            "creator_subscriptions_tweet_preview_api_enabled": true,
            "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
            "responsive_web_graphql_timeline_navigation_enabled": true,
        });

        let body = self
            .graphql_get(USER_BY_SCREEN_NAME_ENDPOINT, variables, features)
            .await?;

        let result = body
            .pointer("/data/user/result")
            .filter(|r| r.get("__typename").and_then(|t| t.as_str()) == Some("User"))
            .ok_or_else(|| {
                AppError::Resolution(format!("no user record for handle {}", screen_name))
            })?;

        let numeric_id = result
            .get("rest_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::Resolution(format!("user record for {} has no numeric ID", screen_name))
            })?;

        let handle = result
            .pointer("/legacy/screen_name")
            .and_then(|v| v.as_str())
            .unwrap_or(screen_name);
        let display_name = result
            .pointer("/legacy/name")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(CacheEntry {
            handle: handle.to_string(),
            numeric_id: numeric_id.to_string(),
            display_name,
            resolved_at: Utc::now(),
        })
    }

    /// Fetch one timeline page for a numeric user ID.
    pub async fn user_timeline_page(
        &self,
        user_id: &str,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, AppError> {
        let mut variables = json!({
            "userId": user_id,
            "count": self.page_size,
            "includePromotedContent": true,
            "withQuickPromoteEligibilityTweetFields": true,
            "withVoice": true,
            "withV2Timeline": true,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = json!(cursor);
        }

        let features = json!({
            "responsive_web_graphql_exclude_directive_enabled": true,
            "verified_phone_label_enabled": false,
            "creator_subscriptions_tweet_preview_api_enabled": true,
            "responsive_web_twitter_article_tweet_consumption_enabled": true,
            "tweet_awards_web_tipping_enabled": false,
            "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
            "c9s_tweet_anatomy_moderator_badge_enabled": true,
            "tweetypie_unmention_optimization_enabled": true,
            "responsive_web_edit_tweet_api_enabled": true,
            "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
            "view_counts_everywhere_api_enabled": true,
            "longform_notetweets_consumption_enabled": true,
            "responsive_web_twitter_article_data_v2_enabled": true,
            "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
            "rweb_video_timestamps_enabled": true,
            "longform_notetweets_rich_text_read_enabled": true,
            "longform_notetweets_inline_media_enabled": true,
            "responsive_web_graphql_timeline_navigation_enabled": true,
            "responsive_web_enhance_cards_enabled": false,
            "freedom_of_speech_not_reach_fetch_enabled": true,
            "articles_preview_enabled": true,
            "communities_web_enable_tweet_community_results_fetch": true,
            "standardized_nudges_misinfo": true,
            "creator_subscriptions_quote_tweet_preview_enabled": true,
            "rweb_tipjar_consumption_enabled": true,
        });

        let body = self
            .graphql_get(USER_TIMELINE_ENDPOINT, variables, features)
            .await?;

        Ok(decode_timeline_page(&body))
    }
}

impl TimelineSource for PlatformApi {
    async fn fetch_page(
        &self,
        user_id: &str,
        cursor: Option<&str>,
    ) -> Result<TimelinePage, AppError> {
        self.user_timeline_page(user_id, cursor).await
    }
}

impl IdentityResolver for PlatformApi {
    async fn resolve_identity(&self, handle: &str) -> Result<CacheEntry, AppError> {
        self.user_by_screen_name(handle).await
    }
}
