//! Authenticated session construction
//!
//! Turns a raw session credential into an immutable, reusable request
//! context (bearer token, cookie header, anti-forgery header). The flow
//! mirrors what the platform's own web client does on page load: fetch a
//! known authenticated endpoint, fold the forwarded cookies into the
//! credential cookie, and lift the anti-forgery token out of the `ct0`
//! cookie.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};

use crate::config::PlatformConfig;
use crate::error::AppError;

/// Cookie attribute names that must not be treated as cookies themselves.
const COOKIE_METADATA_ATTRIBUTES: &[&str] = &[
    "path", "domain", "expires", "max-age", "secure", "httponly", "samesite",
];

/// Name of the cookie carrying the anti-forgery token.
const CSRF_COOKIE_NAME: &str = "ct0";

/// Immutable authenticated request context.
///
/// Holds the cookie header and anti-forgery token captured during
/// bootstrap. Re-authentication requires constructing a new session.
#[derive(Debug, Clone)]
pub struct Session {
    origin: String,
    bearer_token: String,
    user_agent: String,
    cookie_header: String,
    csrf_token: Option<String>,
}

/// Parse one `set-cookie` header value into a (name, value) pair.
///
/// Only the first `;`-delimited segment is a cookie; the rest is
/// metadata. Returns `None` for metadata-only or malformed values.
fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let main_part = raw.split(';').next()?.trim();
    let (name, value) = main_part.split_once('=')?;
    let name = name.trim();
    let value = value.trim();

    if name.is_empty() {
        return None;
    }

    let lowered = name.to_ascii_lowercase();
    if COOKIE_METADATA_ATTRIBUTES
        .iter()
        .any(|attr| lowered.starts_with(attr))
    {
        return None;
    }

    Some((name.to_string(), value.to_string()))
}

/// Fold cookies into an ordered name/value list, last write wins.
fn insert_cookie(cookies: &mut Vec<(String, String)>, name: String, value: String) {
    if let Some(existing) = cookies.iter_mut().find(|(n, _)| *n == name) {
        existing.1 = value;
    } else {
        cookies.push((name, value));
    }
}

fn build_cookie_header(cookies: &[(String, String)]) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|_| AppError::Auth(format!("{} contains invalid header characters", what)))
}

impl Session {
    /// Bootstrap an authenticated session from a raw credential.
    ///
    /// Issues a request to `{base}/manifest.json` carrying the credential
    /// cookie, merges the forwarded cookies, and extracts the anti-forgery
    /// token. A missing token is a soft failure: the session is returned,
    /// but any call that requires the token fails with an auth error.
    ///
    /// # Errors
    /// Returns `AppError::Auth` if the bootstrap request does not succeed.
    pub async fn initialize(
        http_client: &reqwest::Client,
        platform: &PlatformConfig,
        raw_credential: &str,
    ) -> Result<Self, AppError> {
        let bootstrap_url = format!("{}/manifest.json", platform.base());

        tracing::info!(url = %bootstrap_url, "Initializing session...");

        let response = http_client
            .get(&bootstrap_url)
            .header("cookie", format!("auth_token={}", raw_credential))
            .header("user-agent", &platform.user_agent)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("session bootstrap request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Auth(format!(
                "session bootstrap returned {}",
                status
            )));
        }

        let mut cookies: Vec<(String, String)> = Vec::new();
        for header in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            // Some proxies fold multiple cookies into one comma-joined header.
            for part in raw.split(',') {
                if let Some((name, value)) = parse_set_cookie(part) {
                    insert_cookie(&mut cookies, name, value);
                }
            }
        }

        // The raw credential always wins over anything the server forwarded.
        insert_cookie(
            &mut cookies,
            "auth_token".to_string(),
            raw_credential.to_string(),
        );

        let csrf_token = cookies
            .iter()
            .find(|(name, _)| name == CSRF_COOKIE_NAME)
            .map(|(_, value)| value.clone())
            .filter(|value| !value.is_empty());

        if csrf_token.is_none() {
            tracing::warn!(
                "No anti-forgery token in bootstrap response; API calls will fail until re-authenticated"
            );
        }

        tracing::info!(cookies = cookies.len(), "Session initialized");

        Ok(Self {
            origin: platform.base().to_string(),
            bearer_token: platform.bearer_token.clone(),
            user_agent: platform.user_agent.clone(),
            cookie_header: build_cookie_header(&cookies),
            csrf_token,
        })
    }

    /// The anti-forgery token, or an auth error if the bootstrap
    /// response did not carry one.
    pub fn csrf_token(&self) -> Result<&str, AppError> {
        self.csrf_token
            .as_deref()
            .ok_or_else(|| AppError::Auth("session has no anti-forgery token".to_string()))
    }

    /// Full header set for authenticated API calls.
    ///
    /// # Errors
    /// Returns `AppError::Auth` when the anti-forgery token is missing,
    /// since every API endpoint rejects requests without it.
    pub fn api_headers(&self) -> Result<HeaderMap, AppError> {
        let csrf = self.csrf_token()?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("authorization"),
            header_value(&format!("Bearer {}", self.bearer_token), "bearer token")?,
        );
        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            HeaderName::from_static("user-agent"),
            header_value(&self.user_agent, "user agent")?,
        );
        headers.insert(
            HeaderName::from_static("x-twitter-active-user"),
            HeaderValue::from_static("yes"),
        );
        headers.insert(
            HeaderName::from_static("x-twitter-auth-type"),
            HeaderValue::from_static("OAuth2Session"),
        );
        headers.insert(
            HeaderName::from_static("x-twitter-client-language"),
            HeaderValue::from_static("en"),
        );
        headers.insert(
            HeaderName::from_static("cookie"),
            header_value(&self.cookie_header, "cookie header")?,
        );
        headers.insert(
            HeaderName::from_static("referer"),
            header_value(&format!("{}/", self.origin), "referer")?,
        );
        headers.insert(
            HeaderName::from_static("origin"),
            header_value(&self.origin, "origin")?,
        );
        headers.insert(
            HeaderName::from_static("x-csrf-token"),
            header_value(csrf, "anti-forgery token")?,
        );

        Ok(headers)
    }

    #[cfg(test)]
    pub(crate) fn for_test(origin: &str, csrf_token: Option<&str>) -> Self {
        Self {
            origin: origin.to_string(),
            bearer_token: "bearer".to_string(),
            user_agent: "test-agent".to_string(),
            cookie_header: "auth_token=token".to_string(),
            csrf_token: csrf_token.map(str::to_string),
        }
    }
}
