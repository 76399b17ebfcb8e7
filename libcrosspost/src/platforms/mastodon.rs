//! Mastodon platform implementation
//!
//! Uses the megalodon library, so any Fediverse server speaking the Mastodon
//! API (Pleroma, GoToSocial, Akkoma, ...) works as an instance.

use async_trait::async_trait;
use megalodon::{Megalodon, SNS};

use crate::error::{PlatformError, Result};
use crate::facets::Facet;
use crate::platforms::{validate_length, LengthUnit, PlatformClient};

/// Default status length on stock Mastodon instances
pub const MASTODON_CHARACTER_LIMIT: usize = 500;

/// Mastodon platform client
pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
    character_limit: usize,
}

impl MastodonClient {
    /// Create a new Mastodon client
    ///
    /// # Arguments
    ///
    /// * `instance_url` - Base URL of the instance (e.g., "https://mastodon.social")
    /// * `access_token` - OAuth access token
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
            character_limit: MASTODON_CHARACTER_LIMIT,
        })
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn character_limit(&self) -> usize {
        self.character_limit
    }
}

#[async_trait]
impl PlatformClient for MastodonClient {
    async fn post(
        &self,
        text: &str,
        _facets: Option<&[Facet]>,
    ) -> std::result::Result<String, PlatformError> {
        validate_length("Mastodon", text, self.character_limit, LengthUnit::Chars)?;

        let response = self
            .client
            .post_status(text.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let post_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => status.id,
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        tracing::debug!("Mastodon status {} created on {}", post_id, self.instance_url);
        Ok(post_id)
    }

    fn name(&self) -> &str {
        "mastodon"
    }
}

/// Map megalodon errors to PlatformError
///
/// - HTTP 401/403 → `Authentication`
/// - HTTP 422 → `Validation`
/// - HTTP 429 → `RateLimit`
/// - other 4xx → `Request`
/// - HTTP 5xx and transport failures → `Network`
/// - Parse errors → `Posting`
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}. \
                    Suggestion: Verify the access token is valid and has write:statuses scope.",
            context, error_str
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon validation failed ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(400..=499) => {
            PlatformError::Request(format!("Mastodon rejected request ({}): {}", context, error_str))
        }
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}. \
                    Suggestion: The instance may be experiencing issues.",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Network(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None => {
            if error_lower.contains("unauthorized")
                || error_lower.contains("forbidden")
                || error_lower.contains("authentication")
            {
                PlatformError::Authentication(format!(
                    "Mastodon authentication failed ({}): {}",
                    context, error_str
                ))
            } else if error_lower.contains("parse")
                || error_lower.contains("json")
                || error_lower.contains("deserialize")
            {
                PlatformError::Posting(format!(
                    "Mastodon response parse error ({}): {}. \
                        Suggestion: The instance may run an incompatible server version.",
                    context, error_str
                ))
            } else if error_lower.contains("rate limit")
                || error_lower.contains("too many requests")
            {
                PlatformError::RateLimit(format!(
                    "Mastodon rate limit exceeded ({}): {}",
                    context, error_str
                ))
            } else {
                PlatformError::Network(format!(
                    "Mastodon error ({}): {}. \
                        Suggestion: Check your network connection and instance availability.",
                    context, error_str
                ))
            }
        }
    }
}

/// Extract HTTP status code from error message
///
/// Looks for patterns like "HTTP 401", "status 403", "401:", etc.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    // Standalone 3-digit codes followed by colon or space
    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        if window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit())
        {
            let code = std::str::from_utf8(&window[..3])
                .ok()
                .and_then(|s| s.parse::<u16>().ok());
            if let Some(code) = code.filter(|c| (100..=599).contains(c)) {
                return Some(code);
            }
        }
    }

    None
}
