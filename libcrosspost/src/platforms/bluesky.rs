//! Bluesky platform implementation
//!
//! Talks to the account's PDS over AT Protocol XRPC: one
//! `com.atproto.server.createSession` to exchange the app password for an
//! access token, then `com.atproto.repo.createRecord` with an
//! `app.bsky.feed.post` record. Links only render when sent as facets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::facets::Facet;
use crate::platforms::{validate_length, LengthUnit, PlatformClient};

/// Bluesky post length limit, in graphemes
pub const BLUESKY_CHARACTER_LIMIT: usize = 300;

const POST_COLLECTION: &str = "app.bsky.feed.post";

pub struct BlueskyClient {
    http: reqwest::Client,
    service: String,
    handle: String,
    app_password: String,
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Serialize)]
struct CreateRecordRequest<'a> {
    repo: &'a str,
    collection: &'static str,
    record: PostRecord<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord<'a> {
    #[serde(rename = "$type")]
    record_type: &'static str,
    text: &'a str,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    facets: Option<&'a [Facet]>,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

/// XRPC error body
#[derive(Deserialize, Default)]
struct XrpcError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl BlueskyClient {
    /// Create a client for `handle` on the PDS at `service`
    pub fn new(service: &str, handle: &str, app_password: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            service: service.trim_end_matches('/').to_string(),
            handle: handle.to_string(),
            app_password: app_password.to_string(),
        })
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    async fn create_session(&self) -> std::result::Result<Session, PlatformError> {
        let response = self
            .http
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&CreateSessionRequest {
                identifier: &self.handle,
                password: &self.app_password,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(e, "authentication"))?;

        let response = check_status(response, "authentication").await?;

        response.json::<Session>().await.map_err(|e| {
            PlatformError::Authentication(format!("Unexpected createSession response: {}", e))
        })
    }
}

#[async_trait]
impl PlatformClient for BlueskyClient {
    async fn post(
        &self,
        text: &str,
        facets: Option<&[Facet]>,
    ) -> std::result::Result<String, PlatformError> {
        validate_length(
            "Bluesky",
            text,
            BLUESKY_CHARACTER_LIMIT,
            LengthUnit::Graphemes,
        )?;

        let session = self.create_session().await?;
        tracing::debug!("Bluesky session created for {} ({})", self.handle, session.did);

        let request = CreateRecordRequest {
            repo: &session.did,
            collection: POST_COLLECTION,
            record: build_record(text, facets),
        };

        let response = self
            .http
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_transport_error(e, "posting"))?;

        let response = check_status(response, "posting").await?;

        let created = response.json::<CreateRecordResponse>().await.map_err(|e| {
            PlatformError::Posting(format!("Unexpected createRecord response: {}", e))
        })?;

        Ok(created.uri)
    }

    fn name(&self) -> &str {
        "bluesky"
    }
}

fn build_record<'a>(text: &'a str, facets: Option<&'a [Facet]>) -> PostRecord<'a> {
    PostRecord {
        record_type: POST_COLLECTION,
        text,
        created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        facets: facets.filter(|f| !f.is_empty()),
    }
}

async fn check_status(
    response: reqwest::Response,
    context: &str,
) -> std::result::Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail: XrpcError = serde_json::from_str(&body).unwrap_or_default();
    let message = match (detail.error, detail.message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code,
        (None, Some(message)) => message,
        (None, None) => body,
    };

    Err(map_bluesky_status(status.as_u16(), &message, context))
}

/// Map an XRPC error status to PlatformError
///
/// - 401/403 → `Authentication`
/// - 429 → `RateLimit`
/// - other 4xx → `Request`
/// - 5xx and anything else → `Network`
fn map_bluesky_status(status: u16, message: &str, context: &str) -> PlatformError {
    match status {
        401 | 403 => PlatformError::Authentication(format!(
            "Bluesky authentication failed during {} ({}): {}. \
                Please check your handle and app password.",
            context, status, message
        )),
        429 => PlatformError::RateLimit(format!(
            "Bluesky rate limit exceeded during {}: {}",
            context, message
        )),
        400..=499 => PlatformError::Request(format!(
            "Bluesky rejected the request during {} ({}): {}",
            context, status, message
        )),
        _ => PlatformError::Network(format!(
            "Bluesky server error during {} ({}): {}",
            context, status, message
        )),
    }
}

fn map_transport_error(error: reqwest::Error, context: &str) -> PlatformError {
    PlatformError::Network(format!(
        "Bluesky request failed during {}: {}. Check your network connection and PDS URL.",
        context, error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facets;

    #[test]
    fn test_client_name_and_urls() {
        let client = BlueskyClient::new("https://bsky.social/", "alice.bsky.social", "pw").unwrap();
        assert_eq!(client.name(), "bluesky");
        assert_eq!(
            client.xrpc_url("com.atproto.server.createSession"),
            "https://bsky.social/xrpc/com.atproto.server.createSession"
        );
    }

    #[test]
    fn test_record_includes_facets() {
        let text = "new post https://example.com/a";
        let extracted = facets::extract(text);
        let record = build_record(text, Some(&extracted));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["$type"], "app.bsky.feed.post");
        assert_eq!(json["text"], text);
        assert_eq!(json["facets"][0]["index"]["byteStart"], 9);
        assert_eq!(json["facets"][0]["index"]["byteEnd"], 30);
        assert_eq!(
            json["facets"][0]["features"][0]["$type"],
            "app.bsky.richtext.facet#link"
        );
    }

    #[test]
    fn test_record_omits_empty_facets() {
        let record = build_record("no links", Some(&[]));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("facets").is_none());

        let record = build_record("no links", None);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("facets").is_none());
    }

    #[test]
    fn test_record_created_at_is_utc_millis() {
        let record = build_record("hi", None);
        assert!(record.created_at.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&record.created_at).is_ok());
        // 2024-01-01T00:00:00.000Z
        assert_eq!(record.created_at.len(), 24);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_bluesky_status(401, "AuthenticationRequired", "posting"),
            PlatformError::Authentication(_)
        ));
        assert!(matches!(
            map_bluesky_status(403, "Forbidden", "posting"),
            PlatformError::Authentication(_)
        ));
        assert!(matches!(
            map_bluesky_status(400, "InvalidRequest: bad record", "posting"),
            PlatformError::Request(_)
        ));
        assert!(matches!(
            map_bluesky_status(429, "RateLimitExceeded", "posting"),
            PlatformError::RateLimit(_)
        ));
        assert!(matches!(
            map_bluesky_status(502, "Bad Gateway", "posting"),
            PlatformError::Network(_)
        ));
    }

    #[tokio::test]
    async fn test_post_rejects_content_over_limit() {
        let client = BlueskyClient::new("http://127.0.0.1:9", "alice.bsky.social", "pw").unwrap();
        let result = client.post(&"a".repeat(301), None).await;
        assert!(matches!(result, Err(PlatformError::Validation(_))));
    }

    #[tokio::test]
    async fn test_limit_counts_emoji_sequences_once() {
        let client = BlueskyClient::new("http://127.0.0.1:9", "alice.bsky.social", "pw").unwrap();
        // 300 flags, 600 chars; passes validation and fails at the transport
        let flags = "\u{1F1FA}\u{1F1F8}".repeat(300);

        let result = client.post(&flags, None).await;
        assert!(matches!(result, Err(PlatformError::Network(_))));
    }

    #[tokio::test]
    async fn test_unreachable_pds_is_network_error() {
        let client = BlueskyClient::new("http://127.0.0.1:9", "alice.bsky.social", "pw").unwrap();
        let result = client.post("hello", None).await;
        assert!(matches!(result, Err(PlatformError::Network(_))));
    }
}
