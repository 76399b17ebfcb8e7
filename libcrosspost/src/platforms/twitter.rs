//! X (Twitter) platform implementation
//!
//! Posts through the v2 `POST /2/tweets` endpoint with OAuth 1.0a user
//! context. The account secret is a JSON bundle holding the four OAuth
//! values:
//!
//! ```json
//! {"api_key": "...", "api_secret": "...", "access_token": "...", "access_token_secret": "..."}
//! ```

use std::fmt;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use sha1::Sha1;

use crate::error::{CredentialError, PlatformError, Result};
use crate::facets::Facet;
use crate::platforms::{validate_length, LengthUnit, PlatformClient};

/// X post length limit
pub const TWITTER_CHARACTER_LIMIT: usize = 280;

const BUNDLE_FIELDS: [&str; 4] = ["api_key", "api_secret", "access_token", "access_token_secret"];

/// RFC 3986 unreserved characters stay literal, everything else is escaped
const OAUTH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

type HmacSha1 = Hmac<Sha1>;

/// OAuth 1.0a user-context credentials decoded from the secret bundle
pub struct TwitterCredentials {
    pub(crate) api_key: String,
    pub(crate) api_secret: String,
    pub(crate) access_token: String,
    pub(crate) access_token_secret: String,
}

impl fmt::Debug for TwitterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterCredentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .field("access_token_secret", &"[REDACTED]")
            .finish()
    }
}

impl TwitterCredentials {
    /// Decode the JSON bundle stored as the account's secret
    ///
    /// Error messages name the problem but never echo bundle contents.
    pub fn from_bundle(bundle: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(bundle).map_err(|e| {
            CredentialError::MalformedBundle(format!(
                "not valid JSON (line {}, column {})",
                e.line(),
                e.column()
            ))
        })?;

        let object = value.as_object().ok_or_else(|| {
            CredentialError::MalformedBundle("expected a JSON object".to_string())
        })?;

        let missing: Vec<&str> = BUNDLE_FIELDS
            .iter()
            .copied()
            .filter(|field| {
                object
                    .get(*field)
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect();

        if !missing.is_empty() {
            return Err(CredentialError::MalformedBundle(format!(
                "missing or empty field(s): {}",
                missing.join(", ")
            ))
            .into());
        }

        let field = |name: &str| {
            object
                .get(name)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        Ok(Self {
            api_key: field("api_key"),
            api_secret: field("api_secret"),
            access_token: field("access_token"),
            access_token_secret: field("access_token_secret"),
        })
    }
}

pub struct TwitterClient {
    http: reqwest::Client,
    api_base: String,
    credentials: TwitterCredentials,
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: CreatedTweet,
}

#[derive(Deserialize)]
struct CreatedTweet {
    id: String,
}

impl TwitterClient {
    pub fn new(api_base: &str, credentials: TwitterCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn tweets_url(&self) -> String {
        format!("{}/2/tweets", self.api_base)
    }
}

#[async_trait]
impl PlatformClient for TwitterClient {
    async fn post(
        &self,
        text: &str,
        _facets: Option<&[Facet]>,
    ) -> std::result::Result<String, PlatformError> {
        validate_length("X", text, TWITTER_CHARACTER_LIMIT, LengthUnit::Chars)?;

        let url = self.tweets_url();
        let header = authorization_header(
            &self.credentials,
            "POST",
            &url,
            &generate_nonce(),
            chrono::Utc::now().timestamp(),
        )?;

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, header)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| {
                PlatformError::Network(format!(
                    "X request failed: {}. Check your network connection.",
                    e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_twitter_status(status.as_u16(), &body));
        }

        let created = response
            .json::<CreateTweetResponse>()
            .await
            .map_err(|e| PlatformError::Posting(format!("Unexpected X response: {}", e)))?;

        Ok(created.data.id)
    }

    fn name(&self) -> &str {
        "twitter"
    }
}

fn map_twitter_status(status: u16, body: &str) -> PlatformError {
    match status {
        401 | 403 => PlatformError::Authentication(format!(
            "X rejected the credentials ({}): {}. \
                Check that the app has read and write permission.",
            status, body
        )),
        429 => PlatformError::RateLimit(format!("X rate limit exceeded: {}", body)),
        400..=499 => PlatformError::Request(format!("X rejected the request ({}): {}", status, body)),
        _ => PlatformError::Network(format!("X server error ({}): {}", status, body)),
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE).to_string()
}

fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// OAuth 1.0a signature base string
///
/// `params` holds the oauth_* values plus any form or query parameters; a
/// JSON body is not part of the signature.
fn signature_base_string(method: &str, url: &str, params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    encoded.sort();

    let parameter_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&parameter_string)
    )
}

fn sign(
    base_string: &str,
    consumer_secret: &str,
    token_secret: &str,
) -> std::result::Result<String, PlatformError> {
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| PlatformError::Authentication(format!("Invalid signing key: {}", e)))?;
    mac.update(base_string.as_bytes());

    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn authorization_header(
    credentials: &TwitterCredentials,
    method: &str,
    url: &str,
    nonce: &str,
    timestamp: i64,
) -> std::result::Result<String, PlatformError> {
    let timestamp = timestamp.to_string();
    let mut oauth_params = vec![
        ("oauth_consumer_key", credentials.api_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_token", credentials.access_token.as_str()),
        ("oauth_version", "1.0"),
    ];

    let base_string = signature_base_string(method, url, &oauth_params);
    let signature = sign(
        &base_string,
        &credentials.api_secret,
        &credentials.access_token_secret,
    )?;

    oauth_params.push(("oauth_signature", signature.as_str()));
    oauth_params.sort();

    let fields = oauth_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!("OAuth {}", fields))
}
