//! Platform abstraction and implementations
//!
//! Every platform is reached through the same [`PlatformClient`] trait, so the
//! dispatcher never sees concrete client types. A [`ClientFactory`] turns an
//! account plus its resolved secret into a ready client.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::platforms::{PlatformClient, mastodon::MastodonClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MastodonClient::new(
//!     "https://mastodon.social".to_string(),
//!     "access-token".to_string(),
//! )?;
//!
//! let post_id = client.post("Hello, fediverse!", None).await?;
//! println!("Posted: {}", post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{AccountConfig, AccountEndpoint};
use crate::error::{PlatformError, Result};
use crate::facets::Facet;

pub mod bluesky;
pub mod mastodon;
pub mod nostr;
pub mod twitter;

// Available in all builds so integration tests can drive the dispatcher
pub mod mock;

/// Uniform posting capability implemented once per platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Publish `text` and return the platform's identifier for the new post
    ///
    /// `facets` is only supplied for platforms whose wire format needs
    /// explicit link spans; other clients ignore it.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Validation` when the text breaks platform rules
    /// - `PlatformError::Authentication` when the credential is rejected
    /// - `PlatformError::Network`, `Request`, `RateLimit` or `Posting` for
    ///   everything the remote side reports
    async fn post(
        &self,
        text: &str,
        facets: Option<&[Facet]>,
    ) -> std::result::Result<String, PlatformError>;

    /// Lowercase platform identifier (e.g. "mastodon")
    fn name(&self) -> &str;
}

/// Builds platform clients for accounts
pub trait ClientFactory {
    /// Build a client for `account` using its resolved secret
    ///
    /// # Errors
    ///
    /// `CredentialError::MalformedBundle` when a multi-field secret cannot be
    /// decomposed; the dispatcher treats that as a missing credential. Any
    /// other error marks the account as failed.
    fn build(&self, account: &AccountConfig, secret: &SecretString)
        -> Result<Box<dyn PlatformClient>>;
}

/// Factory producing the real network clients
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClientFactory;

impl ClientFactory for DefaultClientFactory {
    fn build(
        &self,
        account: &AccountConfig,
        secret: &SecretString,
    ) -> Result<Box<dyn PlatformClient>> {
        let client: Box<dyn PlatformClient> = match &account.endpoint {
            AccountEndpoint::Mastodon { instance } => Box::new(mastodon::MastodonClient::new(
                instance.clone(),
                secret.expose_secret().to_string(),
            )?),
            AccountEndpoint::Bluesky { handle, service } => Box::new(
                bluesky::BlueskyClient::new(service, handle, secret.expose_secret())?,
            ),
            AccountEndpoint::Nostr { relays } => Box::new(nostr::NostrClient::new(
                secret.expose_secret(),
                relays.clone(),
            )?),
            AccountEndpoint::Twitter { api_base } => {
                let bundle = twitter::TwitterCredentials::from_bundle(secret.expose_secret())?;
                Box::new(twitter::TwitterClient::new(api_base, bundle)?)
            }
        };

        Ok(client)
    }
}

/// How a platform measures post length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LengthUnit {
    /// Unicode scalar values
    Chars,
    /// Extended grapheme clusters (one emoji sequence counts once)
    Graphemes,
}

impl LengthUnit {
    fn count(&self, text: &str) -> usize {
        match self {
            LengthUnit::Chars => text.chars().count(),
            LengthUnit::Graphemes => text.graphemes(true).count(),
        }
    }
}

/// Reject empty text and text over a platform's character limit
pub(crate) fn validate_length(
    platform: &str,
    text: &str,
    limit: usize,
    unit: LengthUnit,
) -> std::result::Result<(), PlatformError> {
    if text.trim().is_empty() {
        return Err(PlatformError::Validation(
            "Content cannot be empty".to_string(),
        ));
    }

    let length = unit.count(text);
    if length > limit {
        return Err(PlatformError::Validation(format!(
            "Content exceeds {}'s {} character limit (current: {} characters)",
            platform, limit, length
        )));
    }

    Ok(())
}
