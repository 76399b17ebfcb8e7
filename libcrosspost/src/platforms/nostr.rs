//! Nostr platform implementation

use async_trait::async_trait;
use nostr_sdk::{Client, Keys, ToBech32};

use crate::error::{PlatformError, Result};
use crate::facets::Facet;
use crate::platforms::PlatformClient;

pub struct NostrClient {
    client: Client,
    relays: Vec<String>,
}

impl NostrClient {
    /// Create a client signing with `secret_key` (64-char hex or `nsec` bech32)
    pub fn new(secret_key: &str, relays: Vec<String>) -> Result<Self> {
        let keys = parse_keys(secret_key)?;

        Ok(Self {
            client: Client::new(keys),
            relays,
        })
    }
}

fn parse_keys(secret_key: &str) -> std::result::Result<Keys, PlatformError> {
    let key_str = secret_key.trim();

    if key_str.len() == 64 {
        Keys::parse(key_str)
            .map_err(|e| PlatformError::Authentication(format!("Invalid hex key: {}", e)))
    } else if key_str.starts_with("nsec") {
        Keys::parse(key_str)
            .map_err(|e| PlatformError::Authentication(format!("Invalid bech32 key: {}", e)))
    } else {
        Err(PlatformError::Authentication(
            "Key must be 64-character hex or bech32 nsec format".to_string(),
        ))
    }
}

#[async_trait]
impl PlatformClient for NostrClient {
    async fn post(
        &self,
        text: &str,
        _facets: Option<&[Facet]>,
    ) -> std::result::Result<String, PlatformError> {
        if text.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()));
        }

        for relay in &self.relays {
            self.client.add_relay(relay.as_str()).await.map_err(|e| {
                PlatformError::Network(format!("Failed to add relay {}: {}", relay, e))
            })?;
        }

        self.client.connect().await;

        let published = self
            .client
            .publish_text_note(text, [])
            .await
            .map_err(|e| PlatformError::Posting(format!("Failed to publish: {}", e)));

        let _ = self.client.disconnect().await;

        let output = published?;
        Ok(output
            .id()
            .to_bech32()
            .unwrap_or_else(|_| output.id().to_hex()))
    }

    fn name(&self) -> &str {
        "nostr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_hex_key() {
        let keys = Keys::generate();
        let hex = keys.secret_key().to_secret_hex();

        let client = NostrClient::new(&hex, vec!["wss://relay.example".to_string()]).unwrap();
        assert_eq!(client.name(), "nostr");
    }

    #[test]
    fn test_accepts_nsec_key() {
        let keys = Keys::generate();
        let nsec = keys.secret_key().to_bech32().unwrap();

        assert!(NostrClient::new(&nsec, vec!["wss://relay.example".to_string()]).is_ok());
    }

    #[test]
    fn test_rejects_garbage_key() {
        let result = parse_keys("not-a-key");
        assert!(matches!(result, Err(PlatformError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_post_rejects_empty_content() {
        let keys = Keys::generate();
        let client = NostrClient::new(
            &keys.secret_key().to_secret_hex(),
            vec!["wss://relay.example".to_string()],
        )
        .unwrap();

        let result = client.post("   ", None).await;
        assert!(matches!(result, Err(PlatformError::Validation(_))));
    }
}
