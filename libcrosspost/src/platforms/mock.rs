//! Recording client factory for testing
//!
//! Builds in-process clients that never touch the network. Every build and
//! post is recorded so tests can assert exactly which accounts were reached,
//! with which secret, text and facets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AccountConfig, PlatformKind};
use crate::error::{CredentialError, PlatformError, Result};
use crate::facets::Facet;
use crate::platforms::{ClientFactory, PlatformClient};

/// One `post` call seen by a mock client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub platform: PlatformKind,
    pub account: String,
    pub text: String,
    pub facets: Option<Vec<Facet>>,
}

/// Client factory that records instead of posting
///
/// Clones share the same record, so a test can keep one handle while the
/// dispatcher owns another.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    posts: Arc<Mutex<Vec<RecordedPost>>>,
    builds: Arc<Mutex<Vec<(String, String)>>>,
    failures: Arc<Mutex<HashMap<String, PlatformError>>>,
    malformed: Arc<Mutex<Vec<String>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every post from `account` fail with `error`
    pub fn fail_account(self, account: &str, error: PlatformError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(account.to_string(), error);
        }
        self
    }

    /// Treat `account`'s secret as an undecodable credential bundle
    pub fn malformed_bundle(self, account: &str) -> Self {
        if let Ok(mut malformed) = self.malformed.lock() {
            malformed.push(account.to_string());
        }
        self
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn post_count(&self) -> usize {
        self.posts().len()
    }

    /// `(account, secret)` pairs for every client built
    pub fn builds(&self) -> Vec<(String, String)> {
        self.builds.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl ClientFactory for RecordingFactory {
    fn build(
        &self,
        account: &AccountConfig,
        secret: &SecretString,
    ) -> Result<Box<dyn PlatformClient>> {
        if let Ok(mut builds) = self.builds.lock() {
            builds.push((account.name.clone(), secret.expose_secret().to_string()));
        }

        let is_malformed = self
            .malformed
            .lock()
            .map(|m| m.contains(&account.name))
            .unwrap_or(false);
        if is_malformed {
            return Err(CredentialError::MalformedBundle(format!(
                "account '{}' has an undecodable bundle",
                account.name
            ))
            .into());
        }

        let failure = self
            .failures
            .lock()
            .ok()
            .and_then(|f| f.get(&account.name).cloned());

        Ok(Box::new(RecordingClient {
            platform: account.endpoint.kind(),
            account: account.name.clone(),
            failure,
            posts: Arc::clone(&self.posts),
        }))
    }
}

struct RecordingClient {
    platform: PlatformKind,
    account: String,
    failure: Option<PlatformError>,
    posts: Arc<Mutex<Vec<RecordedPost>>>,
}

#[async_trait]
impl PlatformClient for RecordingClient {
    async fn post(
        &self,
        text: &str,
        facets: Option<&[Facet]>,
    ) -> std::result::Result<String, PlatformError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let mut posts = self
            .posts
            .lock()
            .map_err(|_| PlatformError::Posting("mock record poisoned".to_string()))?;

        posts.push(RecordedPost {
            platform: self.platform,
            account: self.account.clone(),
            text: text.to_string(),
            facets: facets.map(|f| f.to_vec()),
        });

        Ok(format!("mock-{}-{}-{}", self.platform, self.account, posts.len()))
    }

    fn name(&self) -> &str {
        self.platform.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountEndpoint, CredentialReference};

    fn account(name: &str) -> AccountConfig {
        AccountConfig {
            name: name.to_string(),
            endpoint: AccountEndpoint::Mastodon {
                instance: "https://mastodon.example".to_string(),
            },
            credential: CredentialReference::EnvRef("UNUSED".to_string()),
        }
    }

    #[tokio::test]
    async fn test_records_posts() {
        let factory = RecordingFactory::new();
        let client = factory
            .build(&account("main"), &SecretString::from("tok".to_string()))
            .unwrap();

        let id = client.post("hello", None).await.unwrap();

        assert_eq!(id, "mock-mastodon-main-1");
        assert_eq!(client.name(), "mastodon");
        assert_eq!(factory.builds(), vec![("main".to_string(), "tok".to_string())]);
        assert_eq!(factory.posts()[0].text, "hello");
    }

    #[tokio::test]
    async fn test_configured_failure() {
        let factory = RecordingFactory::new()
            .fail_account("broken", PlatformError::Authentication("bad token".to_string()));
        let client = factory
            .build(&account("broken"), &SecretString::from("tok".to_string()))
            .unwrap();

        let result = client.post("hello", None).await;
        assert_eq!(
            result,
            Err(PlatformError::Authentication("bad token".to_string()))
        );
        assert_eq!(factory.post_count(), 0);
    }

    #[test]
    fn test_malformed_bundle() {
        let factory = RecordingFactory::new().malformed_bundle("x");
        let result = factory.build(&account("x"), &SecretString::from("{}".to_string()));
        assert!(result.is_err());
    }
}
