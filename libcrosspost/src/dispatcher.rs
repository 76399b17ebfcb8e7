//! Multi-account posting orchestration
//!
//! Walks every enabled platform in [`PlatformKind`] order and every account in
//! the order it is listed, strictly one at a time. Each account ends in
//! exactly one [`PostResult`]; a broken account never stops the batch.

use tracing::{debug, info, warn};

use crate::config::{AccountConfig, Config, PlatformKind};
use crate::error::{CredentialError, CrosspostError, Result};
use crate::facets::{self, Facet};
use crate::platforms::ClientFactory;
use crate::resolver::{CredentialCache, SecretResolver};

/// Reason recorded when no secret could be resolved
pub const MISSING_CREDENTIAL: &str = "missing credential";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Resolve (prompting if needed) and post
    Post,
    /// Resolve without prompting and report readiness; nothing is posted
    Check,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Post created; carries the platform's post id
    Posted(String),
    /// Credential resolved in check mode
    Ready,
    Skipped(String),
    Failed(String),
}

/// Outcome for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResult {
    pub platform: PlatformKind,
    pub account: String,
    pub outcome: Outcome,
}

impl PostResult {
    fn new(platform: PlatformKind, account: &str, outcome: Outcome) -> Self {
        Self {
            platform,
            account: account.to_string(),
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Posted(_) | Outcome::Ready)
    }
}

/// Posts one message to every enabled account
pub struct PostDispatcher<'a> {
    resolver: SecretResolver<'a>,
    factory: &'a dyn ClientFactory,
    mode: DispatchMode,
}

impl<'a> PostDispatcher<'a> {
    pub fn new(
        resolver: SecretResolver<'a>,
        factory: &'a dyn ClientFactory,
        mode: DispatchMode,
    ) -> Self {
        Self {
            resolver,
            factory,
            mode,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Dispatch and collect every result
    pub async fn dispatch(
        &self,
        text: &str,
        config: &Config,
        cache: &mut CredentialCache,
    ) -> Result<Vec<PostResult>> {
        self.dispatch_with(text, config, cache, |_| {}).await
    }

    /// Dispatch, handing each result to `observer` as soon as it exists
    ///
    /// # Errors
    ///
    /// `CrosspostError::InvalidInput` for blank text in post mode. Account
    /// level problems are never errors; they become `Skipped` or `Failed`.
    pub async fn dispatch_with<F>(
        &self,
        text: &str,
        config: &Config,
        cache: &mut CredentialCache,
        mut observer: F,
    ) -> Result<Vec<PostResult>>
    where
        F: FnMut(&PostResult),
    {
        if self.mode == DispatchMode::Post && text.trim().is_empty() {
            return Err(CrosspostError::InvalidInput(
                "Post text cannot be empty".to_string(),
            ));
        }

        let link_facets = facets::extract(text);
        let mut results = Vec::new();

        for kind in PlatformKind::ALL {
            let Some(platform) = config.platform(kind) else {
                debug!("{} not configured", kind);
                continue;
            };

            if !platform.enabled {
                debug!("{} disabled, skipping {} account(s)", kind, platform.accounts.len());
                continue;
            }

            if platform.accounts.is_empty() {
                debug!("{} enabled but has no accounts", kind);
                continue;
            }

            for account in &platform.accounts {
                let facets = kind.needs_facets().then_some(link_facets.as_slice());

                let result = self
                    .dispatch_account(kind, account, text, facets, cache)
                    .await;
                observer(&result);
                results.push(result);
            }
        }

        Ok(results)
    }

    async fn dispatch_account(
        &self,
        kind: PlatformKind,
        account: &AccountConfig,
        text: &str,
        facets: Option<&[Facet]>,
        cache: &mut CredentialCache,
    ) -> PostResult {
        let allow_prompt = self.mode == DispatchMode::Post;

        let Some(secret) = self.resolver.resolve(
            &account.credential,
            &account.name,
            kind.as_str(),
            allow_prompt,
            cache,
        ) else {
            warn!(
                "Skipping {} account '{}': {} ({})",
                kind,
                account.name,
                MISSING_CREDENTIAL,
                account.credential.describe()
            );
            return PostResult::new(
                kind,
                &account.name,
                Outcome::Skipped(MISSING_CREDENTIAL.to_string()),
            );
        };

        let client = match self.factory.build(account, &secret) {
            Ok(client) => client,
            Err(CrosspostError::Credential(CredentialError::MalformedBundle(reason))) => {
                warn!(
                    "Skipping {} account '{}': malformed credential bundle: {}",
                    kind, account.name, reason
                );
                return PostResult::new(
                    kind,
                    &account.name,
                    Outcome::Skipped(format!("malformed credential bundle: {}", reason)),
                );
            }
            Err(e) => {
                warn!("Could not create {} client for '{}': {}", kind, account.name, e);
                return PostResult::new(kind, &account.name, Outcome::Failed(e.to_string()));
            }
        };

        if self.mode == DispatchMode::Check {
            debug!("{} account '{}' is ready", kind, account.name);
            return PostResult::new(kind, &account.name, Outcome::Ready);
        }

        match client.post(text, facets).await {
            Ok(post_id) => {
                info!("Posted to {} account '{}': {}", kind, account.name, post_id);
                PostResult::new(kind, &account.name, Outcome::Posted(post_id))
            }
            Err(e) => {
                warn!("Failed to post to {} account '{}': {}", kind, account.name, e);
                PostResult::new(kind, &account.name, Outcome::Failed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryStore;
    use crate::error::PlatformError;
    use crate::platforms::mock::RecordingFactory;
    use crate::prompt::ScriptedPrompt;

    const CONFIG: &str = r#"
[mastodon]
enabled = true

[[mastodon.accounts]]
name = "primary"
instance = "https://mastodon.example"
credential = "inline-token"

[[mastodon.accounts]]
name = "secondary"
instance = "https://fosstodon.example"
keychain_key = "mastodon_secondary"

[bluesky]
enabled = true

[[bluesky.accounts]]
name = "main"
handle = "alice.bsky.social"
keychain_key = "bluesky_main"

[nostr]
enabled = false

[[nostr.accounts]]
name = "disabled"
relays = ["wss://relay.example"]
keychain_key = "nostr_main"
"#;

    fn config() -> Config {
        Config::from_toml_str(CONFIG).unwrap()
    }

    #[tokio::test]
    async fn test_posts_in_platform_then_account_order() {
        let config = config();
        let store = MemoryStore::new()
            .with_entry("crosspost", "mastodon_secondary", "second-token")
            .with_entry("crosspost", "bluesky_main", "app-password");
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );
        let mut cache = CredentialCache::new();

        let results = dispatcher
            .dispatch("hello https://example.com", &config, &mut cache)
            .await
            .unwrap();

        let order: Vec<(PlatformKind, &str)> = results
            .iter()
            .map(|r| (r.platform, r.account.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (PlatformKind::Mastodon, "primary"),
                (PlatformKind::Mastodon, "secondary"),
                (PlatformKind::Bluesky, "main"),
            ]
        );
        assert!(results.iter().all(|r| matches!(r.outcome, Outcome::Posted(_))));
        assert_eq!(prompt.ask_count(), 0);
    }

    #[tokio::test]
    async fn test_facets_only_sent_to_bluesky() {
        let config = config();
        let store = MemoryStore::new()
            .with_entry("crosspost", "mastodon_secondary", "t")
            .with_entry("crosspost", "bluesky_main", "p");
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );

        dispatcher
            .dispatch("see https://a.example", &config, &mut CredentialCache::new())
            .await
            .unwrap();

        for post in factory.posts() {
            match post.platform {
                PlatformKind::Bluesky => {
                    let facets = post.facets.expect("bluesky gets facets");
                    assert_eq!(facets.len(), 1);
                    assert_eq!((facets[0].byte_start, facets[0].byte_end), (4, 21));
                }
                _ => assert!(post.facets.is_none()),
            }
        }
    }

    #[tokio::test]
    async fn test_disabled_platform_is_never_resolved_or_posted() {
        let config = config();
        let store = MemoryStore::new()
            .with_entry("crosspost", "nostr_main", "nsec-unused");
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );

        let results = dispatcher
            .dispatch("hello", &config, &mut CredentialCache::new())
            .await
            .unwrap();

        assert!(results.iter().all(|r| r.platform != PlatformKind::Nostr));
        assert!(factory.posts().iter().all(|p| p.platform != PlatformKind::Nostr));
        assert!(factory.builds().iter().all(|(account, _)| account != "disabled"));
        assert!(prompt.asked().iter().all(|label| !label.contains("nostr")));
    }

    #[tokio::test]
    async fn test_unresolvable_account_skipped_without_affecting_sibling() {
        let config = config();
        // mastodon_secondary and bluesky_main are missing and the prompt gives nothing
        let store = MemoryStore::new();
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );

        let results = dispatcher
            .dispatch("hello", &config, &mut CredentialCache::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].outcome, Outcome::Posted(_)));
        assert_eq!(
            results[1].outcome,
            Outcome::Skipped(MISSING_CREDENTIAL.to_string())
        );
        assert_eq!(
            results[2].outcome,
            Outcome::Skipped(MISSING_CREDENTIAL.to_string())
        );
        assert_eq!(factory.post_count(), 1);
        assert_eq!(prompt.ask_count(), 2);
    }

    #[tokio::test]
    async fn test_client_failure_is_isolated() {
        let config = config();
        let store = MemoryStore::new()
            .with_entry("crosspost", "mastodon_secondary", "t")
            .with_entry("crosspost", "bluesky_main", "p");
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new()
            .fail_account("primary", PlatformError::Network("connection reset".to_string()));
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );

        let results = dispatcher
            .dispatch("hello", &config, &mut CredentialCache::new())
            .await
            .unwrap();

        assert_eq!(
            results[0].outcome,
            Outcome::Failed("Network error: connection reset".to_string())
        );
        assert!(matches!(results[1].outcome, Outcome::Posted(_)));
        assert!(matches!(results[2].outcome, Outcome::Posted(_)));
    }

    #[tokio::test]
    async fn test_malformed_bundle_is_skipped() {
        let config = config();
        let store = MemoryStore::new()
            .with_entry("crosspost", "mastodon_secondary", "t")
            .with_entry("crosspost", "bluesky_main", "p");
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new().malformed_bundle("main");
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );

        let results = dispatcher
            .dispatch("hello", &config, &mut CredentialCache::new())
            .await
            .unwrap();

        match &results[2].outcome {
            Outcome::Skipped(reason) => assert!(reason.starts_with("malformed credential bundle")),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_check_mode_never_prompts_or_posts() {
        let config = config();
        let store = MemoryStore::new()
            .with_entry("crosspost", "bluesky_main", "p");
        let prompt = ScriptedPrompt::new().with_secret("would-be-typed");
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Check,
        );

        let results = dispatcher
            .dispatch("", &config, &mut CredentialCache::new())
            .await
            .unwrap();

        assert_eq!(results[0].outcome, Outcome::Ready);
        assert_eq!(
            results[1].outcome,
            Outcome::Skipped(MISSING_CREDENTIAL.to_string())
        );
        assert_eq!(results[2].outcome, Outcome::Ready);
        assert_eq!(prompt.ask_count(), 0);
        assert_eq!(factory.post_count(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_text_rejected_in_post_mode() {
        let config = config();
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", None, &prompt),
            &factory,
            DispatchMode::Post,
        );

        let result = dispatcher
            .dispatch("   ", &config, &mut CredentialCache::new())
            .await;

        assert!(matches!(result, Err(CrosspostError::InvalidInput(_))));
        assert_eq!(factory.builds().len(), 0);
    }

    #[tokio::test]
    async fn test_observer_sees_every_result_in_order() {
        let config = config();
        let store = MemoryStore::new();
        let prompt = ScriptedPrompt::new();
        let factory = RecordingFactory::new();
        let dispatcher = PostDispatcher::new(
            SecretResolver::new("crosspost", Some(&store), &prompt),
            &factory,
            DispatchMode::Post,
        );

        let mut seen = Vec::new();
        let results = dispatcher
            .dispatch_with("hello", &config, &mut CredentialCache::new(), |r| {
                seen.push(r.clone())
            })
            .await
            .unwrap();

        assert_eq!(seen, results);
    }
}
