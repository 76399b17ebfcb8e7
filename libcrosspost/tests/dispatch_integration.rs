//! End-to-end dispatch tests: config, resolution, persistence and posting
//! against in-process stores, prompts and clients.

use libcrosspost::credentials::{CredentialStore, EncryptedFileStore, MemoryStore};
use libcrosspost::error::PlatformError;
use libcrosspost::platforms::mock::RecordingFactory;
use libcrosspost::prompt::ScriptedPrompt;
use libcrosspost::{
    Config, CredentialCache, DispatchMode, Outcome, PostDispatcher, SecretResolver,
};
use secrecy::SecretString;
use tempfile::TempDir;

const SHARED_KEY_CONFIG: &str = r#"
keychain_service = "crosspost-test"

[mastodon]
enabled = true

[[mastodon.accounts]]
name = "primary"
instance = "https://mastodon.example"
keychain_key = "shared"

[[mastodon.accounts]]
name = "mirror"
instance = "https://other.example"
keychain_key = "shared"

[bluesky]
enabled = true

[[bluesky.accounts]]
name = "main"
handle = "alice.bsky.social"
keychain_key = "bluesky_main"
"#;

#[tokio::test]
async fn test_first_run_prompts_once_per_key_and_persists() {
    let config = Config::from_toml_str(SHARED_KEY_CONFIG).unwrap();
    let store = MemoryStore::new();
    let prompt = ScriptedPrompt::new()
        .with_secret("masto-token")
        .with_secret("bsky-pass");
    let factory = RecordingFactory::new();

    let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &prompt);
    let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Post);
    let mut cache = CredentialCache::new();

    let results = dispatcher
        .dispatch("Launch day https://example.com/launch", &config, &mut cache)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.is_success()));

    // Two accounts share a key: one prompt, one write
    assert_eq!(prompt.ask_count(), 2);
    assert_eq!(store.write_count(), 2);
    assert_eq!(
        store.peek("crosspost-test", "shared").as_deref(),
        Some("masto-token")
    );
    assert_eq!(cache.len(), 2);

    let builds = factory.builds();
    assert_eq!(
        builds,
        vec![
            ("primary".to_string(), "masto-token".to_string()),
            ("mirror".to_string(), "masto-token".to_string()),
            ("main".to_string(), "bsky-pass".to_string()),
        ]
    );

    let posts = factory.posts();
    assert!(posts[0].facets.is_none());
    let bluesky_facets = posts[2].facets.as_ref().unwrap();
    assert_eq!(bluesky_facets.len(), 1);
    assert_eq!(bluesky_facets[0].byte_start, 11);
    assert_eq!(bluesky_facets[0].uri, "https://example.com/launch");
}

#[tokio::test]
async fn test_second_run_reads_store_without_prompting() {
    let config = Config::from_toml_str(SHARED_KEY_CONFIG).unwrap();
    let store = MemoryStore::new()
        .with_entry("crosspost-test", "shared", "masto-token")
        .with_entry("crosspost-test", "bluesky_main", "bsky-pass");
    let prompt = ScriptedPrompt::new();
    let factory = RecordingFactory::new();

    let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &prompt);
    let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Post);
    let mut cache = CredentialCache::new();

    let results = dispatcher.dispatch("hello", &config, &mut cache).await.unwrap();

    assert_eq!(results.iter().filter(|r| r.is_success()).count(), 3);
    assert_eq!(prompt.ask_count(), 0);
    assert_eq!(store.write_count(), 0);
    // The shared key is read once, then served from the cache
    assert_eq!(store.read_count(), 2);
}

#[tokio::test]
async fn test_declined_prompt_skips_only_that_key() {
    let config = Config::from_toml_str(SHARED_KEY_CONFIG).unwrap();
    let store = MemoryStore::new();
    let prompt = ScriptedPrompt::new()
        .with_empty()
        .with_empty()
        .with_secret("bsky-pass");
    let factory = RecordingFactory::new();

    let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &prompt);
    let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Post);
    let mut cache = CredentialCache::new();

    let results = dispatcher.dispatch("hello", &config, &mut cache).await.unwrap();

    assert_eq!(
        results[0].outcome,
        Outcome::Skipped("missing credential".to_string())
    );
    assert_eq!(
        results[1].outcome,
        Outcome::Skipped("missing credential".to_string())
    );
    assert!(matches!(results[2].outcome, Outcome::Posted(_)));
    assert_eq!(store.peek("crosspost-test", "shared"), None);
}

#[tokio::test]
async fn test_failures_do_not_stop_later_accounts() {
    let config = Config::from_toml_str(SHARED_KEY_CONFIG).unwrap();
    let store = MemoryStore::new()
        .with_entry("crosspost-test", "shared", "masto-token")
        .with_entry("crosspost-test", "bluesky_main", "bsky-pass");
    let prompt = ScriptedPrompt::new();
    let factory = RecordingFactory::new()
        .fail_account("primary", PlatformError::RateLimit("slow down".to_string()));

    let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &prompt);
    let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Post);
    let mut cache = CredentialCache::new();

    let results = dispatcher.dispatch("hello", &config, &mut cache).await.unwrap();

    match &results[0].outcome {
        Outcome::Failed(reason) => assert!(reason.contains("slow down")),
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert!(results[1].is_success());
    assert!(results[2].is_success());
    assert_eq!(factory.post_count(), 2);
}

#[tokio::test]
async fn test_check_mode_never_prompts_or_posts() {
    let config = Config::from_toml_str(SHARED_KEY_CONFIG).unwrap();
    let store = MemoryStore::new()
        .with_entry("crosspost-test", "bluesky_main", "bsky-pass");
    let prompt = ScriptedPrompt::new().with_secret("should-not-be-used");
    let factory = RecordingFactory::new();

    let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &prompt);
    let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Check);
    let mut cache = CredentialCache::new();

    let results = dispatcher.dispatch("", &config, &mut cache).await.unwrap();

    assert!(matches!(results[0].outcome, Outcome::Skipped(_)));
    assert!(matches!(results[1].outcome, Outcome::Skipped(_)));
    assert_eq!(results[2].outcome, Outcome::Ready);
    assert_eq!(prompt.ask_count(), 0);
    assert_eq!(factory.post_count(), 0);
}

#[tokio::test]
async fn test_prompted_secret_persists_to_encrypted_store() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::from_toml_str(
        r#"
[mastodon]
enabled = true

[[mastodon.accounts]]
name = "primary"
instance = "https://mastodon.example"
keychain_key = "mastodon_primary"
"#,
    )
    .unwrap();

    let store = EncryptedFileStore::new(temp_dir.path().to_path_buf());
    store
        .set_master_password(SecretString::from("correct horse battery".to_string()))
        .unwrap();

    let prompt = ScriptedPrompt::new().with_secret("masto-token");
    let factory = RecordingFactory::new();
    {
        let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &prompt);
        let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Post);
        let mut cache = CredentialCache::new();
        dispatcher.dispatch("hello", &config, &mut cache).await.unwrap();
    }

    assert!(store.exists("crosspost", "mastodon_primary").unwrap());

    // A fresh run with a new cache finds the persisted secret
    let silent = ScriptedPrompt::new();
    let resolver = SecretResolver::new(&config.keychain_service, Some(&store), &silent);
    let dispatcher = PostDispatcher::new(resolver, &factory, DispatchMode::Post);
    let mut cache = CredentialCache::new();
    let results = dispatcher.dispatch("again", &config, &mut cache).await.unwrap();

    assert!(results[0].is_success());
    assert_eq!(silent.ask_count(), 0);
    assert_eq!(
        factory.builds().last().map(|(_, secret)| secret.as_str()),
        Some("masto-token")
    );
}
