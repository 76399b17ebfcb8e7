//! Crosspost - one message, every account
//!
//! This library loads account configuration, resolves each account's secret
//! (inline, environment, or secure store with prompt-and-save fallback) and
//! posts to Mastodon, Bluesky, Nostr and X, isolating per-account failures.

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod facets;
pub mod logging;
pub mod platforms;
pub mod prompt;
pub mod resolver;
pub mod setup;

// Re-export commonly used types
pub use config::{AccountConfig, Config, CredentialReference, PlatformKind};
pub use credentials::{open_store, CredentialConfig, CredentialStore, StorageBackend};
pub use dispatcher::{DispatchMode, Outcome, PostDispatcher, PostResult};
pub use error::{CrosspostError, Result};
pub use facets::Facet;
pub use platforms::{ClientFactory, DefaultClientFactory, PlatformClient};
pub use prompt::{CredentialPrompt, PromptResponse, TerminalPrompt};
pub use resolver::{CredentialCache, SecretResolver};
