//! Credential resolution
//!
//! Turns a [`CredentialReference`] into a secret. Secure-store lookups are
//! cached for the run in a [`CredentialCache`] owned by the caller, so each
//! store key is read (or prompted for) at most once per invocation.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};

use crate::config::CredentialReference;
use crate::credentials::CredentialStore;
use crate::error::{CredentialError, CrosspostError};
use crate::prompt::{CredentialPrompt, PromptResponse};

/// Copy a secret without exposing it outside this crate
pub(crate) fn duplicate_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

/// Secrets resolved from the secure store during this run
///
/// Keyed by `(namespace, key)`.
#[derive(Default)]
pub struct CredentialCache {
    entries: HashMap<(String, String), SecretString>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<&SecretString> {
        self.entries.get(&(namespace.to_string(), key.to_string()))
    }

    pub fn insert(&mut self, namespace: &str, key: &str, secret: SecretString) {
        self.entries
            .insert((namespace.to_string(), key.to_string()), secret);
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.get(namespace, key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves credential references against env, store and prompt
pub struct SecretResolver<'a> {
    namespace: String,
    store: Option<&'a dyn CredentialStore>,
    prompt: &'a dyn CredentialPrompt,
}

impl<'a> SecretResolver<'a> {
    /// `store` is `None` when no secure store was opened for this run
    pub fn new(
        namespace: impl Into<String>,
        store: Option<&'a dyn CredentialStore>,
        prompt: &'a dyn CredentialPrompt,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            prompt,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolve one account's credential
    ///
    /// Returns `None` when the secret is unavailable; the reason has already
    /// been logged. Never fails the run.
    pub fn resolve(
        &self,
        reference: &CredentialReference,
        account_name: &str,
        platform_name: &str,
        allow_prompt: bool,
        cache: &mut CredentialCache,
    ) -> Option<SecretString> {
        match reference {
            CredentialReference::Inline(secret) => Some(duplicate_secret(secret)),
            CredentialReference::EnvRef(var) => self.resolve_env(var, account_name, platform_name),
            CredentialReference::StoreRef(key) => {
                if let Some(cached) = cache.get(&self.namespace, key) {
                    tracing::debug!("Credential cache hit for {}/{}", self.namespace, key);
                    return Some(duplicate_secret(cached));
                }

                self.resolve_store(key, account_name, platform_name, allow_prompt, cache)
            }
        }
    }

    fn resolve_env(&self, var: &str, account_name: &str, platform_name: &str) -> Option<SecretString> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => {
                tracing::debug!(
                    "Resolved {} account '{}' from environment variable {}",
                    platform_name,
                    account_name,
                    var
                );
                Some(SecretString::from(value))
            }
            _ => {
                tracing::warn!(
                    "Environment variable {} is not set ({} account '{}')",
                    var,
                    platform_name,
                    account_name
                );
                None
            }
        }
    }

    fn resolve_store(
        &self,
        key: &str,
        account_name: &str,
        platform_name: &str,
        allow_prompt: bool,
        cache: &mut CredentialCache,
    ) -> Option<SecretString> {
        let Some(store) = self.store else {
            tracing::warn!(
                "No secure store available for {} account '{}' (key '{}')",
                platform_name,
                account_name,
                key
            );
            return None;
        };

        match store.retrieve(&self.namespace, key) {
            Ok(value) => {
                tracing::debug!(
                    "Found credential {}/{} in {} store",
                    self.namespace,
                    key,
                    store.backend_name()
                );
                let secret = SecretString::from(value);
                cache.insert(&self.namespace, key, duplicate_secret(&secret));
                return Some(secret);
            }
            Err(CrosspostError::Credential(CredentialError::NotFound(_))) => {
                tracing::debug!("No credential for {}/{} in secure store", self.namespace, key);
            }
            Err(e) => {
                tracing::warn!(
                    "Secure store lookup for {}/{} failed: {}",
                    self.namespace,
                    key,
                    e
                );
            }
        }

        if !allow_prompt {
            return None;
        }

        let label = format!(
            "Enter credential for {} account '{}'",
            platform_name, account_name
        );

        let secret = match self.prompt.ask_secret(&label) {
            PromptResponse::Secret(secret) => secret,
            PromptResponse::Empty => {
                tracing::warn!(
                    "No credential entered for {} account '{}'",
                    platform_name,
                    account_name
                );
                return None;
            }
            PromptResponse::Interrupted => {
                tracing::warn!(
                    "Prompt cancelled; skipping {} account '{}'",
                    platform_name,
                    account_name
                );
                return None;
            }
        };

        let location = format!(
            "{} store as '{}/{}'",
            store.backend_name(),
            self.namespace,
            key
        );

        if let Err(e) = store.store(&self.namespace, key, secret.expose_secret()) {
            tracing::warn!(
                "Could not save credential for {} account '{}': {}",
                platform_name,
                account_name,
                e
            );
            self.prompt.save_failed(&location, &e.to_string());
            return None;
        }

        tracing::info!(
            "Saved credential for {} account '{}' to {}",
            platform_name,
            account_name,
            location
        );
        self.prompt.saved(&location);

        cache.insert(&self.namespace, key, duplicate_secret(&secret));
        Some(secret)
    }
}
