//! Interactive credential provisioning
//!
//! Walks the enabled accounts that keep their secret in the secure store and
//! asks for each one, writing the answer to the store. Nothing is posted.

use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::{Config, PlatformKind};
use crate::credentials::CredentialStore;
use crate::prompt::{CredentialPrompt, PromptResponse};

/// What happened to one platform or account during setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStatus {
    /// Whole platform skipped
    PlatformDisabled,
    /// Credential comes from the config file or environment
    NotStoreManaged(String),
    /// An entry existed and the user kept it
    KeptExisting,
    Stored,
    /// Nothing entered
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupEntry {
    pub platform: PlatformKind,
    /// `None` for platform-level entries
    pub account: Option<String>,
    pub status: SetupStatus,
}

#[derive(Debug, Default)]
pub struct SetupReport {
    pub entries: Vec<SetupEntry>,
    /// Ctrl+C ended setup early
    pub aborted: bool,
}

impl SetupReport {
    pub fn stored_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == SetupStatus::Stored)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, SetupStatus::Failed(_)))
            .count()
    }
}

pub fn run_setup(
    config: &Config,
    store: &dyn CredentialStore,
    prompt: &dyn CredentialPrompt,
    namespace: &str,
) -> SetupReport {
    run_setup_with(config, store, prompt, namespace, |_| {})
}

/// Run setup, handing each entry to `observer` as it is produced
pub fn run_setup_with<F>(
    config: &Config,
    store: &dyn CredentialStore,
    prompt: &dyn CredentialPrompt,
    namespace: &str,
    mut observer: F,
) -> SetupReport
where
    F: FnMut(&SetupEntry),
{
    let mut report = SetupReport::default();
    let mut record = |report: &mut SetupReport, entry: SetupEntry| {
        observer(&entry);
        report.entries.push(entry);
    };

    for kind in PlatformKind::ALL {
        let Some(platform) = config.platform(kind) else {
            continue;
        };

        if !platform.enabled {
            record(
                &mut report,
                SetupEntry {
                    platform: kind,
                    account: None,
                    status: SetupStatus::PlatformDisabled,
                },
            );
            continue;
        }

        for account in &platform.accounts {
            let entry = |status| SetupEntry {
                platform: kind,
                account: Some(account.name.clone()),
                status,
            };

            let Some(key) = account.credential.store_key() else {
                debug!("{} account '{}' is not store-managed", kind, account.name);
                record(
                    &mut report,
                    entry(SetupStatus::NotStoreManaged(account.credential.describe())),
                );
                continue;
            };

            let exists = store.exists(namespace, key).unwrap_or_else(|e| {
                warn!("Could not check {}/{} in secure store: {}", namespace, key, e);
                false
            });

            if exists {
                let question = format!(
                    "Credential already exists for {} account '{}'. Skip?",
                    kind.display_name(),
                    account.name
                );
                if prompt.confirm(&question, true) {
                    record(&mut report, entry(SetupStatus::KeptExisting));
                    continue;
                }
            }

            let label = format!(
                "Enter {} credential for '{}'",
                kind.display_name(),
                account.name
            );

            let status = match prompt.ask_secret(&label) {
                PromptResponse::Secret(secret) => {
                    match store.store(namespace, key, secret.expose_secret()) {
                        Ok(()) => SetupStatus::Stored,
                        Err(e) => SetupStatus::Failed(e.to_string()),
                    }
                }
                PromptResponse::Empty => SetupStatus::Empty,
                PromptResponse::Interrupted => {
                    warn!("Setup interrupted at {} account '{}'", kind, account.name);
                    report.aborted = true;
                    return report;
                }
            };

            record(&mut report, entry(status));
        }
    }

    report
}
