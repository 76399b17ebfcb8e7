//! Secure credential storage for Crosspost
//!
//! Secrets referenced by `keychain_key` live outside the config file, in a
//! secure store addressed by a namespace (the `keychain_service`, default
//! `"crosspost"`) and a per-account key.
//!
//! # Architecture
//!
//! - `CredentialStore` trait: common interface for all storage backends
//! - `KeyringStore`: OS-native secure storage (default)
//! - `EncryptedFileStore`: age-encrypted files for hosts without a keyring
//! - `MemoryStore`: process-local store used by tests
//! - `open_store`: picks a backend from `[store]` configuration
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::credentials::{open_store, CredentialConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = open_store(&CredentialConfig::default())?;
//!
//! store.store("crosspost", "mastodon_primary", "token-123")?;
//! let token = store.retrieve("crosspost", "mastodon_primary")?;
//!
//! if store.exists("crosspost", "bluesky_main")? {
//!     println!("Bluesky app password found");
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, Result};

/// Environment variable holding the encrypted-store master password
pub const MASTER_PASSWORD_ENV_VAR: &str = "CROSSPOST_MASTER_PASSWORD";

/// Trait for credential storage backends
///
/// # Namespace and Key
///
/// - **Namespace**: the configured `keychain_service` (e.g. "crosspost")
/// - **Key**: the account's `keychain_key` (e.g. "mastodon_primary")
pub trait CredentialStore: Send + Sync {
    /// Store a credential, replacing any existing value
    fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Retrieve a credential
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` when no entry exists, and other
    /// `CredentialError` variants when the backend itself fails.
    fn retrieve(&self, namespace: &str, key: &str) -> Result<String>;

    /// Check if a credential exists
    fn exists(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Name of this storage backend, for logging
    fn backend_name(&self) -> &str;
}

/// OS-native keyring storage backend
///
/// - **macOS**: Keychain
/// - **Windows**: Credential Manager
/// - **Linux**: Secret Service (GNOME Keyring/KWallet) via D-Bus
///
/// Entries are created with the namespace as the keyring service and the
/// key as the keyring user, so `security find-generic-password -s crosspost`
/// lists them on macOS.
pub struct KeyringStore;

impl KeyringStore {
    /// Create a new KeyringStore
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::KeyringUnavailable` if the OS keyring
    /// cannot be accessed (e.g., headless Linux without Secret Service).
    pub fn new() -> Result<Self> {
        // Creating an entry fails fast when no platform keyring is compiled in
        let test_entry = keyring::Entry::new("crosspost.availability", "check");

        match test_entry {
            Ok(_) => Ok(Self),
            Err(e) => Err(CredentialError::KeyringUnavailable(format!(
                "OS keyring not accessible: {}",
                e
            ))
            .into()),
        }
    }

    fn entry(namespace: &str, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(namespace, key)
            .map_err(|e| CredentialError::KeyringUnavailable(e.to_string()).into())
    }
}

impl CredentialStore for KeyringStore {
    fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        Self::entry(namespace, key)?
            .set_password(value)
            .map_err(|e| CredentialError::Keyring(e.to_string()))?;

        tracing::debug!("Stored credential {}/{} in OS keyring", namespace, key);
        Ok(())
    }

    fn retrieve(&self, namespace: &str, key: &str) -> Result<String> {
        match Self::entry(namespace, key)?.get_password() {
            Ok(password) => {
                tracing::debug!("Retrieved credential {}/{} from OS keyring", namespace, key);
                Ok(password)
            }
            Err(keyring::Error::NoEntry) => {
                Err(CredentialError::NotFound(format!("{}/{}", namespace, key)).into())
            }
            Err(e) => Err(CredentialError::Keyring(e.to_string()).into()),
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        match Self::entry(namespace, key)?.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(CredentialError::Keyring(e.to_string()).into()),
        }
    }

    fn backend_name(&self) -> &str {
        "keyring"
    }
}

/// Validate that a path is not a symlink
///
/// Credential files must be regular files so a swapped-in link cannot
/// redirect reads or writes elsewhere.
pub fn validate_not_symlink(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        CredentialError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read metadata for '{}': {}", path.display(), e),
        ))
    })?;

    if metadata.is_symlink() {
        return Err(CredentialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "Credential file '{}' is a symbolic link; credential files must be regular files",
                path.display()
            ),
        ))
        .into());
    }

    Ok(())
}

/// Encrypted file storage backend
///
/// Stores each credential in its own `age` passphrase-encrypted file:
///
/// - Location: configured `store.path` (default `~/.config/crosspost/credentials`)
/// - Naming: `{namespace}.{key}.age`
/// - Permissions: 600 on Unix
pub struct EncryptedFileStore {
    base_path: PathBuf,
    master_password: RwLock<Option<SecretString>>,
}

impl EncryptedFileStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            master_password: RwLock::new(None),
        }
    }

    /// Set the master password for encryption/decryption
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::WeakPassword` if the password is less than 8 characters.
    pub fn set_master_password(&self, password: SecretString) -> Result<()> {
        if password.expose_secret().chars().count() < 8 {
            return Err(CredentialError::WeakPassword.into());
        }

        let mut guard = self
            .master_password
            .write()
            .map_err(|_| CredentialError::Encryption("master password lock poisoned".to_string()))?;
        *guard = Some(password);

        tracing::debug!("Master password set for encrypted file store");
        Ok(())
    }

    fn passphrase(&self) -> Result<age::secrecy::Secret<String>> {
        let guard = self
            .master_password
            .read()
            .map_err(|_| CredentialError::Encryption("master password lock poisoned".to_string()))?;
        let password = guard.as_ref().ok_or(CredentialError::MasterPasswordNotSet)?;

        Ok(age::secrecy::Secret::new(password.expose_secret().to_string()))
    }

    pub(crate) fn encrypt(&self, data: &str) -> Result<Vec<u8>> {
        let encryptor = age::Encryptor::with_user_passphrase(self.passphrase()?);

        let mut encrypted = vec![];
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .write_all(data.as_bytes())
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(encrypted)
    }

    fn decrypt(&self, data: &[u8]) -> Result<String> {
        let decryptor = match age::Decryptor::new(data) {
            Ok(age::Decryptor::Passphrase(d)) => d,
            Ok(_) => {
                return Err(CredentialError::Encryption(
                    "Invalid encryption format (expected passphrase)".to_string(),
                )
                .into())
            }
            Err(e) => return Err(CredentialError::Encryption(e.to_string()).into()),
        };

        let mut decrypted = vec![];
        let mut reader = decryptor
            .decrypt(&self.passphrase()?, None)
            .map_err(|e| CredentialError::Encryption(format!("decryption failed: {}", e)))?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        Ok(String::from_utf8(decrypted)
            .map_err(|e| CredentialError::Encryption(format!("Invalid UTF-8: {}", e)))?)
    }

    fn file_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        let is_safe = |part: &str| {
            !part.is_empty()
                && !part.contains(['/', '\\'])
                && part != "."
                && part != ".."
        };

        if !is_safe(namespace) || !is_safe(key) {
            return Err(CredentialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}/{}' cannot be used as a credential file name", namespace, key),
            ))
            .into());
        }

        Ok(self.base_path.join(format!("{}.{}.age", namespace, key)))
    }
}

impl CredentialStore for EncryptedFileStore {
    fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let encrypted = self.encrypt(value)?;
        let file_path = self.file_path(namespace, key)?;

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).map_err(CredentialError::Io)?;
        }

        if file_path.exists() {
            validate_not_symlink(&file_path)?;
        }

        std::fs::write(&file_path, encrypted).map_err(CredentialError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&file_path, perms).map_err(CredentialError::Io)?;
        }

        tracing::debug!(
            "Stored encrypted credential {}/{} at {:?}",
            namespace,
            key,
            file_path
        );
        Ok(())
    }

    fn retrieve(&self, namespace: &str, key: &str) -> Result<String> {
        let file_path = self.file_path(namespace, key)?;

        if !file_path.exists() {
            return Err(CredentialError::NotFound(format!("{}/{}", namespace, key)).into());
        }

        validate_not_symlink(&file_path)?;

        let encrypted = std::fs::read(&file_path).map_err(CredentialError::Io)?;
        let decrypted = self.decrypt(&encrypted)?;

        tracing::debug!(
            "Retrieved encrypted credential {}/{} from {:?}",
            namespace,
            key,
            file_path
        );
        Ok(decrypted)
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.file_path(namespace, key)?.exists())
    }

    fn backend_name(&self) -> &str {
        "encrypted_file"
    }
}

/// In-memory credential store
///
/// Nothing persists past the process. Counts reads and writes so tests can
/// assert how often the resolver touched the store, and can be switched into
/// a failing mode to simulate backend errors.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failure: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails with a keyring error
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Seed an entry without counting it as a write
    pub fn with_entry(self, namespace: &str, key: &str, value: &str) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((namespace.to_string(), key.to_string()), value.to_string());
        }
        self
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current value of an entry, without counting a read
    pub fn peek(&self, namespace: &str, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(CredentialError::Keyring(message.clone()).into()),
            None => Ok(()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), String>>> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::Keyring("memory store lock poisoned".to_string()).into())
    }
}

impl CredentialStore for MemoryStore {
    fn store(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        self.lock()?
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn retrieve(&self, namespace: &str, key: &str) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        self.lock()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(format!("{}/{}", namespace, key)).into())
    }

    fn exists(&self, namespace: &str, key: &str) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        Ok(self
            .lock()?
            .contains_key(&(namespace.to_string(), key.to_string())))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS-native keyring (macOS Keychain, Windows Credential Manager, Linux Secret Service)
    #[default]
    Keyring,
    /// Encrypted files with master password
    Encrypted,
}

/// Credential storage configuration (`[store]` section)
#[derive(Debug, Deserialize)]
pub struct CredentialConfig {
    /// Storage backend to use
    #[serde(default, alias = "backend")]
    pub storage: StorageBackend,

    /// Directory for encrypted file storage (keyring doesn't use files)
    #[serde(default = "default_credential_path")]
    pub path: String,

    /// Master password for encrypted storage (never read from the file)
    #[serde(skip)]
    pub master_password: Option<SecretString>,
}

fn default_credential_path() -> String {
    "~/.config/crosspost/credentials".to_string()
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Keyring,
            path: default_credential_path(),
            master_password: None,
        }
    }
}

impl CredentialConfig {
    /// Load master password from `CROSSPOST_MASTER_PASSWORD` if set
    pub fn load_master_password_from_env(&mut self) {
        if let Ok(password) = std::env::var(MASTER_PASSWORD_ENV_VAR) {
            if !password.is_empty() {
                self.master_password = Some(SecretString::from(password));
                tracing::debug!(
                    "Loaded master password from {} environment variable",
                    MASTER_PASSWORD_ENV_VAR
                );
            }
        }
    }

    /// Expand `~` in the credential path
    pub fn expand_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Open the configured secure store
///
/// 1. `keyring`: the OS keyring; if it is unavailable and a master password
///    is known, fall back to encrypted files.
/// 2. `encrypted`: encrypted files, with the master password from the
///    config/env or an interactive prompt when a TTY is attached.
///
/// # Errors
///
/// Returns `CredentialError::NoStoreAvailable` when no backend can be used.
pub fn open_store(config: &CredentialConfig) -> Result<Box<dyn CredentialStore>> {
    if config.storage == StorageBackend::Keyring {
        match KeyringStore::new() {
            Ok(store) => {
                tracing::info!("Using OS keyring for credential storage");
                return Ok(Box::new(store));
            }
            Err(e) if config.master_password.is_some() => {
                tracing::warn!(
                    "OS keyring unavailable: {}. Falling back to encrypted files.",
                    e
                );
            }
            Err(e) => {
                tracing::error!("OS keyring unavailable: {}", e);
                return Err(CredentialError::NoStoreAvailable.into());
            }
        }
    }

    let store = EncryptedFileStore::new(config.expand_path());

    let password = match &config.master_password {
        Some(password) => SecretString::from(password.expose_secret().to_string()),
        None => prompt_master_password()?,
    };

    store.set_master_password(password)?;
    tracing::info!("Using encrypted file storage for credentials");
    Ok(Box::new(store))
}

fn prompt_master_password() -> Result<SecretString> {
    if !atty::is(atty::Stream::Stdin) {
        tracing::error!(
            "Master password not set ({}) and no TTY available",
            MASTER_PASSWORD_ENV_VAR
        );
        return Err(CredentialError::MasterPasswordNotSet.into());
    }

    match rpassword::prompt_password("Enter master password for credential encryption: ") {
        Ok(password) if !password.is_empty() => Ok(SecretString::from(password)),
        Ok(_) => Err(CredentialError::MasterPasswordNotSet.into()),
        Err(e) => {
            tracing::error!("Failed to prompt for master password: {}", e);
            Err(CredentialError::NoStoreAvailable.into())
        }
    }
}
