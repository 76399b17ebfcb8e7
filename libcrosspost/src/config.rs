//! Configuration management for Crosspost
//!
//! The configuration file only describes accounts and where their secrets
//! live. It is parsed once into a validated, explicitly-typed [`Config`];
//! secrets themselves are resolved later by [`crate::resolver`].
//!
//! Each account carries exactly one credential reference:
//!
//! ```toml
//! credential = "literal-secret"            # inline
//! credential = { env = "MASTODON_TOKEN" }  # environment variable
//! credential = { keychain = "mastodon_1" } # secure store key
//! keychain_key = "mastodon_1"              # secure store key (short form)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialConfig;
use crate::error::{ConfigError, Result};

/// Secure-store namespace used when `keychain_service` is not set
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "crosspost";

/// Default Bluesky PDS
pub const DEFAULT_BLUESKY_SERVICE: &str = "https://bsky.social";

/// Default X API base URL
pub const DEFAULT_TWITTER_API_BASE: &str = "https://api.twitter.com";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "CROSSPOST_CONFIG";

/// Example configuration written when no config file exists yet
pub const EXAMPLE_CONFIG: &str = r#"# Crosspost configuration
#
# Credentials are never stored in this file. Each account points at its
# secret in one of three ways:
#   keychain_key = "key"             secure store (OS keyring by default)
#   credential = { env = "VAR" }     environment variable
#   credential = "literal"           inline (not recommended)
#
# Run `crosspost --setup` to enter secure-store credentials interactively.

# Optional: secure store namespace (defaults to "crosspost")
# keychain_service = "my-custom-service"

# Optional: secure store backend ("keyring" or "encrypted")
# [store]
# backend = "encrypted"
# path = "~/.config/crosspost/credentials"

[mastodon]
enabled = true

[[mastodon.accounts]]
name = "primary"
instance = "https://mastodon.social"
keychain_key = "mastodon_primary"

[[mastodon.accounts]]
name = "fosstodon"
instance = "https://fosstodon.org"
keychain_key = "mastodon_fosstodon"

[bluesky]
enabled = true

# Use an app password, not your account password:
# https://bsky.app/settings/app-passwords
[[bluesky.accounts]]
name = "main"
handle = "yourhandle.bsky.social"
keychain_key = "bluesky_main"

[nostr]
enabled = false

[[nostr.accounts]]
name = "nostr"
relays = ["wss://relay.damus.io", "wss://nos.lol"]
keychain_key = "nostr_main"

[twitter]
enabled = false

# The secret is a JSON bundle:
# {"api_key": "...", "api_secret": "...", "access_token": "...", "access_token_secret": "..."}
[[twitter.accounts]]
name = "x"
keychain_key = "twitter_main"
"#;

/// Supported platforms
///
/// Declaration order is the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Mastodon,
    Bluesky,
    Nostr,
    Twitter,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 4] = [
        PlatformKind::Mastodon,
        PlatformKind::Bluesky,
        PlatformKind::Nostr,
        PlatformKind::Twitter,
    ];

    /// Config-file key for this platform
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Mastodon => "mastodon",
            PlatformKind::Bluesky => "bluesky",
            PlatformKind::Nostr => "nostr",
            PlatformKind::Twitter => "twitter",
        }
    }

    /// Human-readable name for status lines
    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformKind::Mastodon => "Mastodon",
            PlatformKind::Bluesky => "Bluesky",
            PlatformKind::Nostr => "Nostr",
            PlatformKind::Twitter => "X",
        }
    }

    /// Whether the wire format needs explicit link facets
    pub fn needs_facets(&self) -> bool {
        matches!(self, PlatformKind::Bluesky)
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an account's secret comes from
#[derive(Debug)]
pub enum CredentialReference {
    /// Secret written directly in the config file
    Inline(SecretString),
    /// Name of an environment variable holding the secret
    EnvRef(String),
    /// Key of an entry in the secure store
    StoreRef(String),
}

impl CredentialReference {
    pub fn store_key(&self) -> Option<&str> {
        match self {
            CredentialReference::StoreRef(key) => Some(key),
            _ => None,
        }
    }

    /// Short description that never reveals the secret
    pub fn describe(&self) -> String {
        match self {
            CredentialReference::Inline(_) => "inline".to_string(),
            CredentialReference::EnvRef(var) => format!("env:{}", var),
            CredentialReference::StoreRef(key) => format!("store:{}", key),
        }
    }
}

/// Platform-specific addressing for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountEndpoint {
    Mastodon { instance: String },
    Bluesky { handle: String, service: String },
    Nostr { relays: Vec<String> },
    Twitter { api_base: String },
}

impl AccountEndpoint {
    pub fn kind(&self) -> PlatformKind {
        match self {
            AccountEndpoint::Mastodon { .. } => PlatformKind::Mastodon,
            AccountEndpoint::Bluesky { .. } => PlatformKind::Bluesky,
            AccountEndpoint::Nostr { .. } => PlatformKind::Nostr,
            AccountEndpoint::Twitter { .. } => PlatformKind::Twitter,
        }
    }
}

#[derive(Debug)]
pub struct AccountConfig {
    pub name: String,
    pub endpoint: AccountEndpoint,
    pub credential: CredentialReference,
}

#[derive(Debug)]
pub struct PlatformConfig {
    pub enabled: bool,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug)]
pub struct Config {
    /// Secure-store namespace
    pub keychain_service: String,
    /// Secure-store backend settings
    pub store: CredentialConfig,
    pub platforms: BTreeMap<PlatformKind, PlatformConfig>,
}

impl Config {
    /// Load configuration, honouring an explicit path first
    ///
    /// Does not bootstrap an example file; see [`discover_config`].
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match discover_config(explicit)? {
            ConfigDiscovery::Found(path) => Self::load_from_path(&path),
            ConfigDiscovery::Missing(path) => Err(ConfigError::NotFound(path).into()),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        tracing::debug!(
            "Loaded config from {} ({} platform sections)",
            path.display(),
            config.platforms.len()
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(raw.validate()?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(content).map_err(ConfigError::JsonParseError)?;
        Ok(raw.validate()?)
    }

    pub fn platform(&self, kind: PlatformKind) -> Option<&PlatformConfig> {
        self.platforms.get(&kind)
    }

    /// Enabled platforms in dispatch order
    pub fn enabled_platforms(&self) -> impl Iterator<Item = (PlatformKind, &PlatformConfig)> {
        self.platforms
            .iter()
            .filter(|(_, platform)| platform.enabled)
            .map(|(kind, platform)| (*kind, platform))
    }

    /// Whether any enabled account keeps its secret in the secure store
    pub fn uses_secure_store(&self) -> bool {
        self.enabled_platforms().any(|(_, platform)| {
            platform
                .accounts
                .iter()
                .any(|account| account.credential.store_key().is_some())
        })
    }
}

/// Outcome of looking for a config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDiscovery {
    Found(PathBuf),
    /// Nothing found; carries the default location for a new file
    Missing(PathBuf),
}

/// Find the config file
///
/// Order: explicit path, `CROSSPOST_CONFIG`, `./config.toml`,
/// `~/.config/crosspost/config.toml`. An explicit path or env override that
/// does not exist is an error rather than a fallthrough.
pub fn discover_config(explicit: Option<&Path>) -> Result<ConfigDiscovery> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(ConfigDiscovery::Found(path.to_path_buf()))
        } else {
            Err(ConfigError::NotFound(path.to_path_buf()).into())
        };
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(shellexpand::tilde(&path).to_string());
        return if path.exists() {
            Ok(ConfigDiscovery::Found(path))
        } else {
            Err(ConfigError::NotFound(path).into())
        };
    }

    let local = PathBuf::from("config.toml");
    if local.exists() {
        return Ok(ConfigDiscovery::Found(local));
    }

    let default_path = default_config_path()?;
    if default_path.exists() {
        Ok(ConfigDiscovery::Found(default_path))
    } else {
        Ok(ConfigDiscovery::Missing(default_path))
    }
}

/// `~/.config/crosspost/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConfigError::Invalid("cannot determine home directory".to_string()))?;

    Ok(home.join(".config").join("crosspost").join("config.toml"))
}

/// Write [`EXAMPLE_CONFIG`] to `path`, creating parent directories
pub fn write_example_config(path: &Path) -> Result<()> {
    let bootstrap_err = |source| ConfigError::Bootstrap {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(bootstrap_err)?;
    }
    std::fs::write(path, EXAMPLE_CONFIG).map_err(bootstrap_err)?;

    tracing::info!("Created example config at {}", path.display());
    Ok(())
}

// ----------------------------------------------------------------------------
// Raw (serde) layer
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    keychain_service: Option<String>,
    #[serde(default)]
    store: CredentialConfig,
    #[serde(default)]
    mastodon: Option<RawPlatform<MastodonFields>>,
    #[serde(default)]
    bluesky: Option<RawPlatform<BlueskyFields>>,
    #[serde(default)]
    nostr: Option<RawPlatform<NostrFields>>,
    #[serde(default)]
    twitter: Option<RawPlatform<TwitterFields>>,
}

#[derive(Debug, Deserialize)]
struct RawPlatform<E> {
    #[serde(default)]
    enabled: bool,
    #[serde(default = "Vec::new")]
    accounts: Vec<RawAccount<E>>,
}

#[derive(Debug, Deserialize)]
struct RawAccount<E> {
    name: String,
    #[serde(flatten)]
    endpoint: E,
    #[serde(default)]
    credential: Option<CredentialSpec>,
    #[serde(default)]
    keychain_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CredentialSpec {
    Inline(String),
    Env { env: String },
    Keychain { keychain: String },
}

#[derive(Debug, Deserialize)]
struct MastodonFields {
    #[serde(default)]
    instance: String,
}

#[derive(Debug, Deserialize)]
struct BlueskyFields {
    #[serde(default)]
    handle: String,
    #[serde(default)]
    service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NostrFields {
    #[serde(default)]
    relays: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TwitterFields {
    #[serde(default)]
    api_base: Option<String>,
}

trait IntoEndpoint {
    fn into_endpoint(self, account: &str) -> std::result::Result<AccountEndpoint, ConfigError>;
}

impl IntoEndpoint for MastodonFields {
    fn into_endpoint(self, account: &str) -> std::result::Result<AccountEndpoint, ConfigError> {
        let instance = self.instance.trim().trim_end_matches('/');
        if instance.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "mastodon account '{}' is missing 'instance'",
                account
            )));
        }

        let instance = if instance.starts_with("http://") || instance.starts_with("https://") {
            instance.to_string()
        } else {
            format!("https://{}", instance)
        };

        Ok(AccountEndpoint::Mastodon { instance })
    }
}

impl IntoEndpoint for BlueskyFields {
    fn into_endpoint(self, account: &str) -> std::result::Result<AccountEndpoint, ConfigError> {
        let handle = self.handle.trim().trim_start_matches('@');
        if handle.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "bluesky account '{}' is missing 'handle'",
                account
            )));
        }

        let service = self
            .service
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BLUESKY_SERVICE.to_string());

        Ok(AccountEndpoint::Bluesky {
            handle: handle.to_string(),
            service,
        })
    }
}

impl IntoEndpoint for NostrFields {
    fn into_endpoint(self, account: &str) -> std::result::Result<AccountEndpoint, ConfigError> {
        let relays: Vec<String> = self
            .relays
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        if relays.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "nostr account '{}' needs at least one relay",
                account
            )));
        }

        Ok(AccountEndpoint::Nostr { relays })
    }
}

impl IntoEndpoint for TwitterFields {
    fn into_endpoint(self, _account: &str) -> std::result::Result<AccountEndpoint, ConfigError> {
        let api_base = self
            .api_base
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TWITTER_API_BASE.to_string());

        Ok(AccountEndpoint::Twitter { api_base })
    }
}

impl RawConfig {
    fn validate(self) -> std::result::Result<Config, ConfigError> {
        let keychain_service = match self.keychain_service {
            Some(service) if service.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "keychain_service cannot be empty".to_string(),
                ));
            }
            Some(service) => service.trim().to_string(),
            None => DEFAULT_KEYCHAIN_SERVICE.to_string(),
        };

        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Invalid("store.path cannot be empty".to_string()));
        }

        let mut platforms = BTreeMap::new();
        insert_platform(&mut platforms, PlatformKind::Mastodon, self.mastodon)?;
        insert_platform(&mut platforms, PlatformKind::Bluesky, self.bluesky)?;
        insert_platform(&mut platforms, PlatformKind::Nostr, self.nostr)?;
        insert_platform(&mut platforms, PlatformKind::Twitter, self.twitter)?;

        Ok(Config {
            keychain_service,
            store: self.store,
            platforms,
        })
    }
}

fn insert_platform<E: IntoEndpoint>(
    platforms: &mut BTreeMap<PlatformKind, PlatformConfig>,
    kind: PlatformKind,
    raw: Option<RawPlatform<E>>,
) -> std::result::Result<(), ConfigError> {
    let Some(raw) = raw else {
        return Ok(());
    };

    let accounts = raw
        .accounts
        .into_iter()
        .map(|account| validate_account(kind, account))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    platforms.insert(
        kind,
        PlatformConfig {
            enabled: raw.enabled,
            accounts,
        },
    );
    Ok(())
}

fn validate_account<E: IntoEndpoint>(
    kind: PlatformKind,
    raw: RawAccount<E>,
) -> std::result::Result<AccountConfig, ConfigError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} account is missing 'name'",
            kind
        )));
    }

    let credential = match (raw.credential, raw.keychain_key) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(format!(
                "{} account '{}' sets both 'credential' and 'keychain_key'",
                kind, name
            )));
        }
        (None, None) => {
            return Err(ConfigError::Invalid(format!(
                "{} account '{}' has no 'credential' or 'keychain_key'",
                kind, name
            )));
        }
        (Some(CredentialSpec::Inline(secret)), None) => {
            non_empty(kind, &name, "credential", &secret)?;
            CredentialReference::Inline(SecretString::from(secret))
        }
        (Some(CredentialSpec::Env { env }), None) => {
            non_empty(kind, &name, "credential.env", &env)?;
            CredentialReference::EnvRef(env.trim().to_string())
        }
        (Some(CredentialSpec::Keychain { keychain }), None) | (None, Some(keychain)) => {
            non_empty(kind, &name, "keychain key", &keychain)?;
            CredentialReference::StoreRef(keychain.trim().to_string())
        }
    };

    let endpoint = raw.endpoint.into_endpoint(&name)?;

    Ok(AccountConfig {
        name,
        endpoint,
        credential,
    })
}

fn non_empty(
    kind: PlatformKind,
    account: &str,
    field: &str,
    value: &str,
) -> std::result::Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} account '{}' has an empty {}",
            kind, account, field
        )));
    }
    Ok(())
}
