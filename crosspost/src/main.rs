//! crosspost - Post one message to every configured account

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use libcrosspost::config::{discover_config, write_example_config, ConfigDiscovery};
use libcrosspost::credentials::{open_store, CredentialStore};
use libcrosspost::error::ConfigError;
use libcrosspost::logging::{LogFormat, LoggingConfig};
use libcrosspost::setup::{run_setup_with, SetupEntry, SetupStatus};
use libcrosspost::{
    Config, CredentialCache, CrosspostError, DefaultClientFactory, DispatchMode, Outcome,
    PostDispatcher, PostResult, SecretResolver, TerminalPrompt,
};

#[derive(Parser, Debug)]
#[command(name = "crosspost")]
#[command(version)]
#[command(
    about = "Post one message to all your Mastodon, Bluesky, Nostr and X accounts",
    long_about = None
)]
struct Cli {
    /// Text to post
    #[arg(required_unless_present_any = ["setup", "check"])]
    text: Option<String>,

    /// Enter secure-store credentials for every enabled account, then exit
    #[arg(long, conflicts_with = "check")]
    setup: bool,

    /// Check that every enabled account has a credential, without posting or prompting
    #[arg(long)]
    check: bool,

    /// Path to the config file (TOML, or JSON with a .json extension)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<CrosspostError>()
            .map(CrosspostError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let text = match cli.text.as_deref() {
        Some(text) if !cli.setup && !cli.check && text.trim().is_empty() => {
            eprintln!("{}", Cli::command().render_usage());
            return Err(
                CrosspostError::InvalidInput("Post text cannot be empty".to_string()).into(),
            );
        }
        Some(text) => text.to_string(),
        None => String::new(),
    };

    let mut config = load_config(cli.config.as_deref())?;
    config.store.load_master_password_from_env();

    let store: Option<Box<dyn CredentialStore>> = if config.uses_secure_store() {
        Some(open_store(&config.store).context("Cannot open secure credential store")?)
    } else {
        None
    };

    let prompt = TerminalPrompt::new();

    if cli.setup {
        match store.as_deref() {
            Some(store) => setup(&config, store, &prompt),
            None => println!(
                "No enabled account keeps its credential in the secure store; nothing to set up."
            ),
        }
        return Ok(());
    }

    let mode = if cli.check {
        DispatchMode::Check
    } else {
        DispatchMode::Post
    };

    let resolver = SecretResolver::new(&config.keychain_service, store.as_deref(), &prompt);
    let factory = DefaultClientFactory;
    let dispatcher = PostDispatcher::new(resolver, &factory, mode);
    let mut cache = CredentialCache::new();

    let results = dispatcher
        .dispatch_with(&text, &config, &mut cache, print_result)
        .await?;

    print_summary(mode, &results);
    Ok(())
}

/// Find and load the config, writing an example on first run
fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = match discover_config(explicit)? {
        ConfigDiscovery::Found(path) => path,
        ConfigDiscovery::Missing(path) => {
            write_example_config(&path)?;
            println!("📝 Created an example config at {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Edit it to list your accounts and enable the platforms you use");
            println!("  2. Run `crosspost --setup` to store credentials securely");
            println!("  3. Run `crosspost \"Hello, world!\"`");
            return Err(CrosspostError::from(ConfigError::NotFound(path)).into());
        }
    };

    let config = Config::load_from_path(&path)?;
    tracing::debug!("Using config {}", path.display());
    Ok(config)
}

fn print_result(result: &PostResult) {
    let who = format!("{} ({})", result.platform.display_name(), result.account);

    match &result.outcome {
        Outcome::Posted(post_id) => println!("✅ {}: posted {}", who, post_id),
        Outcome::Ready => println!("✅ {}: credential ready", who),
        Outcome::Skipped(reason) => println!("⚠️  {}: skipped ({})", who, reason),
        Outcome::Failed(reason) => eprintln!("❌ {}: failed: {}", who, reason),
    }
}

fn print_summary(mode: DispatchMode, results: &[PostResult]) {
    if results.is_empty() {
        println!("No enabled accounts; nothing to do.");
        return;
    }

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    match mode {
        DispatchMode::Post => {
            println!("\nPosted to {} of {} account(s).", succeeded, results.len())
        }
        DispatchMode::Check => {
            println!("\n{} of {} account(s) ready.", succeeded, results.len())
        }
    }
}

fn setup(config: &Config, store: &dyn CredentialStore, prompt: &TerminalPrompt) {
    println!(
        "\n🔐 Setting up credentials for service '{}' ({} store)",
        config.keychain_service,
        store.backend_name()
    );
    println!("{}", "=".repeat(60));

    let report = run_setup_with(
        config,
        store,
        prompt,
        &config.keychain_service,
        print_setup_entry,
    );

    println!("\n{}", "=".repeat(60));
    if report.aborted {
        println!("Setup cancelled; credentials saved so far are kept.");
    } else {
        println!("✨ Setup complete! {} credential(s) saved.", report.stored_count());
    }
}

fn print_setup_entry(entry: &SetupEntry) {
    let platform = entry.platform.display_name();
    let account = entry.account.as_deref().unwrap_or_default();

    match &entry.status {
        SetupStatus::PlatformDisabled => println!("⏭️  {} is disabled, skipping", platform),
        SetupStatus::NotStoreManaged(source) => {
            println!("⏭️  {} ({}): credential comes from {}", platform, account, source)
        }
        SetupStatus::KeptExisting => {
            println!("✅ {} ({}): keeping existing credential", platform, account)
        }
        SetupStatus::Stored => println!("✅ {} ({}): saved", platform, account),
        SetupStatus::Empty => {
            println!("⏭️  {} ({}): nothing entered, skipped", platform, account)
        }
        SetupStatus::Failed(reason) => {
            eprintln!("❌ {} ({}): failed to save: {}", platform, account, reason)
        }
    }
}
