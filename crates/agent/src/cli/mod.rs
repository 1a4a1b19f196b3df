pub mod ask;
pub mod config;
pub mod providers;
pub mod secret;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ba_domain::config::{AuthMethod, Config};
use ba_providers::{KeyringSecretStore, MemorySecretStore, SecretStore};

/// Keychain service used when `[llm.auth].service` is unset.
pub const DEFAULT_SECRET_SERVICE: &str = "browseragent";

/// browseragent: drive a tool-using LLM conversation against any backend.
#[derive(Debug, Parser)]
#[command(name = "browseragent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one task against the configured endpoint and print the answer.
    Ask {
        /// What the agent should do.
        task: String,
        /// Step budget override (`0` = unbounded).
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// List the provider adapters and show which one the config selects.
    Providers,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage secrets in the OS keychain.
    #[command(subcommand)]
    Secret(SecretCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

#[derive(Debug, Subcommand)]
pub enum SecretCommand {
    /// Store a secret, prompting for its value.
    Set { name: String },
    /// Print a secret, masked.
    Get { name: String },
    /// Delete a secret.
    Remove { name: String },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration and return it with the path it came from.
///
/// Looks at `BA_CONFIG`, then `./config.toml`, then
/// `<config dir>/browseragent/config.toml`. Falls back to the built-in
/// defaults when none exists (the returned path is then `None`).
pub fn load_config() -> anyhow::Result<(Config, Option<PathBuf>)> {
    match config_path() {
        Some(path) => Ok((read_config(&path)?, Some(path))),
        None => Ok((Config::default(), None)),
    }
}

pub fn read_config(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("BA_CONFIG") {
        // An explicit path that does not exist is reported by the read.
        return Some(PathBuf::from(explicit));
    }
    let local = Path::new("config.toml");
    if local.exists() {
        return Some(local.to_path_buf());
    }
    dirs::config_dir()
        .map(|d| d.join("browseragent").join("config.toml"))
        .filter(|p| p.exists())
}

/// Human-readable source of the loaded config.
pub fn describe_path(path: Option<&Path>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "built-in defaults".into(),
    }
}

/// The keychain store under the configured service name.
pub fn keychain(config: &Config) -> KeyringSecretStore {
    let service = config
        .llm
        .auth
        .service
        .clone()
        .unwrap_or_else(|| DEFAULT_SECRET_SERVICE.into());
    KeyringSecretStore::new(service)
}

/// Secret store for a task: the keychain for OAuth, otherwise an empty
/// in-memory store (API keys are resolved from `[llm.auth]` directly).
pub fn task_secret_store(config: &Config) -> Arc<dyn SecretStore> {
    match config.llm.auth.method {
        AuthMethod::Oauth => Arc::new(keychain(config)),
        AuthMethod::ApiKey => Arc::new(MemorySecretStore::new()),
    }
}
