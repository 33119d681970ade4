//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `--config` on the command line
//! 2. `$MAILBOT_CONFIG` (environment variable)
//! 3. `~/.config/mailbot/config.toml` (Linux)
//!    `~/Library/Application Support/mailbot/config.toml` (macOS)
//!    `%APPDATA%\mailbot\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! ```toml
//! [mailbox]
//! maildir = "/home/me/Maildir/bot"
//! timeout_secs = 600
//!
//! [[callback]]
//! name = "invoices"
//! action = "command"
//! command = ["/usr/local/bin/file-invoice"]
//! rules = { subject = ['invoice #(\d+)'], from = ['@billing\.example\.com'] }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::actions;
use crate::error::{MailbotError, Result};
use crate::registry::Registry;
use crate::rules::ruleset::RuleSet;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// The mailbox to poll.
    pub mailbox: MailboxConfig,
    /// Declared callbacks, registered in file order.
    #[serde(rename = "callback")]
    pub callbacks: Vec<CallbackConfig>,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override the directory the log file is written to.
    pub log_dir: Option<PathBuf>,
}

/// Mailbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Maildir directory to poll.
    pub maildir: Option<PathBuf>,
    /// Seconds a message may stay claimed before it is released again.
    /// Absent disables timeout recovery.
    pub timeout_secs: Option<i64>,
    /// Seconds between passes in watch mode.
    pub poll_interval_secs: u64,
}

/// Built-in action a declared callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Log,
    Command,
}

/// One `[[callback]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Unique registry key.
    pub name: String,
    pub action: ActionKind,
    /// Program and arguments for `action = "command"`.
    #[serde(default)]
    pub command: Vec<String>,
    /// Field name → regex list. Empty matches every message.
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<String>>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            maildir: None,
            timeout_secs: None,
            poll_interval_secs: 60,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit`, or else the standard locations.
///
/// A file that was asked for (by argument or `$MAILBOT_CONFIG`) must exist.
/// A missing file at the default location yields the defaults. Any file
/// that exists must read and parse.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => match std::env::var_os("MAILBOT_CONFIG") {
            Some(env_path) => (PathBuf::from(env_path), true),
            None => match config_file_path() {
                Some(path) => (path, false),
                None => return Ok(Config::default()),
            },
        },
    };

    if !required && !path.exists() {
        return Ok(Config::default());
    }
    load_from_path(&path)
}

/// Read and parse one config file.
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MailbotError::io(path, e))?;
    toml::from_str::<Config>(&contents)
        .map_err(|e| MailbotError::Config(format!("{}: {e}", path.display())))
}

/// Default config file path under the platform config directory.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mailbot").join("config.toml"))
}

/// Return the directory the log file is written to.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailbot")
}

/// Claim timeout from a number of seconds. `None` disables recovery.
pub fn claim_timeout(secs: Option<i64>) -> Result<Option<Duration>> {
    secs.map(|s| {
        Duration::try_seconds(s)
            .ok_or_else(|| MailbotError::Config(format!("timeout of {s} seconds is out of range")))
    })
    .transpose()
}

/// Build a registry holding every declared callback, in file order.
pub fn build_registry(config: &Config) -> Result<Registry> {
    let mut registry = Registry::new();
    for cb in &config.callbacks {
        let rules = RuleSet::from_raw(&cb.rules)?;
        registry.register_boxed(actions::from_config(cb)?, Some(rules))?;
    }
    Ok(registry)
}
