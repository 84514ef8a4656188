//! Configuration management for Lectern.
//!
//! The bot reads a single configuration file at `~/.lectern/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `DISCORD_TOKEN` → discord.bot_token
//! - `LECTERN_LOG_LEVEL` → observability.log_level
//! - `LECTERN_LOG_FORMAT` → observability.log_format
//! - `LECTERN_TICK_SECS` → reading.tick_interval_secs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest accepted paragraphs-per-chunk value.
pub const MIN_CHUNK_SIZE: usize = 1;
/// Largest accepted paragraphs-per-chunk value.
pub const MAX_CHUNK_SIZE: usize = 50;
/// Longest scheduler interval that still lands inside every minute.
pub const MAX_TICK_INTERVAL_SECS: u64 = 60;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".lectern"),
        |dirs| dirs.home_dir().join(".lectern"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Discord
// ============================================================================

/// Discord bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token. Usually supplied through `DISCORD_TOKEN`.
    #[serde(default)]
    pub bot_token: String,

    /// Guild IDs the bot answers in. Empty means every guild.
    #[serde(default)]
    pub allowed_guilds: Vec<String>,

    /// Prefix that marks a message as a command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_guilds: Vec::new(),
            command_prefix: default_command_prefix(),
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Reading session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingConfig {
    /// Paragraphs per chunk for newly loaded texts.
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,

    /// Seconds between scheduler evaluations, at most 60.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,

    #[serde(default)]
    pub reading: ReadingConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable fallbacks.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord.bot_token = token;
        }
        if let Some(level) = lookup("LECTERN_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("LECTERN_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(secs) = lookup("LECTERN_TICK_SECS") {
            match secs.parse() {
                Ok(secs) => self.reading.tick_interval_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "Ignoring invalid LECTERN_TICK_SECS"),
            }
        }
    }

    /// Check the values the bot cannot run without.
    pub fn validate(&self) -> crate::Result<()> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(crate::Error::Config(
                "DISCORD_TOKEN is not set in environment or config".into(),
            ));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.reading.default_chunk_size) {
            return Err(crate::Error::Config(format!(
                "reading.default_chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}"
            )));
        }
        if !(1..=MAX_TICK_INTERVAL_SECS).contains(&self.reading.tick_interval_secs) {
            return Err(crate::Error::Config(format!(
                "reading.tick_interval_secs must be between 1 and {MAX_TICK_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }
}

fn default_command_prefix() -> String {
    "!".into()
}
fn default_chunk_size() -> usize {
    3
}
fn default_tick_interval_secs() -> u64 {
    20
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
