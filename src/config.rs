//! Configuration for the pipewatch service.
//!
//! Sources (highest priority first):
//! 1. Environment variables (PIPEWATCH_SLACK_TOKEN, PIPEWATCH_SLACK_CHANNEL,
//!    PIPEWATCH_DB, PIPEWATCH_TOPOLOGY_DIR, PIPEWATCH_PIPELINE_PREFIX,
//!    PIPEWATCH_LOCK_RETRY_MS, PIPEWATCH_LINK_BASE)
//! 2. Config file (PIPEWATCH_CONFIG, or ~/.pipewatch/config.yaml)
//! 3. Defaults (~/.pipewatch)
//!
//! The Slack token and channel have no defaults; starting without them is a
//! hard error.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub slack_token: Option<String>,
    pub slack_channel: Option<String>,
    pub db: Option<PathBuf>,
    pub topology_dir: Option<PathBuf>,
    pub pipeline_prefix: Option<String>,
    pub lock_retry_ms: Option<u64>,
    pub link_base: Option<String>,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub slack_token: String,
    pub slack_channel: String,
    pub db_path: PathBuf,
    pub topology_dir: PathBuf,
    pub pipeline_prefix: Option<String>,
    pub lock_retry_delay: Duration,
    /// Base URL of the pipeline console, used for links in messages.
    pub link_base: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Empty prefix from either source means "do not strip"; the default only
/// applies when neither source set one.
fn resolve_prefix(env: Option<String>, file: Option<String>) -> Option<String> {
    env.or(file)
        .or_else(|| Some("codepipeline-".to_string()))
        .filter(|p| !p.is_empty())
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Could not determine home directory")
}

fn load_file() -> Result<ConfigFile> {
    let path = match env_var("PIPEWATCH_CONFIG") {
        Some(p) => PathBuf::from(p),
        None => {
            let default = home_dir()?.join(".pipewatch").join("config.yaml");
            if !default.exists() {
                return Ok(ConfigFile::default());
            }
            default
        }
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

impl Config {
    /// Resolve configuration from the environment and the optional file.
    pub fn load() -> Result<Config> {
        let file = load_file()?;
        let base = home_dir()?.join(".pipewatch");

        let slack_token = env_var("PIPEWATCH_SLACK_TOKEN")
            .or(file.slack_token)
            .context("Need a valid token defined in PIPEWATCH_SLACK_TOKEN")?;
        let slack_channel = env_var("PIPEWATCH_SLACK_CHANNEL")
            .or(file.slack_channel)
            .context("Need a valid channel defined in PIPEWATCH_SLACK_CHANNEL")?;

        let db_path = env_var("PIPEWATCH_DB")
            .map(PathBuf::from)
            .or(file.db)
            .unwrap_or_else(|| base.join("records.db"));
        let topology_dir = env_var("PIPEWATCH_TOPOLOGY_DIR")
            .map(PathBuf::from)
            .or(file.topology_dir)
            .unwrap_or_else(|| base.join("topology"));

        // Read raw: an explicitly empty PIPEWATCH_PIPELINE_PREFIX disables
        // stripping rather than falling through to the default.
        let pipeline_prefix = resolve_prefix(
            std::env::var("PIPEWATCH_PIPELINE_PREFIX").ok(),
            file.pipeline_prefix,
        );

        let lock_retry_delay = match env_var("PIPEWATCH_LOCK_RETRY_MS") {
            Some(raw) => Duration::from_millis(
                raw.parse()
                    .context("PIPEWATCH_LOCK_RETRY_MS must be an integer")?,
            ),
            None => Duration::from_millis(file.lock_retry_ms.unwrap_or(500)),
        };

        let link_base = env_var("PIPEWATCH_LINK_BASE").or(file.link_base);

        Ok(Config {
            slack_token,
            slack_channel,
            db_path,
            topology_dir,
            pipeline_prefix,
            lock_retry_delay,
            link_base,
        })
    }
}
