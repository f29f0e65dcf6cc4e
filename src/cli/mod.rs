//! Command-line interface for pipewatch.
//!
//! `handle` runs one sequencer turn for an event payload; `show` and
//! `config` are inspection helpers.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{FileTopologyLookup, SlackNotifier};
use crate::config::Config;
use crate::core::{Sequencer, SequencerOptions};
use crate::domain::{IncomingEvent, RecordKey};
use crate::store::{RecordStore, SqliteStore};

/// pipewatch - causally ordered pipeline narration
#[derive(Parser, Debug)]
#[command(name = "pipewatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process one inbound event (JSON from stdin or a file)
    Handle {
        /// Event payload file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the stored record for an execution
    Show {
        /// Project name (pipeline name with the prefix stripped)
        project: String,
        /// Execution id
        execution_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Handle { input } => handle(input).await,
            Commands::Show {
                project,
                execution_id,
            } => show(project, execution_id).await,
            Commands::Config => show_config(),
        }
    }
}

fn read_payload(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read event payload: {}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read event payload from stdin")?;
            Ok(raw)
        }
    }
}

async fn handle(input: Option<PathBuf>) -> Result<()> {
    let config = Config::load()?;
    let raw = read_payload(input)?;
    let event: IncomingEvent =
        serde_json::from_str(&raw).context("Unrecognized event payload")?;

    let store = SqliteStore::open(&config.db_path)?;
    let notifier = SlackNotifier::new(
        config.slack_token.clone(),
        config.slack_channel.clone(),
        config.link_base.clone(),
    );
    let topology = FileTopologyLookup::new(config.topology_dir.clone());
    let sequencer = Sequencer::new(
        store,
        notifier,
        topology,
        SequencerOptions {
            lock_retry_delay: config.lock_retry_delay,
            pipeline_prefix: config.pipeline_prefix.clone(),
        },
    );

    sequencer.handle(&event).await
}

async fn show(project: String, execution_id: String) -> Result<()> {
    let config = Config::load()?;
    let store = SqliteStore::open(&config.db_path)?;
    let key = RecordKey {
        project_name: project,
        execution_id,
    };
    match store.get(&key).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => anyhow::bail!("No record for {key}"),
    }
}

fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("db:              {}", config.db_path.display());
    println!("topology dir:    {}", config.topology_dir.display());
    println!("channel:         {}", config.slack_channel);
    println!(
        "pipeline prefix: {}",
        config.pipeline_prefix.as_deref().unwrap_or("(none)")
    );
    println!(
        "lock retry:      {}ms",
        config.lock_retry_delay.as_millis()
    );
    println!(
        "link base:       {}",
        config.link_base.as_deref().unwrap_or("(none)")
    );
    Ok(())
}
