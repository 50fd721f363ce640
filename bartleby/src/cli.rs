//! Command-line surface: argument definitions only. `main.rs` owns
//! dispatch and wiring.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bartleby", about = "Autonomous scrivener: tickets in, AI-mediated work out", version)]
pub struct Cli {
    /// Path to the YAML config file (falls back to `.bartleby.yml`, then
    /// `$XDG_CONFIG_HOME/bartleby/bartleby.yml`, then compiled-in defaults).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a default config file and an empty graph file at the
    /// configured paths, without overwriting anything already there.
    Init,

    /// Run the Orchestrator loop in the foreground until interrupted.
    Run,

    /// Run a single Orchestrator tick and exit.
    Tick,

    /// Run one sync pass against the configured tracker and exit.
    Sync,

    /// Report Orchestrator state, gates, and counters.
    Status {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Inspect or edit the dependency graph.
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },

    /// Inspect work items.
    Items {
        #[command(subcommand)]
        command: ItemsCommand,
    },

    /// List and answer blocked questions.
    Questions {
        #[command(subcommand)]
        command: QuestionsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum GraphCommand {
    /// Print the ready/blocked/cyclic classification for the current
    /// graph + item snapshot.
    Show,

    /// Parse the graph file and print any DSL errors without touching
    /// the store.
    Validate,

    /// Resave the graph file from the in-memory graph (re-serializes
    /// node titles and edges; alias bindings are preserved).
    Resave,
}

#[derive(Debug, Subcommand)]
pub enum ItemsCommand {
    /// List work items, optionally filtered by status.
    List {
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one work item and its session history.
    Show { id: String },

    /// Demote a Failed item back to Pending so it is picked up again.
    Retry { id: String },
}

#[derive(Debug, Subcommand)]
pub enum QuestionsCommand {
    /// List unanswered blocked questions, optionally for one item.
    List {
        #[arg(long)]
        item: Option<String>,
    },

    /// Answer a question by id; if it was the item's last unanswered
    /// question, the item reverts to its pre-blocked status.
    Answer { id: String, answer: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
