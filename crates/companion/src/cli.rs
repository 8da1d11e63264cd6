//! Command-line surface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "companion")]
#[command(version)]
#[command(about = "Validate, analyze and exercise message-broker topologies")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format for results written to stdout
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Json)]
    pub format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check a topology file for structural errors and warnings
    Validate {
        /// Topology file (.json, .yaml, .yml or .toml)
        file: PathBuf,
    },
    /// Print a topology with canonical names
    Normalize {
        /// Topology file (.json, .yaml, .yml or .toml)
        file: PathBuf,
    },
    /// Report anti-patterns in a topology
    Analyze {
        /// Topology file (.json, .yaml, .yml or .toml)
        file: PathBuf,
        /// Only report findings at or above this severity (1-3)
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
        min_severity: u8,
    },
    /// Import the live topology from the broker
    FetchTopology,
    /// Check broker health
    Health,
    /// Publish synthetic traffic and report the final status
    Simulate(SimulateArgs),
    /// List messages waiting on dead-letter queues
    DeadLetters {
        /// Restrict the listing to one queue
        #[arg(short, long)]
        queue: Option<String>,
        /// Maximum number of messages listed
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Reconstruct the delivery path of a message
    Trace {
        message_id: String,
        /// Search this queue instead of every dead-letter queue
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// Republish a dead-lettered message to its original destination
    Requeue { message_id: String },
}

#[derive(Debug, clap::Args)]
pub struct SimulateArgs {
    /// Routing key; its first dot segment names the target exchange
    #[arg(short, long)]
    pub routing_key: String,
    #[arg(short = 'n', long, default_value_t = 100)]
    pub count: usize,
    /// Payload size in bytes
    #[arg(short, long, default_value_t = 1024)]
    pub size: usize,
    #[arg(short, long, default_value_t = 1)]
    pub publishers: usize,
    /// Probability of a synthetic publish rejection
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,
    /// Per-publisher messages per second; 0 publishes as fast as possible
    #[arg(long, default_value_t = 0)]
    pub rate: u32,
    /// Drain this queue while publishing
    #[arg(long)]
    pub consume_queue: Option<String>,
    /// Extra message header as KEY=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}
