//! Command-line interface for the `orrery` binary.
//!
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod client;
pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use orrery_protocol::AgentType;
use std::path::PathBuf;

/// orrery - multi-agent research orchestration
///
/// Runs a coordinator that admits research tasks and drives them through a
/// staged pipeline, or a worker that executes stage tasks for one agent type.
#[derive(Parser, Debug)]
#[command(
    name = "orrery",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "orrery - multi-agent research orchestration",
    after_help = "EXAMPLES:\n    \
                  orrery init                               # Scaffold orrery.toml\n    \
                  orrery coordinator                        # Start the coordinator\n    \
                  orrery worker --agent-type literature     # Start a literature worker\n    \
                  orrery submit \"sleep and memory\" --wait   # Submit and follow a task"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "orrery.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator (HTTP API and agent socket)
    Coordinator,

    /// Run a worker with the built-in handlers for its agent type
    Worker {
        /// Agent type this worker serves
        #[arg(short = 't', long)]
        agent_type: AgentType,

        /// Stable worker id (defaults to `<type>-<random>`)
        #[arg(long, env = "ORRERY_AGENT_ID")]
        agent_id: Option<String>,

        /// Port for the worker's own /health endpoint
        #[arg(short, long)]
        port: Option<u16>,

        /// Coordinator base URL, may be repeated (overrides [worker].coordinator_urls)
        #[arg(long = "coordinator")]
        coordinators: Vec<String>,
    },

    /// Submit a research task
    Submit {
        /// The research question
        query: String,

        /// Run the reduced pipeline on one agent
        #[arg(long)]
        single_agent: bool,

        /// Start even when the estimate exceeds the auto-approve threshold
        #[arg(long)]
        cost_override: bool,

        /// Follow the task until it completes or fails
        #[arg(short, long)]
        wait: bool,

        /// Coordinator base URL (defaults to the configured coordinator)
        #[arg(long)]
        coordinator: Option<String>,
    },

    /// Show the status of a research task
    Status {
        task_id: String,

        /// Coordinator base URL (defaults to the configured coordinator)
        #[arg(long)]
        coordinator: Option<String>,
    },

    /// Scaffold orrery.toml and .env.example
    Init {
        /// Directory to initialize
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,

        /// Coordinator bind host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Coordinator bind port
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
