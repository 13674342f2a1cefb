// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dockwire")]
#[command(about = "Talk to a Docker engine over its HTTP API")]
#[command(version)]
pub struct Cli {
    /// Engine endpoint, e.g. unix:///var/run/docker.sock or tcp://host:2376
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the engine answers
    Ping,

    /// Show engine version information
    Version,

    /// List containers
    Ps {
        /// Include stopped containers
        #[arg(short, long)]
        all: bool,

        /// Filter output (e.g. status=running, label=app=web)
        #[arg(short, long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,
    },

    /// Stream engine events until interrupted
    Events {
        /// Filter events (e.g. type=container, event=die)
        #[arg(short, long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Show events created since this timestamp
        #[arg(long)]
        since: Option<String>,

        /// Stop at this timestamp
        #[arg(long)]
        until: Option<String>,

        /// Stop when no event arrives for this many seconds
        #[arg(long, value_name = "SECS")]
        idle_timeout: Option<u64>,
    },

    /// Fetch the logs of a container
    Logs {
        /// Container ID or name
        container: String,

        /// Follow log output
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show from the end
        #[arg(long)]
        tail: Option<String>,

        /// Show timestamps
        #[arg(short, long)]
        timestamps: bool,
    },
}
