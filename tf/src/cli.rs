//! Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tf", about = "Task orchestration core: analyze a request, drive specialists through a gated task graph", version)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze a request, build the gated graph and run it to completion.
    /// Ctrl-C cancels the run cooperatively.
    Run {
        /// The project request text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Analyze a request and persist the graph without running it
    Create {
        /// The project request text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Show the persisted status summary of a project
    Status {
        /// Project id (as printed by run/create)
        project_id: String,
    },

    /// Print the persisted event log of a project
    Events {
        /// Project id (as printed by run/create)
        project_id: String,

        /// Only print the last N events
        #[arg(long)]
        tail: Option<usize>,
    },
}
