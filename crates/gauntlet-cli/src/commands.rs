//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter workflow
    Init {
        /// Where to write the workflow
        #[arg(default_value = ".gauntlet/workflow.yaml")]
        path: PathBuf,
    },

    /// Validate a workflow and its dependency graph
    Validate {
        /// Path to workflow file
        path: Option<PathBuf>,
    },

    /// Show the job instances a trigger event would produce
    Plan {
        /// Path to workflow file
        path: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute a workflow locally
    Run {
        /// Path to workflow file
        path: Option<PathBuf>,

        #[command(flatten)]
        event: EventArgs,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Keep job workspaces after the run
        #[arg(long)]
        keep_workspaces: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// How the trigger event is supplied.
#[derive(Args, Debug, Clone, Default)]
pub struct EventArgs {
    /// GitHub `pull_request` webhook payload (JSON file)
    #[arg(long, conflicts_with_all = ["body", "sha", "git_ref"])]
    pub event: Option<PathBuf>,

    /// Pull request body
    #[arg(long)]
    pub body: Option<String>,

    /// Head commit SHA
    #[arg(long)]
    pub sha: Option<String>,

    /// Head ref
    #[arg(long = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
