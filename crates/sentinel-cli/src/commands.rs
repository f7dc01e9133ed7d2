use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sentinel")]
#[command(about = "Folder maintenance recommendations with undoable execution", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Args)]
pub struct DiskArgs {
    /// Free disk space in GiB, enables the disk-pressure factor
    #[arg(long, requires = "disk_total_gb")]
    pub disk_free_gb: Option<f64>,
    /// Total disk size in GiB
    #[arg(long, requires = "disk_free_gb")]
    pub disk_total_gb: Option<f64>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan the configured roots and list ranked recommendations
    Analyze {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Show at most this many recommendations
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[command(flatten)]
        disk: DiskArgs,
    },
    /// Execute recommendation number N from `analyze` (dry run unless --commit)
    Execute {
        index: usize,
        /// Back up the targets and apply the change
        #[arg(long)]
        commit: bool,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Decline recommendation number N so similar suggestions rank lower
    Reject { index: usize },
    /// Restore the files of a checkpoint
    Undo {
        /// Checkpoint id
        id: Option<String>,
        /// Undo the most recent committed checkpoint
        #[arg(long, conflicts_with = "id")]
        last: bool,
    },
    /// List checkpoints, newest first
    Checkpoints {
        /// Include reverted and expired checkpoints
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Expire checkpoints past the retention window
    Sweep,
    /// Manage custom rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Show what has been learned from past decisions
    Learning {
        /// Forget everything learned so far
        #[arg(long)]
        reset: bool,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Subcommand)]
pub enum RuleCommands {
    /// List rules with match counts
    List,
    /// Add a rule from its JSON definition
    Add {
        /// JSON rule body, or @path to read it from a file
        definition: String,
    },
    /// Delete a rule
    Delete { id: i64 },
    /// Enable or disable a rule
    Toggle { id: i64 },
}
