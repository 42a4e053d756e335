use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use habitor_core::sync::MergeStrategy;

#[derive(Parser)]
#[command(name = "habitor")]
#[command(about = "Track habits offline and sync them to your account")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to sync config JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Quick add: habitor "drink water"
    #[arg(trailing_var_arg = true)]
    pub habit: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new habit
    #[command(alias = "new")]
    Add {
        /// Habit name
        name: Vec<String>,
        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },
    /// List habits
    List {
        /// Show the trash instead of active habits
        #[arg(long)]
        trash: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a habit or change its note
    Edit {
        /// Local habit id
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New note
        #[arg(long)]
        note: Option<String>,
    },
    /// Move a habit to the trash
    Delete {
        /// Local habit id
        id: String,
    },
    /// Take a habit out of the trash
    Restore {
        /// Local habit id
        id: String,
    },
    /// Delete a habit permanently
    Purge {
        /// Local habit id
        id: String,
    },
    /// Replay queued changes and pull remote habits
    Sync {
        /// Upload every active habit, even ones already synced
        #[arg(long)]
        force: bool,
    },
    /// Keep syncing whenever the connection comes back, until Ctrl-C
    Watch,
    /// Show account, connectivity, and queue state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign in and reconcile local habits with the account
    SignIn {
        /// Account id
        account: String,
        /// Merge strategy; prompts when omitted on a terminal
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Sign out; local habits stay on this device
    SignOut,
    /// Inspect or clear pending remote writes
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard every pending operation
    Clear {
        /// Confirm discarding unsynced changes
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    KeepLocal,
    KeepCloud,
    MergeBoth,
}

impl From<StrategyArg> for MergeStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::KeepLocal => Self::KeepLocal,
            StrategyArg::KeepCloud => Self::KeepCloud,
            StrategyArg::MergeBoth => Self::MergeBoth,
        }
    }
}
