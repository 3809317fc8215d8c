//! Command-line interface definition.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI entry point for configsync.
#[derive(Parser, Debug)]
#[command(
    name = "configsync",
    about = "Synchronize configuration files between machines through a shared git repository",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// State directory (default: $CONFIGSYNC_HOME or ~/.configsync)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Seconds before a git command is killed
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout: u64,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clone the shared repository and name this machine
    Init(InitOpts),
    /// Start synchronizing a local file
    Add(FileOpts),
    /// Stop synchronizing a file on this machine
    #[command(alias = "unlink")]
    Remove(FileOpts),
    /// Link a file another machine shares
    Link(LinkOpts),
    /// Commit, pull and push
    Sync(SyncOpts),
    /// Fetch changes from other machines without publishing
    Pull,
    /// Show shared files and their link state
    #[command(alias = "status")]
    List(ListOpts),
    /// Forget every tracked file on this machine
    Reset,
    /// Print version information
    Version,
}

impl Command {
    /// Name used for the log file of this command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::Link(_) => "link",
            Self::Sync(_) => "sync",
            Self::Pull => "pull",
            Self::List(_) => "list",
            Self::Reset => "reset",
            Self::Version => "version",
        }
    }
}

/// Options for the `init` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct InitOpts {
    /// Name of this machine, used in the registry and commit messages
    #[arg(long)]
    pub name: String,

    /// URL of the shared repository
    #[arg(long)]
    pub remote: String,

    /// Working directory for the clone (default: <home>/repo)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// Options for `add` and `remove`.
#[derive(Parser, Debug, Clone)]
pub struct FileOpts {
    /// File to add, or tracked file (path or registry key) to remove
    pub file: PathBuf,

    /// Only commit locally; do not pull or push
    #[arg(long)]
    pub no_sync: bool,
}

/// Options for the `link` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct LinkOpts {
    /// Registry key of the shared file (its path on the registering machine)
    pub original: String,

    /// Where to link it on this machine (default: the same path)
    pub local: Option<PathBuf>,

    /// Only commit locally; do not pull or push
    #[arg(long)]
    pub no_sync: bool,
}

/// Options for the `sync` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct SyncOpts {
    /// Push attempts when the remote moves in between
    #[arg(long, default_value_t = crate::engine::DEFAULT_ATTEMPTS)]
    pub retries: u32,
}

/// Options for the `list` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ListOpts {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
