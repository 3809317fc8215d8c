//! Top-level subcommand orchestration.
//!
//! Each command opens the state directory through [`CommandSetup`], runs one
//! engine operation and, for commands that change shared state, pulls before
//! and synchronizes after unless `--no-sync` is given.
pub mod files;
pub mod init;
pub mod list;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::config::ConfigStore;
use crate::engine::{DEFAULT_ATTEMPTS, SyncEngine};
use crate::error::SyncError;
use crate::exec::SystemExecutor;
use crate::logging::Logger;
use crate::resources::StateLock;
use crate::transport::GitTransport;

/// Dispatch `cli` to its command and print the step summary.
///
/// # Errors
///
/// Returns the error of the command that ran.
pub fn run(cli: &Cli, log: &Arc<Logger>) -> Result<()> {
    let global = &cli.global;
    let result = match &cli.command {
        Command::Init(opts) => init::run(global, opts, log),
        Command::Add(opts) => files::add(global, opts, log),
        Command::Remove(opts) => files::remove(global, opts, log),
        Command::Link(opts) => files::link(global, opts, log),
        Command::Sync(opts) => sync::run(global, opts, log),
        Command::Pull => sync::pull(global, log),
        Command::List(opts) => list::run(global, opts, log),
        Command::Reset => init::reset(global, log),
        Command::Version => {
            emit(&format!("configsync {}", version()));
            Ok(())
        }
    };
    log.print_summary();
    result
}

/// Write command output to stdout. Log lines go through the subscriber.
#[allow(clippy::print_stdout)]
pub(crate) fn emit(text: &str) {
    println!("{text}");
}

/// Version string baked in at build time.
#[must_use]
pub fn version() -> &'static str {
    option_env!("CONFIGSYNC_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Shared state produced by the common command setup sequence.
///
/// Holds the state directory lock for as long as it lives.
#[derive(Debug)]
pub struct CommandSetup {
    /// The state directory in use.
    pub store: Arc<ConfigStore>,
    /// Engine over the local state and the git working directory.
    pub engine: SyncEngine,
    git: GitTransport,
    _lock: StateLock,
}

impl CommandSetup {
    /// Lock the state directory and open the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if another configsync process holds the state
    /// directory or the persisted state cannot be read.
    pub fn init(global: &GlobalOpts, log: &Arc<Logger>) -> Result<Self> {
        let dir = global.home.clone().unwrap_or_else(ConfigStore::default_dir);
        let store = Arc::new(ConfigStore::new(dir));
        log.debug(&format!(
            "configsync {} using {}",
            version(),
            store.dir().display()
        ));

        let lock = StateLock::acquire(&store.lock_path())?;
        let executor = Arc::new(SystemExecutor::new(Duration::from_secs(global.timeout)));
        let git = GitTransport::new(executor);
        let engine = SyncEngine::open(
            Arc::clone(&store) as _,
            Arc::new(git.clone()),
            Arc::clone(log) as _,
        )
        .with_context(|| format!("cannot open state in {}", store.dir().display()))?;

        Ok(Self {
            store,
            engine,
            git,
            _lock: lock,
        })
    }

    /// Fail early when the command needs git and it is not installed.
    ///
    /// # Errors
    ///
    /// Returns an error if `git` is not on `PATH`.
    pub fn require_git(&self) -> Result<()> {
        self.git.ensure_available()?;
        Ok(())
    }

    /// Pull before a mutating command so it sees the latest registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    pub fn pull_first(&mut self, no_sync: bool) -> Result<()> {
        if no_sync {
            return Ok(());
        }
        self.engine
            .pull()
            .context("cannot pull before changing shared state (use --no-sync to work offline)")?;
        Ok(())
    }

    /// Publish the result of a mutating command.
    ///
    /// `result` is the command's own outcome: an [`SyncError::Incomplete`]
    /// failure is completed by the synchronization instead of reported,
    /// unless `no_sync` is set.
    ///
    /// # Errors
    ///
    /// Returns the command's error, or the synchronization error.
    pub fn finish<T>(&mut self, result: Result<T, SyncError>, no_sync: bool, log: &Logger) -> Result<Option<T>> {
        let value = match result {
            Err(e @ SyncError::Incomplete { .. }) if !no_sync => {
                log.warn(&format!("{e}; completing it during sync"));
                None
            }
            other => Some(other?),
        };
        if !no_sync {
            self.engine.synchronize(DEFAULT_ATTEMPTS)?;
        }
        Ok(value)
    }
}
