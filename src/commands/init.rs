//! Commands: initialize and reset this machine.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::CommandSetup;
use crate::cli::{GlobalOpts, InitOpts};
use crate::logging::Logger;

/// Directory under the state directory used as working directory when
/// `--path` is not given.
const DEFAULT_WORKDIR: &str = "repo";

/// Run the init command.
///
/// # Errors
///
/// Returns an error if the settings are invalid, files are still tracked, or
/// the clone fails.
pub fn run(global: &GlobalOpts, opts: &InitOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;
    setup.require_git()?;

    let path = opts
        .path
        .clone()
        .unwrap_or_else(|| setup.store.dir().join(DEFAULT_WORKDIR));
    log.stage(&format!("Initializing {} in {}", opts.name, path.display()));
    setup
        .engine
        .initialize(&opts.name, &opts.remote, &path)
        .context("initialization failed")?;

    let shared = setup.engine.registry().len();
    if shared > 0 {
        log.info(&format!(
            "{shared} file(s) are shared; run `configsync list` and `configsync link` to use them"
        ));
    }
    Ok(())
}

/// Run the reset command.
///
/// # Errors
///
/// Returns an error if a link cannot be broken or the state cannot be saved.
pub fn reset(global: &GlobalOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;

    log.stage("Resetting");
    let forgotten = setup.engine.reset()?;
    log.info(&format!(
        "forgot {} file(s); run `configsync init` to start again",
        forgotten.len()
    ));
    Ok(())
}
