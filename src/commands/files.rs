//! Commands: add, remove and link tracked files.
use std::sync::Arc;

use anyhow::Result;

use super::CommandSetup;
use crate::cli::{FileOpts, GlobalOpts, LinkOpts};
use crate::logging::Logger;

/// Run the add command.
///
/// # Errors
///
/// Returns an error if the file cannot be tracked or synchronization fails.
pub fn add(global: &GlobalOpts, opts: &FileOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;
    setup.require_git()?;
    setup.pull_first(opts.no_sync)?;

    log.stage(&format!("Adding {}", opts.file.display()));
    let result = setup.engine.add_file(&opts.file);
    if let Some(key) = setup.finish(result, opts.no_sync, log)? {
        log.info(&format!("{key} is now synchronized"));
    }
    Ok(())
}

/// Run the remove command.
///
/// # Errors
///
/// Returns an error if the file is not tracked, cannot be unlinked, or
/// synchronization fails.
pub fn remove(global: &GlobalOpts, opts: &FileOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;
    setup.require_git()?;
    setup.pull_first(opts.no_sync)?;

    let file = opts.file.to_string_lossy();
    log.stage(&format!("Removing {file}"));
    let result = setup.engine.remove_file(&file);
    if let Some(key) = setup.finish(result, opts.no_sync, log)? {
        log.info(&format!("{key} is no longer synchronized on this machine"));
    }
    Ok(())
}

/// Run the link command.
///
/// # Errors
///
/// Returns an error if the file is not shared, is already linked, or
/// synchronization fails.
pub fn link(global: &GlobalOpts, opts: &LinkOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;
    setup.require_git()?;
    setup.pull_first(opts.no_sync)?;

    log.stage(&format!("Linking {}", opts.original));
    let result = setup
        .engine
        .link_existing(&opts.original, opts.local.as_deref());
    if let Some(local) = setup.finish(result, opts.no_sync, log)? {
        log.info(&format!("{} now follows {}", local.display(), opts.original));
    }
    Ok(())
}
