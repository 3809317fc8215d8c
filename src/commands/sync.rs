//! Commands: sync and pull.
use std::sync::Arc;

use anyhow::Result;

use super::CommandSetup;
use crate::cli::{GlobalOpts, SyncOpts};
use crate::logging::Logger;
use crate::transport::PullOutcome;

/// Run the sync command.
///
/// # Errors
///
/// Returns an error if any transport step fails after the configured
/// retries.
pub fn run(global: &GlobalOpts, opts: &SyncOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;
    setup.require_git()?;

    let report = setup.engine.synchronize(opts.retries)?;
    log.info(&format!(
        "synchronized after {} attempt(s){}",
        report.attempts,
        if report.relinked > 0 {
            format!(", {} link(s) repaired", report.relinked)
        } else {
            String::new()
        }
    ));
    Ok(())
}

/// Run the pull command.
///
/// # Errors
///
/// Returns an error if the pull fails or local links cannot be repaired.
pub fn pull(global: &GlobalOpts, log: &Arc<Logger>) -> Result<()> {
    let mut setup = CommandSetup::init(global, log)?;
    setup.require_git()?;

    match setup.engine.pull()? {
        PullOutcome::Updated => log.info("pulled changes from other machines"),
        PullOutcome::UpToDate => log.info("already up to date"),
        PullOutcome::NoUpstream => log.info("the shared repository has no commits yet"),
    }
    Ok(())
}
