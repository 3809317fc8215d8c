//! Commit, pull and push the working directory, then repair local links.
//!
//! A pull that conflicts (both machines edited `registry.toml`, or the same
//! synced file) is not left for the user to untangle.  The working
//! directory is reset to the remote branch, this machine's pending registry
//! edits are applied to the remote registry, and the synced copies it
//! changed are relinked from the local files, which still hold that
//! content.  The result is committed again and pushed.
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;

use super::{SyncEngine, remove_synced};
use crate::config::{MachineName, SharedFileRegistry, synced_path};
use crate::error::{LinkError, Operation, Step, SyncError, TransportError};
use crate::logging::StepStatus;
use crate::resources::is_linked;
use crate::transport::PullOutcome;

/// Push attempts made by `synchronize` when the caller has no preference.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// What a successful [`SyncEngine::synchronize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether local changes were committed.
    pub committed: bool,
    /// Result of the last pull.
    pub pulled: PullOutcome,
    /// Push attempts used (at least one).
    pub attempts: u32,
    /// Local links repaired along the way.
    pub relinked: usize,
}

/// Commit message for changes made by `machine` at `now`:
/// `laptop-2024-05-01(13:45:10)`.
#[must_use]
pub fn commit_message(machine: &MachineName, now: NaiveDateTime) -> String {
    format!("{machine}-{}", now.format("%Y-%m-%d(%H:%M:%S)"))
}

impl SyncEngine {
    /// Commit local changes, pull, and push, retrying the pull and push up
    /// to `attempts` times when the remote moved in between.
    ///
    /// Links broken by editors that replace files are repaired before
    /// committing, and links to files changed by the pull are repaired
    /// after it.  A conflicting pull is resolved by replaying this
    /// machine's changes on the remote version.  Once a push succeeds the
    /// pending registry edits are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInitialized`] before `init`,
    /// [`SyncError::Link`] if a link cannot be repaired, and
    /// [`SyncError::Incomplete`] naming the transport step that failed.
    /// Local commits are kept in every case.
    pub fn synchronize(&mut self, attempts: u32) -> Result<SyncReport, SyncError> {
        let workdir = self.workdir()?;
        let machine = self.machine()?;
        let attempts = attempts.max(1);
        let incomplete = |step| {
            move |source| SyncError::Incomplete {
                operation: Operation::Synchronize,
                step,
                source,
            }
        };

        let mut relinked = self.relink()?;

        self.log.stage("Committing local changes");
        self.transport
            .stage_all(&workdir)
            .map_err(incomplete(Step::Stage))?;
        let message = commit_message(&machine, chrono::Local::now().naive_local());
        let committed = self
            .transport
            .commit(&workdir, &message)
            .map_err(incomplete(Step::Commit))?;
        if committed {
            self.log.record_step("commit", StepStatus::Ok, Some(&message));
        } else {
            self.log
                .record_step("commit", StepStatus::Skipped, Some("nothing to commit"));
        }

        let mut attempt = 1;
        loop {
            self.log
                .stage(&format!("Pulling (attempt {attempt}/{attempts})"));
            let pulled = match self.transport.pull(&workdir) {
                Ok(outcome) => {
                    relinked += self.after_pull(&workdir, outcome)?;
                    outcome
                }
                Err(e) if e.is_conflict() => {
                    relinked +=
                        self.replay_on_remote(&workdir, &machine, &|step, source| {
                            incomplete(step)(source)
                        })?;
                    PullOutcome::Updated
                }
                Err(e) => return Err(incomplete(Step::Pull)(e)),
            };

            self.log.stage("Pushing");
            match self.transport.push(&workdir) {
                Ok(()) => {
                    self.log.record_step("push", StepStatus::Ok, None);
                    if !self.state.pending.is_empty() {
                        self.state.pending.clear();
                        self.store.save(&self.state)?;
                    }
                    return Ok(SyncReport {
                        committed,
                        pulled,
                        attempts: attempt,
                        relinked,
                    });
                }
                Err(e) if e.is_conflict() && attempt < attempts => {
                    self.log.warn(&format!(
                        "push rejected, remote moved; retrying ({attempt}/{attempts})"
                    ));
                    attempt += 1;
                }
                Err(e) => {
                    self.log
                        .record_step("push", StepStatus::Failed, Some(&e.to_string()));
                    return Err(incomplete(Step::Push)(e));
                }
            }
        }
    }

    /// Integrate remote changes without publishing anything.
    ///
    /// A conflicting pull is resolved the same way as in
    /// [`synchronize`](Self::synchronize); the rebuilt commit stays local.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the pull fails, or
    /// [`SyncError::State`] / [`SyncError::Link`] if the pulled registry
    /// cannot be read or links cannot be repaired.
    pub fn pull(&mut self) -> Result<PullOutcome, SyncError> {
        let workdir = self.workdir()?;
        let machine = self.machine()?;
        self.log.stage("Pulling");
        let outcome = match self.transport.pull(&workdir) {
            Ok(outcome) => {
                self.after_pull(&workdir, outcome)?;
                outcome
            }
            Err(e) if e.is_conflict() => {
                self.replay_on_remote(&workdir, &machine, &|_, source| {
                    SyncError::Transport(source)
                })?;
                PullOutcome::Updated
            }
            Err(e) => {
                self.log
                    .record_step("pull", StepStatus::Failed, Some(&e.to_string()));
                return Err(e.into());
            }
        };
        self.log.record_step(
            "pull",
            if outcome == PullOutcome::Updated {
                StepStatus::Ok
            } else {
                StepStatus::Skipped
            },
            match outcome {
                PullOutcome::Updated => None,
                PullOutcome::UpToDate => Some("already up to date"),
                PullOutcome::NoUpstream => Some("remote has no commits yet"),
            },
        );
        Ok(outcome)
    }

    /// Reconnect every tracked file whose hardlink was broken.
    ///
    /// When both sides exist and differ, the one modified last wins; the
    /// synced copy wins ties.  Every entry is attempted; the first failure
    /// is returned after the others were tried.  Returns the number of
    /// links repaired.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Link`] if a link cannot be recreated.
    pub fn relink(&self) -> Result<usize, SyncError> {
        let mut repaired = 0;
        let mut first_error = None;

        for (key, link) in self.state.files.iter() {
            if !self.registry.exists(key) {
                self.log.warn(&format!(
                    "{key} is no longer in the shared registry; run `configsync remove {key}`"
                ));
                continue;
            }
            if is_linked(&link.local, &link.synced) {
                continue;
            }
            let Some(local_wins) = local_wins(&link.local, &link.synced) else {
                self.log
                    .warn(&format!("{key} is missing both locally and in the working directory"));
                continue;
            };
            let (source, target) = if local_wins {
                (&link.local, &link.synced)
            } else {
                (&link.synced, &link.local)
            };
            match self.links.link(source, target) {
                Ok(()) => {
                    self.log
                        .debug(&format!("relinked {key} from {}", source.display()));
                    repaired += 1;
                }
                Err(e) => {
                    self.log.warn(&format!("cannot relink {key}: {e}"));
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e.into());
        }
        if repaired > 0 {
            self.log.info(&format!("repaired {repaired} link(s)"));
        }
        Ok(repaired)
    }

    /// Rebuild this machine's unpushed changes on top of the remote branch.
    ///
    /// Synced copies this machine changed are linked from the local files,
    /// so local content wins over a remote edit of the same file.  Returns
    /// the number of links made or repaired.
    fn replay_on_remote(
        &mut self,
        workdir: &Path,
        machine: &MachineName,
        fail: &dyn Fn(Step, TransportError) -> SyncError,
    ) -> Result<usize, SyncError> {
        self.log.warn(
            "local and remote changes conflict; replaying this machine's changes on the remote version",
        );
        let changed = self
            .transport
            .reset_to_remote(workdir)
            .map_err(|e| fail(Step::Pull, e))?;

        self.registry = SharedFileRegistry::load(workdir)?;
        let mut released = Vec::new();
        for change in &self.state.pending {
            self.log.debug(&format!("replaying {change:?}"));
            if self.registry.apply(change, machine.as_str()) {
                released.push(synced_path(workdir, change.key())?);
            }
        }
        // Replayed edits reach disk before any file changes; if a later step
        // fails, the next sync commits them.
        self.persist(workdir)?;
        for synced in released {
            remove_synced(workdir, &synced).map_err(|e| LinkError::io("remove", &synced, e))?;
        }

        let mut restored = 0;
        for (key, link) in self.state.files.iter() {
            let ours = link
                .synced
                .strip_prefix(workdir)
                .is_ok_and(|rel| changed.iter().any(|c| c == rel));
            if !ours || !link.local.is_file() {
                continue;
            }
            self.links.link(&link.local, &link.synced)?;
            self.log.debug(&format!("kept local content of {key}"));
            restored += 1;
        }

        self.transport
            .stage_all(workdir)
            .map_err(|e| fail(Step::Stage, e))?;
        let message = commit_message(machine, chrono::Local::now().naive_local());
        self.transport
            .commit(workdir, &message)
            .map_err(|e| fail(Step::Commit, e))?;
        self.log.record_step(
            "replay",
            StepStatus::Ok,
            Some(&format!(
                "{} registry change(s), {restored} file(s) reapplied",
                self.state.pending.len()
            )),
        );
        Ok(restored + self.relink()?)
    }

    fn after_pull(&mut self, workdir: &Path, outcome: PullOutcome) -> Result<usize, SyncError> {
        if outcome == PullOutcome::Updated {
            self.registry = SharedFileRegistry::load(workdir)?;
            self.log.debug(&format!(
                "registry reloaded: {} shared file(s)",
                self.registry.len()
            ));
        }
        self.relink()
    }
}

/// Which side of a broken link to keep: `Some(true)` for the local file,
/// `Some(false)` for the synced copy, `None` if neither exists.
fn local_wins(local: &Path, synced: &Path) -> Option<bool> {
    let modified = |p: &Path| {
        fs::metadata(p)
            .ok()
            .filter(fs::Metadata::is_file)
            .map(|m| m.modified().ok())
    };
    match (modified(local), modified(synced)) {
        (None, None) => None,
        (Some(_), None) => Some(true),
        (None, Some(_)) => Some(false),
        (Some(local_time), Some(synced_time)) => {
            Some(local_time > synced_time && !same_content(local, synced))
        }
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
