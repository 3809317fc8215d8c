//! The sync engine: keeps the local file map, the shared registry and the
//! hardlinks on disk consistent with each other.
//!
//! Every mutating operation follows the same order: update the in-memory
//! local map, then the in-memory registry, then the physical link, then
//! persist (registry first, local state second), then stage and commit.  A
//! failure before persistence is rolled back completely; a failure while
//! sharing is reported as [`SyncError::Incomplete`] because the local change
//! is already durable and `synchronize` will publish it.
//!
//! Registry edits are also appended to the local `pending` list until a
//! push succeeds, so they can be replayed when the remote registry moved.
mod sync;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

pub use sync::{DEFAULT_ATTEMPTS, SyncReport, commit_message};

use crate::config::{
    LocalFileMap, LocalLink, LocalState, MachineName, RegistryChange, RegistryEntry,
    SharedFileRegistry, StateStore, SyncConfig, registry::FILES_DIR, synced_path,
};
use crate::error::{LinkError, Operation, Step, SyncError};
use crate::logging::{Log, StepStatus};
use crate::resources::{LinkManager, is_linked};
use crate::transport::Transport;

/// Health of one tracked file's hardlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    /// Local file and synced copy share an inode.
    Linked,
    /// Both files exist but are independent.
    Broken,
    /// The local file or the synced copy is gone.
    Missing,
    /// Registered by some machine but not linked here.
    NotLinked,
    /// Linked here but no longer in the shared registry.
    Orphaned,
}

/// One row of [`SyncEngine::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    /// Registry key (the original path on the registering machine).
    pub key: String,
    /// Local file linked on this machine.
    pub local: Option<PathBuf>,
    /// Machine that registered the file.
    pub owner: Option<String>,
    /// Number of machines linked.
    pub links: u32,
    /// State of the link on this machine.
    pub health: LinkHealth,
}

/// Orchestrates registry, local map, link manager and transport.
pub struct SyncEngine {
    state: LocalState,
    registry: SharedFileRegistry,
    store: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    links: LinkManager,
    log: Arc<dyn Log>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("store", &"<dyn StateStore>")
            .field("transport", &"<dyn Transport>")
            .field("links", &self.links)
            .field("log", &"<dyn Log>")
            .finish()
    }
}

impl SyncEngine {
    /// Load local state from `store` and, once initialized, the registry
    /// from the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::State`] if either file exists but cannot be read.
    pub fn open(
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        log: Arc<dyn Log>,
    ) -> Result<Self, SyncError> {
        let state = store.load()?;
        let registry = if state.sync.initialized {
            SharedFileRegistry::load(&state.sync.path)?
        } else {
            SharedFileRegistry::default()
        };
        let links = LinkManager::new(store.scratch_dir());
        Ok(Self {
            state,
            registry,
            store,
            transport,
            links,
            log,
        })
    }

    /// Replace the link manager (e.g. to lower the size limit).
    #[must_use]
    pub fn with_link_manager(mut self, links: LinkManager) -> Self {
        self.links = links;
        self
    }

    /// Local synchronization settings.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.state.sync
    }

    /// Files tracked on this machine.
    #[must_use]
    pub const fn files(&self) -> &LocalFileMap {
        &self.state.files
    }

    /// The shared registry as last loaded or modified.
    #[must_use]
    pub const fn registry(&self) -> &SharedFileRegistry {
        &self.registry
    }

    /// Start tracking `path`: register it, hardlink it into the working
    /// directory, persist and commit.
    ///
    /// Returns the registry key.  If another machine already registered the
    /// same path, this machine joins it and its local content replaces the
    /// shared copy.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInitialized`], [`SyncError::FileNotFound`],
    /// [`SyncError::FileTooLarge`] or [`SyncError::AlreadyTracked`] without
    /// changing anything, [`SyncError::Link`] or [`SyncError::State`] after
    /// rolling back, and [`SyncError::Incomplete`] if staging or committing
    /// fails.
    pub fn add_file(&mut self, path: &Path) -> Result<String, SyncError> {
        let workdir = self.workdir()?;
        let machine = self.machine()?;
        let original = self.resolve_existing(path)?;
        let key = path_key(&original)?;

        if self.state.files.exists(&key) || self.tracked_by_local(&original).is_some() {
            return Err(SyncError::AlreadyTracked(key));
        }
        if original.starts_with(&workdir) {
            return Err(SyncError::InvalidPath {
                path: original,
                reason: "file is inside the working directory",
            });
        }
        let synced = synced_path(&workdir, &key)?;

        let registered = self.registry.register(&key, machine.as_str());
        if !registered {
            self.registry.add_link(&key);
            if let Some(entry) = self.registry.get(&key) {
                self.log.warn(&format!(
                    "{key} is already shared by {}; the local copy replaces the shared one",
                    entry.owner
                ));
            }
        }
        self.state.pending.push(RegistryChange::Link { key: key.clone() });
        self.state.files.add(&key, &original, &synced);
        let synced_existed = synced.exists();

        if let Err(e) = self.links.link(&original, &synced) {
            self.undo_add(&key, registered);
            self.fail_step(Operation::AddFile, Step::Link, &key);
            return Err(e.into());
        }

        if let Err(e) = self.persist(&workdir) {
            self.undo_add(&key, registered);
            self.undo_link(&synced, synced_existed);
            self.restore_registry(&workdir);
            self.fail_step(Operation::AddFile, Step::Persist, &key);
            return Err(e);
        }

        self.log.info(&format!("tracking {key}"));
        self.log
            .record_step(&format!("add {key}"), StepStatus::Ok, None);
        self.share(
            Operation::AddFile,
            &workdir,
            &[SharedFileRegistry::path(&workdir), synced],
        )?;
        Ok(key)
    }

    /// Stop tracking a file on this machine.
    ///
    /// `file` is either the registry key or the local path it is linked
    /// through.  The local file keeps its content as an independent file.
    /// When this was the last machine linked, the shared copy is deleted
    /// and the deletion staged.  Returns the registry key.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotTracked`] without changing anything,
    /// [`SyncError::Link`] or [`SyncError::State`] after rolling back, and
    /// [`SyncError::Incomplete`] if staging or committing fails.
    pub fn remove_file(&mut self, file: &str) -> Result<String, SyncError> {
        let workdir = self.workdir()?;
        let key = self.find_tracked(file)?;
        let link = self.state.files.remove(&key)?;

        if let Err(e) = self.links.unlink(&link.synced) {
            self.state.files.add(&key, &link.local, &link.synced);
            self.fail_step(Operation::RemoveFile, Step::Link, &key);
            return Err(e.into());
        }

        let previous = self.registry.get(&key).cloned();
        let deleted = self.registry.remove_link(&key);
        self.state.pending.push(RegistryChange::Unlink { key: key.clone() });
        if deleted && let Err(e) = remove_synced(&workdir, &link.synced) {
            self.undo_remove(&key, &link, previous);
            self.fail_step(Operation::RemoveFile, Step::Link, &key);
            return Err(LinkError::io("remove", &link.synced, e).into());
        }

        if let Err(e) = self.persist(&workdir) {
            self.undo_remove(&key, &link, previous);
            self.restore_registry(&workdir);
            self.fail_step(Operation::RemoveFile, Step::Persist, &key);
            return Err(e);
        }

        if deleted {
            self.log
                .info(&format!("{key} is no longer shared by any machine"));
        } else {
            self.log.info(&format!("stopped tracking {key}"));
        }
        self.log
            .record_step(&format!("remove {key}"), StepStatus::Ok, None);

        let mut paths = vec![SharedFileRegistry::path(&workdir)];
        if deleted {
            paths.push(link.synced);
        }
        self.share(Operation::RemoveFile, &workdir, &paths)?;
        Ok(key)
    }

    /// Alias of [`remove_file`](Self::remove_file) for files linked from
    /// another machine.
    ///
    /// # Errors
    ///
    /// See [`remove_file`](Self::remove_file).
    pub fn unlink_existing(&mut self, file: &str) -> Result<String, SyncError> {
        self.remove_file(file)
    }

    /// Link a file another machine registered to `local` (defaulting to the
    /// registry key itself) and count this machine in.
    ///
    /// An existing file at the local target is replaced by the shared copy.
    /// Returns the local path.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRegistered`], [`SyncError::AlreadyLinked`],
    /// [`SyncError::AlreadyTracked`], [`SyncError::FileNotFound`] (shared
    /// copy missing, pull first) or [`SyncError::FileTooLarge`] without
    /// changing anything, [`SyncError::Link`] or [`SyncError::State`] after
    /// rolling back, and [`SyncError::Incomplete`] if staging or committing
    /// fails.
    pub fn link_existing(&mut self, original: &str, local: Option<&Path>) -> Result<PathBuf, SyncError> {
        let workdir = self.workdir()?;
        let key = original.to_string();
        if !self.registry.exists(&key) {
            return Err(SyncError::NotRegistered(key));
        }
        if self.state.files.exists(&key) {
            return Err(SyncError::AlreadyLinked(key));
        }

        let target = resolve_target(local.unwrap_or_else(|| Path::new(&key)))?;
        if let Some(other) = self.tracked_by_local(&target) {
            return Err(SyncError::AlreadyTracked(other));
        }
        let synced = synced_path(&workdir, &key)?;
        let size = match fs::metadata(&synced) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(SyncError::FileNotFound(synced)),
        };
        if size > self.links.max_size() {
            return Err(SyncError::FileTooLarge {
                path: synced,
                size,
                limit: self.links.max_size(),
            });
        }
        if target.exists() {
            self.log.warn(&format!(
                "replacing {} with the shared copy of {key}",
                target.display()
            ));
        }

        self.state.files.add(&key, &target, &synced);
        self.registry.add_link(&key);
        self.state.pending.push(RegistryChange::Link { key: key.clone() });

        if let Err(e) = self.links.link(&synced, &target) {
            self.undo_add(&key, false);
            self.fail_step(Operation::LinkExisting, Step::Link, &key);
            return Err(e.into());
        }

        if let Err(e) = self.persist(&workdir) {
            self.undo_add(&key, false);
            if let Err(unlink) = self.links.unlink(&target) {
                self.log.warn(&format!("cannot break link while rolling back: {unlink}"));
            }
            self.restore_registry(&workdir);
            self.fail_step(Operation::LinkExisting, Step::Persist, &key);
            return Err(e);
        }

        self.log
            .info(&format!("linked {key} at {}", target.display()));
        self.log
            .record_step(&format!("link {key}"), StepStatus::Ok, None);
        self.share(
            Operation::LinkExisting,
            &workdir,
            &[SharedFileRegistry::path(&workdir)],
        )?;
        Ok(target)
    }

    /// Recreate the working directory at `path`, clone `remote` into it and
    /// mark this machine initialized as `name`.
    ///
    /// Anything already at `path` is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] for an invalid name, remote or
    /// path, [`SyncError::TrackedFilesRemain`] while files are tracked,
    /// [`SyncError::DirectoryCreation`] if the directory cannot be
    /// recreated, and [`SyncError::Clone`] if cloning fails (the settings
    /// are then saved with `initialized = false`).
    pub fn initialize(&mut self, name: &str, remote: &str, path: &Path) -> Result<(), SyncError> {
        let machine = MachineName::new(name)?;
        let remote = remote.trim();
        if remote.is_empty() {
            return Err(SyncError::Configuration(
                "remote URL must not be empty".to_string(),
            ));
        }
        if !self.state.files.is_empty() {
            return Err(SyncError::TrackedFilesRemain(self.state.files.len()));
        }
        let path = absolute(path)?;
        if path.parent().is_none() {
            return Err(SyncError::Configuration(format!(
                "refusing to use {} as the working directory",
                path.display()
            )));
        }
        if self.store.scratch_dir().starts_with(&path) {
            return Err(SyncError::Configuration(format!(
                "working directory {} must not contain the state directory",
                path.display()
            )));
        }

        let creation = |source| SyncError::DirectoryCreation {
            path: path.clone(),
            source,
        };
        if path.exists() {
            self.log
                .debug(&format!("removing existing {}", path.display()));
            fs::remove_dir_all(&path).map_err(creation)?;
        }
        fs::create_dir_all(&path).map_err(creation)?;

        self.state.sync = SyncConfig {
            name: machine.to_string(),
            path: path.clone(),
            remote: remote.to_string(),
            initialized: false,
        };
        self.state.pending.clear();
        self.registry = SharedFileRegistry::default();

        self.log.stage(&format!("Cloning {remote}"));
        if let Err(source) = self.transport.clone_repo(remote, &path) {
            self.store.save(&self.state)?;
            self.log
                .record_step("clone", StepStatus::Failed, Some(&source.to_string()));
            return Err(SyncError::Clone {
                remote: remote.to_string(),
                source,
            });
        }

        self.registry = SharedFileRegistry::load(&path)?;
        self.state.sync.initialized = true;
        self.store.save(&self.state)?;
        self.log.record_step("clone", StepStatus::Ok, None);
        self.log.info(&format!(
            "initialized {machine} with {} shared file(s)",
            self.registry.len()
        ));
        Ok(())
    }

    /// Forget every tracked file and mark this machine uninitialized.
    ///
    /// Each link is broken first so local files keep their content.  Shared
    /// link counts are left alone; the returned keys are the files whose
    /// counts still include this machine.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Link`] if a link cannot be broken (nothing is
    /// forgotten then), or [`SyncError::State`] if saving fails.
    pub fn reset(&mut self) -> Result<Vec<String>, SyncError> {
        for (_, link) in self.state.files.iter() {
            self.links.unlink(&link.synced)?;
        }

        let keys: Vec<String> = self
            .state
            .files
            .clear()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        if !keys.is_empty() {
            self.log.warn(&format!(
                "shared link counts still include this machine for: {}",
                keys.join(", ")
            ));
        }
        self.state.sync.initialized = false;
        self.state.pending.clear();
        self.registry = SharedFileRegistry::default();
        self.store.save(&self.state)?;
        self.log.record_step("reset", StepStatus::Ok, None);
        Ok(keys)
    }

    /// One row per registry entry, plus local entries the registry lost.
    #[must_use]
    pub fn list(&self) -> Vec<FileStatus> {
        let mut rows: Vec<FileStatus> = self
            .registry
            .iter()
            .map(|(key, entry)| {
                let link = self.state.files.entry(key).ok();
                FileStatus {
                    key: key.to_string(),
                    local: link.map(|l| l.local.clone()),
                    owner: Some(entry.owner.clone()),
                    links: entry.links.get(),
                    health: link.map_or(LinkHealth::NotLinked, health),
                }
            })
            .collect();

        rows.extend(
            self.state
                .files
                .iter()
                .filter(|(key, _)| !self.registry.exists(key))
                .map(|(key, link)| FileStatus {
                    key: key.to_string(),
                    local: Some(link.local.clone()),
                    owner: None,
                    links: 0,
                    health: LinkHealth::Orphaned,
                }),
        );
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    fn workdir(&self) -> Result<PathBuf, SyncError> {
        if self.state.sync.initialized {
            Ok(self.state.sync.path.clone())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    fn machine(&self) -> Result<MachineName, SyncError> {
        self.state.sync.machine()
    }

    fn persist(&self, workdir: &Path) -> Result<(), SyncError> {
        self.registry.save(workdir)?;
        self.store.save(&self.state)?;
        Ok(())
    }

    /// Stage `paths` and commit them as `operation`.
    fn share(&self, operation: Operation, workdir: &Path, paths: &[PathBuf]) -> Result<(), SyncError> {
        let incomplete = |step| {
            move |source| SyncError::Incomplete {
                operation,
                step,
                source,
            }
        };
        for path in paths {
            self.transport
                .stage_path(workdir, path)
                .map_err(incomplete(Step::Stage))?;
        }
        let message = commit_message(&self.machine()?, chrono::Local::now().naive_local());
        let committed = self
            .transport
            .commit(workdir, &message)
            .map_err(incomplete(Step::Commit))?;
        self.log.record_step(
            "commit",
            if committed {
                StepStatus::Ok
            } else {
                StepStatus::Skipped
            },
            (!committed).then_some("nothing to commit"),
        );
        Ok(())
    }

    fn fail_step(&self, operation: Operation, step: Step, key: &str) {
        self.log.record_step(
            &format!("{operation} {key}"),
            StepStatus::Failed,
            Some(&format!("{step} failed, nothing changed")),
        );
    }

    fn undo_add(&mut self, key: &str, registered: bool) {
        self.state.pending.pop();
        self.state.files.remove(key).ok();
        self.registry.revert_link(key, registered);
    }

    fn undo_remove(&mut self, key: &str, link: &LocalLink, previous: Option<RegistryEntry>) {
        self.state.pending.pop();
        self.state.files.add(key, &link.local, &link.synced);
        if let Some(previous) = previous {
            self.registry.restore(key, previous);
        }
        if let Err(e) = self.links.link(&link.local, &link.synced) {
            self.log
                .warn(&format!("cannot relink {key} while rolling back: {e}"));
        }
    }

    /// Break a link made by a failed operation, deleting the synced copy if
    /// the operation created it.
    fn undo_link(&self, synced: &Path, existed: bool) {
        let result = if existed {
            self.links.unlink(synced).map_err(|e| e.to_string())
        } else {
            fs::remove_file(synced).map_err(|e| e.to_string())
        };
        if let Err(e) = result {
            self.log.warn(&format!(
                "cannot undo link at {} while rolling back: {e}",
                synced.display()
            ));
        }
    }

    /// Rewrite the registry after a rollback; the first write may already
    /// have succeeded.
    fn restore_registry(&self, workdir: &Path) {
        if let Err(e) = self.registry.save(workdir) {
            self.log
                .error(&format!("cannot restore registry while rolling back: {e}"));
        }
    }

    /// Validate a file to start tracking and return its canonical path.
    fn resolve_existing(&self, path: &Path) -> Result<PathBuf, SyncError> {
        let meta = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(SyncError::FileNotFound(path.to_path_buf())),
        };
        if meta.len() > self.links.max_size() {
            return Err(SyncError::FileTooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                limit: self.links.max_size(),
            });
        }
        dunce::canonicalize(path).map_err(|_| SyncError::FileNotFound(path.to_path_buf()))
    }

    /// Key of the tracked file named by `file`, which may be the key itself
    /// or the local path it is linked through.
    fn find_tracked(&self, file: &str) -> Result<String, SyncError> {
        if self.state.files.exists(file) {
            return Ok(file.to_string());
        }
        let not_tracked = || SyncError::NotTracked(file.to_string());
        let resolved = resolve_target(Path::new(file)).map_err(|_| not_tracked())?;
        if let Some(key) = resolved.to_str().filter(|k| self.state.files.exists(k)) {
            return Ok(key.to_string());
        }
        self.tracked_by_local(&resolved).ok_or_else(not_tracked)
    }

    /// Key of the entry linked through `local`, if any.
    fn tracked_by_local(&self, local: &Path) -> Option<String> {
        self.state
            .files
            .iter()
            .find(|(_, link)| link.local == local)
            .map(|(key, _)| key.to_string())
    }
}

fn health(link: &LocalLink) -> LinkHealth {
    if is_linked(&link.local, &link.synced) {
        LinkHealth::Linked
    } else if link.local.is_file() && link.synced.is_file() {
        LinkHealth::Broken
    } else {
        LinkHealth::Missing
    }
}

fn path_key(path: &Path) -> Result<String, SyncError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| SyncError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is not valid UTF-8",
        })
}

fn absolute(path: &Path) -> Result<PathBuf, SyncError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|_| SyncError::InvalidPath {
            path: path.to_path_buf(),
            reason: "cannot resolve relative path",
        })
}

/// Absolute, canonical form of a path that may not exist yet.
fn resolve_target(path: &Path) -> Result<PathBuf, SyncError> {
    let path = absolute(path)?;
    if let Ok(canonical) = dunce::canonicalize(&path) {
        return Ok(canonical);
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => Ok(dunce::canonicalize(parent)
            .map_or_else(|_| path.clone(), |parent| parent.join(name))),
        _ => Ok(path),
    }
}

/// Delete a synced copy and any directories under `files/` it leaves empty.
fn remove_synced(workdir: &Path, synced: &Path) -> io::Result<()> {
    match fs::remove_file(synced) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let files_root = workdir.join(FILES_DIR);
    let mut dir = synced.parent();
    while let Some(d) = dir.filter(|d| d.starts_with(&files_root) && *d != files_root) {
        if fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}
