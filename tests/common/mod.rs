// Shared helpers for integration tests.
//
// Provides an in-memory "remote" shared by several simulated machines, a
// transport that mirrors working directories to and from it the way git
// would, and a builder for initialized machines.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use configsync::config::{ConfigStore, StateStore};
use configsync::engine::SyncEngine;
use configsync::logging::{Log, Logger};
use configsync::transport::{PullOutcome, Transport, TransportError};

/// File contents keyed by path relative to the repository root.
pub type Tree = BTreeMap<PathBuf, Vec<u8>>;

/// The shared repository: its current tree and a version bumped per push.
#[derive(Debug, Default)]
pub struct Remote {
    tree: Tree,
    version: u64,
}

/// Transport that mirrors a working directory to an in-memory [`Remote`].
///
/// Pulls apply only what changed remotely since this machine last saw the
/// remote.  Any file changed on both sides, `registry.toml` included,
/// conflicts and leaves the working directory untouched.  Pushes are
/// rejected when the remote moved.
#[derive(Debug)]
pub struct MirrorTransport {
    remote: Arc<Mutex<Remote>>,
    base: Mutex<(Tree, u64)>,
}

impl MirrorTransport {
    pub fn new(remote: Arc<Mutex<Remote>>) -> Self {
        Self {
            remote,
            base: Mutex::new((Tree::new(), 0)),
        }
    }

    fn remote(&self) -> std::sync::MutexGuard<'_, Remote> {
        self.remote.lock().expect("remote lock")
    }
}

impl Transport for MirrorTransport {
    fn clone_repo(&self, _remote: &str, path: &Path) -> Result<(), TransportError> {
        let remote = self.remote();
        for (rel, content) in &remote.tree {
            write_new_inode(&path.join(rel), content);
        }
        *self.base.lock().expect("base lock") = (remote.tree.clone(), remote.version);
        Ok(())
    }

    fn stage_all(&self, _workdir: &Path) -> Result<(), TransportError> {
        Ok(())
    }

    fn stage_path(&self, _workdir: &Path, _path: &Path) -> Result<(), TransportError> {
        Ok(())
    }

    fn commit(&self, workdir: &Path, _message: &str) -> Result<bool, TransportError> {
        Ok(read_tree(workdir) != self.base.lock().expect("base lock").0)
    }

    fn pull(&self, workdir: &Path) -> Result<PullOutcome, TransportError> {
        let remote = self.remote();
        let mut base = self.base.lock().expect("base lock");
        if remote.version == base.1 {
            return Ok(PullOutcome::UpToDate);
        }

        let local = read_tree(workdir);
        let incoming = changed_between(&base.0, &remote.tree);
        if let Some(rel) = incoming
            .iter()
            .find(|rel| local.get(*rel) != base.0.get(*rel))
        {
            return Err(TransportError::Conflict {
                op: "pull",
                message: format!("CONFLICT (content): Merge conflict in {}", rel.display()),
            });
        }
        for rel in incoming {
            checkout(workdir, &rel, remote.tree.get(&rel));
        }
        *base = (remote.tree.clone(), remote.version);
        Ok(PullOutcome::Updated)
    }

    fn reset_to_remote(&self, workdir: &Path) -> Result<Vec<PathBuf>, TransportError> {
        let remote = self.remote();
        let mut base = self.base.lock().expect("base lock");
        let local = read_tree(workdir);
        let ours = changed_between(&base.0, &local);
        for rel in changed_between(&local, &remote.tree) {
            checkout(workdir, &rel, remote.tree.get(&rel));
        }
        *base = (remote.tree.clone(), remote.version);
        Ok(ours)
    }

    fn push(&self, workdir: &Path) -> Result<(), TransportError> {
        let mut remote = self.remote();
        let mut base = self.base.lock().expect("base lock");
        if remote.version != base.1 {
            return Err(TransportError::Conflict {
                op: "push",
                message: "! [rejected] main -> main (fetch first)".to_string(),
            });
        }
        let tree = read_tree(workdir);
        if tree != remote.tree {
            remote.tree = tree;
            remote.version += 1;
        }
        *base = (remote.tree.clone(), remote.version);
        Ok(())
    }
}

/// Paths whose content differs between two trees, absent on one side
/// included.
fn changed_between(a: &Tree, b: &Tree) -> Vec<PathBuf> {
    let paths: BTreeSet<&PathBuf> = a.keys().chain(b.keys()).collect();
    paths
        .into_iter()
        .filter(|rel| a.get(*rel) != b.get(*rel))
        .cloned()
        .collect()
}

/// Make `rel` under `workdir` hold `content`, or delete it when `None`.
fn checkout(workdir: &Path, rel: &Path, content: Option<&Vec<u8>>) {
    let target = workdir.join(rel);
    match content {
        Some(content) => write_new_inode(&target, content),
        None => {
            fs::remove_file(&target).ok();
        }
    }
}

/// Write `content` at `path` under a fresh inode, as git checkouts do.
pub fn write_new_inode(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    let tmp = path.with_extension("mirror-tmp");
    fs::write(&tmp, content).expect("write temp");
    fs::rename(&tmp, path).expect("rename into place");
}

/// Every file under `root`, keyed by relative path.
pub fn read_tree(root: &Path) -> Tree {
    fn walk(root: &Path, dir: &Path, tree: &mut Tree) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, tree);
            } else {
                let rel = path.strip_prefix(root).expect("under root").to_path_buf();
                tree.insert(rel, fs::read(&path).expect("read file"));
            }
        }
    }
    let mut tree = Tree::new();
    walk(root, root, &mut tree);
    tree
}

/// A temp directory hosting one shared remote and any number of machines.
pub struct World {
    pub dir: tempfile::TempDir,
    pub remote: Arc<Mutex<Remote>>,
}

impl World {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            remote: Arc::new(Mutex::new(Remote::default())),
        }
    }

    /// An initialized machine called `name` with its own home, state and
    /// working directories.
    pub fn machine(&self, name: &str) -> Machine {
        let root = self.dir.path().join(name);
        let home = root.join("home");
        fs::create_dir_all(&home).expect("create home");
        let home = dunce::canonicalize(home).expect("canonical home");
        let store = Arc::new(ConfigStore::new(root.join("state")));
        let transport = Arc::new(MirrorTransport::new(Arc::clone(&self.remote)));
        let mut engine = SyncEngine::open(
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(Logger::detached()) as Arc<dyn Log>,
        )
        .expect("open engine");
        engine
            .initialize(name, "mirror://shared", &root.join("repo"))
            .expect("initialize");
        Machine {
            home,
            workdir: root.join("repo"),
            store,
            engine,
        }
    }
}

/// One simulated machine.
pub struct Machine {
    pub home: PathBuf,
    pub workdir: PathBuf,
    pub store: Arc<ConfigStore>,
    pub engine: SyncEngine,
}

impl Machine {
    /// Create `name` under this machine's home and return its path.
    pub fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.home.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    /// Path of `name` under this machine's home.
    pub fn path(&self, name: &str) -> PathBuf {
        self.home.join(name)
    }

    /// Reopen the engine from persisted state, as a new process would.
    pub fn reopen(&mut self, transport: Arc<dyn Transport>) {
        self.engine = SyncEngine::open(
            Arc::clone(&self.store) as Arc<dyn StateStore>,
            transport,
            Arc::new(Logger::detached()) as Arc<dyn Log>,
        )
        .expect("reopen engine");
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read file")
}
