#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Two machines sharing files through a bare git repository on disk.
//!
//! Skipped when `git` is not installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use configsync::config::{ConfigStore, StateStore, synced_path};
use configsync::engine::{DEFAULT_ATTEMPTS, SyncEngine};
use configsync::exec::SystemExecutor;
use configsync::logging::{Log, Logger};
use configsync::resources::is_linked;
use configsync::transport::{GitTransport, Transport};

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Local identity so commits work without any global git configuration.
fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.name", "configsync"]);
    git(dir, &["config", "user.email", "configsync@example.invalid"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// A bare repository with one commit, so every clone tracks a branch.
fn seeded_remote(root: &Path) -> PathBuf {
    let remote = root.join("remote.git");
    git(root, &["init", "-q", "--bare", "remote.git"]);
    git(root, &["clone", "-q", "remote.git", "seed"]);
    let seed = root.join("seed");
    configure_identity(&seed);
    fs::write(seed.join("README"), "shared configuration\n").unwrap();
    git(&seed, &["add", "README"]);
    git(&seed, &["commit", "-q", "-m", "seed"]);
    git(&seed, &["push", "-q", "origin", "HEAD"]);
    remote
}

struct Machine {
    home: PathBuf,
    workdir: PathBuf,
    store: Arc<ConfigStore>,
    engine: SyncEngine,
}

fn machine(root: &Path, remote: &Path, name: &str) -> Machine {
    let base = root.join(name);
    let home = base.join("home");
    fs::create_dir_all(&home).unwrap();
    let home = dunce::canonicalize(home).unwrap();
    let workdir = base.join("repo");
    let store = Arc::new(ConfigStore::new(base.join("state")));
    let executor = Arc::new(SystemExecutor::new(Duration::from_secs(60)));
    let mut engine = SyncEngine::open(
        Arc::clone(&store) as Arc<dyn StateStore>,
        Arc::new(GitTransport::new(executor)) as Arc<dyn Transport>,
        Arc::new(Logger::detached()) as Arc<dyn Log>,
    )
    .unwrap();
    engine
        .initialize(name, &remote.to_string_lossy(), &workdir)
        .unwrap();
    configure_identity(&workdir);
    Machine {
        home,
        workdir,
        store,
        engine,
    }
}

impl Machine {
    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.home.join(name);
        fs::write(&path, content).unwrap();
        path
    }
}

#[test]
fn concurrent_additions_reach_both_machines() {
    if which::which("git").is_err() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let remote = seeded_remote(root.path());
    let mut laptop = machine(root.path(), &remote, "laptop");
    let mut desktop = machine(root.path(), &remote, "desktop");

    let a = laptop.file("a.conf", "from laptop\n");
    let b = desktop.file("b.conf", "from desktop\n");
    let key_a = laptop.engine.add_file(&a).unwrap();
    let key_b = desktop.engine.add_file(&b).unwrap();

    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    // The desktop's rebase conflicts on registry.toml.
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    laptop.engine.pull().unwrap();

    for m in [&laptop, &desktop] {
        for key in [&key_a, &key_b] {
            let entry = m.engine.registry().get(key).unwrap();
            assert_eq!(entry.links.get(), 1, "{key}");
        }
    }
    assert_eq!(laptop.engine.registry().get(&key_b).unwrap().owner, "desktop");
    assert!(is_linked(&b, &synced_path(&desktop.workdir, &key_b).unwrap()));
    assert_eq!(
        fs::read_to_string(synced_path(&laptop.workdir, &key_b).unwrap()).unwrap(),
        "from desktop\n"
    );
    assert!(desktop.store.load().unwrap().pending.is_empty());

    // A second round has nothing left to reconcile.
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
}

#[test]
fn removal_on_one_machine_and_addition_on_the_other_both_land() {
    if which::which("git").is_err() {
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let remote = seeded_remote(root.path());
    let mut laptop = machine(root.path(), &remote, "laptop");
    let mut desktop = machine(root.path(), &remote, "desktop");

    let old = laptop.file("old.conf", "retired\n");
    let key_old = laptop.engine.add_file(&old).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.pull().unwrap();

    let new = desktop.file("new.conf", "fresh\n");
    let key_new = desktop.engine.add_file(&new).unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    laptop.engine.remove_file(&key_old).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.pull().unwrap();

    for m in [&laptop, &desktop] {
        assert!(!m.engine.registry().exists(&key_old));
        assert!(m.engine.registry().exists(&key_new));
        assert!(!synced_path(&m.workdir, &key_old).unwrap().exists());
    }
    assert_eq!(fs::read_to_string(&old).unwrap(), "retired\n");
}
