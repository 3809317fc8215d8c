#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! Integration tests sharing files between two machines through one remote.

mod common;

use std::fs;

use common::{World, read};
use configsync::config::{StateStore, synced_path};
use configsync::engine::{DEFAULT_ATTEMPTS, LinkHealth};
use configsync::resources::is_linked;
use configsync::transport::PullOutcome;

fn links(machine: &common::Machine, key: &str) -> u32 {
    machine
        .engine
        .registry()
        .get(key)
        .map_or(0, |e| e.links.get())
}

#[test]
fn file_added_on_one_machine_can_be_linked_on_another() {
    let world = World::new();
    let mut laptop = world.machine("laptop");
    let mut desktop = world.machine("desktop");

    let file = laptop.file(".gitconfig", "[user]\nname = me\n");
    let key = laptop.engine.add_file(&file).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    assert_eq!(desktop.engine.pull().unwrap(), PullOutcome::Updated);
    assert_eq!(links(&desktop, &key), 1);
    assert_eq!(desktop.engine.registry().get(&key).unwrap().owner, "laptop");

    let target = desktop.path(".gitconfig");
    let local = desktop.engine.link_existing(&key, Some(&target)).unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    assert_eq!(read(&local), "[user]\nname = me\n");
    assert!(is_linked(
        &local,
        &synced_path(&desktop.workdir, &key).unwrap()
    ));
    assert_eq!(links(&desktop, &key), 2);

    laptop.engine.pull().unwrap();
    assert_eq!(links(&laptop, &key), 2);
}

#[test]
fn edits_propagate_to_linked_machines() {
    let world = World::new();
    let mut laptop = world.machine("laptop");
    let mut desktop = world.machine("desktop");

    let file = laptop.file(".vimrc", "set number\n");
    let key = laptop.engine.add_file(&file).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.pull().unwrap();
    let local = desktop
        .engine
        .link_existing(&key, Some(&desktop.path(".vimrc")))
        .unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    laptop.engine.pull().unwrap();

    // An in-place edit on the laptop reaches the desktop's own file.
    fs::write(&file, "set number\nset relativenumber\n").unwrap();
    let report = laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    assert!(report.committed);

    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    assert_eq!(read(&local), "set number\nset relativenumber\n");
    let rows = desktop.engine.list();
    assert_eq!(rows[0].health, LinkHealth::Linked);
}

#[test]
fn concurrent_additions_are_replayed_on_the_remote_registry() {
    let world = World::new();
    let mut laptop = world.machine("laptop");
    let mut desktop = world.machine("desktop");

    let a = laptop.file("a.conf", "a");
    let b = desktop.file("b.conf", "b");
    let key_a = laptop.engine.add_file(&a).unwrap();
    let key_b = desktop.engine.add_file(&b).unwrap();

    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    // Both sides edited registry.toml; the desktop rebuilds on the laptop's.
    let report = desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    assert_eq!(report.pulled, PullOutcome::Updated);
    laptop.engine.pull().unwrap();

    for machine in [&laptop, &desktop] {
        assert_eq!(links(machine, &key_a), 1);
        assert_eq!(links(machine, &key_b), 1);
    }
    assert_eq!(desktop.engine.registry().get(&key_a).unwrap().owner, "laptop");
    assert_eq!(laptop.engine.registry().get(&key_b).unwrap().owner, "desktop");

    let desktop_b = synced_path(&desktop.workdir, &key_b).unwrap();
    assert!(is_linked(&b, &desktop_b));
    assert_eq!(read(&synced_path(&laptop.workdir, &key_b).unwrap()), "b");
    assert_eq!(read(&synced_path(&desktop.workdir, &key_a).unwrap()), "a");

    // Nothing is left to replay once the push went through.
    assert!(desktop.store.load().unwrap().pending.is_empty());
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
}

#[test]
fn edit_made_during_a_registry_conflict_is_kept() {
    let world = World::new();
    let mut laptop = world.machine("laptop");
    let mut desktop = world.machine("desktop");

    let shared = laptop.file("shared.conf", "v1");
    let key = laptop.engine.add_file(&shared).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.pull().unwrap();
    let local = desktop
        .engine
        .link_existing(&key, Some(&desktop.path("shared.conf")))
        .unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    laptop.engine.pull().unwrap();

    // The laptop adds a file while the desktop edits the shared one and
    // adds its own.
    let a = laptop.file("a.conf", "a");
    let key_a = laptop.engine.add_file(&a).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    fs::write(&local, "v2 from desktop").unwrap();
    let z = desktop.file("z.conf", "z");
    let key_z = desktop.engine.add_file(&z).unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    assert_eq!(read(&local), "v2 from desktop");
    assert!(is_linked(&local, &synced_path(&desktop.workdir, &key).unwrap()));

    laptop.engine.pull().unwrap();
    assert_eq!(read(&shared), "v2 from desktop");
    for key in [&key, &key_a, &key_z] {
        assert!(laptop.engine.registry().exists(key), "{key} missing");
    }
    assert_eq!(links(&laptop, &key), 2);
}

#[test]
fn shared_copy_survives_until_last_machine_removes_it() {
    let world = World::new();
    let mut laptop = world.machine("laptop");
    let mut desktop = world.machine("desktop");

    let file = laptop.file("app.conf", "shared");
    let key = laptop.engine.add_file(&file).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.pull().unwrap();
    let local = desktop
        .engine
        .link_existing(&key, Some(&desktop.path("app.conf")))
        .unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    laptop.engine.pull().unwrap();
    laptop.engine.remove_file(&key).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    assert_eq!(read(&file), "shared", "local copy keeps its content");

    desktop.engine.pull().unwrap();
    assert_eq!(links(&desktop, &key), 1);
    let synced = synced_path(&desktop.workdir, &key).unwrap();
    assert!(is_linked(&local, &synced));

    desktop.engine.remove_file(&key).unwrap();
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    assert!(!synced.exists());
    assert_eq!(read(&local), "shared");

    laptop.engine.pull().unwrap();
    assert!(!laptop.engine.registry().exists(&key));
    assert!(!synced_path(&laptop.workdir, &key).unwrap().exists());
}

#[test]
fn adding_a_path_another_machine_registered_joins_it() {
    let world = World::new();
    let mut laptop = world.machine("laptop");
    let mut desktop = world.machine("desktop");

    let file = laptop.file("app.conf", "from laptop");
    let key = laptop.engine.add_file(&file).unwrap();
    laptop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();
    desktop.engine.pull().unwrap();

    // Both machines see the same path, as with a shared home layout.
    let joined = desktop.engine.add_file(&file).unwrap();
    assert_eq!(joined, key);
    assert_eq!(links(&desktop, &key), 2);
    assert_eq!(desktop.engine.registry().get(&key).unwrap().owner, "laptop");
    desktop.engine.synchronize(DEFAULT_ATTEMPTS).unwrap();

    laptop.engine.pull().unwrap();
    assert_eq!(links(&laptop, &key), 2);
}
