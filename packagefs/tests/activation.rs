//! Runtime activation changes: precedence, leaf re-identification, open
//! handle stability, directory merging, rollback.

mod common;

use common::{
    Event, activation_request, child_names, lookup_path, mount_system, read_all, tree_snapshot,
};
use packagefs_shared::PackageFsError;
use packagefs_shared::control::ActivationChangeKind::{Activate, Deactivate, Reactivate};
use packagefs_test_utils::{PackageBuilder, PackagesDirFixture};

#[test]
fn test_newer_package_wins_and_deactivation_restores() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("foo").mtime(1000).file("bin/tool", "old data"),
        "foo-1.0.hpkg",
    );
    fixture.add_package(
        &PackageBuilder::new("bar").mtime(2000).file("bin/tool", "new data"),
        "bar-1.0.hpkg",
    );
    fixture.write_activation_file(&["foo-1.0.hpkg"]);

    let (volume, bridge) = mount_system(&fixture);
    assert_eq!(
        read_all(&volume, &lookup_path(&volume, "bin/tool").unwrap()),
        b"old data"
    );

    // Activate the newer package; it takes over the path.
    let request = activation_request(&volume, &[(Activate, "bar-1.0.hpkg")]);
    volume.change_activation(&request).unwrap();

    let tool = lookup_path(&volume, "bin/tool").unwrap();
    let stat = volume.read_stat(&tool);
    assert_eq!(stat.size, 8);
    assert_eq!(read_all(&volume, &tool), b"new data");
    let new_id = tool.id();

    // Deactivate it again; the old content comes back under a fresh id,
    // announced as a removed/created pair.
    bridge.drain();
    let request = activation_request(&volume, &[(Deactivate, "bar-1.0.hpkg")]);
    volume.change_activation(&request).unwrap();

    let tool = lookup_path(&volume, "bin/tool").unwrap();
    assert_eq!(read_all(&volume, &tool), b"old data");
    assert_ne!(tool.id(), new_id);

    let events = bridge.drain();
    assert!(events.iter().any(|event| matches!(
        event,
        Event::EntryRemoved { name, node, .. } if name == "tool" && *node == new_id
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::EntryCreated { name, node, .. } if name == "tool" && *node == tool.id()
    )));
    volume.unmount();
}

#[test]
fn test_open_handle_stays_on_old_content_across_swap() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("foo").mtime(1000).file("bin/tool", "foo bytes"),
        "foo.hpkg",
    );
    fixture.add_package(
        &PackageBuilder::new("bar").mtime(2000).file("bin/tool", "bar bytes"),
        "bar.hpkg",
    );
    fixture.write_activation_file(&["foo.hpkg"]);

    let (volume, _bridge) = mount_system(&fixture);

    // "Open" the file: hold the node as a VFS handle would.
    let handle = lookup_path(&volume, "bin/tool").unwrap();
    let old_id = handle.id();
    assert_eq!(read_all(&volume, &handle), b"foo bytes");

    let request = activation_request(&volume, &[(Activate, "bar.hpkg")]);
    volume.change_activation(&request).unwrap();

    // The held handle keeps reading the data it was opened against.
    assert_eq!(read_all(&volume, &handle), b"foo bytes");

    // A fresh lookup sees the new representative under a new id.
    let fresh = lookup_path(&volume, "bin/tool").unwrap();
    assert_ne!(fresh.id(), old_id);
    assert_eq!(read_all(&volume, &fresh), b"bar bytes");
    volume.unmount();
}

#[test]
fn test_directory_merge_and_unmerge() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("foo")
            .mtime(1000)
            .file("lib/libA", "A from foo")
            .file("lib/libB", "B from foo"),
        "foo.hpkg",
    );
    fixture.add_package(
        &PackageBuilder::new("bar")
            .mtime(2000)
            .file("lib/libB", "B from bar")
            .file("lib/libC", "C from bar"),
        "bar.hpkg",
    );
    fixture.write_activation_file(&["foo.hpkg"]);

    let (volume, _bridge) = mount_system(&fixture);

    let request = activation_request(&volume, &[(Activate, "bar.hpkg")]);
    volume.change_activation(&request).unwrap();

    let lib = lookup_path(&volume, "lib").unwrap();
    assert_eq!(child_names(&volume, &lib), vec!["libA", "libB", "libC"]);
    assert_eq!(
        read_all(&volume, &lookup_path(&volume, "lib/libB").unwrap()),
        b"B from bar"
    );

    // Directory node identity survives the merge; only leaves swap.
    let lib_id = lib.id();

    let request = activation_request(&volume, &[(Deactivate, "bar.hpkg")]);
    volume.change_activation(&request).unwrap();

    let lib = lookup_path(&volume, "lib").unwrap();
    assert_eq!(lib.id(), lib_id);
    assert_eq!(child_names(&volume, &lib), vec!["libA", "libB"]);
    assert_eq!(
        read_all(&volume, &lookup_path(&volume, "lib/libB").unwrap()),
        b"B from foo"
    );
    volume.unmount();
}

#[test]
fn test_reactivate_picks_up_replaced_archive() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("app").mtime(1000).file("bin/app", "v1"),
        "app.hpkg",
    );
    fixture.write_activation_file(&["app.hpkg"]);

    let (volume, _bridge) = mount_system(&fixture);
    assert_eq!(
        read_all(&volume, &lookup_path(&volume, "bin/app").unwrap()),
        b"v1"
    );

    // Replace the archive on disk, then reactivate in place.
    fixture.add_package(
        &PackageBuilder::new("app").mtime(2000).file("bin/app", "v2 bits"),
        "app.hpkg",
    );
    let request = activation_request(&volume, &[(Reactivate, "app.hpkg")]);
    volume.change_activation(&request).unwrap();

    assert_eq!(
        read_all(&volume, &lookup_path(&volume, "bin/app").unwrap()),
        b"v2 bits"
    );
    assert_eq!(volume.packages_snapshot().len(), 1);
    volume.unmount();
}

#[test]
fn test_activation_validation_errors() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(&PackageBuilder::new("a").file("x/a", "a"), "a.hpkg");
    fixture.write_activation_file(&["a.hpkg"]);

    let (volume, _bridge) = mount_system(&fixture);

    // Activating an active package.
    let request = activation_request(&volume, &[(Activate, "a.hpkg")]);
    assert!(matches!(
        volume.change_activation(&request),
        Err(PackageFsError::NameInUse(_))
    ));

    // Deactivating an inactive one.
    let request = activation_request(&volume, &[(Deactivate, "missing.hpkg")]);
    assert!(matches!(
        volume.change_activation(&request),
        Err(PackageFsError::NotFound(_))
    ));

    // Wrong packages directory identity.
    let mut request = activation_request(&volume, &[(Activate, "a.hpkg")]);
    request.items[0].parent_directory_id ^= 0xdead;
    assert!(matches!(
        volume.change_activation(&request),
        Err(PackageFsError::MismatchedValues(_))
    ));
    volume.unmount();
}

#[test]
fn test_failed_batch_rolls_back_completely() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("base").mtime(500).file("etc/base", "base"),
        "base.hpkg",
    );
    fixture.write_activation_file(&["base.hpkg"]);

    // x is fine; y collides with x's file by contributing a directory of
    // the same path, which aborts content application mid-tree.
    fixture.add_package(
        &PackageBuilder::new("x").mtime(1000).file("data/item", "from x"),
        "x.hpkg",
    );
    fixture.add_package(
        &PackageBuilder::new("y")
            .mtime(2000)
            .directory("data/item")
            .file("data/item/nested", "boom"),
        "y.hpkg",
    );

    let (volume, bridge) = mount_system(&fixture);
    let before = tree_snapshot(&volume);
    bridge.drain();

    let request =
        activation_request(&volume, &[(Activate, "x.hpkg"), (Activate, "y.hpkg")]);
    let result = volume.change_activation(&request);
    assert!(result.is_err());

    // Neither package's content is visible; the tree is exactly what it
    // was before the call.
    assert!(lookup_path(&volume, "data").is_none());
    assert_eq!(tree_snapshot(&volume), before);
    assert_eq!(volume.packages_snapshot().len(), 1);

    // The notification stream is balanced: every created entry was
    // removed again.
    let events = bridge.drain();
    let mut created = Vec::new();
    let mut removed = Vec::new();
    for event in events {
        match event {
            Event::EntryCreated { parent, name, node } => created.push((parent, name, node)),
            Event::EntryRemoved { parent, name, node } => removed.push((parent, name, node)),
            Event::StatChanged { .. } => {}
        }
    }
    created.sort();
    removed.sort();
    assert_eq!(created, removed);
    volume.unmount();
}

#[test]
fn test_noop_batch_is_accepted() {
    let fixture = PackagesDirFixture::new();
    let (volume, _bridge) = mount_system(&fixture);
    let request = activation_request(&volume, &[]);
    volume.change_activation(&request).unwrap();
    volume.unmount();
}

#[test]
fn test_queued_activation_is_applied() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("later").file("opt/later", "deferred"),
        "later.hpkg",
    );
    // Nothing active initially.
    fixture.write_activation_file(&[]);

    let (volume, _bridge) = mount_system(&fixture);
    assert!(lookup_path(&volume, "opt/later").is_none());

    let request = activation_request(&volume, &[(Activate, "later.hpkg")]);
    volume.queue_activation_change(request);

    // The loader thread applies the change; poll briefly.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if lookup_path(&volume, "opt/later").is_some() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "queued activation was not applied"
        );
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    volume.unmount();
}
