//! Mount-time behavior: initial package loading strategies, shine-through
//! placeholders, stat/read/readdir/readlink plumbing, attributes, fs info.

mod common;

use common::{child_names, lookup_path, mount_system, read_all};
use packagefs::config::MountOptions;
use packagefs::vfs::NoopBridge;
use packagefs::volume::Volume;
use packagefs_shared::control::MountType;
use packagefs_test_utils::{PackageBuilder, PackagesDirFixture};
use std::sync::Arc;

#[test]
fn test_single_package_mount() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("foo")
            .version(1, 0, 0, 0)
            .architecture("x86")
            .file("bin/hello", "hello passed"),
        "foo-1.0-x86.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);

    // The root carries the shine-through placeholder plus the package's
    // content.
    assert_eq!(
        child_names(&volume, volume.root_directory()),
        vec!["bin", "packages"]
    );

    let hello = lookup_path(&volume, "bin/hello").expect("bin/hello exists");
    let stat = volume.read_stat(&hello);
    assert_eq!(stat.size, 12);
    assert_eq!(read_all(&volume, &hello), b"hello passed");

    volume.unmount();
}

#[test]
fn test_mount_without_activation_file_scans_directory() {
    let fixture = PackagesDirFixture::new();
    // No activation file written; all .hpkg files get picked up.
    fixture.add_package(&PackageBuilder::new("a").file("data/a", "a"), "a.hpkg");
    fixture.add_package(&PackageBuilder::new("b").file("data/b", "b"), "b.hpkg");

    let (volume, _bridge) = mount_system(&fixture);
    assert!(lookup_path(&volume, "data/a").is_some());
    assert!(lookup_path(&volume, "data/b").is_some());
    volume.unmount();
}

#[test]
fn test_activation_file_driven_mount() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(&PackageBuilder::new("a").file("data/a", "a"), "a.hpkg");
    fixture.add_package(&PackageBuilder::new("b").file("data/b", "b"), "b.hpkg");
    fixture.add_package(&PackageBuilder::new("c").file("data/c", "c"), "c.hpkg");
    fixture.write_activation_file(&["a.hpkg", "c.hpkg"]);

    let (volume, _bridge) = mount_system(&fixture);

    assert!(lookup_path(&volume, "data/a").is_some());
    assert!(lookup_path(&volume, "data/b").is_none());
    assert!(lookup_path(&volume, "data/c").is_some());
    assert_eq!(volume.packages_snapshot().len(), 2);
    volume.unmount();
}

#[test]
fn test_old_state_mount() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(&PackageBuilder::new("new").file("data/new", "n"), "new.hpkg");
    fixture.add_package(&PackageBuilder::new("old").file("data/old", "o"), "old.hpkg");
    fixture.write_activation_file(&["new.hpkg"]);
    fixture.write_state("state_2024-01-01", &["old.hpkg"]);

    let bridge = Arc::new(NoopBridge);
    let mut options = MountOptions::new(fixture.packages_dir());
    options.mount_type = MountType::System;
    options.mount_point = Some(fixture.mount_point());
    options.packages_state = Some("state_2024-01-01".to_owned());
    let volume = Volume::mount(options, bridge).expect("mount old state");

    // The old state's activation file wins; its packages resolve through
    // the newer directories when not archived in the state itself.
    assert!(lookup_path(&volume, "data/old").is_some());
    assert!(lookup_path(&volume, "data/new").is_none());
    volume.unmount();
}

#[test]
fn test_bad_package_is_skipped() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(&PackageBuilder::new("good").file("bin/ok", "ok"), "good.hpkg");
    std::fs::write(fixture.packages_dir().join("broken.hpkg"), b"not a tar at all").unwrap();

    let (volume, _bridge) = mount_system(&fixture);
    assert!(lookup_path(&volume, "bin/ok").is_some());
    assert_eq!(volume.packages_snapshot().len(), 1);
    volume.unmount();
}

#[test]
fn test_symlink_readlink() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("links")
            .file("bin/tool", "x")
            .symlink("bin/alias", "tool"),
        "links.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);
    let alias = lookup_path(&volume, "bin/alias").unwrap();
    assert_eq!(volume.read_symlink(&alias).unwrap(), "tool");

    // readlink on a regular file is refused.
    let tool = lookup_path(&volume, "bin/tool").unwrap();
    assert!(volume.read_symlink(&tool).is_err());
    volume.unmount();
}

#[test]
fn test_modes_are_read_only() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("modes").file_mode("bin/tool", "x", 0o755),
        "modes.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);
    let tool = lookup_path(&volume, "bin/tool").unwrap();
    let stat = volume.read_stat(&tool);
    // Write bits are stripped at parse time.
    assert_eq!(stat.mode & 0o222, 0);
    assert_ne!(stat.mode & 0o111, 0);

    // access() refuses write requests.
    assert!(volume.access(&tool, 2).is_err());
    assert!(volume.access(&tool, 4).is_ok());
    volume.unmount();
}

#[test]
fn test_auto_package_attribute() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("attr").file("bin/tool", "x"),
        "attr-1.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);
    let tool = lookup_path(&volume, "bin/tool").unwrap();

    let attributes = volume.list_attributes(&tool);
    assert!(
        attributes
            .iter()
            .any(|attribute| attribute.name == "SYS:PACKAGE_FILE")
    );

    let attribute = volume.open_attr(&tool, "SYS:PACKAGE_FILE").unwrap();
    let mut buffer = vec![0u8; 64];
    let read = volume.read_attr(&attribute, 0, &mut buffer);
    assert_eq!(&buffer[..read], b"attr-1.hpkg");
    volume.unmount();
}

#[test]
fn test_fs_info_flags() {
    let fixture = PackagesDirFixture::new();
    let (volume, _bridge) = mount_system(&fixture);

    let info = volume.read_fs_info();
    assert!(info.read_only);
    assert!(info.persistent);
    assert!(info.has_attributes);
    assert!(info.has_query);
    assert!(info.has_node_monitoring);
    assert_eq!(info.block_size, 4096);
    assert_eq!(info.volume_name, "system");
    volume.unmount();
}

#[test]
fn test_indices_present() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("idx").file("bin/tool", "12345"),
        "idx.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);

    let mut names = volume.index_names();
    names.sort();
    assert_eq!(names, vec!["SYS:APP_SIG", "last_modified", "name", "size"]);

    let index = volume.find_index("name").unwrap();
    assert_eq!(index.find_exact(b"tool").len(), 1);

    let (_type, entries) = volume.read_index_stat("name").unwrap();
    assert!(entries > 0);
    volume.unmount();
}

#[test]
fn test_uncompressed_archive_extent_reads() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("raw")
            .uncompressed()
            .file("data/blob", "extent data here"),
        "raw.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);
    let blob = lookup_path(&volume, "data/blob").unwrap();
    assert_eq!(read_all(&volume, &blob), b"extent data here");

    // Partial read at an offset.
    let mut buffer = [0u8; 4];
    let read = volume.read(&blob, 7, &mut buffer).unwrap();
    assert_eq!(&buffer[..read], b"data");
    volume.unmount();
}

#[test]
fn test_lookup_dot_and_dotdot() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("dots").file("a/b/c", "x"),
        "dots.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);
    let b = lookup_path(&volume, "a/b").unwrap();
    let dot = volume.lookup(&b, ".").unwrap();
    assert_eq!(dot.id(), b.id());
    let dotdot = volume.lookup(&b, "..").unwrap();
    assert_eq!(dotdot.name(), "a");

    // ".." of the root resolves to the root itself.
    let root = volume.root_directory();
    assert_eq!(volume.lookup(root, "..").unwrap().id(), root.id());
    volume.unmount();
}
