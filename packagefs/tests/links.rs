//! The package links directory: family directories, self links,
//! dependency links, live updates on activation changes.

mod common;

use common::{activation_request, child_names, lookup_path, mount_system, read_all};
use packagefs_shared::control::ActivationChangeKind::{Activate, Deactivate};
use packagefs_test_utils::{PackageBuilder, PackagesDirFixture};

#[test]
fn test_family_directory_name_and_self_link() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("foo")
            .version(1, 2, 0, 0)
            .architecture("x86_64")
            .file("bin/foo", "foo"),
        "foo.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);

    let links = lookup_path(&volume, "packages/package-links").expect("links directory");
    assert_eq!(child_names(&volume, &links), vec!["foo-1.2.0-x86_64"]);

    let self_link = lookup_path(&volume, "packages/package-links/foo-1.2.0-x86_64/.self")
        .expect("self link");
    assert_eq!(volume.read_symlink(&self_link).unwrap(), "../..");
    volume.unmount();
}

#[test]
fn test_dependency_links_resolution() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("lib")
            .provides_versioned("libx", 2, 0, 0)
            .file("lib/libx.so", "so"),
        "lib.hpkg",
    );
    fixture.add_package(
        &PackageBuilder::new("app")
            .requires_at_least("libx", 1, 0, 0)
            .requires("missing_thing")
            .file("bin/app", "app"),
        "app.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);

    let app_dir = lookup_path(&volume, "packages/package-links/app").expect("app family");
    let mut names = child_names(&volume, &app_dir);
    names.sort();
    assert_eq!(names, vec![".self", "libx", "missing_thing"]);

    // The satisfied dependency points at the provider's installation
    // root, the unsatisfied one at "?".
    let libx = lookup_path(&volume, "packages/package-links/app/libx").unwrap();
    assert_eq!(volume.read_symlink(&libx).unwrap(), "../..");
    let missing = lookup_path(&volume, "packages/package-links/app/missing_thing").unwrap();
    assert_eq!(volume.read_symlink(&missing).unwrap(), "?");
    volume.unmount();
}

#[test]
fn test_dependency_link_updates_when_provider_changes() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("app")
            .requires("service")
            .file("bin/app", "app"),
        "app.hpkg",
    );
    fixture.add_package(
        &PackageBuilder::new("provider")
            .provides("service")
            .file("srv/provider", "p"),
        "provider.hpkg",
    );
    fixture.write_activation_file(&["app.hpkg"]);

    let (volume, _bridge) = mount_system(&fixture);

    let service = lookup_path(&volume, "packages/package-links/app/service").unwrap();
    assert_eq!(volume.read_symlink(&service).unwrap(), "?");

    // Activating the provider re-resolves the link.
    volume
        .change_activation(&activation_request(&volume, &[(Activate, "provider.hpkg")]))
        .unwrap();
    let service = lookup_path(&volume, "packages/package-links/app/service").unwrap();
    assert_eq!(volume.read_symlink(&service).unwrap(), "../..");

    // And deactivating it drops the resolution again.
    volume
        .change_activation(&activation_request(&volume, &[(Deactivate, "provider.hpkg")]))
        .unwrap();
    let service = lookup_path(&volume, "packages/package-links/app/service").unwrap();
    assert_eq!(volume.read_symlink(&service).unwrap(), "?");
    volume.unmount();
}

#[test]
fn test_family_directory_removed_with_last_package() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("transient").file("t/file", "t"),
        "transient.hpkg",
    );
    fixture.write_activation_file(&[]);

    let (volume, _bridge) = mount_system(&fixture);
    assert!(lookup_path(&volume, "packages/package-links/transient").is_none());

    volume
        .change_activation(&activation_request(&volume, &[(Activate, "transient.hpkg")]))
        .unwrap();
    assert!(lookup_path(&volume, "packages/package-links/transient").is_some());

    volume
        .change_activation(&activation_request(&volume, &[(Deactivate, "transient.hpkg")]))
        .unwrap();
    assert!(lookup_path(&volume, "packages/package-links/transient").is_none());
    volume.unmount();
}

#[test]
fn test_links_content_readable_through_normal_hooks() {
    let fixture = PackagesDirFixture::new();
    fixture.add_package(
        &PackageBuilder::new("pkg").file("bin/pkg", "pkg data"),
        "pkg.hpkg",
    );

    let (volume, _bridge) = mount_system(&fixture);

    // The links tree is ordinary nodes: stat and readdir work on it.
    let family = lookup_path(&volume, "packages/package-links/pkg").unwrap();
    let stat = volume.read_stat(&family);
    assert_eq!(stat.mode & libc::S_IFMT as u32, libc::S_IFDIR as u32);
    assert_ne!(family.id(), 0);

    // Regular content still reads fine alongside.
    let file = lookup_path(&volume, "bin/pkg").unwrap();
    assert_eq!(read_all(&volume, &file), b"pkg data");
    volume.unmount();
}
