//! Shared harness for the end-to-end tests: a notification-recording VFS
//! bridge and helpers for mounting fixtures and walking the tree.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

use packagefs::config::MountOptions;
use packagefs::node::NodeRef;
use packagefs::vfs::VfsBridge;
use packagefs::volume::Volume;
use packagefs_shared::PackageFsResult;
use packagefs_shared::control::{
    ActivationChangeItem, ActivationChangeKind, ActivationChangeRequest, MountType,
};
use packagefs_test_utils::PackagesDirFixture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    EntryCreated {
        parent: u64,
        name: String,
        node: u64,
    },
    EntryRemoved {
        parent: u64,
        name: String,
        node: u64,
    },
    StatChanged {
        node: u64,
        fields: u32,
    },
}

/// Bridge that records every notification for later assertions.
#[derive(Debug, Default)]
pub struct RecordingBridge {
    events: Mutex<Vec<Event>>,
}

impl RecordingBridge {
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl VfsBridge for RecordingBridge {
    fn publish_vnode(&self, _node_id: u64, _mode: u32) -> PackageFsResult<()> {
        Ok(())
    }

    fn get_vnode(&self, _node_id: u64) -> bool {
        false
    }

    fn put_vnode(&self, _node_id: u64) {}

    fn remove_vnode(&self, _node_id: u64) {}

    fn bind_mount_directory(
        &self,
        _source_device: u64,
        _source_node: u64,
        _target: u64,
    ) -> PackageFsResult<()> {
        Ok(())
    }

    fn notify_entry_created(&self, parent: u64, name: &str, node: u64) {
        self.events.lock().push(Event::EntryCreated {
            parent,
            name: name.to_owned(),
            node,
        });
    }

    fn notify_entry_removed(&self, parent: u64, name: &str, node: u64) {
        self.events.lock().push(Event::EntryRemoved {
            parent,
            name: name.to_owned(),
            node,
        });
    }

    fn notify_stat_changed(&self, node: u64, fields: u32) {
        self.events.lock().push(Event::StatChanged { node, fields });
    }
}

/// Mount a fixture's packages directory as a system volume.
pub fn mount_system(fixture: &PackagesDirFixture) -> (Arc<Volume>, Arc<RecordingBridge>) {
    let bridge = Arc::new(RecordingBridge::default());
    let mut options = MountOptions::new(fixture.packages_dir());
    options.mount_type = MountType::System;
    options.mount_point = Some(fixture.mount_point());
    options.volume_id = 1;
    let volume = Volume::mount(options, bridge.clone()).expect("mount");
    (volume, bridge)
}

/// Resolve a slash-separated path from the root.
pub fn lookup_path(volume: &Arc<Volume>, path: &str) -> Option<NodeRef> {
    let mut node = volume.root_directory().clone();
    for component in path.split('/').filter(|component| !component.is_empty()) {
        node = volume.lookup(&node, component).ok()?;
    }
    Some(node)
}

/// Read a file node in full.
pub fn read_all(volume: &Arc<Volume>, node: &NodeRef) -> Vec<u8> {
    let size = volume.read_stat(node).size as usize;
    let mut buffer = vec![0u8; size];
    let read = volume.read(node, 0, &mut buffer).expect("read");
    buffer.truncate(read);
    buffer
}

/// Names returned by readdir, including "." and "..".
pub fn readdir_names(volume: &Arc<Volume>, node: &NodeRef) -> Vec<String> {
    let mut iterator = volume.open_dir(node).expect("open_dir");
    let mut buffer = vec![0u8; 64 * 1024];
    let count = volume
        .read_dir(&mut iterator, &mut buffer, u32::MAX)
        .expect("read_dir");
    packagefs::vfs::dirent::parse_records(&buffer, count)
        .expect("parse dirents")
        .into_iter()
        .map(|record| record.name)
        .collect()
}

/// Child names without "." and "..", sorted.
pub fn child_names(volume: &Arc<Volume>, node: &NodeRef) -> Vec<String> {
    let mut names: Vec<_> = readdir_names(volume, node)
        .into_iter()
        .filter(|name| name != "." && name != "..")
        .collect();
    names.sort();
    names
}

/// Build an activation change request against the volume's live packages
/// directory.
pub fn activation_request(
    volume: &Arc<Volume>,
    items: &[(ActivationChangeKind, &str)],
) -> ActivationChangeRequest {
    let live = &volume.domains()[0];
    ActivationChangeRequest {
        items: items
            .iter()
            .map(|(kind, name)| ActivationChangeItem {
                kind: *kind,
                parent_device_id: live.device_id() as u32,
                parent_directory_id: live.node_id(),
                name: (*name).to_owned(),
            })
            .collect(),
    }
}

/// A comparable snapshot of the visible tree: path, type char, size and
/// content (files) or target (symlinks).
pub fn tree_snapshot(volume: &Arc<Volume>) -> Vec<(String, char, u64, Vec<u8>)> {
    let mut snapshot = Vec::new();
    collect_snapshot(volume, volume.root_directory(), PathBuf::new(), &mut snapshot);
    snapshot.sort();
    snapshot
}

fn collect_snapshot(
    volume: &Arc<Volume>,
    node: &NodeRef,
    path: PathBuf,
    snapshot: &mut Vec<(String, char, u64, Vec<u8>)>,
) {
    for name in child_names(volume, node) {
        let child = volume.lookup(node, &name).expect("child resolves");
        let child_path = path.join(&name);
        let stat = volume.read_stat(&child);
        let kind_bits = stat.mode & libc::S_IFMT as u32;
        if kind_bits == libc::S_IFDIR as u32 {
            snapshot.push((child_path.display().to_string(), 'd', 0, Vec::new()));
            collect_snapshot(volume, &child, child_path, snapshot);
        } else if kind_bits == libc::S_IFLNK as u32 {
            let target = volume.read_symlink(&child).expect("readlink");
            snapshot.push((
                child_path.display().to_string(),
                'l',
                stat.size,
                target.into_bytes(),
            ));
        } else {
            let content = read_all(volume, &child);
            snapshot.push((child_path.display().to_string(), 'f', stat.size, content));
        }
    }
}
