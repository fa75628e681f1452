//! The seam between the union engine and its host.
//!
//! The core publishes and discards vnodes and emits change notifications
//! through [`VfsBridge`]; the host (a kernel VFS, a FUSE adapter, a test
//! harness) supplies the implementation. Everything crossing this boundary
//! is identified by node id.

pub mod dirent;

use crate::node::NodeId;
use packagefs_shared::PackageFsResult;

/// Fields of a stat structure affected by a change, as reported through
/// `notify_stat_changed`.
pub mod stat_fields {
    pub const MODE: u32 = 1 << 0;
    pub const UID: u32 = 1 << 1;
    pub const GID: u32 = 1 << 2;
    pub const SIZE: u32 = 1 << 3;
    pub const ACCESS_TIME: u32 = 1 << 4;
    pub const MODIFICATION_TIME: u32 = 1 << 5;
    pub const CREATION_TIME: u32 = 1 << 6;
    pub const CHANGE_TIME: u32 = 1 << 7;

    pub const ALL: u32 = MODE
        | UID
        | GID
        | SIZE
        | ACCESS_TIME
        | MODIFICATION_TIME
        | CREATION_TIME
        | CHANGE_TIME;
}

/// Stat reply of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nlink: u32,
    pub block_size: u32,
    pub modified_time: i64,
    pub access_time: i64,
    pub change_time: i64,
    pub creation_time: i64,
}

/// Static volume information reported by `read_fs_info`.
#[derive(Debug, Clone)]
pub struct FsInfo {
    pub block_size: u32,
    pub io_size: u32,
    pub volume_name: String,
    pub read_only: bool,
    pub persistent: bool,
    pub has_attributes: bool,
    pub has_query: bool,
    pub has_node_monitoring: bool,
}

/// Host-side services the core consumes.
///
/// The publish/get/put/remove quartet manages vnode lifetime on the host
/// side; the notify calls feed node monitoring. All notification calls are
/// fire-and-forget: errors do not abort the operation that emitted them.
pub trait VfsBridge: Send + Sync {
    /// Hand a node to the host ahead of lookup (root, shine-through).
    fn publish_vnode(&self, node_id: NodeId, mode: u32) -> PackageFsResult<()>;

    /// Acquire a host reference to a vnode, if the host currently knows
    /// it. Returns false when it does not.
    fn get_vnode(&self, node_id: NodeId) -> bool;

    /// Release one host reference.
    fn put_vnode(&self, node_id: NodeId);

    /// Ask the host to discard a vnode as soon as its references drop.
    fn remove_vnode(&self, node_id: NodeId);

    /// Bind the real directory `(source_device, source_node)` of the
    /// underlying mount point over the placeholder `target`.
    fn bind_mount_directory(
        &self,
        source_device: u64,
        source_node: u64,
        target: NodeId,
    ) -> PackageFsResult<()>;

    fn notify_entry_created(&self, parent: NodeId, name: &str, node: NodeId);
    fn notify_entry_removed(&self, parent: NodeId, name: &str, node: NodeId);
    fn notify_stat_changed(&self, node: NodeId, fields: u32);
}

/// Bridge for embedders that do not track vnodes or notifications.
#[derive(Debug, Default)]
pub struct NoopBridge;

impl VfsBridge for NoopBridge {
    fn publish_vnode(&self, _node_id: NodeId, _mode: u32) -> PackageFsResult<()> {
        Ok(())
    }

    fn get_vnode(&self, _node_id: NodeId) -> bool {
        false
    }

    fn put_vnode(&self, _node_id: NodeId) {}

    fn remove_vnode(&self, _node_id: NodeId) {}

    fn bind_mount_directory(
        &self,
        _source_device: u64,
        _source_node: u64,
        _target: NodeId,
    ) -> PackageFsResult<()> {
        Ok(())
    }

    fn notify_entry_created(&self, _parent: NodeId, _name: &str, _node: NodeId) {}
    fn notify_entry_removed(&self, _parent: NodeId, _name: &str, _node: NodeId) {}
    fn notify_stat_changed(&self, _node: NodeId, _fields: u32) {}
}
