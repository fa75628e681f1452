//! The visible node tree.
//!
//! Every entry served by a volume is a [`Node`]: a shared header (id, name,
//! weak parent link) with a directory or leaf payload. Unpacking nodes
//! union the contributing package nodes of every active package that
//! defines their path; the head of the contributor list is the
//! representative observed by stat/read/attribute operations.

pub mod directory;
pub mod leaf;

pub use directory::{Directory, DirectoryIterator};
pub use leaf::{Leaf, UnpackingLeafState};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use packagefs_shared::constants::node_ids;
use packagefs_shared::{PackageFsError, PackageFsResult};

use crate::package::PackageNode;

/// Volume-local node identifier. 0 is "unset", 1 the root directory.
pub type NodeId = u64;

/// Shared handle to a node.
pub type NodeRef = Arc<Node>;

/// The node has been handed to the VFS (published or looked up) and must be
/// discarded through it on removal.
pub const FLAG_KNOWN_TO_VFS: u32 = 1 << 0;

/// Variant payload of a node.
pub enum NodeKind {
    Directory(Directory),
    Leaf(Leaf),
}

/// One visible filesystem entry.
pub struct Node {
    id: RwLock<NodeId>,
    name: String,
    parent: RwLock<Weak<Node>>,
    flags: AtomicU32,
    kind: NodeKind,
}

impl Node {
    /// A directory that unions package directories.
    pub fn new_union_directory(id: NodeId, name: impl Into<String>) -> NodeRef {
        Arc::new(Self {
            id: RwLock::new(id),
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
            kind: NodeKind::Directory(Directory::new_union(None)),
        })
    }

    /// The volume root: a union directory with a fixed modification time.
    pub fn new_root_directory(name: impl Into<String>, modified_time: i64) -> NodeRef {
        Arc::new(Self {
            id: RwLock::new(node_ids::ROOT),
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
            kind: NodeKind::Directory(Directory::new_union(Some(modified_time))),
        })
    }

    /// A directory outside the union machinery: shine-through placeholders
    /// and package link directories.
    pub fn new_plain_directory(
        id: NodeId,
        name: impl Into<String>,
        modified_time: i64,
    ) -> NodeRef {
        Arc::new(Self {
            id: RwLock::new(id),
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
            kind: NodeKind::Directory(Directory::new_plain(modified_time)),
        })
    }

    /// A leaf (file or symlink) that unions package leaf nodes.
    pub fn new_unpacking_leaf(id: NodeId, name: impl Into<String>) -> NodeRef {
        Arc::new(Self {
            id: RwLock::new(id),
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
            kind: NodeKind::Leaf(Leaf::new_unpacking()),
        })
    }

    /// A synthesized symlink (package links).
    pub fn new_symlink(
        id: NodeId,
        name: impl Into<String>,
        target: impl Into<String>,
        modified_time: i64,
    ) -> NodeRef {
        Arc::new(Self {
            id: RwLock::new(id),
            name: name.into(),
            parent: RwLock::new(Weak::new()),
            flags: AtomicU32::new(0),
            kind: NodeKind::Leaf(Leaf::new_symlink_target(target.into(), modified_time)),
        })
    }

    pub fn id(&self) -> NodeId {
        *self.id.read()
    }

    /// Assign the node id; package link nodes are created before they are
    /// adopted by a volume and get theirs late.
    pub fn set_id(&self, id: NodeId) {
        *self.id.write() = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.read().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Option<&NodeRef>) {
        *self.parent.write() = parent.map(Arc::downgrade).unwrap_or_default();
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.kind {
            NodeKind::Directory(directory) => Some(directory),
            NodeKind::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Directory(_) => None,
        }
    }

    /// Whether this node participates in package unioning.
    pub fn is_unpacking(&self) -> bool {
        match &self.kind {
            NodeKind::Directory(directory) => directory.is_union(),
            NodeKind::Leaf(leaf) => leaf.is_unpacking(),
        }
    }

    pub fn is_known_to_vfs(&self) -> bool {
        self.flags.load(Ordering::Acquire) & FLAG_KNOWN_TO_VFS != 0
    }

    pub fn mark_known_to_vfs(&self) {
        self.flags.fetch_or(FLAG_KNOWN_TO_VFS, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Stat surface, reported from the representative package node.
    // ------------------------------------------------------------------

    pub fn mode(&self) -> u32 {
        match &self.kind {
            NodeKind::Directory(directory) => directory
                .head_contributor()
                .map(|node| node.mode())
                .unwrap_or(libc::S_IFDIR as u32 | 0o555),
            NodeKind::Leaf(leaf) => leaf.mode(),
        }
    }

    pub fn uid(&self) -> u32 {
        match &self.kind {
            NodeKind::Directory(directory) => directory
                .head_contributor()
                .map(|node| node.uid())
                .unwrap_or(0),
            NodeKind::Leaf(leaf) => leaf.uid(),
        }
    }

    pub fn gid(&self) -> u32 {
        match &self.kind {
            NodeKind::Directory(directory) => directory
                .head_contributor()
                .map(|node| node.gid())
                .unwrap_or(0),
            NodeKind::Leaf(leaf) => leaf.gid(),
        }
    }

    pub fn file_size(&self) -> u64 {
        match &self.kind {
            NodeKind::Directory(_) => 0,
            NodeKind::Leaf(leaf) => leaf.file_size(),
        }
    }

    pub fn modified_time(&self) -> i64 {
        match &self.kind {
            NodeKind::Directory(directory) => directory.modified_time(),
            NodeKind::Leaf(leaf) => leaf.modified_time(),
        }
    }

    // ------------------------------------------------------------------
    // Content surface.
    // ------------------------------------------------------------------

    pub fn read_at(&self, offset: u64, buffer: &mut [u8]) -> PackageFsResult<usize> {
        match &self.kind {
            NodeKind::Directory(_) => Err(PackageFsError::IsADirectory),
            NodeKind::Leaf(leaf) => leaf.read_at(offset, buffer),
        }
    }

    pub fn read_symlink(&self) -> PackageFsResult<String> {
        match &self.kind {
            NodeKind::Directory(_) => Err(PackageFsError::IsADirectory),
            NodeKind::Leaf(leaf) => leaf.read_symlink(),
        }
    }

    // ------------------------------------------------------------------
    // Union surface (unpacking nodes).
    // ------------------------------------------------------------------

    /// Attach a contributing package node, applying the head-selection
    /// policy. The type must match (directory to directory, leaf to leaf).
    pub fn add_package_node(&self, package_node: &Arc<PackageNode>) -> PackageFsResult<()> {
        match &self.kind {
            NodeKind::Directory(directory) => directory.add_package_node(package_node),
            NodeKind::Leaf(leaf) => leaf.add_package_node(package_node),
        }
    }

    /// Detach a contributor; if the head leaves, a new one is promoted by
    /// precedence.
    pub fn remove_package_node(&self, package_node: &Arc<PackageNode>) {
        match &self.kind {
            NodeKind::Directory(directory) => directory.remove_package_node(package_node),
            NodeKind::Leaf(leaf) => leaf.remove_package_node(package_node),
        }
    }

    /// The representative package node, if any.
    pub fn get_package_node(&self) -> Option<Arc<PackageNode>> {
        match &self.kind {
            NodeKind::Directory(directory) => directory.head_contributor(),
            NodeKind::Leaf(leaf) => leaf.active_package_node(),
        }
    }

    /// True when `package_node` is this node's only contributor.
    pub fn is_only_package_node(&self, package_node: &Arc<PackageNode>) -> bool {
        match &self.kind {
            NodeKind::Directory(directory) => directory.is_only_package_node(package_node),
            NodeKind::Leaf(leaf) => leaf.is_only_package_node(package_node),
        }
    }

    /// Would adding `package_node` replace the current head?
    pub fn will_be_first_package_node(&self, package_node: &Arc<PackageNode>) -> bool {
        match &self.kind {
            NodeKind::Directory(directory) => directory.will_be_first_package_node(package_node),
            NodeKind::Leaf(leaf) => leaf.will_be_first_package_node(package_node),
        }
    }

    /// Pin the current head so handles opened before removal keep working,
    /// then clear the contributor list.
    pub fn prepare_for_removal(&self) {
        match &self.kind {
            NodeKind::Directory(directory) => directory.prepare_for_removal(),
            NodeKind::Leaf(leaf) => leaf.prepare_for_removal(),
        }
    }

    /// Leaf-swap support: create a clone with a fresh id, move the
    /// contributor list over, and pin the old head on this node so handles
    /// opened against it keep seeing the old representative.
    pub fn clone_transfer_package_nodes(&self, new_id: NodeId) -> PackageFsResult<NodeRef> {
        let leaf = self
            .as_leaf()
            .ok_or_else(|| PackageFsError::bad_value("clone of a directory node"))?;
        let clone = Node::new_unpacking_leaf(new_id, self.name.clone());
        let clone_leaf = clone.as_leaf().expect("fresh leaf");
        leaf.transfer_contributors_to(clone_leaf);
        Ok(clone)
    }

    // ------------------------------------------------------------------
    // Directory surface; errors on leaves.
    // ------------------------------------------------------------------

    pub fn add_child(self: &Arc<Self>, child: &NodeRef) -> PackageFsResult<()> {
        let directory = self.as_directory().ok_or(PackageFsError::NotADirectory)?;
        child.set_parent(Some(self));
        directory.add_child(child);
        Ok(())
    }

    pub fn remove_child(&self, child: &NodeRef) {
        if let Some(directory) = self.as_directory() {
            directory.remove_child(child);
            child.set_parent(None);
        }
    }

    pub fn find_child(&self, name: &str) -> Option<NodeRef> {
        self.as_directory()?.find_child(name)
    }

    pub fn first_child(&self) -> Option<NodeRef> {
        self.as_directory()?.first_child()
    }

    pub fn next_child(&self, child: &NodeRef) -> Option<NodeRef> {
        self.as_directory()?.next_child(child)
    }

    /// Attributes of the representative package node.
    pub fn find_attribute(&self, name: &str) -> Option<crate::package::PackageNodeAttribute> {
        self.get_package_node()?.find_attribute(name)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("name", &self.name)
            .field("directory", &self.is_directory())
            .finish()
    }
}
