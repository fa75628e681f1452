//! One mount instance.
//!
//! The volume owns the node-id allocator, the node table, the visible
//! tree, the set of active packages, indices, live queries and node
//! listeners, and serves the filesystem hook surface. Activation changes
//! run through [`activation`]; deferred ones through the package-loader
//! worker thread.
//!
//! Locking: reader hooks take the volume lock shared; mutations of the
//! tree (mount, unmount, activation changes, package link updates) take it
//! exclusively — the system volume's lock first when another volume is
//! involved. The node table, package table and per-directory child tables
//! sit behind their own short-lived locks underneath.

pub mod activation;
pub mod domain;
mod worker;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use packagefs_shared::constants::{fs_info, names, node_ids, shine_through};
use packagefs_shared::control::{
    ActivationChangeRequest, MountType, PackageInfo, PackagesDirectoryInfo, VolumeInfo, ops,
};
use packagefs_shared::{PackageFsError, PackageFsResult};

use crate::config::{MountOptions, ShineThrough};
use crate::index::{Index, IndexRegistry};
use crate::listener::{ListenerRegistry, NodeListener, OldNodeAttributes};
use crate::node::{DirectoryIterator, Node, NodeId, NodeRef};
use crate::package::{Package, PackageNodeAttribute, codec::attribute_types};
use crate::query::{LiveQuery, QueryPolicy, QueryRegistry};
use crate::root::PackageFsRoot;
use crate::vfs::dirent::DirentWriter;
use crate::vfs::{FsInfo, Stat, VfsBridge, stat_fields};

use domain::PackagesDirectory;
use worker::{Job, PackageLoader};

pub(crate) fn current_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

struct NodeTable {
    by_id: HashMap<NodeId, NodeRef>,
    next_id: NodeId,
}

impl NodeTable {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            next_id: node_ids::FIRST_ALLOCATED,
        }
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// One mounted packagefs volume.
pub struct Volume {
    volume_id: u64,
    bridge: Arc<dyn VfsBridge>,
    mount_type: MountType,
    volume_name: String,
    mount_point: PathBuf,
    mount_point_device_id: u64,
    mount_point_node_id: u64,

    /// Tree-wide reader/writer exclusion; see the module docs.
    pub(crate) lock: RwLock<()>,
    nodes: RwLock<NodeTable>,
    packages: RwLock<HashMap<String, Arc<Package>>>,
    domains: RwLock<Vec<Arc<PackagesDirectory>>>,

    root_directory: NodeRef,
    fs_root: RwLock<Option<Arc<PackageFsRoot>>>,

    indices: Arc<IndexRegistry>,
    listeners: ListenerRegistry,
    queries: QueryRegistry,
    loader: Mutex<Option<PackageLoader>>,
    unmounted: AtomicBool,
}

impl Volume {
    /// Mount a volume: load the activated package set and build the tree.
    pub fn mount(options: MountOptions, bridge: Arc<dyn VfsBridge>) -> PackageFsResult<Arc<Self>> {
        let packages_path = options.packages_directory.clone();
        if packages_path.as_os_str().is_empty() {
            return Err(PackageFsError::bad_value("empty packages directory"));
        }

        let live_domain = PackagesDirectory::open(&packages_path)?;

        let mount_point = match &options.mount_point {
            Some(path) => path.clone(),
            None => packages_path
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| PackageFsError::bad_value("packages directory has no parent"))?,
        };
        let mount_point_metadata = fs::metadata(&mount_point)?;

        let volume_name = options.effective_volume_name();
        let root_directory =
            Node::new_root_directory(volume_name.clone(), live_domain.modified_time());

        let volume = Arc::new(Self {
            volume_id: options.volume_id,
            bridge,
            mount_type: options.mount_type,
            volume_name,
            mount_point,
            mount_point_device_id: mount_point_metadata.dev(),
            mount_point_node_id: mount_point_metadata.ino(),
            lock: RwLock::new(()),
            nodes: RwLock::new(NodeTable::new()),
            packages: RwLock::new(HashMap::new()),
            domains: RwLock::new(vec![live_domain]),
            root_directory: root_directory.clone(),
            fs_root: RwLock::new(None),
            indices: IndexRegistry::new(),
            listeners: ListenerRegistry::default(),
            queries: QueryRegistry::default(),
            loader: Mutex::new(None),
            unmounted: AtomicBool::new(false),
        });

        volume
            .nodes
            .write()
            .by_id
            .insert(node_ids::ROOT, root_directory.clone());

        // Indices follow every node through the listener bus.
        let index_listener: Arc<dyn NodeListener> = volume.indices.clone();
        volume.listeners.add(index_listener, None);

        // Archived states requested? Load their domains, newest first.
        if let Some(state) = &options.packages_state {
            volume.load_old_states(state)?;
        }

        // Register with the process-wide root; the first system volume of a
        // root becomes its system volume.
        let fs_root = PackageFsRoot::register_volume(&volume)?;
        *volume.fs_root.write() = Some(fs_root.clone());

        {
            let _guard = volume.lock.write();
            volume.create_shine_through_directories(options.effective_shine_through())?;

            if fs_root.is_system_volume(&volume) {
                fs_root.links().attach(&volume)?;
            }
        }

        activation::load_initial_packages(&volume)?;

        // Publish the root and the shine-through bindings.
        volume
            .bridge
            .publish_vnode(node_ids::ROOT, root_directory.mode())?;
        root_directory.mark_known_to_vfs();
        volume.publish_shine_through_directories()?;

        volume
            .loader
            .lock()
            .replace(PackageLoader::spawn(&volume));

        info!(
            volume = %volume.volume_name,
            packages = volume.packages.read().len(),
            mount_type = ?volume.mount_type,
            "volume mounted"
        );
        Ok(volume)
    }

    /// Tear the volume down: drop package content, nodes and registrations.
    pub fn unmount(self: &Arc<Self>) {
        if self.unmounted.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(loader) = self.loader.lock().take() {
            loader.shutdown();
        }

        {
            let system = self.system_volume_if_not_self();
            let _system_guard = system.as_ref().map(|volume| volume.lock.write());
            let _guard = self.lock.write();

            let packages: Vec<_> = self.packages.read().values().cloned().collect();
            for package in packages {
                activation::remove_package_content(self, &package, None, false);
            }
            self.packages.write().clear();
        }

        if let Some(fs_root) = self.fs_root.write().take() {
            if fs_root.is_system_volume(self) {
                let _guard = self.lock.write();
                fs_root.links().detach(self);
            }
            fs_root.unregister_volume(self);
        }

        self.nodes.write().by_id.clear();
        info!(volume = %self.volume_name, "volume unmounted");
    }

    // ------------------------------------------------------------------
    // Identity.
    // ------------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.volume_id
    }

    pub fn mount_type(&self) -> MountType {
        self.mount_type
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn mount_point_device_id(&self) -> u64 {
        self.mount_point_device_id
    }

    pub fn mount_point_node_id(&self) -> u64 {
        self.mount_point_node_id
    }

    pub fn root_directory(&self) -> &NodeRef {
        &self.root_directory
    }

    pub(crate) fn bridge(&self) -> &Arc<dyn VfsBridge> {
        &self.bridge
    }

    pub fn fs_root(&self) -> Arc<PackageFsRoot> {
        self.fs_root.read().clone().expect("volume is mounted")
    }

    pub(crate) fn system_volume_if_not_self(self: &Arc<Self>) -> Option<Arc<Volume>> {
        let fs_root = self.fs_root.read().clone()?;
        let system = fs_root.system_volume()?;
        if Arc::ptr_eq(&system, self) {
            None
        } else {
            Some(system)
        }
    }

    // ------------------------------------------------------------------
    // Node table.
    // ------------------------------------------------------------------

    pub(crate) fn allocate_node_id(&self) -> NodeId {
        self.nodes.write().allocate_id()
    }

    pub(crate) fn insert_node(&self, node: &NodeRef) {
        debug_assert_ne!(node.id(), node_ids::UNSET);
        self.nodes.write().by_id.insert(node.id(), node.clone());
    }

    pub(crate) fn drop_node_from_table(&self, node: &NodeRef) {
        self.nodes.write().by_id.remove(&node.id());
    }

    /// Unlink a node from its parent and the node table.
    pub(crate) fn remove_node(&self, node: &NodeRef) {
        if let Some(parent) = node.parent() {
            parent.remove_child(node);
        }
        self.drop_node_from_table(node);
    }

    /// Remove a node and force the host to discard its vnode, so handles
    /// opened later see the replacement.
    pub(crate) fn remove_node_and_vnode(&self, node: &NodeRef) {
        self.remove_node(node);
        if node.is_known_to_vfs() && self.bridge.get_vnode(node.id()) {
            self.bridge.remove_vnode(node.id());
            self.bridge.put_vnode(node.id());
        }
    }

    // ------------------------------------------------------------------
    // Packages and domains.
    // ------------------------------------------------------------------

    pub(crate) fn live_domain(&self) -> Arc<PackagesDirectory> {
        self.domains.read().first().cloned().expect("live domain")
    }

    pub fn domains(&self) -> Vec<Arc<PackagesDirectory>> {
        self.domains.read().clone()
    }

    fn load_old_states(&self, requested_state: &str) -> PackageFsResult<()> {
        let packages_path = self.live_domain().path().to_path_buf();
        let states = domain::enumerate_states(&packages_path, requested_state)?;
        let mut domains = self.domains.write();
        for state in states {
            match PackagesDirectory::open_old_state(&packages_path, &state) {
                Ok(directory) => {
                    info!(state = %state, "added archived packages state");
                    domains.push(directory);
                }
                Err(err) => warn!(state = %state, error = %err, "skipping unreadable state"),
            }
        }
        domains.sort_by(|a, b| {
            if a.is_newer_than(b) {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });
        Ok(())
    }

    pub(crate) fn drop_old_state_domains(&self) {
        self.domains.write().retain(|domain| domain.is_live());
    }

    pub(crate) fn find_package(&self, file_name: &str) -> Option<Arc<Package>> {
        self.packages.read().get(file_name).cloned()
    }

    pub fn packages_snapshot(&self) -> Vec<Arc<Package>> {
        self.packages.read().values().cloned().collect()
    }

    pub(crate) fn add_package_to_table(&self, package: &Arc<Package>) {
        self.packages
            .write()
            .insert(package.file_name().to_owned(), package.clone());
        for domain in self.domains.read().iter() {
            if domain.device_id() == package.domain_device_id()
                && domain.node_id() == package.domain_node_id()
            {
                domain.register_package(package);
                break;
            }
        }
    }

    pub(crate) fn remove_package_from_table(&self, package: &Arc<Package>) {
        self.packages.write().remove(package.file_name());
        for domain in self.domains.read().iter() {
            if domain.device_id() == package.domain_device_id()
                && domain.node_id() == package.domain_node_id()
            {
                domain.unregister_package(package);
                break;
            }
        }
    }

    pub(crate) fn clear_package_table(&self) {
        let packages: Vec<_> = self.packages.read().values().cloned().collect();
        for package in packages {
            self.remove_package_from_table(&package);
        }
    }

    /// Load a package file, searching from `start` toward newer domains.
    pub(crate) fn load_package(
        &self,
        name: &str,
        start: &Arc<PackagesDirectory>,
    ) -> PackageFsResult<Arc<Package>> {
        let domains = self.domains.read().clone();
        let start_index = domains
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, start))
            .unwrap_or(0);

        for domain in domains[..=start_index].iter().rev() {
            if let Some(path) = domain.find_package_file(name) {
                return Package::load(
                    &path,
                    domain.device_id(),
                    domain.node_id(),
                    self.mount_type,
                );
            }
        }
        Err(PackageFsError::not_found(name))
    }

    // ------------------------------------------------------------------
    // Shine-through directories.
    // ------------------------------------------------------------------

    fn create_shine_through_directories(&self, setting: ShineThrough) -> PackageFsResult<()> {
        let directories: &[&str] = match setting {
            ShineThrough::System | ShineThrough::Home => shine_through::DIRECTORIES,
            ShineThrough::None => return Ok(()),
        };

        for name in directories {
            let id = self.allocate_node_id();
            let directory = Node::new_plain_directory(id, *name, current_time());
            self.root_directory.add_child(&directory)?;
            self.insert_node(&directory);
            debug!(directory = *name, id, "created shine-through placeholder");
        }
        Ok(())
    }

    fn publish_shine_through_directories(&self) -> PackageFsResult<()> {
        let mut child = self.root_directory.first_child();
        while let Some(node) = child {
            child = self.root_directory.next_child(&node);

            // Only plain (non-union) directories are placeholders.
            let is_placeholder = node
                .as_directory()
                .is_some_and(|directory| !directory.is_union());
            if !is_placeholder {
                continue;
            }

            let real_path = self.mount_point.join(node.name());
            let metadata = match fs::metadata(&real_path) {
                Ok(metadata) if metadata.is_dir() => metadata,
                Ok(_) => {
                    warn!(name = node.name(), "shine-through entry is not a directory");
                    let _guard = self.lock.write();
                    self.remove_node(&node);
                    continue;
                }
                Err(err) => {
                    warn!(name = node.name(), error = %err, "missing shine-through directory");
                    let _guard = self.lock.write();
                    self.remove_node(&node);
                    continue;
                }
            };

            if let Err(err) = self.bridge.publish_vnode(node.id(), node.mode()) {
                let _guard = self.lock.write();
                self.remove_node(&node);
                return Err(err);
            }
            node.mark_known_to_vfs();

            self.bridge
                .bind_mount_directory(metadata.dev(), metadata.ino(), node.id())?;
            self.bridge.put_vnode(node.id());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hook surface.
    // ------------------------------------------------------------------

    pub fn read_fs_info(&self) -> FsInfo {
        FsInfo {
            block_size: fs_info::BLOCK_SIZE,
            io_size: fs_info::OPTIMAL_IO_SIZE,
            volume_name: self.volume_name.clone(),
            read_only: true,
            persistent: true,
            has_attributes: true,
            has_query: true,
            has_node_monitoring: true,
        }
    }

    /// Resolve `name` within `directory`; `.` and `..` resolve locally.
    pub fn lookup(&self, directory: &NodeRef, name: &str) -> PackageFsResult<NodeRef> {
        let _guard = self.lock.read();

        if !directory.is_directory() {
            return Err(PackageFsError::NotADirectory);
        }
        let node = match name {
            "." => directory.clone(),
            ".." => directory.parent().unwrap_or_else(|| directory.clone()),
            _ => directory
                .find_child(name)
                .ok_or_else(|| PackageFsError::not_found(name))?,
        };
        node.mark_known_to_vfs();
        Ok(node)
    }

    /// Resolve a node id, as the host's `get_vnode` hook does.
    pub fn get_node(&self, id: NodeId) -> PackageFsResult<NodeRef> {
        let _guard = self.lock.read();
        let node = self
            .nodes
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| PackageFsError::not_found(format!("node {id}")))?;
        node.mark_known_to_vfs();
        Ok(node)
    }

    /// Copy the node's name into `buffer`, NUL-terminated.
    pub fn get_vnode_name(&self, node: &NodeRef, buffer: &mut [u8]) -> PackageFsResult<usize> {
        let name = node.name().as_bytes();
        if name.len() + 1 > buffer.len() {
            return Err(PackageFsError::BufferOverflow);
        }
        buffer[..name.len()].copy_from_slice(name);
        buffer[name.len()] = 0;
        Ok(name.len())
    }

    pub fn read_stat(&self, node: &NodeRef) -> Stat {
        let _guard = self.lock.read();
        let modified_time = node.modified_time();
        Stat {
            mode: node.mode(),
            uid: node.uid(),
            gid: node.gid(),
            size: node.file_size(),
            nlink: 1,
            block_size: fs_info::BLOCK_SIZE,
            modified_time,
            access_time: modified_time,
            change_time: modified_time,
            creation_time: modified_time,
        }
    }

    /// Check an access request; any write bit fails on a read-only volume.
    pub fn access(&self, _node: &NodeRef, mode: u32) -> PackageFsResult<()> {
        const W_OK: u32 = 2;
        if mode & W_OK != 0 {
            return Err(PackageFsError::ReadOnlyDevice);
        }
        Ok(())
    }

    pub fn read(&self, node: &NodeRef, offset: u64, buffer: &mut [u8]) -> PackageFsResult<usize> {
        let _guard = self.lock.read();
        node.read_at(offset, buffer)
    }

    pub fn read_symlink(&self, node: &NodeRef) -> PackageFsResult<String> {
        let _guard = self.lock.read();
        if node.mode() & libc::S_IFMT as u32 != libc::S_IFLNK as u32 {
            return Err(PackageFsError::bad_value("not a symlink"));
        }
        node.read_symlink()
    }

    pub fn open_dir(&self, node: &NodeRef) -> PackageFsResult<DirectoryIterator> {
        let _guard = self.lock.read();
        if !node.is_directory() {
            return Err(PackageFsError::NotADirectory);
        }
        Ok(DirectoryIterator::new(node.clone()))
    }

    /// Serialize up to `max_count` entries into `buffer`; returns the
    /// number written.
    pub fn read_dir(
        &self,
        iterator: &mut DirectoryIterator,
        buffer: &mut [u8],
        max_count: u32,
    ) -> PackageFsResult<u32> {
        let _guard = self.lock.read();
        let mut writer = DirentWriter::new(buffer);
        while writer.count() < max_count {
            let Some((name, node)) = iterator.current() else {
                break;
            };
            if !writer.write(self.volume_id, node.id(), &name)? {
                break;
            }
            iterator.next();
        }
        Ok(writer.count())
    }

    pub fn rewind_dir(&self, iterator: &mut DirectoryIterator) {
        iterator.rewind();
    }

    // ------------------------------------------------------------------
    // Attributes.
    // ------------------------------------------------------------------

    /// Attributes visible on a node: the auto-generated package attribute
    /// followed by the representative package node's own attributes.
    pub fn list_attributes(&self, node: &NodeRef) -> Vec<PackageNodeAttribute> {
        let _guard = self.lock.read();
        let mut attributes = Vec::new();
        if let Some(package_node) = node.get_package_node() {
            if let Some(package) = package_node.package() {
                attributes.push(PackageNodeAttribute {
                    name: names::PACKAGE_FILE_ATTRIBUTE.to_owned(),
                    type_code: attribute_types::STRING,
                    data: package.file_name().as_bytes().to_vec().into(),
                });
            }
            attributes.extend(package_node.attributes());
        }
        attributes
    }

    pub fn open_attr(
        &self,
        node: &NodeRef,
        name: &str,
    ) -> PackageFsResult<PackageNodeAttribute> {
        let _guard = self.lock.read();
        if name == names::PACKAGE_FILE_ATTRIBUTE
            && let Some(package) = node.get_package_node().and_then(|n| n.package())
        {
            return Ok(PackageNodeAttribute {
                name: names::PACKAGE_FILE_ATTRIBUTE.to_owned(),
                type_code: attribute_types::STRING,
                data: package.file_name().as_bytes().to_vec().into(),
            });
        }
        node.find_attribute(name)
            .ok_or_else(|| PackageFsError::not_found(name))
    }

    pub fn read_attr_stat(&self, attribute: &PackageNodeAttribute) -> (u32, u64) {
        (attribute.type_code, attribute.data.len() as u64)
    }

    pub fn read_attr(
        &self,
        attribute: &PackageNodeAttribute,
        offset: u64,
        buffer: &mut [u8],
    ) -> usize {
        if offset >= attribute.data.len() as u64 {
            return 0;
        }
        let available = &attribute.data[offset as usize..];
        let to_copy = available.len().min(buffer.len());
        buffer[..to_copy].copy_from_slice(&available[..to_copy]);
        to_copy
    }

    // ------------------------------------------------------------------
    // Indices.
    // ------------------------------------------------------------------

    pub fn find_index(&self, name: &str) -> Option<Arc<Index>> {
        self.indices.find(name)
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indices
            .iter()
            .map(|index| index.name().to_owned())
            .collect()
    }

    pub fn read_index_stat(&self, name: &str) -> PackageFsResult<(u32, usize)> {
        let index = self
            .indices
            .find(name)
            .ok_or_else(|| PackageFsError::not_found(name))?;
        Ok((index.type_code(), index.entry_count()))
    }

    // ------------------------------------------------------------------
    // Control channel.
    // ------------------------------------------------------------------

    /// Dispatch a control operation from its wire form.
    pub fn ioctl(
        self: &Arc<Self>,
        operation: u32,
        buffer: &[u8],
        caller_base: u64,
    ) -> PackageFsResult<ControlReply> {
        match operation {
            ops::GET_VOLUME_INFO => Ok(ControlReply::VolumeInfo(self.volume_info())),
            ops::GET_PACKAGE_INFOS => Ok(ControlReply::PackageInfos(self.package_infos())),
            ops::CHANGE_ACTIVATION => {
                let request = ActivationChangeRequest::decode(buffer, caller_base)?;
                self.change_activation(&request)?;
                Ok(ControlReply::Done)
            }
            _ => Err(PackageFsError::bad_value(format!(
                "unknown control operation {operation}"
            ))),
        }
    }

    pub fn volume_info(&self) -> VolumeInfo {
        let _guard = self.lock.read();
        let fs_root = self.fs_root();
        VolumeInfo {
            mount_type: self.mount_type,
            root_device_id: fs_root.device_id(),
            root_directory_id: fs_root.node_id(),
            packages_directories: self
                .domains
                .read()
                .iter()
                .map(|domain| PackagesDirectoryInfo {
                    device_id: domain.device_id(),
                    node_id: domain.node_id(),
                })
                .collect(),
        }
    }

    pub fn package_infos(&self) -> Vec<PackageInfo> {
        let _guard = self.lock.read();
        self.packages
            .read()
            .values()
            .map(|package| PackageInfo {
                name: package.file_name().to_owned(),
                package_device_id: package.device_id(),
                package_node_id: package.node_id(),
                directory_device_id: package.domain_device_id(),
                directory_node_id: package.domain_node_id(),
            })
            .collect()
    }

    /// Apply an activation change batch synchronously.
    pub fn change_activation(
        self: &Arc<Self>,
        request: &ActivationChangeRequest,
    ) -> PackageFsResult<()> {
        activation::change_activation(self, request)
    }

    /// Queue an activation change for the package-loader thread.
    pub fn queue_activation_change(&self, request: ActivationChangeRequest) {
        if let Some(loader) = self.loader.lock().as_ref() {
            loader.post(Job::ChangeActivation(request));
        }
    }

    // ------------------------------------------------------------------
    // Listeners, queries, notifications.
    // ------------------------------------------------------------------

    /// Register a node listener; `node` of `None` listens on all nodes.
    pub fn add_node_listener(&self, listener: Arc<dyn NodeListener>, node: Option<NodeId>) {
        self.listeners.add(listener, node);
    }

    pub fn remove_node_listener(&self, listener: &Arc<dyn NodeListener>, node: Option<NodeId>) {
        self.listeners.remove(listener, node);
    }

    pub(crate) fn notify_node_added(&self, node: &NodeRef) {
        self.listeners.notify_added(node);
        for index in self.indices.iter() {
            if let Some(key) = index.key_for(node) {
                self.queries
                    .update(node, index.name(), index.type_code(), None, Some(&key));
            }
        }
    }

    pub(crate) fn notify_node_removed(&self, node: &NodeRef) {
        self.listeners.notify_removed(node);
        for index in self.indices.iter() {
            if let Some(key) = index.key_for(node) {
                self.queries
                    .update(node, index.name(), index.type_code(), Some(&key), None);
            }
        }
    }

    pub(crate) fn notify_node_changed(
        &self,
        node: &NodeRef,
        fields: u32,
        old: &OldNodeAttributes,
    ) {
        self.listeners.notify_changed(node, fields, old);
        for index in self.indices.iter() {
            let old_key = index.old_key_for(node, old);
            let new_key = index.key_for(node);
            if old_key != new_key {
                self.queries.update(
                    node,
                    index.name(),
                    index.type_code(),
                    old_key.as_deref(),
                    new_key.as_deref(),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Package links plumbing: nodes synthesized by the packagefs root are
    // adopted into this (system) volume's table and announced here.
    // ------------------------------------------------------------------

    pub(crate) fn adopt_links_node(&self, node: &NodeRef) {
        node.set_id(self.allocate_node_id());
        self.insert_node(node);

        // The package links tree is shallow; recursion is fine here.
        let mut child = node.first_child();
        while let Some(current) = child {
            child = node.next_child(&current);
            self.adopt_links_node(&current);
        }
    }

    pub(crate) fn discard_links_node(&self, node: &NodeRef) {
        let mut child = node.first_child();
        while let Some(current) = child {
            child = node.next_child(&current);
            self.discard_links_node(&current);
        }
        self.drop_node_from_table(node);
    }

    pub(crate) fn package_link_node_added(&self, node: &NodeRef) {
        self.adopt_links_node(node);
        if let Some(parent) = node.parent() {
            self.bridge
                .notify_entry_created(parent.id(), node.name(), node.id());
        }
        self.notify_node_added(node);
    }

    pub(crate) fn package_link_node_removed(&self, node: &NodeRef) {
        self.discard_links_node(node);
        if let Some(parent) = node.parent() {
            self.bridge
                .notify_entry_removed(parent.id(), node.name(), node.id());
        }
        self.notify_node_removed(node);
    }

    pub(crate) fn package_link_node_changed(&self, node: &NodeRef, fields: u32) {
        self.bridge.notify_stat_changed(node.id(), fields);
        self.notify_node_changed(node, fields, &OldNodeAttributes::default());
    }
}

impl QueryPolicy for Volume {
    fn find_index(&self, name: &str) -> Option<Arc<Index>> {
        Volume::find_index(self, name)
    }

    fn node_by_id(&self, id: NodeId) -> Option<NodeRef> {
        self.nodes.read().by_id.get(&id).cloned()
    }

    fn add_query(&self, query: Arc<dyn LiveQuery>) {
        self.queries.add(query);
    }

    fn remove_query(&self, query: &Arc<dyn LiveQuery>) {
        self.queries.remove(query);
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if let Some(loader) = self.loader.lock().take() {
            loader.shutdown();
        }
    }
}

/// Reply of [`Volume::ioctl`].
#[derive(Debug)]
pub enum ControlReply {
    VolumeInfo(VolumeInfo),
    PackageInfos(Vec<PackageInfo>),
    Done,
}

/// Helper assembling the stat-change mask used across activation changes.
pub(crate) const ALL_STAT_FIELDS: u32 = stat_fields::ALL;
