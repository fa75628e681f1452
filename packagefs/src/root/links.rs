//! The package links tree.
//!
//! Every active package family is exposed as a directory named
//! `<name>[-<version>][-<architecture>]` holding a `.self` symlink to the
//! package's installation root and one symlink per dependency, pointing at
//! the resolving package's installation root (or `?` while unresolved).
//! The tree lives on the system volume, under its `packages` placeholder;
//! while no system volume is attached it is maintained invisibly and
//! adopted wholesale on attach.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use packagefs_shared::PackageFsResult;
use packagefs_shared::constants::names;
use packagefs_shared::control::MountType;

use crate::node::{Node, NodeRef};
use crate::package::Package;
use crate::vfs::stat_fields;
use crate::volume::{Volume, current_time};

use super::PackageFsRoot;

fn install_root_target(mount_type: MountType) -> &'static str {
    match mount_type {
        MountType::System => "../..",
        MountType::Home => "../../../home/config",
        MountType::Custom => names::UNKNOWN_LINK_TARGET,
    }
}

/// Family ordering within a link directory: the more specific mount type
/// wins the head slot.
fn mount_rank(mount_type: MountType) -> u8 {
    match mount_type {
        MountType::Home => 0,
        MountType::System => 1,
        MountType::Custom => 2,
    }
}

struct LinksInner {
    attached_volume: Weak<Volume>,
    families: HashMap<String, Arc<PackageLinkDirectory>>,
}

/// The `package-links` directory of one packagefs root.
pub struct PackageLinksDirectory {
    node: NodeRef,
    inner: Mutex<LinksInner>,
}

impl PackageLinksDirectory {
    pub(super) fn new() -> Self {
        Self {
            node: Node::new_plain_directory(0, names::PACKAGE_LINKS_DIRECTORY, current_time()),
            inner: Mutex::new(LinksInner {
                attached_volume: Weak::new(),
                families: HashMap::new(),
            }),
        }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    /// Expose the tree on the given (system) volume, under its `packages`
    /// placeholder when present.
    pub(crate) fn attach(&self, volume: &Arc<Volume>) -> PackageFsResult<()> {
        let root = volume.root_directory();
        let parent = root
            .find_child("packages")
            .filter(|node| node.is_directory())
            .unwrap_or_else(|| root.clone());

        parent.add_child(&self.node)?;
        volume.adopt_links_node(&self.node);
        self.inner.lock().attached_volume = Arc::downgrade(volume);
        debug!(parent = parent.name(), "package links directory attached");
        Ok(())
    }

    /// Withdraw the tree from the volume; its contents stay intact.
    pub(crate) fn detach(&self, volume: &Arc<Volume>) {
        if let Some(parent) = self.node.parent() {
            parent.remove_child(&self.node);
        }
        volume.discard_links_node(&self.node);
        self.inner.lock().attached_volume = Weak::new();
    }

    fn attached_volume(&self) -> Option<Arc<Volume>> {
        self.inner.lock().attached_volume.upgrade()
    }

    pub(crate) fn add_package(&self, root: &Arc<PackageFsRoot>, package: &Arc<Package>) {
        let attached = self.attached_volume();
        let name = package.name();

        let existing = self.inner.lock().families.get(&name).cloned();
        let directory = match existing {
            Some(directory) => directory,
            None => {
                let Some(directory) = PackageLinkDirectory::new(package) else {
                    warn!(package = %name, "package link name exceeds the name limit");
                    return;
                };
                self.inner
                    .lock()
                    .families
                    .insert(name.clone(), directory.clone());

                if self.node.add_child(&directory.node).is_ok()
                    && let Some(volume) = &attached
                {
                    volume.package_link_node_added(&directory.node);
                }
                directory
            }
        };

        directory.add_package(root, package, attached.as_ref());
        self.refresh_dependencies(root, attached.as_ref());
    }

    pub(crate) fn remove_package(&self, root: &Arc<PackageFsRoot>, package: &Arc<Package>) {
        let attached = self.attached_volume();
        let name = package.name();

        let directory = self.inner.lock().families.get(&name).cloned();
        if let Some(directory) = directory {
            let emptied = directory.remove_package(root, package, attached.as_ref());
            if emptied {
                if let Some(volume) = &attached {
                    volume.package_link_node_removed(&directory.node);
                }
                self.node.remove_child(&directory.node);
                self.inner.lock().families.remove(&name);
            }
        }

        self.refresh_dependencies(root, attached.as_ref());
    }

    /// Re-resolve every family's dependency links; package churn in one
    /// family can change where another family's links point.
    fn refresh_dependencies(&self, root: &Arc<PackageFsRoot>, attached: Option<&Arc<Volume>>) {
        let families: Vec<_> = self.inner.lock().families.values().cloned().collect();
        for family in families {
            family.update_dependency_links(root, attached);
        }
    }

    pub fn family_directory(&self, name: &str) -> Option<Arc<PackageLinkDirectory>> {
        self.inner.lock().families.get(name).cloned()
    }
}

/// One family's link directory.
pub struct PackageLinkDirectory {
    node: NodeRef,
    packages: Mutex<Vec<Arc<Package>>>,
    self_link: Mutex<Option<NodeRef>>,
    dependency_links: Mutex<Vec<NodeRef>>,
}

impl PackageLinkDirectory {
    /// Build the family directory, named after the package. Returns `None`
    /// when the composed name does not fit the file name limit.
    fn new(package: &Arc<Package>) -> Option<Arc<Self>> {
        let mut name = package.name();
        if let Some(version) = package.version() {
            name.push('-');
            name.push_str(&version.to_string());
        }
        if let Some(architecture) = package.architecture() {
            name.push('-');
            name.push_str(&architecture);
        }
        if name.len() > names::MAX_FILE_NAME {
            return None;
        }

        Some(Arc::new(Self {
            node: Node::new_plain_directory(0, name, current_time()),
            packages: Mutex::new(Vec::new()),
            self_link: Mutex::new(None),
            dependency_links: Mutex::new(Vec::new()),
        }))
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    fn add_package(
        self: &Arc<Self>,
        root: &Arc<PackageFsRoot>,
        package: &Arc<Package>,
        attached: Option<&Arc<Volume>>,
    ) {
        let is_head = {
            let mut packages = self.packages.lock();
            let rank = mount_rank(package.mount_type());
            let position = packages
                .iter()
                .position(|candidate| mount_rank(candidate.mount_type()) >= rank)
                .unwrap_or(packages.len());
            packages.insert(position, package.clone());
            position == 0
        };

        if is_head {
            self.update(root, attached);
        }
    }

    /// Returns true when the family ran empty.
    fn remove_package(
        self: &Arc<Self>,
        root: &Arc<PackageFsRoot>,
        package: &Arc<Package>,
        attached: Option<&Arc<Volume>>,
    ) -> bool {
        let (was_head, emptied) = {
            let mut packages = self.packages.lock();
            let was_head = packages
                .first()
                .is_some_and(|head| Arc::ptr_eq(head, package));
            packages.retain(|candidate| !Arc::ptr_eq(candidate, package));
            (was_head, packages.is_empty())
        };

        if was_head {
            self.update(root, attached);
        }
        emptied
    }

    /// Rebuild the directory contents around the current head package.
    fn update(self: &Arc<Self>, root: &Arc<PackageFsRoot>, attached: Option<&Arc<Volume>>) {
        let head = self.packages.lock().first().cloned();

        let Some(head) = head else {
            // Family ran empty; tear the links down.
            for link in self.dependency_links.lock().drain(..) {
                if let Some(volume) = attached {
                    volume.package_link_node_removed(&link);
                }
                self.node.remove_child(&link);
            }
            if let Some(link) = self.self_link.lock().take() {
                if let Some(volume) = attached {
                    volume.package_link_node_removed(&link);
                }
                self.node.remove_child(&link);
            }
            return;
        };

        // Create or retarget the self link.
        let target = install_root_target(head.mount_type());
        let mut self_link = self.self_link.lock();
        match self_link.as_ref() {
            Some(link) => {
                let leaf = link.as_leaf().expect("self link is a symlink");
                let previous = leaf.update_symlink_target(target.to_owned(), current_time());
                if previous.as_deref() != Some(target)
                    && let Some(volume) = attached
                {
                    volume.package_link_node_changed(
                        link,
                        stat_fields::SIZE | stat_fields::MODIFICATION_TIME,
                    );
                }
            }
            None => {
                let link = Node::new_symlink(0, names::SELF_LINK, target, current_time());
                if self.node.add_child(&link).is_ok() {
                    *self_link = Some(link.clone());
                    if let Some(volume) = attached {
                        volume.package_link_node_added(&link);
                    }
                }
            }
        }
        drop(self_link);

        self.update_dependency_links(root, attached);
    }

    /// Bring the dependency links in line with the head package's
    /// requirements: update in place, create the missing, drop the
    /// obsolete.
    fn update_dependency_links(
        self: &Arc<Self>,
        root: &Arc<PackageFsRoot>,
        attached: Option<&Arc<Volume>>,
    ) {
        let Some(head) = self.packages.lock().first().cloned() else {
            return;
        };

        let mut links = self.dependency_links.lock();
        let mut kept: Vec<NodeRef> = Vec::new();

        for dependency in head.dependencies() {
            let target = root
                .resolve_dependency(&dependency)
                .map(|provider| install_root_target(provider.mount_type()))
                .unwrap_or(names::UNKNOWN_LINK_TARGET);

            if kept.iter().any(|link| link.name() == dependency.name) {
                continue;
            }

            if let Some(existing) = links
                .iter()
                .find(|link| link.name() == dependency.name)
                .cloned()
            {
                let leaf = existing.as_leaf().expect("dependency link is a symlink");
                let previous = leaf.update_symlink_target(target.to_owned(), current_time());
                if previous.as_deref() != Some(target)
                    && let Some(volume) = attached
                {
                    volume.package_link_node_changed(
                        &existing,
                        stat_fields::SIZE | stat_fields::MODIFICATION_TIME,
                    );
                }
                kept.push(existing);
            } else if self.node.find_child(&dependency.name).is_none() {
                let link = Node::new_symlink(0, dependency.name.clone(), target, current_time());
                if self.node.add_child(&link).is_ok() {
                    if let Some(volume) = attached {
                        volume.package_link_node_added(&link);
                    }
                    kept.push(link);
                }
            }
        }

        for link in links.iter() {
            if !kept.iter().any(|candidate| Arc::ptr_eq(candidate, link)) {
                if let Some(volume) = attached {
                    volume.package_link_node_removed(link);
                }
                self.node.remove_child(link);
            }
        }
        *links = kept;
    }

    pub fn package_count(&self) -> usize {
        self.packages.lock().len()
    }
}
