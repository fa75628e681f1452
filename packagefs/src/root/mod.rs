//! The process-wide grouping of volumes sharing an installation root.
//!
//! Volumes mounted under the same root directory (system and home overlays
//! of one installation) share a [`PackageFsRoot`], found through a global
//! registry keyed by the root's device and inode. Custom mounts always get
//! a private root that never enters the registry. The root tracks package
//! families across its volumes and owns the package links directory.

mod links;

pub use links::{PackageLinkDirectory, PackageLinksDirectory};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use packagefs_shared::PackageFsResult;
use packagefs_shared::control::MountType;

use crate::package::{Dependency, Package, PackageFamily, Resolvable};
use crate::volume::Volume;

static ROOT_REGISTRY: Mutex<Vec<Weak<PackageFsRoot>>> = Mutex::new(Vec::new());

struct RootInner {
    volumes: Vec<Weak<Volume>>,
    system_volume: Weak<Volume>,
    families: HashMap<String, Arc<PackageFamily>>,
}

/// One installation root.
pub struct PackageFsRoot {
    device_id: u64,
    node_id: u64,
    custom: bool,
    inner: Mutex<RootInner>,
    links: PackageLinksDirectory,
}

impl PackageFsRoot {
    fn new(device_id: u64, node_id: u64, custom: bool) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            node_id,
            custom,
            inner: Mutex::new(RootInner {
                volumes: Vec::new(),
                system_volume: Weak::new(),
                families: HashMap::new(),
            }),
            links: PackageLinksDirectory::new(),
        })
    }

    /// Register a freshly mounted volume, sharing a root with other
    /// volumes of the same installation. Custom mounts get a private root.
    pub fn register_volume(volume: &Arc<Volume>) -> PackageFsResult<Arc<Self>> {
        let relative_root = match volume.mount_type() {
            MountType::System => Some(".."),
            MountType::Home => Some("../.."),
            MountType::Custom => None,
        };

        let root = match relative_root {
            Some(relative) => {
                let root_path = volume.mount_point().join(relative);
                let metadata = fs::metadata(&root_path)?;
                Self::get_or_create(metadata.dev(), metadata.ino())
            }
            None => Self::new(0, 0, true),
        };

        root.add_volume(volume);
        Ok(root)
    }

    fn get_or_create(device_id: u64, node_id: u64) -> Arc<Self> {
        let mut registry = ROOT_REGISTRY.lock();
        registry.retain(|root| root.upgrade().is_some());

        for existing in registry.iter() {
            if let Some(root) = existing.upgrade()
                && root.device_id == device_id
                && root.node_id == node_id
            {
                return root;
            }
        }

        let root = Self::new(device_id, node_id, false);
        registry.push(Arc::downgrade(&root));
        debug!(device_id, node_id, "created packagefs root");
        root
    }

    fn add_volume(self: &Arc<Self>, volume: &Arc<Volume>) {
        let mut inner = self.inner.lock();
        inner.volumes.push(Arc::downgrade(volume));
        if volume.mount_type() == MountType::System && inner.system_volume.upgrade().is_none() {
            inner.system_volume = Arc::downgrade(volume);
            info!(volume = volume.volume_name(), "designated system volume");
        }
    }

    pub fn unregister_volume(&self, volume: &Arc<Volume>) {
        let mut inner = self.inner.lock();
        inner.volumes.retain(|candidate| match candidate.upgrade() {
            Some(candidate) => !Arc::ptr_eq(&candidate, volume),
            None => false,
        });
        if inner
            .system_volume
            .upgrade()
            .is_some_and(|system| Arc::ptr_eq(&system, volume))
        {
            inner.system_volume = Weak::new();
        }
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn system_volume(&self) -> Option<Arc<Volume>> {
        self.inner.lock().system_volume.upgrade()
    }

    pub fn is_system_volume(&self, volume: &Arc<Volume>) -> bool {
        self.system_volume()
            .is_some_and(|system| Arc::ptr_eq(&system, volume))
    }

    pub fn links(&self) -> &PackageLinksDirectory {
        &self.links
    }

    // ------------------------------------------------------------------
    // Package families and resolution.
    // ------------------------------------------------------------------

    /// Track an activating package: join (or found) its family and expose
    /// it in the package links directory.
    pub fn add_package(self: &Arc<Self>, package: &Arc<Package>) {
        let name = package.name();
        {
            let mut inner = self.inner.lock();
            let family = inner
                .families
                .entry(name.clone())
                .or_insert_with(|| PackageFamily::new(name.clone()))
                .clone();
            family.add_package(package);
        }
        self.links.add_package(self, package);
    }

    /// Untrack a deactivating package.
    pub fn remove_package(self: &Arc<Self>, package: &Arc<Package>) {
        {
            let mut inner = self.inner.lock();
            if let Some(family) = package.family() {
                family.remove_package(package);
                if family.is_empty() {
                    inner.families.remove(family.name());
                }
            }
        }
        self.links.remove_package(self, package);
    }

    pub fn family(&self, name: &str) -> Option<Arc<PackageFamily>> {
        self.inner.lock().families.get(name).cloned()
    }

    /// Find a package providing what `dependency` requires.
    pub fn resolve_dependency(&self, dependency: &Dependency) -> Option<Arc<Package>> {
        let inner = self.inner.lock();
        for family in inner.families.values() {
            for package in family.packages() {
                for resolvable in package.resolvables() {
                    if resolvable_matches(&resolvable, dependency) {
                        return resolvable.package();
                    }
                }
            }
        }
        None
    }
}

fn resolvable_matches(resolvable: &Resolvable, dependency: &Dependency) -> bool {
    if resolvable.name != dependency.name {
        return false;
    }
    match &dependency.requirement {
        Some(requirement) => requirement.is_satisfied_by(resolvable.version),
        None => true,
    }
}
