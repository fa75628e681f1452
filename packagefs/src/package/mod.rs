//! Loaded packages and their metadata.
//!
//! A [`Package`] owns the entry tree parsed from one archive plus the
//! package-level metadata (name, version, architecture, resolvables,
//! dependencies). Packages with the same name form a [`PackageFamily`].

pub mod codec;
mod node;
mod version;

pub use codec::{
    EntryAttribute, EntryToken, PackageAttribute, PackageContentHandler, PackageEntry,
    PackageEntryKind, read_package,
};
pub use node::{FileData, PackageNode, PackageNodeAttribute, PackageNodeKind};
pub use version::{CompareOp, Version, VersionRequirement};

use parking_lot::RwLock;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

use packagefs_shared::control::MountType;
use packagefs_shared::{PackageFsError, PackageFsResult};

/// A name (optionally versioned) that a package provides.
#[derive(Debug)]
pub struct Resolvable {
    pub name: String,
    pub version: Option<Version>,
    package: Weak<Package>,
}

impl Resolvable {
    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.upgrade()
    }
}

/// A name (optionally with a version requirement) that a package requires.
#[derive(Debug)]
pub struct Dependency {
    pub name: String,
    pub requirement: Option<VersionRequirement>,
    package: Weak<Package>,
}

impl Dependency {
    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.upgrade()
    }
}

#[derive(Debug, Default, Clone)]
struct PackageMeta {
    name: String,
    version: Option<Version>,
    architecture: Option<String>,
}

/// One loaded package archive.
pub struct Package {
    file_name: String,
    path: PathBuf,
    device_id: u64,
    node_id: u64,
    domain_device_id: u64,
    domain_node_id: u64,
    mount_type: MountType,
    archive_file: File,
    meta: RwLock<PackageMeta>,
    root_nodes: RwLock<Vec<Arc<PackageNode>>>,
    resolvables: RwLock<Vec<Arc<Resolvable>>>,
    dependencies: RwLock<Vec<Arc<Dependency>>>,
    family: RwLock<Weak<PackageFamily>>,
}

impl Package {
    /// Load a package archive from `path`. The domain identity and mount
    /// type are recorded for control-channel reporting and package links.
    pub fn load(
        path: &Path,
        domain_device_id: u64,
        domain_node_id: u64,
        mount_type: MountType,
    ) -> PackageFsResult<Arc<Self>> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| PackageFsError::bad_value("package path has no file name"))?
            .to_owned();

        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(PackageFsError::bad_value(format!(
                "package is not a regular file: {}",
                path.display()
            )));
        }

        let archive_file = File::open(path)?;
        let package = Arc::new(Self {
            file_name,
            path: path.to_path_buf(),
            device_id: metadata.dev(),
            node_id: metadata.ino(),
            domain_device_id,
            domain_node_id,
            mount_type,
            archive_file,
            meta: RwLock::new(PackageMeta::default()),
            root_nodes: RwLock::new(Vec::new()),
            resolvables: RwLock::new(Vec::new()),
            dependencies: RwLock::new(Vec::new()),
            family: RwLock::new(Weak::new()),
        });

        let mut builder = PackageBuilder::new(&package);
        codec::read_package(path, &mut builder)?;

        if package.name().is_empty() {
            return Err(PackageFsError::bad_data(format!(
                "package {} declares no name",
                path.display()
            )));
        }

        debug!(
            package = %package.name(),
            file = %package.file_name,
            nodes = package.root_nodes.read().len(),
            "loaded package"
        );
        Ok(package)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Device of the archive file itself.
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Inode of the archive file itself.
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn domain_device_id(&self) -> u64 {
        self.domain_device_id
    }

    pub fn domain_node_id(&self) -> u64 {
        self.domain_node_id
    }

    pub fn mount_type(&self) -> MountType {
        self.mount_type
    }

    pub(crate) fn archive_file(&self) -> &File {
        &self.archive_file
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub fn version(&self) -> Option<Version> {
        self.meta.read().version
    }

    pub fn architecture(&self) -> Option<String> {
        self.meta.read().architecture.clone()
    }

    /// Root-level entries of the package's content tree.
    pub fn root_nodes(&self) -> Vec<Arc<PackageNode>> {
        self.root_nodes.read().clone()
    }

    pub fn resolvables(&self) -> Vec<Arc<Resolvable>> {
        self.resolvables.read().clone()
    }

    pub fn dependencies(&self) -> Vec<Arc<Dependency>> {
        self.dependencies.read().clone()
    }

    pub fn family(&self) -> Option<Arc<PackageFamily>> {
        self.family.read().upgrade()
    }

    pub(crate) fn set_family(&self, family: Option<&Arc<PackageFamily>>) {
        *self.family.write() = family.map(Arc::downgrade).unwrap_or_default();
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("file_name", &self.file_name)
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

/// All same-named packages currently known to a packagefs root.
#[derive(Debug)]
pub struct PackageFamily {
    name: String,
    packages: RwLock<Vec<Weak<Package>>>,
}

impl PackageFamily {
    pub fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            packages: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_package(self: &Arc<Self>, package: &Arc<Package>) {
        self.packages.write().push(Arc::downgrade(package));
        package.set_family(Some(self));
    }

    pub fn remove_package(&self, package: &Arc<Package>) {
        self.packages
            .write()
            .retain(|candidate| match candidate.upgrade() {
                Some(candidate) => !Arc::ptr_eq(&candidate, package),
                None => false,
            });
        package.set_family(None);
    }

    pub fn is_empty(&self) -> bool {
        self.packages
            .read()
            .iter()
            .all(|package| package.upgrade().is_none())
    }

    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.packages
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// Content handler that builds the in-memory package from the codec's
/// callback stream.
struct PackageBuilder<'a> {
    package: &'a Arc<Package>,
    entries: Vec<Arc<PackageNode>>,
}

impl<'a> PackageBuilder<'a> {
    fn new(package: &'a Arc<Package>) -> Self {
        Self {
            package,
            entries: Vec::new(),
        }
    }
}

impl PackageContentHandler for PackageBuilder<'_> {
    fn handle_entry(
        &mut self,
        entry: PackageEntry,
        parent: Option<EntryToken>,
    ) -> PackageFsResult<EntryToken> {
        let parent_node = match parent {
            Some(token) => Some(
                self.entries
                    .get(token)
                    .cloned()
                    .ok_or_else(|| PackageFsError::bad_value("unknown parent entry token"))?,
            ),
            None => None,
        };

        // The filesystem is read-only; nothing in it is ever writable.
        let mode = entry.mode & !0o222;

        let node = match entry.kind {
            PackageEntryKind::Directory => PackageNode::new_directory(
                self.package,
                parent_node.as_ref(),
                entry.name,
                mode,
                entry.uid,
                entry.gid,
                entry.modified_time,
            ),
            PackageEntryKind::File { data } => PackageNode::new_file(
                self.package,
                parent_node.as_ref(),
                entry.name,
                mode,
                entry.uid,
                entry.gid,
                entry.modified_time,
                data,
            ),
            PackageEntryKind::Symlink { target } => PackageNode::new_symlink(
                self.package,
                parent_node.as_ref(),
                entry.name,
                mode,
                entry.uid,
                entry.gid,
                entry.modified_time,
                target,
            ),
        };

        if parent_node.is_none() {
            self.package.root_nodes.write().push(node.clone());
        }

        let token = self.entries.len();
        self.entries.push(node);
        Ok(token)
    }

    fn handle_entry_attribute(
        &mut self,
        token: EntryToken,
        attribute: EntryAttribute,
    ) -> PackageFsResult<()> {
        let node = self
            .entries
            .get(token)
            .ok_or_else(|| PackageFsError::bad_value("unknown entry token"))?;
        node.add_attribute(PackageNodeAttribute {
            name: attribute.name,
            type_code: attribute.type_code,
            data: attribute.data,
        });
        Ok(())
    }

    fn handle_entry_done(&mut self, _token: EntryToken) -> PackageFsResult<()> {
        Ok(())
    }

    fn handle_package_attribute(&mut self, attribute: PackageAttribute) -> PackageFsResult<()> {
        match attribute {
            PackageAttribute::Name(name) => self.package.meta.write().name = name,
            PackageAttribute::Version(version) => {
                self.package.meta.write().version = Some(version);
            }
            PackageAttribute::Architecture(architecture) => {
                self.package.meta.write().architecture = Some(architecture);
            }
            PackageAttribute::Provides { name, version } => {
                self.package.resolvables.write().push(Arc::new(Resolvable {
                    name,
                    version,
                    package: Arc::downgrade(self.package),
                }));
            }
            PackageAttribute::Requires { name, requirement } => {
                self.package
                    .dependencies
                    .write()
                    .push(Arc::new(Dependency {
                        name,
                        requirement,
                        package: Arc::downgrade(self.package),
                    }));
            }
        }
        Ok(())
    }

    fn handle_error(&mut self) {
        // Abandon everything built so far.
        self.entries.clear();
        self.package.root_nodes.write().clear();
        self.package.resolvables.write().clear();
        self.package.dependencies.write().clear();
        *self.package.meta.write() = PackageMeta::default();
    }
}
