//! In-memory representation of the entries inside one package archive.
//!
//! Package nodes are built by the codec while an archive is parsed and are
//! shared (reference-counted) with the unpacking nodes of every volume that
//! unions them. After the parse completes they are treated as immutable.

use parking_lot::RwLock;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, Weak};

use packagefs_shared::{PackageFsError, PackageFsResult};

use super::Package;

/// A named attribute attached to a package node (type code + byte blob).
#[derive(Debug, Clone)]
pub struct PackageNodeAttribute {
    pub name: String,
    pub type_code: u32,
    pub data: Arc<[u8]>,
}

/// Where a package file's bytes live.
#[derive(Debug, Clone)]
pub enum FileData {
    /// Byte range within the archive file; read on demand.
    Extent { offset: u64, length: u64 },
    /// Decoded at parse time; compressed archives are not seekable.
    Inline(Arc<[u8]>),
}

/// Variant payload of a package node.
pub enum PackageNodeKind {
    Directory {
        children: RwLock<Vec<Arc<PackageNode>>>,
    },
    File {
        data: FileData,
    },
    Symlink {
        target: String,
    },
}

/// One entry inside a package archive.
pub struct PackageNode {
    package: Weak<Package>,
    parent: Weak<PackageNode>,
    name: String,
    mode: u32,
    uid: u32,
    gid: u32,
    modified_time: i64,
    attributes: RwLock<Vec<PackageNodeAttribute>>,
    kind: PackageNodeKind,
}

impl PackageNode {
    pub fn new_directory(
        package: &Arc<Package>,
        parent: Option<&Arc<PackageNode>>,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
        modified_time: i64,
    ) -> Arc<Self> {
        Self::new(
            package,
            parent,
            name,
            libc::S_IFDIR as u32 | (mode & 0o7777),
            uid,
            gid,
            modified_time,
            PackageNodeKind::Directory {
                children: RwLock::new(Vec::new()),
            },
        )
    }

    pub fn new_file(
        package: &Arc<Package>,
        parent: Option<&Arc<PackageNode>>,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
        modified_time: i64,
        data: FileData,
    ) -> Arc<Self> {
        Self::new(
            package,
            parent,
            name,
            libc::S_IFREG as u32 | (mode & 0o7777),
            uid,
            gid,
            modified_time,
            PackageNodeKind::File { data },
        )
    }

    pub fn new_symlink(
        package: &Arc<Package>,
        parent: Option<&Arc<PackageNode>>,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
        modified_time: i64,
        target: String,
    ) -> Arc<Self> {
        Self::new(
            package,
            parent,
            name,
            libc::S_IFLNK as u32 | (mode & 0o7777),
            uid,
            gid,
            modified_time,
            PackageNodeKind::Symlink { target },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        package: &Arc<Package>,
        parent: Option<&Arc<PackageNode>>,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
        modified_time: i64,
        kind: PackageNodeKind,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            package: Arc::downgrade(package),
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            name,
            mode,
            uid,
            gid,
            modified_time,
            attributes: RwLock::new(Vec::new()),
            kind,
        });

        if let Some(parent) = parent {
            parent.add_child(node.clone());
        }
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn modified_time(&self) -> i64 {
        self.modified_time
    }

    pub fn package(&self) -> Option<Arc<Package>> {
        self.package.upgrade()
    }

    pub fn parent(&self) -> Option<Arc<PackageNode>> {
        self.parent.upgrade()
    }

    pub fn kind(&self) -> &PackageNodeKind {
        &self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, PackageNodeKind::Directory { .. })
    }

    pub fn file_size(&self) -> u64 {
        match &self.kind {
            PackageNodeKind::File {
                data: FileData::Extent { length, .. },
            } => *length,
            PackageNodeKind::File {
                data: FileData::Inline(bytes),
            } => bytes.len() as u64,
            PackageNodeKind::Symlink { target } => target.len() as u64,
            PackageNodeKind::Directory { .. } => 0,
        }
    }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            PackageNodeKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    /// Read file bytes at `offset` into `buffer`; returns the number of
    /// bytes read (short at end of file).
    pub fn read_at(&self, offset: u64, buffer: &mut [u8]) -> PackageFsResult<usize> {
        let data = match &self.kind {
            PackageNodeKind::File { data } => data,
            PackageNodeKind::Directory { .. } => return Err(PackageFsError::IsADirectory),
            PackageNodeKind::Symlink { .. } => {
                return Err(PackageFsError::bad_value("read from symlink"));
            }
        };

        match data {
            FileData::Inline(bytes) => {
                if offset >= bytes.len() as u64 {
                    return Ok(0);
                }
                let available = &bytes[offset as usize..];
                let to_copy = available.len().min(buffer.len());
                buffer[..to_copy].copy_from_slice(&available[..to_copy]);
                Ok(to_copy)
            }
            FileData::Extent {
                offset: extent_offset,
                length,
            } => {
                if offset >= *length {
                    return Ok(0);
                }
                let package = self
                    .package()
                    .ok_or_else(|| PackageFsError::bad_value("package gone"))?;
                let to_read = buffer.len().min((*length - offset) as usize);
                let read = package
                    .archive_file()
                    .read_at(&mut buffer[..to_read], extent_offset + offset)?;
                Ok(read)
            }
        }
    }

    pub fn add_attribute(&self, attribute: PackageNodeAttribute) {
        self.attributes.write().push(attribute);
    }

    pub fn attributes(&self) -> Vec<PackageNodeAttribute> {
        self.attributes.read().clone()
    }

    pub fn find_attribute(&self, name: &str) -> Option<PackageNodeAttribute> {
        self.attributes
            .read()
            .iter()
            .find(|attribute| attribute.name == name)
            .cloned()
    }

    pub fn add_child(&self, child: Arc<PackageNode>) {
        if let PackageNodeKind::Directory { children } = &self.kind {
            children.write().push(child);
        }
    }

    pub fn first_child(&self) -> Option<Arc<PackageNode>> {
        match &self.kind {
            PackageNodeKind::Directory { children } => children.read().first().cloned(),
            _ => None,
        }
    }

    /// The sibling following `node` within this directory, if any.
    pub fn next_child(&self, node: &Arc<PackageNode>) -> Option<Arc<PackageNode>> {
        match &self.kind {
            PackageNodeKind::Directory { children } => {
                let children = children.read();
                let position = children
                    .iter()
                    .position(|child| Arc::ptr_eq(child, node))?;
                children.get(position + 1).cloned()
            }
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<Arc<PackageNode>> {
        match &self.kind {
            PackageNodeKind::Directory { children } => children.read().clone(),
            _ => Vec::new(),
        }
    }

    /// Precedence between two contributors to the same path: newer
    /// modification time wins, ties fall back to the owning package's
    /// version, further ties keep the incumbent.
    pub fn has_precedence_over(&self, other: &PackageNode) -> bool {
        if self.modified_time != other.modified_time {
            return self.modified_time > other.modified_time;
        }

        let own_version = self.package().and_then(|package| package.version());
        let other_version = other.package().and_then(|package| package.version());
        match (own_version, other_version) {
            (Some(own), Some(other)) => own > other,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

impl std::fmt::Debug for PackageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageNode")
            .field("name", &self.name)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("modified_time", &self.modified_time)
            .finish()
    }
}
