//! Archive codec seam.
//!
//! The core consumes package archives through the [`PackageContentHandler`]
//! callback stream; [`read_package`] is the driver for the on-disk format:
//! a tar archive, optionally gzip-compressed, carrying a `.PackageInfo`
//! metadata document at its root. PAX `SCHILY.xattr.*` extension records
//! become per-entry attributes.
//!
//! Uncompressed archives stay seekable, so file entries are recorded as
//! extents (offset + length) and read on demand. Compressed archives are
//! decoded once and file data is inlined.

use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::{Archive, Entry, EntryType};
use tracing::{debug, trace};

use packagefs_shared::constants::names::PACKAGE_INFO_FILE;
use packagefs_shared::{PackageFsError, PackageFsResult};

use super::node::FileData;
use super::version::{CompareOp, Version, VersionRequirement};

/// Attribute type codes used on package node attributes.
pub mod attribute_types {
    /// Untyped byte blob.
    pub const RAW: u32 = 0x5241_5754;
    /// NUL-less UTF-8 string.
    pub const STRING: u32 = 0x4353_5452;
    /// MIME string.
    pub const MIME_STRING: u32 = 0x4d49_4d53;
}

/// Identifies an entry across handler callbacks.
pub type EntryToken = usize;

/// Variant payload of one archive entry.
pub enum PackageEntryKind {
    Directory,
    File { data: FileData },
    Symlink { target: String },
}

/// One directory entry delivered to the content handler, in pre-order.
pub struct PackageEntry {
    pub name: String,
    pub kind: PackageEntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub modified_time: i64,
}

/// A named attribute of an entry (type code + byte blob).
pub struct EntryAttribute {
    pub name: String,
    pub type_code: u32,
    pub data: Arc<[u8]>,
}

/// Package-level metadata delivered by the codec.
pub enum PackageAttribute {
    Name(String),
    Version(Version),
    Architecture(String),
    Provides {
        name: String,
        version: Option<Version>,
    },
    Requires {
        name: String,
        requirement: Option<VersionRequirement>,
    },
}

/// The callback stream through which the core consumes an archive.
pub trait PackageContentHandler {
    /// Called per directory entry in pre-order. Returns a token the codec
    /// uses to identify this entry as the parent of later entries.
    fn handle_entry(
        &mut self,
        entry: PackageEntry,
        parent: Option<EntryToken>,
    ) -> PackageFsResult<EntryToken>;

    /// Attaches a named attribute to a previously delivered entry.
    fn handle_entry_attribute(
        &mut self,
        token: EntryToken,
        attribute: EntryAttribute,
    ) -> PackageFsResult<()>;

    /// Marks the entry's sub-tree complete.
    fn handle_entry_done(&mut self, token: EntryToken) -> PackageFsResult<()>;

    /// Delivers one piece of package-level metadata.
    fn handle_package_attribute(&mut self, attribute: PackageAttribute) -> PackageFsResult<()>;

    /// The codec hit a fatal parse error; drop everything built so far.
    fn handle_error(&mut self);
}

/// Parse the archive at `path`, driving `handler` with its contents.
pub fn read_package(path: &Path, handler: &mut dyn PackageContentHandler) -> PackageFsResult<()> {
    let result = read_package_inner(path, handler);
    if result.is_err() {
        handler.handle_error();
    }
    result
}

fn read_package_inner(
    path: &Path,
    handler: &mut dyn PackageContentHandler,
) -> PackageFsResult<()> {
    let mut file = File::open(path)?;

    // Sniff the compression format from the first two bytes.
    let mut magic = [0u8; 2];
    let sniffed = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    let gzip = sniffed == 2 && magic == [0x1f, 0x8b];

    if gzip {
        debug!(path = %path.display(), "reading gzip-compressed package archive");
        let archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        drive(archive, handler, false)
    } else {
        debug!(path = %path.display(), "reading uncompressed package archive");
        let archive = Archive::new(BufReader::new(file));
        drive(archive, handler, true)
    }
}

fn drive<R: Read>(
    mut archive: Archive<R>,
    handler: &mut dyn PackageContentHandler,
    seekable: bool,
) -> PackageFsResult<()> {
    let mut directories: HashMap<PathBuf, EntryToken> = HashMap::new();
    let mut directory_tokens: Vec<EntryToken> = Vec::new();

    let entries = archive
        .entries()
        .map_err(|error| PackageFsError::bad_data(format!("tar entries: {error}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|error| PackageFsError::bad_data(format!("tar entry: {error}")))?;

        let raw_path = entry
            .path()
            .map_err(|error| PackageFsError::bad_data(format!("tar entry path: {error}")))?
            .into_owned();
        let Some(normalized) = normalize_entry_path(&raw_path) else {
            trace!(path = %raw_path.display(), "skipping entry outside archive root");
            continue;
        };
        if normalized.as_os_str().is_empty() {
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type == EntryType::XGlobalHeader {
            continue;
        }

        let header = entry.header();
        let mode = header.mode().unwrap_or(0o644);
        let uid = header.uid().unwrap_or(0) as u32;
        let gid = header.gid().unwrap_or(0) as u32;
        let modified_time = header.mtime().unwrap_or(0) as i64;
        let size = header.size().unwrap_or(0);

        let name = entry_name(&normalized)?;
        let parent = ensure_parent_directories(
            &normalized,
            &mut directories,
            &mut directory_tokens,
            handler,
            modified_time,
        )?;

        let token = match entry_type {
            EntryType::Directory => {
                if let Some(existing) = directories.get(&normalized) {
                    // Re-stated directory; keep the first occurrence.
                    *existing
                } else {
                    let token = handler.handle_entry(
                        PackageEntry {
                            name,
                            kind: PackageEntryKind::Directory,
                            mode,
                            uid,
                            gid,
                            modified_time,
                        },
                        parent,
                    )?;
                    directories.insert(normalized.clone(), token);
                    directory_tokens.push(token);
                    token
                }
            }
            EntryType::Regular | EntryType::GNUSparse => {
                let is_package_info =
                    parent.is_none() && normalized.as_os_str() == PACKAGE_INFO_FILE;

                let data = if seekable && !is_package_info {
                    let offset = entry.raw_file_position();
                    FileData::Extent {
                        offset,
                        length: size,
                    }
                } else {
                    let mut bytes = Vec::with_capacity(size as usize);
                    entry.read_to_end(&mut bytes).map_err(|error| {
                        PackageFsError::bad_data(format!("tar file data: {error}"))
                    })?;
                    if is_package_info {
                        emit_package_info(&bytes, handler)?;
                    }
                    FileData::Inline(bytes.into())
                };

                let token = handler.handle_entry(
                    PackageEntry {
                        name,
                        kind: PackageEntryKind::File { data },
                        mode,
                        uid,
                        gid,
                        modified_time,
                    },
                    parent,
                )?;
                deliver_xattrs(&mut entry, token, handler)?;
                handler.handle_entry_done(token)?;
                continue;
            }
            EntryType::Symlink => {
                let target = entry
                    .link_name()
                    .map_err(|error| PackageFsError::bad_data(format!("tar link name: {error}")))?
                    .ok_or_else(|| PackageFsError::bad_data("symlink without target"))?
                    .to_string_lossy()
                    .into_owned();

                let token = handler.handle_entry(
                    PackageEntry {
                        name,
                        kind: PackageEntryKind::Symlink { target },
                        mode,
                        uid,
                        gid,
                        modified_time,
                    },
                    parent,
                )?;
                deliver_xattrs(&mut entry, token, handler)?;
                handler.handle_entry_done(token)?;
                continue;
            }
            other => {
                return Err(PackageFsError::bad_data(format!(
                    "unsupported archive entry type {other:?} for {}",
                    raw_path.display()
                )));
            }
        };

        deliver_xattrs(&mut entry, token, handler)?;
    }

    // Directory sub-trees complete once the whole archive is read.
    for token in directory_tokens {
        handler.handle_entry_done(token)?;
    }

    Ok(())
}

/// Strip root/current components and resolve `..` without escaping.
fn normalize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => continue,
            Component::CurDir => {}
            Component::ParentDir => {
                components.pop()?;
            }
            Component::Normal(name) => components.push(name.to_os_string()),
        }
    }
    Some(components.into_iter().collect())
}

fn entry_name(path: &Path) -> PackageFsResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| PackageFsError::bad_data(format!("bad entry name: {}", path.display())))
}

/// Tar streams may omit intermediate directories; synthesize them.
fn ensure_parent_directories(
    path: &Path,
    directories: &mut HashMap<PathBuf, EntryToken>,
    directory_tokens: &mut Vec<EntryToken>,
    handler: &mut dyn PackageContentHandler,
    modified_time: i64,
) -> PackageFsResult<Option<EntryToken>> {
    let Some(parent) = path.parent() else {
        return Ok(None);
    };
    if parent.as_os_str().is_empty() {
        return Ok(None);
    }
    if let Some(token) = directories.get(parent) {
        return Ok(Some(*token));
    }

    let grandparent = ensure_parent_directories(
        parent,
        directories,
        directory_tokens,
        handler,
        modified_time,
    )?;

    let token = handler.handle_entry(
        PackageEntry {
            name: entry_name(parent)?,
            kind: PackageEntryKind::Directory,
            mode: 0o755,
            uid: 0,
            gid: 0,
            modified_time,
        },
        grandparent,
    )?;
    directories.insert(parent.to_path_buf(), token);
    directory_tokens.push(token);
    Ok(Some(token))
}

fn deliver_xattrs<R: Read>(
    entry: &mut Entry<R>,
    token: EntryToken,
    handler: &mut dyn PackageContentHandler,
) -> PackageFsResult<()> {
    let extensions = match entry.pax_extensions() {
        Ok(Some(extensions)) => extensions,
        Ok(None) => return Ok(()),
        Err(error) => return Err(PackageFsError::bad_data(format!("pax extensions: {error}"))),
    };

    for extension in extensions {
        let extension =
            extension.map_err(|error| PackageFsError::bad_data(format!("pax record: {error}")))?;
        let Ok(key) = extension.key() else {
            continue;
        };
        if let Some(name) = key.strip_prefix("SCHILY.xattr.") {
            handler.handle_entry_attribute(
                token,
                EntryAttribute {
                    name: name.to_owned(),
                    type_code: attribute_types::RAW,
                    data: extension.value_bytes().to_vec().into(),
                },
            )?;
        }
    }
    Ok(())
}

// The `.PackageInfo` document at the archive root.

#[derive(Deserialize)]
struct PackageInfoDoc {
    name: String,
    #[serde(default)]
    version: Option<Version>,
    #[serde(default)]
    architecture: Option<String>,
    #[serde(default)]
    provides: Vec<ProvidesDoc>,
    #[serde(default)]
    requires: Vec<RequiresDoc>,
}

#[derive(Deserialize)]
struct ProvidesDoc {
    name: String,
    #[serde(default)]
    version: Option<Version>,
}

#[derive(Deserialize)]
struct RequiresDoc {
    name: String,
    #[serde(default)]
    op: Option<CompareOp>,
    #[serde(default)]
    version: Option<Version>,
}

fn emit_package_info(
    bytes: &[u8],
    handler: &mut dyn PackageContentHandler,
) -> PackageFsResult<()> {
    let doc: PackageInfoDoc = serde_json::from_slice(bytes)
        .map_err(|error| PackageFsError::bad_data(format!("package info: {error}")))?;

    handler.handle_package_attribute(PackageAttribute::Name(doc.name))?;
    if let Some(version) = doc.version {
        handler.handle_package_attribute(PackageAttribute::Version(version))?;
    }
    if let Some(architecture) = doc.architecture {
        handler.handle_package_attribute(PackageAttribute::Architecture(architecture))?;
    }
    for provides in doc.provides {
        handler.handle_package_attribute(PackageAttribute::Provides {
            name: provides.name,
            version: provides.version,
        })?;
    }
    for requires in doc.requires {
        let requirement = match (requires.op, requires.version) {
            (Some(op), Some(version)) => Some(VersionRequirement { op, version }),
            _ => None,
        };
        handler.handle_package_attribute(PackageAttribute::Requires {
            name: requires.name,
            requirement,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_entry_path() {
        assert_eq!(
            normalize_entry_path(Path::new("./bin/tool")),
            Some(PathBuf::from("bin/tool"))
        );
        assert_eq!(
            normalize_entry_path(Path::new("/bin/../lib/x")),
            Some(PathBuf::from("lib/x"))
        );
        assert_eq!(normalize_entry_path(Path::new("../escape")), None);
    }

    #[test]
    fn test_package_info_parse() {
        struct Collector(Vec<String>);
        impl PackageContentHandler for Collector {
            fn handle_entry(
                &mut self,
                _entry: PackageEntry,
                _parent: Option<EntryToken>,
            ) -> PackageFsResult<EntryToken> {
                Ok(0)
            }
            fn handle_entry_attribute(
                &mut self,
                _token: EntryToken,
                _attribute: EntryAttribute,
            ) -> PackageFsResult<()> {
                Ok(())
            }
            fn handle_entry_done(&mut self, _token: EntryToken) -> PackageFsResult<()> {
                Ok(())
            }
            fn handle_package_attribute(
                &mut self,
                attribute: PackageAttribute,
            ) -> PackageFsResult<()> {
                let tag = match attribute {
                    PackageAttribute::Name(name) => format!("name:{name}"),
                    PackageAttribute::Version(version) => format!("version:{version}"),
                    PackageAttribute::Architecture(arch) => format!("arch:{arch}"),
                    PackageAttribute::Provides { name, .. } => format!("provides:{name}"),
                    PackageAttribute::Requires { name, .. } => format!("requires:{name}"),
                };
                self.0.push(tag);
                Ok(())
            }
            fn handle_error(&mut self) {}
        }

        let doc = br#"{
            "name": "foo",
            "version": {"major": 1, "minor": 2, "micro": 3},
            "architecture": "x86_64",
            "provides": [{"name": "libfoo"}],
            "requires": [{"name": "libbar", "op": "greater_or_equal",
                          "version": {"major": 2, "minor": 0, "micro": 0}}]
        }"#;

        let mut collector = Collector(Vec::new());
        emit_package_info(doc, &mut collector).unwrap();
        assert_eq!(
            collector.0,
            vec![
                "name:foo",
                "version:1.2.3",
                "arch:x86_64",
                "provides:libfoo",
                "requires:libbar"
            ]
        );
    }
}
