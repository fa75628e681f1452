//! Test fixtures for packagefs: synthesize package archives and packages
//! directories without shipping binary blobs in the repository.

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

enum BuildEntry {
    Directory {
        path: String,
        mode: u32,
        mtime: u64,
    },
    File {
        path: String,
        data: Vec<u8>,
        mode: u32,
        mtime: u64,
    },
    Symlink {
        path: String,
        target: String,
        mtime: u64,
    },
}

/// Builds a package archive: a (gzipped) tar stream with a `.PackageInfo`
/// JSON document at its root.
pub struct PackageBuilder {
    name: String,
    version: Option<(u32, u32, u32, u32)>,
    architecture: Option<String>,
    provides: Vec<serde_json::Value>,
    requires: Vec<serde_json::Value>,
    entries: Vec<BuildEntry>,
    default_mtime: u64,
    compressed: bool,
}

impl PackageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            architecture: None,
            provides: Vec::new(),
            requires: Vec::new(),
            entries: Vec::new(),
            default_mtime: 1_000_000,
            compressed: true,
        }
    }

    pub fn version(mut self, major: u32, minor: u32, micro: u32, release: u32) -> Self {
        self.version = Some((major, minor, micro, release));
        self
    }

    pub fn architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = Some(architecture.into());
        self
    }

    pub fn provides(mut self, name: impl Into<String>) -> Self {
        self.provides.push(json!({ "name": name.into() }));
        self
    }

    pub fn provides_versioned(
        mut self,
        name: impl Into<String>,
        major: u32,
        minor: u32,
        micro: u32,
    ) -> Self {
        self.provides.push(json!({
            "name": name.into(),
            "version": { "major": major, "minor": minor, "micro": micro },
        }));
        self
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.requires.push(json!({ "name": name.into() }));
        self
    }

    pub fn requires_at_least(
        mut self,
        name: impl Into<String>,
        major: u32,
        minor: u32,
        micro: u32,
    ) -> Self {
        self.requires.push(json!({
            "name": name.into(),
            "op": "greater_or_equal",
            "version": { "major": major, "minor": minor, "micro": micro },
        }));
        self
    }

    /// Default modification time applied to subsequently added entries.
    pub fn mtime(mut self, mtime: u64) -> Self {
        self.default_mtime = mtime;
        self
    }

    /// Emit a plain (seekable) tar instead of a gzipped one.
    pub fn uncompressed(mut self) -> Self {
        self.compressed = false;
        self
    }

    pub fn directory(mut self, path: impl Into<String>) -> Self {
        self.entries.push(BuildEntry::Directory {
            path: path.into(),
            mode: 0o755,
            mtime: self.default_mtime,
        });
        self
    }

    pub fn file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.entries.push(BuildEntry::File {
            path: path.into(),
            data: data.into(),
            mode: 0o644,
            mtime: self.default_mtime,
        });
        self
    }

    pub fn file_mode(
        mut self,
        path: impl Into<String>,
        data: impl Into<Vec<u8>>,
        mode: u32,
    ) -> Self {
        self.entries.push(BuildEntry::File {
            path: path.into(),
            data: data.into(),
            mode,
            mtime: self.default_mtime,
        });
        self
    }

    pub fn symlink(mut self, path: impl Into<String>, target: impl Into<String>) -> Self {
        self.entries.push(BuildEntry::Symlink {
            path: path.into(),
            target: target.into(),
            mtime: self.default_mtime,
        });
        self
    }

    fn package_info(&self) -> Vec<u8> {
        let mut doc = json!({ "name": self.name });
        if let Some((major, minor, micro, release)) = self.version {
            doc["version"] = json!({
                "major": major, "minor": minor, "micro": micro, "release": release,
            });
        }
        if let Some(architecture) = &self.architecture {
            doc["architecture"] = json!(architecture);
        }
        if !self.provides.is_empty() {
            doc["provides"] = json!(self.provides);
        }
        if !self.requires.is_empty() {
            doc["requires"] = json!(self.requires);
        }
        serde_json::to_vec_pretty(&doc).unwrap()
    }

    /// Serialize the archive bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let info = self.package_info();
        let mut header = tar::Header::new_gnu();
        header.set_path(".PackageInfo").unwrap();
        header.set_size(info.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(self.default_mtime);
        header.set_cksum();
        builder.append(&header, info.as_slice()).unwrap();

        for entry in &self.entries {
            match entry {
                BuildEntry::Directory { path, mode, mtime } => {
                    let mut header = tar::Header::new_gnu();
                    header.set_path(format!("{path}/")).unwrap();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(*mode);
                    header.set_mtime(*mtime);
                    header.set_cksum();
                    builder.append(&header, &[][..]).unwrap();
                }
                BuildEntry::File {
                    path,
                    data,
                    mode,
                    mtime,
                } => {
                    let mut header = tar::Header::new_gnu();
                    header.set_path(path).unwrap();
                    header.set_size(data.len() as u64);
                    header.set_mode(*mode);
                    header.set_mtime(*mtime);
                    header.set_cksum();
                    builder.append(&header, data.as_slice()).unwrap();
                }
                BuildEntry::Symlink {
                    path,
                    target,
                    mtime,
                } => {
                    let mut header = tar::Header::new_gnu();
                    header.set_path(path).unwrap();
                    header.set_link_name(target).unwrap();
                    header.set_entry_type(tar::EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_mtime(*mtime);
                    header.set_cksum();
                    builder.append(&header, &[][..]).unwrap();
                }
            }
        }

        let tar_bytes = builder.into_inner().unwrap();
        if !self.compressed {
            return tar_bytes;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    /// Write the archive into `directory` under `file_name`.
    pub fn write_to(&self, directory: &Path, file_name: &str) -> PathBuf {
        let path = directory.join(file_name);
        fs::write(&path, self.build()).unwrap();
        path
    }
}

/// A mount-point fixture laid out like a real installation:
/// `<root>/boot/system/packages` with an administrative subdirectory. The
/// extra depth keeps each fixture's installation root unique, so volumes
/// of different fixtures never share a packagefs root.
pub struct PackagesDirFixture {
    root: tempfile::TempDir,
}

impl PackagesDirFixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("boot/system/packages/administrative")).unwrap();
        Self { root }
    }

    /// The mount point (parent of the packages directory).
    pub fn mount_point(&self) -> PathBuf {
        self.root.path().join("boot/system")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.path().join("boot/system/packages")
    }

    /// Write the live activation file listing `names`.
    pub fn write_activation_file(&self, names: &[&str]) {
        let content = names
            .iter()
            .map(|name| format!("{name}\n"))
            .collect::<String>();
        fs::write(
            self.packages_dir().join("administrative/activated-packages"),
            content,
        )
        .unwrap();
    }

    /// Create an archived state directory with its own activation file.
    pub fn write_state(&self, state_name: &str, names: &[&str]) -> PathBuf {
        let state_dir = self.packages_dir().join("administrative").join(state_name);
        fs::create_dir_all(&state_dir).unwrap();
        let content = names
            .iter()
            .map(|name| format!("{name}\n"))
            .collect::<String>();
        fs::write(state_dir.join("activated-packages"), content).unwrap();
        state_dir
    }

    pub fn add_package(&self, builder: &PackageBuilder, file_name: &str) -> PathBuf {
        builder.write_to(&self.packages_dir(), file_name)
    }
}

impl Default for PackagesDirFixture {
    fn default() -> Self {
        Self::new()
    }
}
