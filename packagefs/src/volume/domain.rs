//! Packages-directory snapshots.
//!
//! A volume serves packages out of one live packages directory and,
//! optionally, a series of archived `state_*` directories under its
//! administrative subdirectory. Each gets a [`PackagesDirectory`] recording
//! its identity; package lookup walks from the requested state toward
//! newer ones.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

use packagefs_shared::constants::{layout, limits, names};
use packagefs_shared::{PackageFsError, PackageFsResult};

use crate::package::Package;

/// One snapshot of an on-disk packages directory.
pub struct PackagesDirectory {
    path: PathBuf,
    /// `None` for the live directory, the `state_*` name otherwise.
    state_name: Option<String>,
    device_id: u64,
    node_id: u64,
    modified_time: i64,
    packages: RwLock<HashMap<String, Weak<Package>>>,
}

impl PackagesDirectory {
    /// Open the live packages directory.
    pub fn open(path: &Path) -> PackageFsResult<Arc<Self>> {
        Self::open_at(path.to_path_buf(), None)
    }

    /// Open an archived state below the administrative directory.
    pub fn open_old_state(packages_path: &Path, state_name: &str) -> PackageFsResult<Arc<Self>> {
        let path = packages_path
            .join(layout::ADMINISTRATIVE_DIRECTORY)
            .join(state_name);
        Self::open_at(path, Some(state_name.to_owned()))
    }

    fn open_at(path: PathBuf, state_name: Option<String>) -> PackageFsResult<Arc<Self>> {
        let metadata = fs::metadata(&path)?;
        if !metadata.is_dir() {
            return Err(PackageFsError::bad_value(format!(
                "packages path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Arc::new(Self {
            path,
            state_name,
            device_id: metadata.dev(),
            node_id: metadata.ino(),
            modified_time: metadata.mtime(),
            packages: RwLock::new(HashMap::new()),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state_name(&self) -> Option<&str> {
        self.state_name.as_deref()
    }

    pub fn is_live(&self) -> bool {
        self.state_name.is_none()
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn modified_time(&self) -> i64 {
        self.modified_time
    }

    /// Newer states sort before older ones; the live directory is newest.
    pub fn is_newer_than(&self, other: &PackagesDirectory) -> bool {
        match (&self.state_name, &other.state_name) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(own), Some(other)) => own > other,
        }
    }

    fn activation_file_path(&self) -> PathBuf {
        if self.is_live() {
            self.path.join(layout::ACTIVATION_FILE_PATH)
        } else {
            self.path.join(layout::ACTIVATION_FILE)
        }
    }

    /// Read the activation file: one package file name per line, blank
    /// lines skipped.
    pub fn read_activation_file(&self) -> PackageFsResult<Vec<String>> {
        let path = self.activation_file_path();
        let metadata = fs::metadata(&path)?;
        if metadata.len() > limits::MAX_ACTIVATION_FILE_SIZE {
            return Err(PackageFsError::bad_data("activation file too large"));
        }

        let content = fs::read_to_string(&path)?;
        let mut package_names = Vec::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            if line.len() >= names::MAX_FILE_NAME {
                return Err(PackageFsError::bad_data(
                    "activation file entry exceeds the file name limit",
                ));
            }
            package_names.push(line.to_owned());
        }
        Ok(package_names)
    }

    /// Path of the named package file within this directory, if present.
    pub fn find_package_file(&self, name: &str) -> Option<PathBuf> {
        let path = self.path.join(name);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    /// All `*.hpkg` files in this directory.
    pub fn list_package_files(&self) -> PackageFsResult<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(layout::PACKAGE_FILE_EXTENSION) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    pub(crate) fn register_package(&self, package: &Arc<Package>) {
        self.packages
            .write()
            .insert(package.file_name().to_owned(), Arc::downgrade(package));
    }

    pub(crate) fn unregister_package(&self, package: &Arc<Package>) {
        self.packages.write().remove(package.file_name());
    }

    pub fn package_count(&self) -> usize {
        self.packages
            .read()
            .values()
            .filter(|package| package.upgrade().is_some())
            .count()
    }
}

impl std::fmt::Debug for PackagesDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagesDirectory")
            .field("path", &self.path)
            .field("state", &self.state_name)
            .finish()
    }
}

/// Enumerate `state_*` directories newer than or equal to
/// `requested_state`, newest first.
pub fn enumerate_states(
    packages_path: &Path,
    requested_state: &str,
) -> PackageFsResult<Vec<String>> {
    let admin_path = packages_path.join(layout::ADMINISTRATIVE_DIRECTORY);
    let mut states = Vec::new();

    for entry in fs::read_dir(&admin_path)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(layout::STATE_DIRECTORY_PREFIX) || name.as_str() < requested_state {
            continue;
        }
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => states.push(name),
            _ => warn!(state = %name, "ignoring non-directory state entry"),
        }
    }

    states.sort_by(|a, b| b.cmp(a));
    if !states.is_empty() {
        info!(count = states.len(), "found archived packages states");
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();
        assert!(PackagesDirectory::open(&file).is_err());
        assert!(PackagesDirectory::open(dir.path()).is_ok());
    }

    #[test]
    fn test_activation_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let admin = dir.path().join(layout::ADMINISTRATIVE_DIRECTORY);
        fs::create_dir_all(&admin).unwrap();
        fs::write(
            admin.join(layout::ACTIVATION_FILE),
            "a.hpkg\n\nb.hpkg\n\n\nc.hpkg\n",
        )
        .unwrap();

        let domain = PackagesDirectory::open(dir.path()).unwrap();
        let names = domain.read_activation_file().unwrap();
        assert_eq!(names, vec!["a.hpkg", "b.hpkg", "c.hpkg"]);
    }

    #[test]
    fn test_state_enumeration_filters_older() {
        let dir = tempfile::tempdir().unwrap();
        let admin = dir.path().join(layout::ADMINISTRATIVE_DIRECTORY);
        for state in ["state_2024-01-01", "state_2024-06-01", "state_2023-01-01"] {
            fs::create_dir_all(admin.join(state)).unwrap();
        }

        let states = enumerate_states(dir.path(), "state_2024-01-01").unwrap();
        assert_eq!(states, vec!["state_2024-06-01", "state_2024-01-01"]);
    }

    #[test]
    fn test_newer_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let admin = dir.path().join(layout::ADMINISTRATIVE_DIRECTORY);
        fs::create_dir_all(admin.join("state_a")).unwrap();
        fs::create_dir_all(admin.join("state_b")).unwrap();

        let live = PackagesDirectory::open(dir.path()).unwrap();
        let older = PackagesDirectory::open_old_state(dir.path(), "state_a").unwrap();
        let newer = PackagesDirectory::open_old_state(dir.path(), "state_b").unwrap();

        assert!(live.is_newer_than(&older));
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
    }
}
