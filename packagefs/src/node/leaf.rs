//! Leaf nodes: files and symlinks unioned across packages, plus the
//! synthesized symlinks of the package links tree.

use parking_lot::RwLock;
use std::sync::Arc;

use packagefs_shared::{PackageFsError, PackageFsResult};

use super::directory::promote_new_head;
use crate::package::PackageNode;

/// Union state of an unpacking leaf.
///
/// While live, the contributor list holds one package node per active
/// package defining this path, head first. During teardown the head is
/// pinned in `finalized` so operations through handles opened before the
/// removal keep returning plausible data.
#[derive(Default)]
pub struct UnpackingLeafState {
    pub contributors: Vec<Arc<PackageNode>>,
    pub finalized: Option<Arc<PackageNode>>,
}

struct SymlinkTarget {
    target: String,
    modified_time: i64,
}

enum LeafFlavor {
    Unpacking(RwLock<UnpackingLeafState>),
    SymlinkTarget(RwLock<SymlinkTarget>),
}

/// Leaf payload of a node.
pub struct Leaf {
    flavor: LeafFlavor,
}

impl Leaf {
    pub(super) fn new_unpacking() -> Self {
        Self {
            flavor: LeafFlavor::Unpacking(RwLock::new(UnpackingLeafState::default())),
        }
    }

    pub(super) fn new_symlink_target(target: String, modified_time: i64) -> Self {
        Self {
            flavor: LeafFlavor::SymlinkTarget(RwLock::new(SymlinkTarget {
                target,
                modified_time,
            })),
        }
    }

    pub fn is_unpacking(&self) -> bool {
        matches!(self.flavor, LeafFlavor::Unpacking(_))
    }

    /// The representative: the head contributor while live, the pinned
    /// head after `prepare_for_removal`.
    pub fn active_package_node(&self) -> Option<Arc<PackageNode>> {
        match &self.flavor {
            LeafFlavor::Unpacking(state) => {
                let state = state.read();
                state
                    .contributors
                    .first()
                    .cloned()
                    .or_else(|| state.finalized.clone())
            }
            LeafFlavor::SymlinkTarget(_) => None,
        }
    }

    pub(super) fn mode(&self) -> u32 {
        match &self.flavor {
            LeafFlavor::Unpacking(_) => self
                .active_package_node()
                .map(|node| node.mode())
                .unwrap_or(libc::S_IFREG as u32 | 0o444),
            LeafFlavor::SymlinkTarget(_) => libc::S_IFLNK as u32 | 0o555,
        }
    }

    pub(super) fn uid(&self) -> u32 {
        self.active_package_node().map(|node| node.uid()).unwrap_or(0)
    }

    pub(super) fn gid(&self) -> u32 {
        self.active_package_node().map(|node| node.gid()).unwrap_or(0)
    }

    pub(super) fn file_size(&self) -> u64 {
        match &self.flavor {
            LeafFlavor::Unpacking(_) => self
                .active_package_node()
                .map(|node| node.file_size())
                .unwrap_or(0),
            LeafFlavor::SymlinkTarget(state) => state.read().target.len() as u64,
        }
    }

    pub(super) fn modified_time(&self) -> i64 {
        match &self.flavor {
            LeafFlavor::Unpacking(_) => self
                .active_package_node()
                .map(|node| node.modified_time())
                .unwrap_or(0),
            LeafFlavor::SymlinkTarget(state) => state.read().modified_time,
        }
    }

    pub(super) fn read_at(&self, offset: u64, buffer: &mut [u8]) -> PackageFsResult<usize> {
        match &self.flavor {
            LeafFlavor::Unpacking(_) => {
                let node = self
                    .active_package_node()
                    .ok_or_else(|| PackageFsError::bad_value("leaf has no content"))?;
                node.read_at(offset, buffer)
            }
            LeafFlavor::SymlinkTarget(_) => {
                Err(PackageFsError::bad_value("read from symlink"))
            }
        }
    }

    pub(super) fn read_symlink(&self) -> PackageFsResult<String> {
        match &self.flavor {
            LeafFlavor::Unpacking(_) => {
                let node = self
                    .active_package_node()
                    .ok_or_else(|| PackageFsError::bad_value("leaf has no content"))?;
                node.symlink_target()
                    .map(str::to_owned)
                    .ok_or_else(|| PackageFsError::bad_value("not a symlink"))
            }
            LeafFlavor::SymlinkTarget(state) => Ok(state.read().target.clone()),
        }
    }

    /// Retarget a synthesized symlink. Returns the previous target.
    pub fn update_symlink_target(&self, target: String, modified_time: i64) -> Option<String> {
        match &self.flavor {
            LeafFlavor::SymlinkTarget(state) => {
                let mut state = state.write();
                let previous = std::mem::replace(&mut state.target, target);
                state.modified_time = modified_time;
                Some(previous)
            }
            LeafFlavor::Unpacking(_) => None,
        }
    }

    // ------------------------------------------------------------------
    // Union surface.
    // ------------------------------------------------------------------

    pub(super) fn add_package_node(&self, package_node: &Arc<PackageNode>) -> PackageFsResult<()> {
        if package_node.is_directory() {
            return Err(PackageFsError::bad_value("directory added to a leaf"));
        }
        let state = match &self.flavor {
            LeafFlavor::Unpacking(state) => state,
            LeafFlavor::SymlinkTarget(_) => {
                return Err(PackageFsError::bad_value(
                    "package node added to a synthesized symlink",
                ));
            }
        };

        let mut state = state.write();
        debug_assert!(state.finalized.is_none());
        let overrides_head = state
            .contributors
            .first()
            .is_none_or(|head| package_node.has_precedence_over(head));
        if overrides_head {
            state.contributors.insert(0, package_node.clone());
        } else {
            // Keep the head; position within the tail does not matter.
            state.contributors.insert(1, package_node.clone());
        }
        Ok(())
    }

    pub(super) fn remove_package_node(&self, package_node: &Arc<PackageNode>) {
        let LeafFlavor::Unpacking(state) = &self.flavor else {
            return;
        };
        let mut state = state.write();
        debug_assert!(state.finalized.is_none());
        let was_head = state
            .contributors
            .first()
            .is_some_and(|head| Arc::ptr_eq(head, package_node));
        state
            .contributors
            .retain(|candidate| !Arc::ptr_eq(candidate, package_node));

        if was_head {
            promote_new_head(&mut state.contributors);
        }
    }

    pub(super) fn is_only_package_node(&self, package_node: &Arc<PackageNode>) -> bool {
        let LeafFlavor::Unpacking(state) = &self.flavor else {
            return false;
        };
        let state = state.read();
        state.contributors.len() == 1 && Arc::ptr_eq(&state.contributors[0], package_node)
    }

    pub(super) fn will_be_first_package_node(&self, package_node: &Arc<PackageNode>) -> bool {
        if package_node.is_directory() {
            return false;
        }
        let LeafFlavor::Unpacking(state) = &self.flavor else {
            return false;
        };
        state
            .read()
            .contributors
            .first()
            .is_none_or(|head| package_node.has_precedence_over(head))
    }

    pub(super) fn prepare_for_removal(&self) {
        let LeafFlavor::Unpacking(state) = &self.flavor else {
            return;
        };
        let mut state = state.write();
        state.finalized = state.contributors.first().cloned();
        state.contributors.clear();
    }

    /// Move the contributor list to `clone`, pinning the head here.
    pub(super) fn transfer_contributors_to(&self, clone: &Leaf) {
        let (LeafFlavor::Unpacking(state), LeafFlavor::Unpacking(clone_state)) =
            (&self.flavor, &clone.flavor)
        else {
            return;
        };
        let mut state = state.write();
        let mut clone_state = clone_state.write();
        state.finalized = state.contributors.first().cloned();
        clone_state.contributors = std::mem::take(&mut state.contributors);
    }

    pub fn contributor_count(&self) -> usize {
        match &self.flavor {
            LeafFlavor::Unpacking(state) => state.read().contributors.len(),
            LeafFlavor::SymlinkTarget(_) => 0,
        }
    }
}
