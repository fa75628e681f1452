//! The directory engine: child tables, ordered child lists, and live
//! directory iterators that stay well-defined across concurrent mutation.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use packagefs_shared::{PackageFsError, PackageFsResult};

use super::NodeRef;
use crate::package::PackageNode;

/// Directory payload of a node.
pub struct Directory {
    /// Unioning directories accept package contributors; plain ones
    /// (shine-through placeholders, package link directories) do not.
    union: bool,
    /// Overrides the representative's modification time (root, plain).
    fixed_modified_time: Option<i64>,
    children: RwLock<Children>,
    contributors: RwLock<Vec<Arc<PackageNode>>>,
}

#[derive(Default)]
struct Children {
    by_name: HashMap<String, NodeRef>,
    ordered: Vec<NodeRef>,
    iterators: Vec<Arc<IteratorState>>,
}

impl Directory {
    pub(super) fn new_union(fixed_modified_time: Option<i64>) -> Self {
        Self {
            union: true,
            fixed_modified_time,
            children: RwLock::new(Children::default()),
            contributors: RwLock::new(Vec::new()),
        }
    }

    pub(super) fn new_plain(modified_time: i64) -> Self {
        Self {
            union: false,
            fixed_modified_time: Some(modified_time),
            children: RwLock::new(Children::default()),
            contributors: RwLock::new(Vec::new()),
        }
    }

    pub fn is_union(&self) -> bool {
        self.union
    }

    pub fn modified_time(&self) -> i64 {
        if let Some(time) = self.fixed_modified_time {
            return time;
        }
        self.head_contributor()
            .map(|node| node.modified_time())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Children.
    // ------------------------------------------------------------------

    pub(super) fn add_child(&self, child: &NodeRef) {
        let mut children = self.children.write();
        debug_assert!(!children.by_name.contains_key(child.name()));
        children.by_name.insert(child.name().to_owned(), child.clone());
        children.ordered.push(child.clone());
    }

    /// Remove a child. Any live iterator currently pointing at it is
    /// advanced to the next sibling before the child is unlinked.
    pub(super) fn remove_child(&self, child: &NodeRef) {
        let mut children = self.children.write();
        let Some(position) = children
            .ordered
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, child))
        else {
            return;
        };

        let next = children.ordered.get(position + 1).cloned();
        for iterator in &children.iterators {
            let mut current = iterator.current.lock();
            if let Some(pointed) = current.as_ref()
                && Arc::ptr_eq(pointed, child)
            {
                *current = next.clone();
            }
        }

        children.ordered.remove(position);
        children.by_name.remove(child.name());
    }

    pub(super) fn find_child(&self, name: &str) -> Option<NodeRef> {
        self.children.read().by_name.get(name).cloned()
    }

    pub(super) fn first_child(&self) -> Option<NodeRef> {
        self.children.read().ordered.first().cloned()
    }

    pub(super) fn next_child(&self, child: &NodeRef) -> Option<NodeRef> {
        let children = self.children.read();
        let position = children
            .ordered
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, child))?;
        children.ordered.get(position + 1).cloned()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().ordered.len()
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children
            .read()
            .ordered
            .iter()
            .map(|child| child.name().to_owned())
            .collect()
    }

    fn register_iterator(&self, state: &Arc<IteratorState>) {
        self.children.write().iterators.push(state.clone());
    }

    fn unregister_iterator(&self, state: &Arc<IteratorState>) {
        self.children
            .write()
            .iterators
            .retain(|candidate| !Arc::ptr_eq(candidate, state));
    }

    // ------------------------------------------------------------------
    // Union contributors.
    // ------------------------------------------------------------------

    pub(super) fn add_package_node(&self, package_node: &Arc<PackageNode>) -> PackageFsResult<()> {
        if !self.union {
            return Err(PackageFsError::bad_value(
                "package node added to a non-union directory",
            ));
        }
        if !package_node.is_directory() {
            return Err(PackageFsError::NotADirectory);
        }

        let mut contributors = self.contributors.write();
        let overrides_head = contributors
            .first()
            .is_none_or(|head| package_node.has_precedence_over(head));
        if overrides_head {
            contributors.insert(0, package_node.clone());
        } else {
            contributors.push(package_node.clone());
        }
        Ok(())
    }

    pub(super) fn remove_package_node(&self, package_node: &Arc<PackageNode>) {
        let mut contributors = self.contributors.write();
        let was_head = contributors
            .first()
            .is_some_and(|head| Arc::ptr_eq(head, package_node));
        contributors.retain(|candidate| !Arc::ptr_eq(candidate, package_node));

        if was_head {
            promote_new_head(&mut contributors);
        }
    }

    pub fn head_contributor(&self) -> Option<Arc<PackageNode>> {
        self.contributors.read().first().cloned()
    }

    pub(super) fn is_only_package_node(&self, package_node: &Arc<PackageNode>) -> bool {
        let contributors = self.contributors.read();
        contributors.len() == 1 && Arc::ptr_eq(&contributors[0], package_node)
    }

    pub(super) fn will_be_first_package_node(&self, package_node: &Arc<PackageNode>) -> bool {
        if !package_node.is_directory() {
            return false;
        }
        self.contributors
            .read()
            .first()
            .is_none_or(|head| package_node.has_precedence_over(head))
    }

    pub(super) fn prepare_for_removal(&self) {
        self.contributors.write().clear();
    }
}

/// Move the highest-precedence contributor to the head. The list is not
/// kept sorted; only the head position matters.
pub(super) fn promote_new_head(contributors: &mut Vec<Arc<PackageNode>>) {
    if contributors.len() < 2 {
        return;
    }
    let mut best = 0;
    for index in 1..contributors.len() {
        if contributors[index].has_precedence_over(&contributors[best]) {
            best = index;
        }
    }
    if best != 0 {
        let node = contributors.remove(best);
        contributors.insert(0, node);
    }
}

struct IteratorState {
    current: Mutex<Option<NodeRef>>,
}

/// A live readdir cursor.
///
/// Phase 0 emits ".", phase 1 "..", phase 2 walks the child list. While in
/// phase 2 the iterator is registered with the directory, which promises to
/// advance the cursor past a child that is being removed.
pub struct DirectoryIterator {
    directory: NodeRef,
    phase: u8,
    registered: bool,
    state: Arc<IteratorState>,
}

impl DirectoryIterator {
    pub fn new(directory: NodeRef) -> Self {
        debug_assert!(directory.is_directory());
        Self {
            directory,
            phase: 0,
            registered: false,
            state: Arc::new(IteratorState {
                current: Mutex::new(None),
            }),
        }
    }

    pub fn directory(&self) -> &NodeRef {
        &self.directory
    }

    /// The entry under the cursor, or `None` when exhausted.
    pub fn current(&self) -> Option<(String, NodeRef)> {
        match self.phase {
            0 => Some((".".to_owned(), self.directory.clone())),
            1 => {
                let parent = self.directory.parent().unwrap_or_else(|| self.directory.clone());
                Some(("..".to_owned(), parent))
            }
            _ => {
                let current = self.state.current.lock().clone()?;
                Some((current.name().to_owned(), current))
            }
        }
    }

    /// Advance the cursor.
    pub fn next(&mut self) {
        let directory = self
            .directory
            .as_directory()
            .expect("directory iterator over a leaf");

        match self.phase {
            0 => self.phase = 1,
            1 => {
                self.phase = 2;
                *self.state.current.lock() = directory.first_child();
                if !self.registered {
                    directory.register_iterator(&self.state);
                    self.registered = true;
                }
            }
            _ => {
                let mut current = self.state.current.lock();
                if let Some(node) = current.clone() {
                    *current = directory.next_child(&node);
                }
                let exhausted = current.is_none();
                drop(current);
                if exhausted && self.registered {
                    directory.unregister_iterator(&self.state);
                    self.registered = false;
                }
            }
        }
    }

    /// Restart from ".".
    pub fn rewind(&mut self) {
        if self.registered {
            let directory = self
                .directory
                .as_directory()
                .expect("directory iterator over a leaf");
            directory.unregister_iterator(&self.state);
            self.registered = false;
        }
        self.phase = 0;
        *self.state.current.lock() = None;
    }
}

impl Drop for DirectoryIterator {
    fn drop(&mut self) {
        if self.registered
            && let Some(directory) = self.directory.as_directory()
        {
            directory.unregister_iterator(&self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::Node;
    use super::*;

    #[test]
    fn test_child_table_and_order() {
        let dir = Node::new_union_directory(2, "lib");
        let a = Node::new_unpacking_leaf(3, "libA");
        let b = Node::new_unpacking_leaf(4, "libB");
        dir.add_child(&a).unwrap();
        dir.add_child(&b).unwrap();

        assert!(Arc::ptr_eq(&dir.find_child("libA").unwrap(), &a));
        assert!(Arc::ptr_eq(&dir.first_child().unwrap(), &a));
        assert!(Arc::ptr_eq(&dir.next_child(&a).unwrap(), &b));
        assert!(dir.next_child(&b).is_none());
        assert!(Arc::ptr_eq(&a.parent().unwrap(), &dir));

        dir.remove_child(&a);
        assert!(dir.find_child("libA").is_none());
        assert!(a.parent().is_none());
    }

    #[test]
    fn test_iterator_emits_dot_entries_then_children() {
        let dir = Node::new_union_directory(2, "lib");
        let a = Node::new_unpacking_leaf(3, "libA");
        dir.add_child(&a).unwrap();

        let mut iterator = DirectoryIterator::new(dir.clone());
        let mut names = Vec::new();
        while let Some((name, _node)) = iterator.current() {
            names.push(name);
            iterator.next();
        }
        assert_eq!(names, vec![".", "..", "libA"]);
    }

    #[test]
    fn test_iterator_advanced_past_removed_child() {
        let dir = Node::new_union_directory(2, "lib");
        let a = Node::new_unpacking_leaf(3, "libA");
        let b = Node::new_unpacking_leaf(4, "libB");
        let c = Node::new_unpacking_leaf(5, "libC");
        for child in [&a, &b, &c] {
            dir.add_child(child).unwrap();
        }

        let mut iterator = DirectoryIterator::new(dir.clone());
        iterator.next(); // ".."
        iterator.next(); // libA
        iterator.next(); // libB
        assert_eq!(iterator.current().unwrap().0, "libB");

        // Removing the pointed-at child moves the cursor to its sibling.
        dir.remove_child(&b);
        assert_eq!(iterator.current().unwrap().0, "libC");

        iterator.next();
        assert!(iterator.current().is_none());
    }

    #[test]
    fn test_rewind() {
        let dir = Node::new_union_directory(2, "lib");
        let a = Node::new_unpacking_leaf(3, "libA");
        dir.add_child(&a).unwrap();

        let mut iterator = DirectoryIterator::new(dir.clone());
        iterator.next();
        iterator.next();
        assert_eq!(iterator.current().unwrap().0, "libA");

        iterator.rewind();
        assert_eq!(iterator.current().unwrap().0, ".");
    }
}
