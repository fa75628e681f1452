//! Query indices kept current through the listener bus.
//!
//! Every volume carries a name index, a size index, a last-modified index
//! and one attribute index. Keys are byte strings ordered in a B-tree map;
//! numeric keys are big-endian encoded so byte order equals numeric order.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::listener::{NodeListener, OldNodeAttributes};
use crate::node::NodeRef;
use crate::package::codec::attribute_types;

/// The application-signature attribute carried by application packages.
pub const APP_SIGNATURE_ATTRIBUTE: &str = "SYS:APP_SIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    Name,
    Size,
    LastModified,
    Attribute,
}

/// One ordered index over the volume's nodes.
pub struct Index {
    name: String,
    kind: IndexKind,
    type_code: u32,
    entries: Mutex<BTreeMap<Vec<u8>, Vec<NodeRef>>>,
}

impl Index {
    fn new(name: impl Into<String>, kind: IndexKind, type_code: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            type_code,
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_code(&self) -> u32 {
        self.type_code
    }

    /// Current key of `node` in this index, or `None` when unindexed.
    pub fn key_for(&self, node: &NodeRef) -> Option<Vec<u8>> {
        match self.kind {
            IndexKind::Name => Some(node.name().as_bytes().to_vec()),
            IndexKind::Size => Some(node.file_size().to_be_bytes().to_vec()),
            IndexKind::LastModified => {
                Some((node.modified_time() as u64).to_be_bytes().to_vec())
            }
            IndexKind::Attribute => node
                .find_attribute(&self.name)
                .map(|attribute| attribute.data.to_vec()),
        }
    }

    /// Key the node had before a change, reconstructed from the old
    /// representative's attributes.
    pub fn old_key_for(&self, node: &NodeRef, old: &OldNodeAttributes) -> Option<Vec<u8>> {
        match self.kind {
            IndexKind::Name => Some(node.name().as_bytes().to_vec()),
            IndexKind::Size => Some(old.file_size.to_be_bytes().to_vec()),
            IndexKind::LastModified => Some((old.modified_time as u64).to_be_bytes().to_vec()),
            IndexKind::Attribute => old
                .find_attribute(&self.name)
                .map(|(_, data)| data.to_vec()),
        }
    }

    fn insert(&self, node: &NodeRef) {
        if let Some(key) = self.key_for(node) {
            self.entries.lock().entry(key).or_default().push(node.clone());
        }
    }

    fn remove_key(&self, node: &NodeRef, key: Option<Vec<u8>>) {
        let Some(key) = key else { return };
        let mut entries = self.entries.lock();
        if let Some(nodes) = entries.get_mut(&key) {
            nodes.retain(|candidate| !Arc::ptr_eq(candidate, node));
            if nodes.is_empty() {
                entries.remove(&key);
            }
        }
    }

    /// Nodes indexed under exactly `key`.
    pub fn find_exact(&self, key: &[u8]) -> Vec<NodeRef> {
        self.entries.lock().get(key).cloned().unwrap_or_default()
    }

    /// Number of indexed nodes.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

/// The fixed index set of one volume; subscribes to the listener bus.
pub struct IndexRegistry {
    indices: Vec<Arc<Index>>,
}

impl IndexRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            indices: vec![
                Index::new("name", IndexKind::Name, attribute_types::STRING),
                Index::new("size", IndexKind::Size, attribute_types::RAW),
                Index::new("last_modified", IndexKind::LastModified, attribute_types::RAW),
                Index::new(
                    APP_SIGNATURE_ATTRIBUTE,
                    IndexKind::Attribute,
                    attribute_types::MIME_STRING,
                ),
            ],
        })
    }

    pub fn find(&self, name: &str) -> Option<Arc<Index>> {
        self.indices.iter().find(|index| index.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Index>> {
        self.indices.iter()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl NodeListener for IndexRegistry {
    fn node_added(&self, node: &NodeRef) {
        for index in &self.indices {
            index.insert(node);
        }
    }

    fn node_removed(&self, node: &NodeRef) {
        for index in &self.indices {
            let key = index.key_for(node);
            index.remove_key(node, key);
        }
    }

    fn node_changed(&self, node: &NodeRef, _stat_fields: u32, old: &OldNodeAttributes) {
        for index in &self.indices {
            let old_key = index.old_key_for(node, old);
            let new_key = index.key_for(node);
            if old_key == new_key {
                continue;
            }
            index.remove_key(node, old_key);
            if let Some(key) = new_key {
                index.entries.lock().entry(key).or_default().push(node.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    #[test]
    fn test_name_index_add_remove() {
        let registry = IndexRegistry::new();
        let node = Node::new_unpacking_leaf(5, "tool");

        registry.node_added(&node);
        let index = registry.find("name").unwrap();
        assert_eq!(index.find_exact(b"tool").len(), 1);

        registry.node_removed(&node);
        assert!(index.find_exact(b"tool").is_empty());
    }

    #[test]
    fn test_size_index_ordering_encoding() {
        // Big-endian keys: numeric order equals byte order.
        let small = 5u64.to_be_bytes();
        let large = 500u64.to_be_bytes();
        assert!(small < large);
    }

    #[test]
    fn test_registry_has_standard_indices() {
        let registry = IndexRegistry::new();
        for name in ["name", "size", "last_modified", APP_SIGNATURE_ATTRIBUTE] {
            assert!(registry.find(name).is_some(), "missing index {name}");
        }
    }
}
