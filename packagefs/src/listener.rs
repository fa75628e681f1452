//! Node listeners: the notification bus driving indices, live queries and
//! the package links directory during activation changes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::node::{NodeId, NodeRef};
use crate::package::PackageNode;

/// Snapshot of the attributes a node reported before a change, taken from
/// the representative package node it is about to lose. Indices use it to
/// locate their old entries.
#[derive(Debug, Default, Clone)]
pub struct OldNodeAttributes {
    pub file_size: u64,
    pub modified_time: i64,
    attributes: Vec<(String, u32, Arc<[u8]>)>,
}

impl OldNodeAttributes {
    pub fn of(package_node: Option<&Arc<PackageNode>>) -> Self {
        match package_node {
            Some(node) => Self {
                file_size: node.file_size(),
                modified_time: node.modified_time(),
                attributes: node
                    .attributes()
                    .into_iter()
                    .map(|attribute| (attribute.name, attribute.type_code, attribute.data))
                    .collect(),
            },
            None => Self::default(),
        }
    }

    pub fn find_attribute(&self, name: &str) -> Option<(u32, Arc<[u8]>)> {
        self.attributes
            .iter()
            .find(|(attribute, _, _)| attribute == name)
            .map(|(_, type_code, data)| (*type_code, data.clone()))
    }
}

/// Receives node lifecycle events during activation changes.
pub trait NodeListener: Send + Sync {
    fn node_added(&self, _node: &NodeRef) {}
    fn node_removed(&self, _node: &NodeRef) {}
    fn node_changed(&self, _node: &NodeRef, _stat_fields: u32, _old: &OldNodeAttributes) {}
}

/// Listener lists keyed by node, plus one list for "all nodes".
///
/// Dispatch works on a snapshot of the relevant lists, so a listener may
/// unregister itself (or others) from inside its callback.
#[derive(Default)]
pub struct ListenerRegistry {
    by_node: Mutex<HashMap<NodeId, Vec<Arc<dyn NodeListener>>>>,
    all_nodes: Mutex<Vec<Arc<dyn NodeListener>>>,
}

impl ListenerRegistry {
    /// Register for events on one node, or on all nodes when `node` is
    /// `None`.
    pub fn add(&self, listener: Arc<dyn NodeListener>, node: Option<NodeId>) {
        match node {
            Some(node) => self
                .by_node
                .lock()
                .entry(node)
                .or_default()
                .push(listener),
            None => self.all_nodes.lock().push(listener),
        }
    }

    pub fn remove(&self, listener: &Arc<dyn NodeListener>, node: Option<NodeId>) {
        match node {
            Some(node) => {
                let mut by_node = self.by_node.lock();
                if let Some(list) = by_node.get_mut(&node) {
                    list.retain(|candidate| !Arc::ptr_eq(candidate, listener));
                    if list.is_empty() {
                        by_node.remove(&node);
                    }
                }
            }
            None => self
                .all_nodes
                .lock()
                .retain(|candidate| !Arc::ptr_eq(candidate, listener)),
        }
    }

    fn snapshot_for(&self, node: &NodeRef) -> Vec<Arc<dyn NodeListener>> {
        let mut listeners = Vec::new();
        if let Some(list) = self.by_node.lock().get(&node.id()) {
            listeners.extend(list.iter().cloned());
        }
        listeners.extend(self.all_nodes.lock().iter().cloned());
        listeners
    }

    pub fn notify_added(&self, node: &NodeRef) {
        for listener in self.snapshot_for(node) {
            listener.node_added(node);
        }
    }

    pub fn notify_removed(&self, node: &NodeRef) {
        for listener in self.snapshot_for(node) {
            listener.node_removed(node);
        }
    }

    pub fn notify_changed(&self, node: &NodeRef, stat_fields: u32, old: &OldNodeAttributes) {
        for listener in self.snapshot_for(node) {
            listener.node_changed(node, stat_fields, old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        added: AtomicUsize,
        removed: AtomicUsize,
    }

    impl NodeListener for Counter {
        fn node_added(&self, _node: &NodeRef) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }
        fn node_removed(&self, _node: &NodeRef) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_per_node_and_all_node_listeners() {
        let registry = ListenerRegistry::default();
        let node = Node::new_unpacking_leaf(7, "x");
        let other = Node::new_unpacking_leaf(8, "y");

        let scoped = Arc::new(Counter::default());
        let global = Arc::new(Counter::default());
        registry.add(scoped.clone(), Some(7));
        registry.add(global.clone(), None);

        registry.notify_added(&node);
        registry.notify_added(&other);

        assert_eq!(scoped.added.load(Ordering::SeqCst), 1);
        assert_eq!(global.added.load(Ordering::SeqCst), 2);

        let listener: Arc<dyn NodeListener> = scoped.clone();
        registry.remove(&listener, Some(7));
        registry.notify_added(&node);
        assert_eq!(scoped.added.load(Ordering::SeqCst), 1);
    }
}
