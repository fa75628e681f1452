//! Live query support.
//!
//! The query parser and evaluator are external; the core keeps the list of
//! live queries per volume, broadcasts attribute changes to them, and hands
//! the external engine the [`QueryPolicy`] surface it needs to walk
//! indices and resolve nodes.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::index::Index;
use crate::node::{NodeId, NodeRef};

/// A live query registered with a volume.
pub trait LiveQuery: Send + Sync {
    /// An indexed value of `node` changed from `old_key` to `new_key`.
    /// Either side is `None` when the node was not indexed under
    /// `attribute` before or after the change.
    fn live_update(
        &self,
        node: &NodeRef,
        attribute: &str,
        type_code: u32,
        old_key: Option<&[u8]>,
        new_key: Option<&[u8]>,
    );
}

/// What the external query engine may ask of a volume.
pub trait QueryPolicy {
    fn find_index(&self, name: &str) -> Option<Arc<Index>>;
    fn node_by_id(&self, id: NodeId) -> Option<NodeRef>;
    fn add_query(&self, query: Arc<dyn LiveQuery>);
    fn remove_query(&self, query: &Arc<dyn LiveQuery>);
}

/// Per-volume list of live queries.
#[derive(Default)]
pub struct QueryRegistry {
    queries: Mutex<Vec<Arc<dyn LiveQuery>>>,
}

impl QueryRegistry {
    pub fn add(&self, query: Arc<dyn LiveQuery>) {
        self.queries.lock().push(query);
    }

    pub fn remove(&self, query: &Arc<dyn LiveQuery>) {
        self.queries
            .lock()
            .retain(|candidate| !Arc::ptr_eq(candidate, query));
    }

    pub fn update(
        &self,
        node: &NodeRef,
        attribute: &str,
        type_code: u32,
        old_key: Option<&[u8]>,
        new_key: Option<&[u8]>,
    ) {
        let queries = self.queries.lock().clone();
        for query in queries {
            query.live_update(node, attribute, type_code, old_key, new_key);
        }
    }

    pub fn len(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.lock().is_empty()
    }
}
