//! Reference-counted cache of node subtrees shared between handles.

use std::collections::HashMap;

use crate::node_id::NodeId;

use super::arena::{NodeArena, NodeIdx};
use super::handle::NodeHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub(crate) ref_count: u32,
    pub(crate) root: NodeIdx,
    /// The cache owns the subtree and frees it when the entry is dropped.
    pub(crate) owned: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ComponentCache {
    entries: HashMap<NodeId, CacheEntry>,
}

impl ComponentCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Resolves a handle against an existing entry.
    pub(crate) fn lookup(&self, arena: &NodeArena, handle: &NodeHandle) -> Option<NodeIdx> {
        let entry = self.entries.get(&handle.cache_key())?;
        match handle.component_path() {
            Some(path) => arena.resolve_path(entry.root, path),
            None => Some(entry.root),
        }
    }

    /// Takes a reference on the entry for `handle`, creating it for `node`
    /// if absent. Returns the node the handle resolves to.
    pub(crate) fn add(&mut self, arena: &NodeArena, handle: &NodeHandle, node: NodeIdx, owned: bool) -> NodeIdx {
        let key = handle.cache_key();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.ref_count += 1;
            return match handle.component_path() {
                Some(path) => arena.resolve_path(entry.root, path).unwrap_or(node),
                None => entry.root,
            };
        }

        let root = if handle.component_path().is_some() {
            arena.hierarchy_root(node)
        } else {
            node
        };
        self.entries.insert(
            key,
            CacheEntry {
                ref_count: 1,
                root,
                owned,
            },
        );
        node
    }

    /// Drops one reference. Returns the entry once its count reaches zero.
    pub(crate) fn release(&mut self, key: &NodeId) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            return self.entries.remove(key);
        }
        None
    }

    pub(crate) fn ref_count(&self, key: &NodeId) -> Option<u32> {
        self.entries.get(key).map(|e| e.ref_count)
    }

    /// True if some entry holds `root` as its subtree root.
    pub(crate) fn holds_root(&self, root: NodeIdx) -> bool {
        self.entries.values().any(|e| e.root == root)
    }

    pub(crate) fn clear(&mut self) -> Vec<CacheEntry> {
        self.entries.drain().map(|(_, e)| e).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::component_id::ParsedNodeId;
    use crate::node::Node;
    use crate::node_id::QualifiedName;

    fn setup() -> (NodeArena, NodeIdx, NodeIdx) {
        let mut arena = NodeArena::new();
        let root = arena.insert(Node::object(
            NodeId::string(1, "1:Tank"),
            QualifiedName::new(1, "Tank"),
        ));
        let level = arena.insert(Node::object(
            NodeId::string(1, "1:Tank?Level"),
            QualifiedName::new(1, "Level"),
        ));
        arena.attach(root, level);
        (arena, root, level)
    }

    fn handle(text: &str) -> NodeHandle {
        let id = NodeId::string(1, text);
        let parsed = ParsedNodeId::parse(&id);
        NodeHandle::deferred(id, parsed)
    }

    #[test]
    fn test_refcount_add_and_release() {
        let (arena, root, level) = setup();
        let mut cache = ComponentCache::new();
        let h = handle("1:Tank?Level");
        let key = h.cache_key();

        assert_eq!(cache.add(&arena, &h, level, true), level);
        assert_eq!(cache.ref_count(&key), Some(1));
        assert!(cache.holds_root(root));

        assert_eq!(cache.add(&arena, &h, level, true), level);
        assert_eq!(cache.ref_count(&key), Some(2));

        assert!(cache.release(&key).is_none());
        assert_eq!(cache.ref_count(&key), Some(1));
        assert_eq!(cache.lookup(&arena, &h), Some(level));

        let dropped = cache.release(&key).unwrap();
        assert_eq!(dropped.root, root);
        assert!(dropped.owned);
        assert_eq!(cache.ref_count(&key), None);
        assert!(cache.lookup(&arena, &h).is_none());
    }

    #[test]
    fn test_sibling_components_share_root_entry() {
        let (arena, root, level) = setup();
        let mut cache = ComponentCache::new();
        cache.add(&arena, &handle("1:Tank?Level"), level, true);
        let root_handle = handle("1:Tank?");
        assert_eq!(cache.add(&arena, &root_handle, root, true), root);
        assert_eq!(cache.ref_count(&NodeId::string(1, "1:Tank")), Some(2));
    }

    #[test]
    fn test_release_unknown_key() {
        let mut cache = ComponentCache::new();
        assert!(cache.release(&NodeId::numeric(1, 1)).is_none());
    }
}
