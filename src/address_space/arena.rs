//! Index-stable node table.
//!
//! Nodes live in slots addressed by [`NodeIdx`]. A node's parent is stored as
//! an index and its children as an owned list of indices, so the tree carries
//! no owning back-pointers. Freed slots are reused.

use crate::node::Node;
use crate::node_id::QualifiedName;

/// Slot index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(u32);

impl NodeIdx {
    #[allow(clippy::cast_possible_truncation)]
    const fn from_usize(v: usize) -> Self {
        Self(v as u32)
    }

    const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<NodeIdx>,
    live: usize,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeIdx {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx.as_usize()] = Some(node);
            return idx;
        }
        self.slots.push(Some(node));
        NodeIdx::from_usize(self.slots.len() - 1)
    }

    pub(crate) fn get(&self, idx: NodeIdx) -> Option<&Node> {
        self.slots.get(idx.as_usize())?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, idx: NodeIdx) -> Option<&mut Node> {
        self.slots.get_mut(idx.as_usize())?.as_mut()
    }

    pub(crate) const fn len(&self) -> usize {
        self.live
    }

    /// Links `child` under `parent`.
    pub(crate) fn attach(&mut self, parent: NodeIdx, child: NodeIdx) {
        if let Some(c) = self.get_mut(child) {
            c.parent = Some(parent);
        }
        if let Some(p) = self.get_mut(parent) {
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }
    }

    /// Unlinks `idx` from its parent's child list.
    pub(crate) fn detach(&mut self, idx: NodeIdx) {
        let Some(parent) = self.get_mut(idx).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|c| *c != idx);
        }
    }

    /// Frees `idx` and every descendant, returning the removed nodes
    /// (children before parents).
    pub(crate) fn remove_subtree(&mut self, idx: NodeIdx) -> Vec<Node> {
        self.detach(idx);
        let mut removed = Vec::new();
        self.remove_recursive(idx, &mut removed);
        removed
    }

    fn remove_recursive(&mut self, idx: NodeIdx, out: &mut Vec<Node>) {
        let Some(node) = self.slots.get_mut(idx.as_usize()).and_then(Option::take) else {
            return;
        };
        self.live -= 1;
        self.free.push(idx);
        for child in &node.children {
            self.remove_recursive(*child, out);
        }
        out.push(node);
    }

    /// Indexes of `idx` and all its descendants, parents first.
    pub(crate) fn subtree(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut out = Vec::new();
        let mut stack = vec![idx];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.get(next) {
                out.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Walks parent links up to the top of the hierarchy.
    pub(crate) fn hierarchy_root(&self, mut idx: NodeIdx) -> NodeIdx {
        while let Some(parent) = self.get(idx).and_then(|n| n.parent) {
            idx = parent;
        }
        idx
    }

    pub(crate) fn find_child(&self, parent: NodeIdx, browse_name: &QualifiedName) -> Option<NodeIdx> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.get(*c).is_some_and(|n| &n.browse_name == browse_name))
    }

    /// Child looked up by name only, ignoring the namespace of the browse name.
    pub(crate) fn find_child_by_name(&self, parent: NodeIdx, name: &str) -> Option<NodeIdx> {
        self.get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.get(*c).is_some_and(|n| n.browse_name.name == name))
    }

    /// Resolves a `/`-separated component path relative to `root`.
    pub(crate) fn resolve_path(&self, root: NodeIdx, path: &str) -> Option<NodeIdx> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(root, |current, segment| {
                self.find_child_by_name(current, segment)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::node_id::NodeId;

    fn object(id: u32, name: &str) -> Node {
        Node::object(NodeId::numeric(1, id), QualifiedName::new(1, name))
    }

    #[test]
    fn test_attach_and_resolve_path() {
        let mut arena = NodeArena::new();
        let root = arena.insert(object(1, "Boiler"));
        let drum = arena.insert(object(2, "Drum"));
        let level = arena.insert(object(3, "Level"));
        arena.attach(root, drum);
        arena.attach(drum, level);

        assert_eq!(arena.resolve_path(root, "Drum/Level"), Some(level));
        assert_eq!(arena.resolve_path(root, "Drum/Missing"), None);
        assert_eq!(arena.hierarchy_root(level), root);
        assert_eq!(arena.subtree(root), vec![root, drum, level]);
    }

    #[test]
    fn test_remove_subtree_reuses_slots() {
        let mut arena = NodeArena::new();
        let root = arena.insert(object(1, "A"));
        let child = arena.insert(object(2, "B"));
        arena.attach(root, child);
        assert_eq!(arena.len(), 2);

        let removed = arena.remove_subtree(root);
        assert_eq!(removed.len(), 2);
        assert_eq!(arena.len(), 0);
        assert!(arena.get(child).is_none());

        let again = arena.insert(object(3, "C"));
        assert!(again == root || again == child);
    }

    #[test]
    fn test_detach_child_only() {
        let mut arena = NodeArena::new();
        let root = arena.insert(object(1, "A"));
        let child = arena.insert(object(2, "B"));
        arena.attach(root, child);
        arena.remove_subtree(child);
        assert!(arena.get(root).unwrap().children.is_empty());
        assert_eq!(arena.len(), 1);
    }
}
