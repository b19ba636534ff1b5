//! Per-request node handles.

use std::collections::HashMap;

use crate::node_id::NodeId;

use super::arena::NodeIdx;
use super::component_id::ParsedNodeId;

/// A node resolved (or about to be resolved) by this manager for one batch
/// item.
///
/// Handles for predefined nodes carry the live node immediately. Handles for
/// synthetic component ids start unvalidated and are resolved in the second
/// pass of a batch, through the component cache or by materializing the
/// subtree root.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub node_id: NodeId,
    /// Position of the item in the caller's batch.
    pub index: usize,
    pub parsed: Option<ParsedNodeId>,
    pub(crate) node: Option<NodeIdx>,
    pub(crate) validated: bool,
}

impl NodeHandle {
    pub(crate) const fn resolved(node_id: NodeId, node: NodeIdx) -> Self {
        Self {
            node_id,
            index: 0,
            parsed: None,
            node: Some(node),
            validated: true,
        }
    }

    pub(crate) const fn deferred(node_id: NodeId, parsed: Option<ParsedNodeId>) -> Self {
        Self {
            node_id,
            index: 0,
            parsed,
            node: None,
            validated: false,
        }
    }

    /// Records the batch position the handle was claimed for.
    #[must_use]
    pub const fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// True once the handle points at a live node.
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        self.validated && self.node.is_some()
    }

    /// NodeId of the subtree root for component ids.
    #[must_use]
    pub fn root_id(&self) -> Option<NodeId> {
        self.parsed.as_ref().map(ParsedNodeId::root_node_id)
    }

    /// Path below the root, if the id names a component.
    #[must_use]
    pub fn component_path(&self) -> Option<&str> {
        self.parsed.as_ref()?.component_path.as_deref()
    }

    /// Key of the component cache entry this handle shares.
    #[must_use]
    pub fn cache_key(&self) -> NodeId {
        match &self.parsed {
            Some(p) if p.component_path.is_some() => p.root_node_id(),
            _ => self.node_id.clone(),
        }
    }
}

/// Handle data a monitored item keeps after creation, used to release the
/// component cache entry on delete.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerHandle {
    pub node_id: NodeId,
    pub cache_key: NodeId,
}

impl From<&NodeHandle> for ManagerHandle {
    fn from(handle: &NodeHandle) -> Self {
        Self {
            node_id: handle.node_id.clone(),
            cache_key: handle.cache_key(),
        }
    }
}

/// Batch-local validation state. Nodes materialized during the batch that the
/// component cache did not adopt are freed when the batch ends.
#[derive(Debug, Default)]
pub(crate) struct ValidationScope {
    pub(crate) resolved: HashMap<NodeId, NodeIdx>,
    pub(crate) transient_roots: Vec<NodeIdx>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_uses_root_for_components() {
        let id = NodeId::string(2, "1:Tank?Level");
        let parsed = ParsedNodeId::parse(&id);
        let handle = NodeHandle::deferred(id, parsed);
        assert_eq!(handle.cache_key(), NodeId::string(2, "1:Tank"));
        assert_eq!(handle.component_path(), Some("Level"));
        assert!(!handle.is_validated());
    }

    #[test]
    fn test_cache_key_plain_node() {
        let id = NodeId::numeric(2, 7);
        let handle = NodeHandle::deferred(id.clone(), None).with_index(3);
        assert_eq!(handle.cache_key(), id);
        assert_eq!(handle.index, 3);
        let mh = ManagerHandle::from(&handle);
        assert_eq!(mh.cache_key, id);
    }
}
