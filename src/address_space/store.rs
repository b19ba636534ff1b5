//! Node store state guarded by the manager's coarse lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::attributes::{EventNotifier, NodeClass};
use crate::context::OperationContext;
use crate::error::{UaError, UaResult};
use crate::monitor::{MonitoredItem, MonitoredItemId, MonitoredNode, SharedEvent, SubscriptionId};
use crate::node::{default_value, Node, NodeBody, NodeDefinition, Reference};
use crate::node_id::{ids, NodeId, QualifiedName};
use crate::status::StatusCode;
use crate::value::{DataValue, Variant};

use super::arena::{NodeArena, NodeIdx};
use super::browse::ContinuationTable;
use super::component_cache::ComponentCache;
use super::component_id::ParsedNodeId;
use super::handle::{NodeHandle, ValidationScope};
use super::hooks::{MethodHandler, NodeManagerHooks, ReferenceChange};
use super::type_tree::TypeTree;

/// Everything the coarse lock protects.
pub(crate) struct StoreState {
    pub(crate) arena: NodeArena,
    pub(crate) predefined: HashMap<NodeId, NodeIdx>,
    pub(crate) cache: ComponentCache,
    pub(crate) monitored_nodes: HashMap<NodeId, MonitoredNode>,
    pub(crate) items: HashMap<MonitoredItemId, Arc<MonitoredItem>>,
    pub(crate) root_notifiers: Vec<NodeId>,
    pub(crate) retained_conditions: HashMap<NodeId, Vec<SharedEvent>>,
    pub(crate) continuations: ContinuationTable,
    pub(crate) method_handlers: HashMap<NodeId, Arc<dyn MethodHandler>>,
    pub(crate) ready_signals: HashMap<SubscriptionId, Sender<MonitoredItemId>>,
    pub(crate) pending_definitions: Vec<NodeDefinition>,
    pub(crate) next_numeric_id: u32,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            arena: NodeArena::new(),
            predefined: HashMap::new(),
            cache: ComponentCache::new(),
            monitored_nodes: HashMap::new(),
            items: HashMap::new(),
            root_notifiers: Vec::new(),
            retained_conditions: HashMap::new(),
            continuations: ContinuationTable::default(),
            method_handlers: HashMap::new(),
            ready_signals: HashMap::new(),
            pending_definitions: Vec::new(),
            next_numeric_id: 1,
        }
    }

    pub(crate) fn node(&self, idx: NodeIdx) -> Option<&Node> {
        self.arena.get(idx)
    }

    /// Predefined node by id.
    pub(crate) fn lookup(&self, node_id: &NodeId) -> Option<NodeIdx> {
        self.predefined.get(node_id).copied()
    }

    /// Builds a handle for a node this manager owns. Namespace membership is
    /// checked by the caller.
    pub(crate) fn handle_for(&self, node_id: &NodeId, hooks: &dyn NodeManagerHooks) -> Option<NodeHandle> {
        if let Some(idx) = self.lookup(node_id) {
            return Some(NodeHandle::resolved(node_id.clone(), idx));
        }
        let parsed = ParsedNodeId::parse(node_id)?;
        let handle = NodeHandle::deferred(node_id.clone(), Some(parsed));
        let root_id = handle.root_id()?;
        let known = self.predefined.contains_key(&root_id)
            || self.cache.ref_count(&handle.cache_key()).is_some()
            || handle
                .parsed
                .as_ref()
                .is_some_and(|p| hooks.owns_dynamic_root(&ParsedNodeId { component_path: None, ..p.clone() }));
        known.then_some(handle)
    }

    /// Finds a live node by id: predefined first, then cached subtrees.
    pub(crate) fn find(&self, node_id: &NodeId) -> Option<NodeIdx> {
        if let Some(idx) = self.lookup(node_id) {
            return Some(idx);
        }
        let parsed = ParsedNodeId::parse(node_id)?;
        let handle = NodeHandle::deferred(node_id.clone(), Some(parsed));
        self.cache.lookup(&self.arena, &handle)
    }

    /// Resolves a deferred handle, materializing its subtree root if needed.
    pub(crate) fn validate_handle(
        &mut self,
        handle: &mut NodeHandle,
        ctx: &OperationContext,
        hooks: &dyn NodeManagerHooks,
        types: &mut TypeTree,
        scope: &mut ValidationScope,
    ) -> Option<NodeIdx> {
        if handle.validated {
            return handle.node;
        }
        let resolved = scope
            .resolved
            .get(&handle.node_id)
            .copied()
            .or_else(|| self.lookup(&handle.node_id))
            .or_else(|| self.cache.lookup(&self.arena, handle))
            .or_else(|| self.materialize(handle, ctx, hooks, types, scope));

        handle.validated = true;
        handle.node = resolved;
        if let Some(idx) = resolved {
            scope.resolved.insert(handle.node_id.clone(), idx);
        }
        resolved
    }

    fn materialize(
        &mut self,
        handle: &NodeHandle,
        ctx: &OperationContext,
        hooks: &dyn NodeManagerHooks,
        types: &mut TypeTree,
        scope: &mut ValidationScope,
    ) -> Option<NodeIdx> {
        let parsed = handle.parsed.as_ref()?;
        let root_id = parsed.root_node_id();
        let root = match scope.resolved.get(&root_id).copied().or_else(|| self.lookup(&root_id)) {
            Some(idx) => idx,
            None => {
                let root_parsed = ParsedNodeId {
                    component_path: None,
                    ..parsed.clone()
                };
                let definition = hooks.materialize_root(ctx, &root_parsed)?;
                let idx = match self.insert_tree(definition, None, hooks, types, true) {
                    Ok(idx) => idx,
                    Err(err) => {
                        tracing::warn!(node_id = %root_id, error = %err, "materialized subtree rejected");
                        return None;
                    }
                };
                tracing::debug!(node_id = %root_id, "materialized subtree root");
                scope.transient_roots.push(idx);
                scope.resolved.insert(root_id, idx);
                idx
            }
        };
        match &parsed.component_path {
            Some(path) => self.arena.resolve_path(root, path),
            None => Some(root),
        }
    }

    /// Frees subtrees materialized during a batch that nothing retained.
    pub(crate) fn end_scope(&mut self, scope: ValidationScope) {
        for root in scope.transient_roots {
            if !self.cache.holds_root(root) {
                self.arena.remove_subtree(root);
            }
        }
    }

    /// Inserts a definition tree. Predefined trees are indexed by id and
    /// registered in the type tree; transient trees are only reachable
    /// through their root index.
    pub(crate) fn insert_tree(
        &mut self,
        definition: NodeDefinition,
        parent: Option<(NodeIdx, NodeId)>,
        hooks: &dyn NodeManagerHooks,
        types: &mut TypeTree,
        transient: bool,
    ) -> UaResult<NodeIdx> {
        let (mut node, children) = definition.into_node();

        if node.browse_name.is_null() {
            return Err(UaError::service(
                StatusCode::BAD_BROWSE_NAME_INVALID,
                format!("node {} has no browse name", node.node_id),
            ));
        }
        if !transient && self.predefined.contains_key(&node.node_id) {
            return Err(UaError::service(
                StatusCode::BAD_NODE_ID_EXISTS,
                format!("node {} already exists", node.node_id),
            ));
        }

        if node.node_id.namespace == 0 {
            if let NodeBody::Variable(var) = &mut node.body {
                if var.value.value.is_empty() && var.value.status.is_good() {
                    var.value = DataValue::new(default_value(&var.data_type, var.value_rank, types));
                }
            }
        }
        if !transient {
            node = hooks.add_behaviour_to_predefined_node(node);
        }

        let parent_link = parent.map(|(parent_idx, reference_type)| {
            let parent_id = self
                .arena
                .get(parent_idx)
                .map(|p| p.node_id.clone())
                .unwrap_or_else(NodeId::null);
            node.add_reference(Reference::inverse(reference_type.clone(), parent_id));
            (parent_idx, reference_type)
        });

        let node_id = node.node_id.clone();
        let idx = self.arena.insert(node);
        if let Some((parent_idx, reference_type)) = parent_link {
            if let Some(p) = self.arena.get_mut(parent_idx) {
                p.add_reference(Reference::forward(reference_type, node_id.clone()));
            }
            self.arena.attach(parent_idx, idx);
        }

        if !transient {
            self.predefined.insert(node_id.clone(), idx);
            self.register_type(idx, types);
            self.relink_root_notifier(idx);
        }

        for child in children {
            let child_link = child.link_reference_type();
            self.insert_tree(child, Some((idx, child_link)), hooks, types, transient)?;
        }
        Ok(idx)
    }

    /// Registers a type node, ensuring its supertype chain is present first.
    fn register_type(&self, idx: NodeIdx, types: &mut TypeTree) {
        let Some(node) = self.arena.get(idx) else {
            return;
        };
        if !node.node_class().is_type() {
            return;
        }
        let super_type = node.super_type().cloned();
        if let Some(sup) = &super_type {
            if !types.is_known(sup) {
                if let Some(sup_idx) = self.lookup(sup) {
                    self.register_type(sup_idx, types);
                }
            }
        }
        if node.node_class() == NodeClass::ReferenceType {
            types.add_reference_subtype(node.node_id.clone(), super_type, node.browse_name.clone());
        } else {
            types.add_subtype(node.node_id.clone(), super_type);
        }
    }

    /// Records nodes that forward events to a notifier owned elsewhere.
    fn relink_root_notifier(&mut self, idx: NodeIdx) {
        let Some(node) = self.arena.get(idx) else {
            return;
        };
        let is_root = node.event_notifier().contains(EventNotifier::SUBSCRIBE_TO_EVENTS)
            && node.references.iter().any(|r| {
                !r.is_forward && r.reference_type == ids::HAS_NOTIFIER && !self.predefined.contains_key(&r.target)
            });
        if is_root && !self.root_notifiers.contains(&node.node_id) {
            self.root_notifiers.push(node.node_id.clone());
        }
    }

    /// Removes a predefined subtree. Reference halves held by nodes outside
    /// this store are returned for the caller to remove after unlocking.
    pub(crate) fn remove_tree(&mut self, idx: NodeIdx, types: &mut TypeTree) -> Vec<ReferenceChange> {
        let subtree = self.arena.subtree(idx);
        let removed_ids: HashSet<NodeId> = subtree
            .iter()
            .filter_map(|i| self.arena.get(*i).map(|n| n.node_id.clone()))
            .collect();

        let mut external = Vec::new();
        for node_idx in &subtree {
            let Some(node) = self.arena.get(*node_idx) else {
                continue;
            };
            let node_id = node.node_id.clone();
            let references = node.references.clone();
            if node.node_class().is_type() {
                types.remove(&node_id);
            }

            for reference in references {
                if removed_ids.contains(&reference.target) {
                    continue;
                }
                if let Some(target_idx) = self.lookup(&reference.target) {
                    if let Some(target) = self.arena.get_mut(target_idx) {
                        target.remove_reference(&reference.reference_type, !reference.is_forward, &node_id);
                    }
                } else {
                    external.push(ReferenceChange {
                        source: reference.target.clone(),
                        reference: reference.reversed(&node_id),
                    });
                }
            }

            if let Some(monitored) = self.monitored_nodes.remove(&node_id) {
                let status = StatusCode::BAD_NODE_ID_UNKNOWN;
                for item in monitored.data_items() {
                    item.set_structure_changed();
                    item.queue_value(&DataValue::from_status(status), Some(status), true);
                }
            }
            self.predefined.remove(&node_id);
            self.root_notifiers.retain(|n| n != &node_id);
            self.retained_conditions.remove(&node_id);
            self.method_handlers.remove(&node_id);
        }

        self.arena.remove_subtree(idx);
        external
    }

    /// Allocates an unused numeric id in `namespace`.
    pub(crate) fn next_node_id(&mut self, namespace: u16) -> NodeId {
        loop {
            let candidate = NodeId::numeric(namespace, self.next_numeric_id);
            self.next_numeric_id = self.next_numeric_id.wrapping_add(1).max(1);
            if !self.predefined.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Value of the named property (child variable) of `idx`.
    pub(crate) fn property_value(&self, idx: NodeIdx, name: &str) -> Option<Variant> {
        let child = self.arena.find_child_by_name(idx, name)?;
        Some(self.arena.get(child)?.variable()?.value.value.clone())
    }

    pub(crate) fn has_child_named(&self, idx: NodeIdx, name: &QualifiedName) -> bool {
        self.arena.find_child(idx, name).is_some()
    }

    /// Samples every data item watching the node at `idx`.
    pub(crate) fn notify_value_changed(&self, idx: NodeIdx) {
        let Some(node) = self.arena.get(idx) else {
            return;
        };
        if let Some(monitored) = self.monitored_nodes.get(&node.node_id) {
            monitored.on_value_changed(node);
        }
    }

    /// If `idx` is a semantic property of its parent variable, flags and
    /// re-samples the parent's Value items.
    pub(crate) fn notify_semantics_if_property(&self, idx: NodeIdx) {
        let Some(property) = self.arena.get(idx) else {
            return;
        };
        let Some(parent) = property.parent.and_then(|p| self.arena.get(p)) else {
            return;
        };
        let Some(var) = parent.variable() else {
            return;
        };
        if !var.kind.is_semantic_property(&property.browse_name.name) {
            return;
        }
        if let Some(monitored) = self.monitored_nodes.get(&parent.node_id) {
            tracing::debug!(node_id = %parent.node_id, property = %property.browse_name, "semantics changed");
            monitored.on_semantics_changed(parent);
        }
    }

    /// The source and every notifier it reports to, following inverse
    /// HasEventSource / HasNotifier references through local nodes.
    pub(crate) fn event_targets(&self, source: &NodeId, types: &TypeTree) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![source.clone()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(idx) = self.find(&current) else {
                continue;
            };
            order.push(current);
            if let Some(node) = self.arena.get(idx) {
                for r in &node.references {
                    if !r.is_forward && types.is_type_of(&r.reference_type, &ids::HAS_EVENT_SOURCE) {
                        stack.push(r.target.clone());
                    }
                }
            }
        }
        order
    }

    /// Drops one monitored item from every index that references it.
    pub(crate) fn detach_item(&mut self, item: &MonitoredItem) {
        self.items.remove(&item.id());
        let mut emptied = Vec::new();
        for (node_id, monitored) in &mut self.monitored_nodes {
            if monitored.remove(item.id()) && monitored.is_empty() {
                emptied.push(node_id.clone());
            }
        }
        for node_id in emptied {
            self.monitored_nodes.remove(&node_id);
        }
        if let Some(entry) = self.cache.release(&item.manager_handle().cache_key) {
            if entry.owned {
                self.arena.remove_subtree(entry.root);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::hooks::DefaultHooks;

    fn plant() -> NodeDefinition {
        NodeDefinition::object(NodeId::numeric(1, 1), QualifiedName::new(1, "Plant"))
            .with_reference(Reference::inverse(ids::ORGANIZES, ids::OBJECTS_FOLDER))
            .with_child(NodeDefinition::variable(
                NodeId::numeric(1, 2),
                QualifiedName::new(1, "Level"),
                1.0f64,
            ))
    }

    #[test]
    fn test_insert_links_parent_and_child() {
        let mut state = StoreState::new();
        let mut types = TypeTree::with_standard_types();
        let root = state
            .insert_tree(plant(), None, &DefaultHooks, &mut types, false)
            .unwrap();
        let level = state.lookup(&NodeId::numeric(1, 2)).unwrap();
        assert_eq!(state.arena.get(level).unwrap().parent, Some(root));
        let plant = state.arena.get(root).unwrap();
        assert!(plant
            .references
            .contains(&Reference::forward(ids::HAS_COMPONENT, NodeId::numeric(1, 2))));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut state = StoreState::new();
        let mut types = TypeTree::with_standard_types();
        state.insert_tree(plant(), None, &DefaultHooks, &mut types, false).unwrap();
        let err = state
            .insert_tree(plant(), None, &DefaultHooks, &mut types, false)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_NODE_ID_EXISTS);
    }

    #[test]
    fn test_remove_collects_external_halves() {
        let mut state = StoreState::new();
        let mut types = TypeTree::with_standard_types();
        let root = state.insert_tree(plant(), None, &DefaultHooks, &mut types, false).unwrap();
        let external = state.remove_tree(root, &mut types);
        assert!(external.contains(&ReferenceChange {
            source: ids::OBJECTS_FOLDER,
            reference: Reference::forward(ids::ORGANIZES, NodeId::numeric(1, 1)),
        }));
        assert!(state.predefined.is_empty());
        assert_eq!(state.arena.len(), 0);
    }

    #[test]
    fn test_type_registered_after_supertype() {
        let mut state = StoreState::new();
        let mut types = TypeTree::with_standard_types();
        let base = NodeDefinition::object_type(
            NodeId::numeric(1, 100),
            QualifiedName::new(1, "PumpType"),
            ids::BASE_OBJECT_TYPE,
        );
        let derived = NodeDefinition::object_type(
            NodeId::numeric(1, 101),
            QualifiedName::new(1, "BigPumpType"),
            NodeId::numeric(1, 100),
        );
        state.insert_tree(base, None, &DefaultHooks, &mut types, false).unwrap();
        state.insert_tree(derived, None, &DefaultHooks, &mut types, false).unwrap();
        assert!(types.is_type_of(&NodeId::numeric(1, 101), &ids::BASE_OBJECT_TYPE));
    }

    #[test]
    fn test_namespace_zero_variable_gets_default() {
        let mut state = StoreState::new();
        let mut types = TypeTree::with_standard_types();
        let mut def = NodeDefinition::variable(NodeId::numeric(0, 5000), QualifiedName::new(0, "Flag"), Variant::Empty);
        def = def.with_data_type(ids::BOOLEAN);
        let idx = state.insert_tree(def, None, &DefaultHooks, &mut types, false).unwrap();
        let node = state.arena.get(idx).unwrap();
        assert_eq!(node.variable().unwrap().value.value, Variant::Boolean(false));
    }

    #[test]
    fn test_next_node_id_skips_taken() {
        let mut state = StoreState::new();
        let mut types = TypeTree::with_standard_types();
        state.insert_tree(plant(), None, &DefaultHooks, &mut types, false).unwrap();
        assert_eq!(state.next_node_id(1), NodeId::numeric(1, 3));
        assert_eq!(state.next_node_id(1), NodeId::numeric(1, 4));
    }
}
