//! Address-space store and the node manager facade.
//!
//! A [`NodeManager`] owns the nodes of one or more namespaces. Predefined
//! nodes are indexed by id; nodes with synthetic component ids are
//! materialized on demand and kept alive by the component cache while
//! monitored items reference them.
//!
//! Locking: one coarse mutex guards the store. The type tree lock is only
//! taken while the store lock is held, never the other way round. Item and
//! cursor locks may be taken under the store lock; the store lock is never
//! taken while one of them is held.

mod arena;
mod browse;
mod component_cache;
mod component_id;
mod handle;
mod hooks;
mod services;
mod store;
mod type_tree;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use crossbeam_channel::{bounded, Receiver};

use crate::config::NodeManagerConfig;
use crate::context::OperationContext;
use crate::error::{UaError, UaResult, ValidationError};
use crate::monitor::{
    AggregateManager, EventFilterEvaluator, IdentityTranslator, MonitoredItem, MonitoredItemId, MonitoredItemIds,
    PermissiveEventFilter, SubscriptionId, Translator,
};
use crate::node::{NodeDefinition, Reference};
use crate::node_id::{ids, NodeId};
use crate::status::StatusCode;
use crate::value::DataValue;

pub use arena::NodeIdx;
pub use browse::{
    BrowseDescription, BrowsePathResult, BrowsePathTarget, ContinuationPoint, CursorData, CursorHandle,
    ReferenceDescription, RelativePathElement, ViewDescription,
};
pub use component_id::ParsedNodeId;
pub use handle::{ManagerHandle, NodeHandle};
pub use hooks::{
    DefaultHooks, ExternalReferences, MethodHandler, MethodOutcome, NodeManagerHooks, ReferenceChange, ReferenceTable,
};
pub use services::{
    CallMethodRequest, CallMethodResult, HistoryReadDetails, HistoryReadResult, HistoryReadValueId,
    HistoryUpdateDetails, HistoryUpdateRequest, HistoryUpdateResult, ReadValueId, WriteValue,
};
pub use type_tree::{SharedTypeTree, TypeTree};

pub(crate) use handle::ValidationScope;
pub(crate) use store::StoreState;

/// Address-space store and monitored-item host for a set of namespaces.
pub struct NodeManager {
    pub(crate) config: NodeManagerConfig,
    pub(crate) hooks: Arc<dyn NodeManagerHooks>,
    pub(crate) aggregates: Option<Arc<dyn AggregateManager>>,
    pub(crate) event_filter: Arc<dyn EventFilterEvaluator>,
    pub(crate) translator: Arc<dyn Translator>,
    pub(crate) references: Option<Arc<dyn ReferenceTable>>,
    pub(crate) types: SharedTypeTree,
    pub(crate) item_ids: Arc<MonitoredItemIds>,
    pub(crate) state: Mutex<StoreState>,
}

impl fmt::Debug for NodeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeManager")
            .field("namespaces", &self.config.namespaces)
            .field("aggregates", &self.aggregates.is_some())
            .field("references", &self.references.is_some())
            .finish_non_exhaustive()
    }
}

impl NodeManager {
    /// Creates an empty manager with default hooks and a private type tree
    /// seeded with the standard types.
    pub fn new(config: NodeManagerConfig) -> UaResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hooks: Arc::new(DefaultHooks),
            aggregates: None,
            event_filter: Arc::new(PermissiveEventFilter),
            translator: Arc::new(IdentityTranslator),
            references: None,
            types: TypeTree::with_standard_types().shared(),
            item_ids: Arc::new(MonitoredItemIds::new()),
            state: Mutex::new(StoreState::new()),
        })
    }

    /// Replaces the permissive default hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn NodeManagerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enables aggregate filters.
    #[must_use]
    pub fn with_aggregate_manager(mut self, aggregates: Arc<dyn AggregateManager>) -> Self {
        self.aggregates = Some(aggregates);
        self
    }

    /// Replaces the evaluator used for event WHERE clauses.
    #[must_use]
    pub fn with_event_filter_evaluator(mut self, evaluator: Arc<dyn EventFilterEvaluator>) -> Self {
        self.event_filter = evaluator;
        self
    }

    /// Replaces the localized-text translator used for event fields.
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    /// Receives reference halves owned by other managers.
    #[must_use]
    pub fn with_reference_table(mut self, references: Arc<dyn ReferenceTable>) -> Self {
        self.references = Some(references);
        self
    }

    /// Shares a server-wide type tree instead of the private one.
    #[must_use]
    pub fn with_type_tree(mut self, types: SharedTypeTree) -> Self {
        self.types = types;
        self
    }

    /// Shares a server-wide monitored item id generator.
    #[must_use]
    pub fn with_item_ids(mut self, item_ids: Arc<MonitoredItemIds>) -> Self {
        self.item_ids = item_ids;
        self
    }

    /// Queues definitions to load on [`create_address_space`](Self::create_address_space).
    #[must_use]
    pub fn with_predefined_nodes(mut self, definitions: Vec<NodeDefinition>) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .pending_definitions
            .extend(definitions);
        self
    }

    /// Namespace indexes owned by this manager.
    #[must_use]
    pub fn namespaces(&self) -> &[u16] {
        &self.config.namespaces
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub const fn config(&self) -> &NodeManagerConfig {
        &self.config
    }

    /// Handle to the type tree used by this manager.
    #[must_use]
    pub fn type_tree(&self) -> SharedTypeTree {
        Arc::clone(&self.types)
    }

    pub(crate) fn lock_state(&self) -> UaResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| UaError::poisoned("node store"))
    }

    pub(crate) fn read_types(&self) -> UaResult<RwLockReadGuard<'_, TypeTree>> {
        self.types.read().map_err(|_| UaError::poisoned("type tree"))
    }

    pub(crate) fn write_types(&self) -> UaResult<RwLockWriteGuard<'_, TypeTree>> {
        self.types.write().map_err(|_| UaError::poisoned("type tree"))
    }

    pub(crate) fn owns_namespace(&self, namespace: u16) -> bool {
        self.config.namespaces.contains(&namespace)
    }

    /// Loads the queued predefined nodes.
    ///
    /// Reference halves that belong to nodes of other managers are added to
    /// `external_references`, keyed by the node that should hold them.
    pub fn create_address_space(&self, external_references: &mut ExternalReferences) -> UaResult<()> {
        let mut state = self.lock_state()?;
        let mut types = self.write_types()?;
        let definitions = std::mem::take(&mut state.pending_definitions);
        let count = definitions.len();

        let mut roots = Vec::with_capacity(count);
        for definition in definitions {
            roots.push(state.insert_tree(definition, None, self.hooks.as_ref(), &mut types, false)?);
        }

        for root in roots {
            for idx in state.arena.subtree(root) {
                let Some(node) = state.node(idx) else {
                    continue;
                };
                for reference in &node.references {
                    if state.lookup(&reference.target).is_none() {
                        external_references
                            .entry(reference.target.clone())
                            .or_default()
                            .push(reference.reversed(&node.node_id));
                    }
                }
            }
        }

        tracing::info!(
            namespaces = ?self.config.namespaces,
            roots = count,
            nodes = state.predefined.len(),
            root_notifiers = state.root_notifiers.len(),
            "address space created"
        );
        Ok(())
    }

    /// Removes every node, cached subtree and open cursor. Reference halves
    /// held by other managers are removed through the reference table.
    pub fn delete_address_space(&self) -> UaResult<()> {
        let external = {
            let mut state = self.lock_state()?;
            let mut types = self.write_types()?;
            let roots: Vec<NodeIdx> = state
                .predefined
                .values()
                .copied()
                .filter(|idx| state.node(*idx).is_some_and(|n| n.parent.is_none()))
                .collect();

            let mut external = Vec::new();
            for root in roots {
                external.extend(state.remove_tree(root, &mut types));
            }
            for entry in state.cache.clear() {
                if entry.owned {
                    state.arena.remove_subtree(entry.root);
                }
            }
            state.continuations.clear();
            state.items.clear();
            state.monitored_nodes.clear();
            state.root_notifiers.clear();
            tracing::info!(namespaces = ?self.config.namespaces, "address space deleted");
            external
        };
        self.remove_external_references(&external);
        Ok(())
    }

    /// Handle for `node_id` if this manager owns it, without materializing
    /// anything. Synthetic ids are accepted when their root is predefined,
    /// already cached, or claimed by the hooks.
    #[must_use]
    pub fn get_manager_handle(&self, node_id: &NodeId) -> Option<NodeHandle> {
        if !self.owns_namespace(node_id.namespace) {
            return None;
        }
        let state = self.state.lock().ok()?;
        state.handle_for(node_id, self.hooks.as_ref())
    }

    /// Adds a node (and its children) at runtime. A null NodeId is replaced
    /// by a fresh numeric id in the default namespace.
    pub fn create_node(
        &self,
        ctx: &OperationContext,
        parent_id: Option<&NodeId>,
        reference_type: &NodeId,
        mut definition: NodeDefinition,
    ) -> UaResult<NodeId> {
        let mut external = ExternalReferences::new();
        let node_id = {
            let mut state = self.lock_state()?;
            let mut types = self.write_types()?;
            assign_node_ids(&mut state, self.config.default_namespace(), &mut definition);

            let node_id = definition.node_id.clone();
            if !self.owns_namespace(node_id.namespace) {
                return Err(ValidationError::InvalidNodeDefinition {
                    node_id,
                    reason: "namespace not owned by this manager".to_string(),
                }
                .into());
            }

            let parent = match parent_id {
                Some(pid) => match state.find(pid) {
                    Some(idx) => Some((idx, reference_type.clone())),
                    None if self.owns_namespace(pid.namespace) => {
                        return Err(UaError::service(
                            StatusCode::BAD_PARENT_NODE_ID_INVALID,
                            format!("parent {pid} not found"),
                        ));
                    }
                    None => {
                        definition = definition.with_reference(Reference::inverse(reference_type.clone(), pid.clone()));
                        external
                            .entry(pid.clone())
                            .or_default()
                            .push(Reference::forward(reference_type.clone(), node_id.clone()));
                        None
                    }
                },
                None => None,
            };

            state.insert_tree(definition, parent, self.hooks.as_ref(), &mut types, false)?;
            tracing::info!(node_id = %node_id, user = ?ctx.user, "node created");
            node_id
        };

        if !external.is_empty() {
            if let Some(table) = &self.references {
                table.add_references(&external);
            }
        }
        Ok(node_id)
    }

    /// Deletes a predefined node and its children. Returns false if the node
    /// is not in this store.
    pub fn delete_node(&self, ctx: &OperationContext, node_id: &NodeId) -> UaResult<bool> {
        let external = {
            let mut state = self.lock_state()?;
            let Some(idx) = state.lookup(node_id) else {
                return Ok(false);
            };
            let mut types = self.write_types()?;
            let external = state.remove_tree(idx, &mut types);
            tracing::info!(node_id = %node_id, user = ?ctx.user, "node deleted");
            external
        };
        self.remove_external_references(&external);
        Ok(true)
    }

    /// Adds reference halves to local source nodes. Sources this manager does
    /// not hold are ignored.
    pub fn add_references(&self, references: &ExternalReferences) -> UaResult<()> {
        let mut state = self.lock_state()?;
        for (source, list) in references {
            let Some(idx) = state.find(source) else {
                continue;
            };
            if let Some(node) = state.arena.get_mut(idx) {
                for reference in list {
                    node.add_reference(reference.clone());
                }
            }
            let is_notifier_link = list
                .iter()
                .any(|r| !r.is_forward && r.reference_type == ids::HAS_NOTIFIER && state.lookup(&r.target).is_none());
            let subscribable = state
                .node(idx)
                .is_some_and(|n| n.event_notifier().contains(crate::attributes::EventNotifier::SUBSCRIBE_TO_EVENTS));
            if is_notifier_link && subscribable && !state.root_notifiers.contains(source) {
                state.root_notifiers.push(source.clone());
            }
        }
        Ok(())
    }

    /// Deletes one reference from `source`. With `delete_bidirectional` the
    /// opposite half is removed too, locally or through the reference table.
    pub fn delete_reference(
        &self,
        source: &NodeId,
        reference_type: &NodeId,
        is_forward: bool,
        target: &NodeId,
        delete_bidirectional: bool,
    ) -> UaResult<StatusCode> {
        let mut external = Vec::new();
        let status = {
            let mut state = self.lock_state()?;
            let Some(idx) = state.find(source) else {
                return Ok(StatusCode::BAD_NODE_ID_UNKNOWN);
            };
            let removed = state
                .arena
                .get_mut(idx)
                .is_some_and(|n| n.remove_reference(reference_type, is_forward, target));
            if !removed {
                return Ok(StatusCode::BAD_NOT_FOUND);
            }
            if delete_bidirectional {
                match state.find(target) {
                    Some(target_idx) => {
                        if let Some(t) = state.arena.get_mut(target_idx) {
                            t.remove_reference(reference_type, !is_forward, source);
                        }
                    }
                    None => external.push(ReferenceChange {
                        source: target.clone(),
                        reference: Reference {
                            reference_type: reference_type.clone(),
                            is_forward: !is_forward,
                            target: source.clone(),
                        },
                    }),
                }
            }
            if reference_type == &ids::HAS_NOTIFIER && !is_forward {
                state.root_notifiers.retain(|n| n != source);
            }
            StatusCode::GOOD
        };
        self.remove_external_references(&external);
        Ok(status)
    }

    fn remove_external_references(&self, external: &[ReferenceChange]) {
        if external.is_empty() {
            return;
        }
        match &self.references {
            Some(table) => table.remove_references(external),
            None => tracing::debug!(count = external.len(), "no reference table; external halves left in place"),
        }
    }

    /// Server-side value update. Bypasses access levels, samples every data
    /// item on the node and propagates semantic-property changes to the
    /// parent variable.
    pub fn set_value(&self, node_id: &NodeId, value: DataValue) -> UaResult<()> {
        let mut state = self.lock_state()?;
        let idx = state
            .find(node_id)
            .ok_or_else(|| UaError::service(StatusCode::BAD_NODE_ID_UNKNOWN, format!("node {node_id} not found")))?;
        let node = state
            .arena
            .get_mut(idx)
            .ok_or_else(|| UaError::internal("indexed node missing from arena"))?;
        let var = node.variable_mut().ok_or_else(|| {
            UaError::service(
                StatusCode::BAD_ATTRIBUTE_ID_INVALID,
                format!("node {node_id} is not a variable"),
            )
        })?;
        let mut value = value;
        if value.server_timestamp.is_none() {
            value.server_timestamp = Some(chrono::Utc::now());
        }
        var.value = value;

        state.notify_value_changed(idx);
        state.notify_semantics_if_property(idx);
        Ok(())
    }

    /// Installs the handler invoked by [`call`](Self::call) for a method node.
    pub fn set_method_handler(&self, method_id: &NodeId, handler: Arc<dyn MethodHandler>) -> UaResult<()> {
        let mut state = self.lock_state()?;
        if state.lookup(method_id).is_none() {
            return Err(UaError::service(
                StatusCode::BAD_NODE_ID_UNKNOWN,
                format!("method {method_id} not found"),
            ));
        }
        state.method_handlers.insert(method_id.clone(), handler);
        Ok(())
    }

    /// Marks a node as forwarding its events to a notifier owned elsewhere.
    pub fn add_root_notifier(&self, node_id: &NodeId) -> UaResult<()> {
        let mut state = self.lock_state()?;
        if state.lookup(node_id).is_none() {
            return Err(UaError::service(
                StatusCode::BAD_NODE_ID_UNKNOWN,
                format!("notifier {node_id} not found"),
            ));
        }
        if !state.root_notifiers.contains(node_id) {
            state.root_notifiers.push(node_id.clone());
        }
        Ok(())
    }

    /// Nodes that receive every event raised in this manager.
    pub fn root_notifiers(&self) -> UaResult<Vec<NodeId>> {
        Ok(self.lock_state()?.root_notifiers.clone())
    }

    /// Opens the publish-readiness channel for a subscription. Item ids are
    /// sent on it when an item first becomes publishable; a full channel
    /// drops the signal.
    pub fn register_subscription(&self, subscription_id: SubscriptionId) -> UaResult<Receiver<MonitoredItemId>> {
        let (tx, rx) = bounded(self.config.ready_signal_capacity);
        let mut state = self.lock_state()?;
        for item in state.items.values() {
            if item.subscription_id() == subscription_id {
                item.set_ready_signal(Some(tx.clone()));
            }
        }
        state.ready_signals.insert(subscription_id, tx);
        Ok(rx)
    }

    /// Drops the ready channel of a subscription; its items stop signalling.
    pub fn unregister_subscription(&self, subscription_id: SubscriptionId) -> UaResult<()> {
        let mut state = self.lock_state()?;
        state.ready_signals.remove(&subscription_id);
        for item in state.items.values() {
            if item.subscription_id() == subscription_id {
                item.set_ready_signal(None);
            }
        }
        Ok(())
    }

    /// Live monitored item by id.
    pub fn monitored_item(&self, id: MonitoredItemId) -> UaResult<Option<Arc<MonitoredItem>>> {
        Ok(self.lock_state()?.items.get(&id).cloned())
    }

    /// True while at least one item watches `node_id`.
    pub fn is_monitored(&self, node_id: &NodeId) -> UaResult<bool> {
        Ok(self.lock_state()?.monitored_nodes.contains_key(node_id))
    }

    /// Reference count of the component cache entry for `key`.
    pub fn component_cache_ref_count(&self, key: &NodeId) -> UaResult<Option<u32>> {
        Ok(self.lock_state()?.cache.ref_count(key))
    }

    /// Live nodes, predefined and materialized.
    pub fn node_count(&self) -> UaResult<usize> {
        Ok(self.lock_state()?.arena.len())
    }

    /// Copy of a live node.
    pub fn node(&self, node_id: &NodeId) -> UaResult<Option<crate::node::Node>> {
        let state = self.lock_state()?;
        Ok(state.find(node_id).and_then(|idx| state.node(idx)).cloned())
    }
}

/// Gives every null NodeId in the tree a fresh numeric id.
fn assign_node_ids(state: &mut StoreState, namespace: u16, definition: &mut NodeDefinition) {
    let mut taken: HashSet<NodeId> = HashSet::new();
    assign_recursive(state, namespace, definition, &mut taken);
}

fn assign_recursive(
    state: &mut StoreState,
    namespace: u16,
    definition: &mut NodeDefinition,
    taken: &mut HashSet<NodeId>,
) {
    if definition.node_id.is_null() {
        let mut candidate = state.next_node_id(namespace);
        while taken.contains(&candidate) {
            candidate = state.next_node_id(namespace);
        }
        definition.node_id = candidate;
    }
    taken.insert(definition.node_id.clone());
    for child in &mut definition.children {
        assign_recursive(state, namespace, child, taken);
    }
}
