//! Extension points injected into a node manager.
//!
//! Customisation that would otherwise need subclassing is supplied as trait
//! objects at construction. Every method has a permissive default.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{OperationContext, Permission};
use crate::monitor::MonitoredItem;
use crate::node::{Node, NodeDefinition, Reference};
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::value::Variant;

use super::browse::ViewDescription;
use super::component_id::ParsedNodeId;

/// Access, view and materialisation policy for one node manager.
pub trait NodeManagerHooks: Send + Sync {
    /// True if `node` belongs to `view`.
    fn is_node_in_view(&self, _ctx: &OperationContext, _view: &ViewDescription, _node: &Node) -> bool {
        true
    }

    /// True if `reference` of `source` is visible in `view`.
    fn is_reference_in_view(
        &self,
        _ctx: &OperationContext,
        _view: &ViewDescription,
        _source: &Node,
        _reference: &Reference,
    ) -> bool {
        true
    }

    /// True if the caller may see `node` at all.
    fn is_node_accessible_for_user(&self, _ctx: &OperationContext, _node: &Node) -> bool {
        true
    }

    /// Checks one permission of the context's user on `node`.
    fn has_permission(&self, _ctx: &OperationContext, _node: &Node, _permission: Permission) -> bool {
        true
    }

    /// Gives a predefined node its runtime behaviour before it is indexed.
    fn add_behaviour_to_predefined_node(&self, node: Node) -> Node {
        node
    }

    /// True if this manager can materialize the subtree rooted at `root`.
    fn owns_dynamic_root(&self, _root: &ParsedNodeId) -> bool {
        false
    }

    /// Builds the subtree rooted at `root` on demand. Child definitions
    /// must use component NodeIds derived from `root`.
    fn materialize_root(&self, _ctx: &OperationContext, _root: &ParsedNodeId) -> Option<NodeDefinition> {
        None
    }

    /// Called after a create batch, outside the store lock.
    fn on_monitored_items_created(&self, _ctx: &OperationContext, _items: &[Arc<MonitoredItem>]) {}

    /// Called after a modify batch.
    fn on_monitored_items_modified(&self, _ctx: &OperationContext, _items: &[Arc<MonitoredItem>]) {}

    /// Called after items changed monitoring mode.
    fn on_monitoring_mode_changed(&self, _ctx: &OperationContext, _items: &[Arc<MonitoredItem>]) {}

    /// Called after a delete batch.
    fn on_monitored_items_deleted(&self, _ctx: &OperationContext, _items: &[Arc<MonitoredItem>]) {}

    /// Called after items moved to another subscription.
    fn on_monitored_items_transferred(&self, _ctx: &OperationContext, _items: &[Arc<MonitoredItem>]) {}
}

/// Hooks that allow everything and materialize nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl NodeManagerHooks for DefaultHooks {}

/// Result of invoking a method.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodOutcome {
    pub status: StatusCode,
    /// Per input argument validation results. Left empty when all are good.
    pub input_argument_results: Vec<StatusCode>,
    pub output_arguments: Vec<Variant>,
}

impl MethodOutcome {
    /// Successful call with output arguments.
    #[must_use]
    pub fn ok(output_arguments: Vec<Variant>) -> Self {
        Self {
            status: StatusCode::GOOD,
            input_argument_results: Vec::new(),
            output_arguments,
        }
    }

    /// Failed call with no outputs.
    #[must_use]
    pub fn failed(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Some arguments failed validation; the call is reported as
    /// BadInvalidArgument if any entry is bad.
    #[must_use]
    pub fn with_argument_results(mut self, results: Vec<StatusCode>) -> Self {
        self.input_argument_results = results;
        self
    }
}

/// Executes a method node.
pub trait MethodHandler: Send + Sync {
    /// Runs the method. Argument validation results go into the outcome.
    fn call(&self, ctx: &OperationContext, object_id: &NodeId, input_arguments: &[Variant]) -> MethodOutcome;
}

impl<F> MethodHandler for F
where
    F: Fn(&OperationContext, &NodeId, &[Variant]) -> MethodOutcome + Send + Sync,
{
    fn call(&self, ctx: &OperationContext, object_id: &NodeId, input_arguments: &[Variant]) -> MethodOutcome {
        self(ctx, object_id, input_arguments)
    }
}

/// Reference halves owned by other node managers, keyed by the node that
/// owns them.
pub type ExternalReferences = HashMap<NodeId, Vec<Reference>>;

/// One reference half to remove from another manager.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceChange {
    /// Node (owned elsewhere) holding the reference.
    pub source: NodeId,
    pub reference: Reference,
}

/// Server-wide router for references that cross node managers. Called
/// without the store lock held.
pub trait ReferenceTable: Send + Sync {
    /// Adds reference halves to nodes of other managers.
    fn add_references(&self, references: &ExternalReferences);
    /// Removes reference halves from nodes of other managers.
    fn remove_references(&self, references: &[ReferenceChange]);
}
