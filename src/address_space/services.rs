//! Attribute, history and method services.
//!
//! Every batch runs in two passes. The first pass claims the items this
//! manager owns (setting `processed`) and serves those whose nodes are
//! already indexed; the second pass resolves the deferred component handles,
//! materializing subtrees as needed, and serves the rest. Items owned by
//! other managers are left untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::attributes::{AccessLevel, AttributeId, EventNotifier};
use crate::context::{DiagnosticInfo, OperationContext, Permission};
use crate::error::{check_len, UaResult};
use crate::node::{NodeBody, VariableKind};
use crate::node_id::{browse_names, ids, NodeId, QualifiedName};
use crate::status::StatusCode;
use crate::value::{DataValue, IndexRange, TimestampsToReturn, Variant};

use super::arena::NodeIdx;
use super::handle::{NodeHandle, ValidationScope};
use super::hooks::{MethodHandler, MethodOutcome};
use super::store::StoreState;
use super::type_tree::TypeTree;
use super::NodeManager;

/// One attribute to read.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub index_range: Option<String>,
    pub data_encoding: Option<QualifiedName>,
    /// Set by the manager that claimed the item.
    pub processed: bool,
}

impl ReadValueId {
    /// Reads `attribute_id` of `node_id`.
    #[must_use]
    pub const fn new(node_id: NodeId, attribute_id: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id,
            index_range: None,
            data_encoding: None,
            processed: false,
        }
    }

    /// Reads the Value attribute.
    #[must_use]
    pub fn value(node_id: NodeId) -> Self {
        Self::new(node_id, AttributeId::Value)
    }

    /// Restricts the operation to part of an array or string value.
    #[must_use]
    pub fn with_index_range(mut self, range: impl Into<String>) -> Self {
        self.index_range = Some(range.into());
        self
    }
}

/// One attribute to write.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub index_range: Option<String>,
    pub value: DataValue,
    pub processed: bool,
}

impl WriteValue {
    /// Writes `value` to `attribute_id` of `node_id`.
    #[must_use]
    pub const fn new(node_id: NodeId, attribute_id: AttributeId, value: DataValue) -> Self {
        Self {
            node_id,
            attribute_id,
            index_range: None,
            value,
            processed: false,
        }
    }

    /// Writes the Value attribute.
    #[must_use]
    pub fn value(node_id: NodeId, value: impl Into<Variant>) -> Self {
        Self::new(node_id, AttributeId::Value, DataValue::new(value))
    }

    /// Restricts the write to part of an array or byte string value.
    #[must_use]
    pub fn with_index_range(mut self, range: impl Into<String>) -> Self {
        self.index_range = Some(range.into());
        self
    }
}

/// Kind of history read requested.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryReadDetails {
    Raw {
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        num_values_per_node: u32,
        return_bounds: bool,
    },
    Processed {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        aggregate_types: Vec<NodeId>,
        processing_interval: f64,
    },
    AtTime {
        req_times: Vec<DateTime<Utc>>,
    },
    Events {
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        num_values_per_node: u32,
    },
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryReadValueId {
    pub node_id: NodeId,
    pub index_range: Option<String>,
    pub continuation_point: Option<Vec<u8>>,
    pub processed: bool,
}

impl HistoryReadValueId {
    /// Reads the history of `node_id`.
    #[must_use]
    pub const fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            index_range: None,
            continuation_point: None,
            processed: false,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryReadResult {
    pub status: StatusCode,
    pub continuation_point: Option<Vec<u8>>,
    pub history_data: Vec<DataValue>,
}

/// Kind of history update requested, with its target node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryUpdateDetails {
    UpdateData { node_id: NodeId, values: Vec<DataValue> },
    UpdateStructureData { node_id: NodeId, values: Vec<DataValue> },
    UpdateEvent { node_id: NodeId },
    DeleteRawModified { node_id: NodeId, start_time: DateTime<Utc>, end_time: DateTime<Utc> },
    DeleteAtTime { node_id: NodeId, req_times: Vec<DateTime<Utc>> },
    DeleteEvent { node_id: NodeId, event_ids: Vec<Vec<u8>> },
}

impl HistoryUpdateDetails {
    /// Node whose history is updated.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        match self {
            Self::UpdateData { node_id, .. }
            | Self::UpdateStructureData { node_id, .. }
            | Self::UpdateEvent { node_id }
            | Self::DeleteRawModified { node_id, .. }
            | Self::DeleteAtTime { node_id, .. }
            | Self::DeleteEvent { node_id, .. } => node_id,
        }
    }

    const fn touches_events(&self) -> bool {
        matches!(self, Self::UpdateEvent { .. } | Self::DeleteEvent { .. })
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryUpdateRequest {
    pub details: HistoryUpdateDetails,
    pub processed: bool,
}

impl HistoryUpdateRequest {
    /// Wraps one history update.
    #[must_use]
    pub const fn new(details: HistoryUpdateDetails) -> Self {
        Self {
            details,
            processed: false,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryUpdateResult {
    pub status: StatusCode,
    pub operation_results: Vec<StatusCode>,
}

/// One method invocation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct CallMethodRequest {
    pub object_id: NodeId,
    pub method_id: NodeId,
    pub input_arguments: Vec<Variant>,
    pub processed: bool,
}

impl CallMethodRequest {
    /// Calls `method_id` on `object_id`.
    #[must_use]
    pub const fn new(object_id: NodeId, method_id: NodeId, input_arguments: Vec<Variant>) -> Self {
        Self {
            object_id,
            method_id,
            input_arguments,
            processed: false,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallMethodResult {
    pub status: StatusCode,
    pub input_argument_results: Vec<StatusCode>,
    pub input_argument_diagnostics: Vec<Option<DiagnosticInfo>>,
    pub output_arguments: Vec<Variant>,
}

/// Splits a batch into items served now and handles deferred to pass two.
fn claim<T>(
    manager: &NodeManager,
    state: &StoreState,
    items: &mut [T],
    node_id: impl Fn(&T) -> &NodeId,
    processed: impl Fn(&mut T) -> &mut bool,
) -> (Vec<(usize, NodeIdx)>, Vec<NodeHandle>) {
    let mut ready = Vec::new();
    let mut deferred = Vec::new();
    for (i, item) in items.iter_mut().enumerate() {
        if *processed(item) {
            continue;
        }
        let id = node_id(item);
        if !manager.owns_namespace(id.namespace) {
            continue;
        }
        let Some(handle) = state.handle_for(id, manager.hooks.as_ref()) else {
            continue;
        };
        *processed(item) = true;
        match handle.node {
            Some(idx) if handle.validated => ready.push((i, idx)),
            _ => deferred.push(handle.with_index(i)),
        }
    }
    (ready, deferred)
}

fn parse_range(range: Option<&String>) -> Result<Option<IndexRange>, StatusCode> {
    match range {
        Some(r) => IndexRange::parse(r),
        None => Ok(None),
    }
}

impl NodeManager {
    /// Resolves deferred handles of a batch. Unresolvable items get
    /// `BadNodeIdUnknown` through `on_missing`.
    fn resolve_deferred(
        &self,
        ctx: &OperationContext,
        state: &mut StoreState,
        types: &mut TypeTree,
        scope: &mut ValidationScope,
        deferred: Vec<NodeHandle>,
        mut on_missing: impl FnMut(usize),
    ) -> Vec<(usize, NodeIdx)> {
        let mut resolved = Vec::with_capacity(deferred.len());
        for mut handle in deferred {
            match state.validate_handle(&mut handle, ctx, self.hooks.as_ref(), types, scope) {
                Some(idx) => resolved.push((handle.index, idx)),
                None => on_missing(handle.index),
            }
        }
        resolved
    }

    /// Reads attributes. `values` and `errors` must be as long as `nodes`.
    pub fn read(
        &self,
        ctx: &OperationContext,
        timestamps: TimestampsToReturn,
        nodes: &mut [ReadValueId],
        values: &mut [DataValue],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("values", nodes.len(), values.len())?;
        check_len("errors", nodes.len(), errors.len())?;

        let mut state = self.lock_state()?;
        let mut types = self.write_types()?;
        let (ready, deferred) = claim(self, &state, nodes, |n| &n.node_id, |n| &mut n.processed);

        let mut scope = ValidationScope::default();
        let resolved = self.resolve_deferred(ctx, &mut state, &mut types, &mut scope, deferred, |i| {
            values[i] = DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN);
            errors[i] = StatusCode::BAD_NODE_ID_UNKNOWN;
        });

        for (i, idx) in ready.into_iter().chain(resolved) {
            let (value, status) = self.read_one(ctx, &state, idx, &nodes[i], timestamps);
            values[i] = value;
            errors[i] = status;
        }
        state.end_scope(scope);
        Ok(())
    }

    fn read_one(
        &self,
        ctx: &OperationContext,
        state: &StoreState,
        idx: NodeIdx,
        item: &ReadValueId,
        timestamps: TimestampsToReturn,
    ) -> (DataValue, StatusCode) {
        let fail = |s: StatusCode| (DataValue::from_status(s), s);
        let Some(node) = state.node(idx) else {
            return fail(StatusCode::BAD_NODE_ID_UNKNOWN);
        };
        if !self.hooks.is_node_accessible_for_user(ctx, node) {
            return fail(StatusCode::BAD_NODE_ID_UNKNOWN);
        }
        if !self.hooks.has_permission(ctx, node, Permission::Read) {
            return fail(StatusCode::BAD_USER_ACCESS_DENIED);
        }
        if item.attribute_id == AttributeId::Value {
            if let Some(var) = node.variable() {
                if var.access_level.contains(AccessLevel::CURRENT_READ)
                    && !var.user_access_level.contains(AccessLevel::CURRENT_READ)
                {
                    return fail(StatusCode::BAD_USER_ACCESS_DENIED);
                }
            }
        }
        let range = match parse_range(item.index_range.as_ref()) {
            Ok(r) => r,
            Err(s) => return fail(s),
        };
        match node.read_attribute(item.attribute_id, range.as_ref(), item.data_encoding.as_ref()) {
            Ok(mut value) => {
                value.apply_timestamps(timestamps);
                (value, StatusCode::GOOD)
            }
            Err(s) => fail(s),
        }
    }

    /// Writes attributes. `errors` must be as long as `nodes`.
    pub fn write(&self, ctx: &OperationContext, nodes: &mut [WriteValue], errors: &mut [StatusCode]) -> UaResult<()> {
        check_len("errors", nodes.len(), errors.len())?;

        let mut state = self.lock_state()?;
        let mut types = self.write_types()?;
        let (ready, deferred) = claim(self, &state, nodes, |n| &n.node_id, |n| &mut n.processed);

        let mut scope = ValidationScope::default();
        let resolved = self.resolve_deferred(ctx, &mut state, &mut types, &mut scope, deferred, |i| {
            errors[i] = StatusCode::BAD_NODE_ID_UNKNOWN;
        });

        for (i, idx) in ready.into_iter().chain(resolved) {
            errors[i] = self.write_one(ctx, &mut state, &types, idx, &nodes[i]);
        }
        state.end_scope(scope);
        Ok(())
    }

    fn write_one(
        &self,
        ctx: &OperationContext,
        state: &mut StoreState,
        types: &TypeTree,
        idx: NodeIdx,
        item: &WriteValue,
    ) -> StatusCode {
        let Some(node) = state.node(idx) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        if !self.hooks.is_node_accessible_for_user(ctx, node) {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        }
        if !self.hooks.has_permission(ctx, node, Permission::Write) {
            return StatusCode::BAD_USER_ACCESS_DENIED;
        }
        let range = match parse_range(item.index_range.as_ref()) {
            Ok(r) => r,
            Err(s) => return s,
        };
        if range.is_some() && item.attribute_id != AttributeId::Value {
            return StatusCode::BAD_WRITE_NOT_SUPPORTED;
        }
        if item.attribute_id == AttributeId::Value {
            if let Some(var) = node.variable() {
                if var.access_level.contains(AccessLevel::CURRENT_WRITE)
                    && !var.user_access_level.contains(AccessLevel::CURRENT_WRITE)
                {
                    return StatusCode::BAD_USER_ACCESS_DENIED;
                }
                if var.kind == VariableKind::AnalogItem {
                    if let Some(status) = self.check_instrument_range(state, idx, &item.value.value) {
                        return status;
                    }
                }
            }
        }

        let Some(node) = state.arena.get_mut(idx) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        if let Err(status) = node.write_attribute(item.attribute_id, range.as_ref(), &item.value, types) {
            tracing::debug!(node_id = %item.node_id, attribute = ?item.attribute_id, status = %status, "write rejected");
            return status;
        }

        state.notify_value_changed(idx);
        if item.attribute_id == AttributeId::Value {
            state.notify_semantics_if_property(idx);
        }
        StatusCode::GOOD
    }

    /// `BadOutOfRange` if a numeric element falls outside the InstrumentRange
    /// property. Values that cannot be converted are not checked.
    fn check_instrument_range(&self, state: &StoreState, idx: NodeIdx, value: &Variant) -> Option<StatusCode> {
        let range = state
            .property_value(idx, browse_names::INSTRUMENT_RANGE)
            .and_then(|v| v.as_range())?;
        let elements: Vec<&Variant> = match value.as_array() {
            Some(items) => items.iter().collect(),
            None => vec![value],
        };
        let out_of_range = elements
            .into_iter()
            .filter_map(Variant::as_f64)
            .any(|v| !range.contains(v));
        out_of_range.then_some(StatusCode::BAD_OUT_OF_RANGE)
    }

    /// Reads history. No history backend is attached to the store, so
    /// readable nodes report `BadHistoryOperationUnsupported`.
    pub fn history_read(
        &self,
        ctx: &OperationContext,
        details: &HistoryReadDetails,
        nodes: &mut [HistoryReadValueId],
        results: &mut [HistoryReadResult],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("results", nodes.len(), results.len())?;
        check_len("errors", nodes.len(), errors.len())?;
        let wants_events = matches!(details, HistoryReadDetails::Events { .. });

        let mut state = self.lock_state()?;
        let mut types = self.write_types()?;
        let (ready, deferred) = claim(self, &state, nodes, |n| &n.node_id, |n| &mut n.processed);
        let mut scope = ValidationScope::default();
        let resolved = self.resolve_deferred(ctx, &mut state, &mut types, &mut scope, deferred, |i| {
            errors[i] = StatusCode::BAD_NODE_ID_UNKNOWN;
        });

        for (i, idx) in ready.into_iter().chain(resolved) {
            let status = match state.node(idx) {
                None => StatusCode::BAD_NODE_ID_UNKNOWN,
                Some(node) if !self.hooks.is_node_accessible_for_user(ctx, node) => StatusCode::BAD_NODE_ID_UNKNOWN,
                Some(node) if !self.hooks.has_permission(ctx, node, Permission::ReadHistory) => {
                    StatusCode::BAD_USER_ACCESS_DENIED
                }
                Some(node) => history_status(&node.body, wants_events, false),
            };
            results[i] = HistoryReadResult {
                status,
                ..HistoryReadResult::default()
            };
            errors[i] = status;
        }
        state.end_scope(scope);
        Ok(())
    }

    /// Updates history. Same gating as [`history_read`](Self::history_read).
    pub fn history_update(
        &self,
        ctx: &OperationContext,
        requests: &mut [HistoryUpdateRequest],
        results: &mut [HistoryUpdateResult],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("results", requests.len(), results.len())?;
        check_len("errors", requests.len(), errors.len())?;

        let mut state = self.lock_state()?;
        let mut types = self.write_types()?;
        let (ready, deferred) = claim(
            self,
            &state,
            requests,
            |r| r.details.node_id(),
            |r| &mut r.processed,
        );
        let mut scope = ValidationScope::default();
        let resolved = self.resolve_deferred(ctx, &mut state, &mut types, &mut scope, deferred, |i| {
            errors[i] = StatusCode::BAD_NODE_ID_UNKNOWN;
        });

        for (i, idx) in ready.into_iter().chain(resolved) {
            let events = requests[i].details.touches_events();
            let status = match state.node(idx) {
                None => StatusCode::BAD_NODE_ID_UNKNOWN,
                Some(node) if !self.hooks.is_node_accessible_for_user(ctx, node) => StatusCode::BAD_NODE_ID_UNKNOWN,
                Some(node) if !self.hooks.has_permission(ctx, node, Permission::Write) => {
                    StatusCode::BAD_USER_ACCESS_DENIED
                }
                Some(node) => history_status(&node.body, events, true),
            };
            results[i] = HistoryUpdateResult {
                status,
                operation_results: Vec::new(),
            };
            errors[i] = status;
        }
        state.end_scope(scope);
        Ok(())
    }

    /// Invokes methods. Handlers run after the store lock is released, so
    /// they may call back into the manager.
    pub fn call(
        &self,
        ctx: &OperationContext,
        methods: &mut [CallMethodRequest],
        results: &mut [CallMethodResult],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("results", methods.len(), results.len())?;
        check_len("errors", methods.len(), errors.len())?;

        let mut invocations: Vec<(usize, Arc<dyn MethodHandler>)> = Vec::new();
        {
            let mut state = self.lock_state()?;
            let mut types = self.write_types()?;
            let (ready, deferred) = claim(self, &state, methods, |m| &m.method_id, |m| &mut m.processed);
            let mut scope = ValidationScope::default();
            let resolved = self.resolve_deferred(ctx, &mut state, &mut types, &mut scope, deferred, |i| {
                errors[i] = StatusCode::BAD_METHOD_INVALID;
            });

            for (i, idx) in ready.into_iter().chain(resolved) {
                match self.check_method(ctx, &state, idx, &methods[i]) {
                    Ok(handler) => invocations.push((i, handler)),
                    Err(status) => {
                        results[i] = CallMethodResult {
                            status,
                            ..CallMethodResult::default()
                        };
                        errors[i] = status;
                    }
                }
            }
            state.end_scope(scope);
        }

        for (i, handler) in invocations {
            let request = &methods[i];
            let outcome = handler.call(ctx, &request.object_id, &request.input_arguments);
            let result = finish_call(ctx, outcome);
            tracing::debug!(method = %request.method_id, status = %result.status, "method called");
            errors[i] = result.status;
            results[i] = result;
        }
        Ok(())
    }

    fn check_method(
        &self,
        ctx: &OperationContext,
        state: &StoreState,
        idx: NodeIdx,
        request: &CallMethodRequest,
    ) -> Result<Arc<dyn MethodHandler>, StatusCode> {
        let method = state.node(idx).ok_or(StatusCode::BAD_METHOD_INVALID)?;
        let NodeBody::Method {
            executable,
            user_executable,
        } = method.body
        else {
            return Err(StatusCode::BAD_METHOD_INVALID);
        };

        // The method is either a child of the object or linked to it by a
        // HasComponent reference on either side.
        let is_child = method
            .parent
            .and_then(|p| state.node(p))
            .is_some_and(|p| p.node_id == request.object_id);
        let linked_from_method = method.references.iter().any(|r| {
            !r.is_forward && r.reference_type == ids::HAS_COMPONENT && r.target == request.object_id
        });
        let linked_from_object = state
            .find(&request.object_id)
            .and_then(|o| state.node(o))
            .is_some_and(|o| {
                o.references.iter().any(|r| {
                    r.is_forward && r.reference_type == ids::HAS_COMPONENT && r.target == method.node_id
                })
            });
        if !(is_child || linked_from_method || linked_from_object) {
            return Err(StatusCode::BAD_METHOD_INVALID);
        }

        if !self.hooks.is_node_accessible_for_user(ctx, method) {
            return Err(StatusCode::BAD_METHOD_INVALID);
        }
        if !self.hooks.has_permission(ctx, method, Permission::Call) {
            return Err(StatusCode::BAD_USER_ACCESS_DENIED);
        }
        if !executable {
            return Err(StatusCode::BAD_NOT_EXECUTABLE);
        }
        if !user_executable {
            return Err(StatusCode::BAD_USER_ACCESS_DENIED);
        }
        state
            .method_handlers
            .get(&method.node_id)
            .cloned()
            .ok_or(StatusCode::BAD_NOT_IMPLEMENTED)
    }
}

/// Status for a history operation on a node of the given class.
fn history_status(body: &NodeBody, events: bool, update: bool) -> StatusCode {
    let (var_bit, notifier_bit) = if update {
        (AccessLevel::HISTORY_WRITE, EventNotifier::HISTORY_WRITE)
    } else {
        (AccessLevel::HISTORY_READ, EventNotifier::HISTORY_READ)
    };
    let denied = if update {
        StatusCode::BAD_NOT_WRITABLE
    } else {
        StatusCode::BAD_NOT_READABLE
    };
    let allowed = match body {
        NodeBody::Variable(var) if !events => var.access_level.contains(var_bit),
        NodeBody::Object { event_notifier } | NodeBody::View { event_notifier, .. } if events => {
            event_notifier.contains(notifier_bit)
        }
        _ => return StatusCode::BAD_HISTORY_OPERATION_INVALID,
    };
    if allowed {
        StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED
    } else {
        denied
    }
}

fn finish_call(ctx: &OperationContext, outcome: MethodOutcome) -> CallMethodResult {
    let any_bad_argument = outcome.input_argument_results.iter().any(|s| s.is_bad());
    let status = if outcome.status.is_bad() {
        outcome.status
    } else if any_bad_argument {
        StatusCode::BAD_INVALID_ARGUMENT
    } else {
        outcome.status
    };

    let (input_argument_results, input_argument_diagnostics) = if any_bad_argument {
        let diagnostics: Vec<_> = outcome
            .input_argument_results
            .iter()
            .map(|s| ctx.diagnostic_for(*s))
            .collect();
        (outcome.input_argument_results, diagnostics)
    } else {
        // All good: argument results and diagnostics are dropped.
        (Vec::new(), Vec::new())
    };

    CallMethodResult {
        status,
        input_argument_results,
        input_argument_diagnostics,
        output_arguments: if status.is_bad() {
            Vec::new()
        } else {
            outcome.output_arguments
        },
    }
}
