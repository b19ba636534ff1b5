//! Monitored item lifecycle on the node manager.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::address_space::{ManagerHandle, NodeIdx, NodeManager, StoreState, TypeTree, ValidationScope};
use crate::attributes::{AttributeId, EventNotifier, MonitoringMode};
use crate::context::{OperationContext, Permission};
use crate::error::{check_len, UaResult};
use crate::node::Node;
use crate::node_id::{browse_names, NodeId, QualifiedName};
use crate::status::StatusCode;
use crate::value::{DataValue, IndexRange, TimestampsToReturn};

use super::aggregate::{AggregateCalculator, CalculatorSpec};
use super::events::{EventFilter, SimpleAttributeOperand};
use super::filter::{DeadbandType, MonitoringFilter, MonitoringFilterResult};
use super::item::{EventSupport, ItemSettings, MonitoredItem, MonitoredItemId, MonitoredItemInit, SubscriptionId};
use super::monitored_node::{sample_into, MonitoredNode};

/// Client-requested monitoring parameters.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringParameters {
    pub client_handle: u32,
    /// Milliseconds; negative means "use the publishing interval".
    pub sampling_interval: f64,
    pub filter: MonitoringFilter,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl MonitoringParameters {
    /// Parameters with no filter and discard-oldest overflow.
    #[must_use]
    pub fn new(client_handle: u32, sampling_interval: f64, queue_size: u32) -> Self {
        Self {
            client_handle,
            sampling_interval,
            filter: MonitoringFilter::None,
            queue_size,
            discard_oldest: true,
        }
    }

    /// Attaches a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: MonitoringFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Chooses the overflow policy.
    #[must_use]
    pub const fn with_discard_oldest(mut self, discard_oldest: bool) -> Self {
        self.discard_oldest = discard_oldest;
        self
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub index_range: Option<String>,
    pub data_encoding: Option<QualifiedName>,
    pub monitoring_mode: MonitoringMode,
    pub requested: MonitoringParameters,
    pub processed: bool,
}

impl MonitoredItemCreateRequest {
    /// A Reporting request for `attribute_id` of `node_id`.
    #[must_use]
    pub const fn new(node_id: NodeId, attribute_id: AttributeId, requested: MonitoringParameters) -> Self {
        Self {
            node_id,
            attribute_id,
            index_range: None,
            data_encoding: None,
            monitoring_mode: MonitoringMode::Reporting,
            requested,
            processed: false,
        }
    }

    /// Watches the Value attribute.
    #[must_use]
    pub const fn value(node_id: NodeId, requested: MonitoringParameters) -> Self {
        Self::new(node_id, AttributeId::Value, requested)
    }

    /// Watches events raised by (or through) a notifier.
    #[must_use]
    pub const fn events(node_id: NodeId, requested: MonitoringParameters) -> Self {
        Self::new(node_id, AttributeId::EventNotifier, requested)
    }

    /// Sets the initial monitoring mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }

    /// Monitors only part of an array or string value.
    #[must_use]
    pub fn with_index_range(mut self, range: impl Into<String>) -> Self {
        self.index_range = Some(range.into());
        self
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemCreateResult {
    pub status: StatusCode,
    pub monitored_item_id: MonitoredItemId,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
    pub filter_result: Option<MonitoringFilterResult>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemModifyRequest {
    pub monitored_item_id: MonitoredItemId,
    pub requested: MonitoringParameters,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemModifyResult {
    pub status: StatusCode,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
    pub filter_result: Option<MonitoringFilterResult>,
}

/// Validated and clamped parameters for one item.
struct Revised {
    settings: ItemSettings,
    calculator: Option<Box<dyn AggregateCalculator>>,
    filter_result: Option<MonitoringFilterResult>,
}

type Rejection = (StatusCode, Option<MonitoringFilterResult>);

/// Select clauses used when an event item is created without a filter.
fn default_event_filter() -> EventFilter {
    EventFilter {
        select_clauses: ["EventId", "EventType", "SourceNode", "SourceName", "Time", "Message", "Severity"]
            .into_iter()
            .map(SimpleAttributeOperand::field)
            .collect(),
        ..EventFilter::default()
    }
}

impl NodeManager {
    /// Creates monitored items for the items of the batch this manager owns.
    ///
    /// `results` and `monitored_items` must be as long as `items`. Unclaimed
    /// entries are left for other managers.
    #[allow(clippy::too_many_arguments)]
    pub fn create_monitored_items(
        &self,
        ctx: &OperationContext,
        subscription_id: SubscriptionId,
        publishing_interval: f64,
        timestamps: TimestampsToReturn,
        items: &mut [MonitoredItemCreateRequest],
        results: &mut [MonitoredItemCreateResult],
        monitored_items: &mut [Option<Arc<MonitoredItem>>],
    ) -> UaResult<()> {
        check_len("results", items.len(), results.len())?;
        check_len("monitored_items", items.len(), monitored_items.len())?;

        let mut created = Vec::new();
        {
            let mut state = self.lock_state()?;
            let mut types = self.write_types()?;
            let mut scope = ValidationScope::default();

            let mut handles = Vec::new();
            for (i, request) in items.iter_mut().enumerate() {
                if request.processed || !self.owns_namespace(request.node_id.namespace) {
                    continue;
                }
                if let Some(handle) = state.handle_for(&request.node_id, self.hooks.as_ref()) {
                    request.processed = true;
                    handles.push(handle.with_index(i));
                }
            }
            // Indexed nodes first, then the deferred component handles.
            handles.sort_by_key(|h| !h.is_validated());

            for mut handle in handles {
                let i = handle.index;
                let Some(idx) = state.validate_handle(&mut handle, ctx, self.hooks.as_ref(), &mut types, &mut scope)
                else {
                    results[i] = MonitoredItemCreateResult {
                        status: StatusCode::BAD_NODE_ID_UNKNOWN,
                        ..MonitoredItemCreateResult::default()
                    };
                    continue;
                };
                let owned = scope
                    .transient_roots
                    .contains(&state.arena.hierarchy_root(idx));
                match self.create_one(
                    ctx,
                    &mut state,
                    &types,
                    idx,
                    (&handle).into(),
                    &handle,
                    owned,
                    subscription_id,
                    publishing_interval,
                    timestamps,
                    &items[i],
                ) {
                    Ok((result, item)) => {
                        results[i] = result;
                        monitored_items[i] = Some(Arc::clone(&item));
                        created.push(item);
                    }
                    Err((status, filter_result)) => {
                        tracing::debug!(node_id = %items[i].node_id, status = %status, "monitored item rejected");
                        results[i] = MonitoredItemCreateResult {
                            status,
                            filter_result,
                            ..MonitoredItemCreateResult::default()
                        };
                    }
                }
            }
            state.end_scope(scope);
        }

        if !created.is_empty() {
            tracing::debug!(subscription_id, count = created.len(), "monitored items created");
            self.hooks.on_monitored_items_created(ctx, &created);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_one(
        &self,
        ctx: &OperationContext,
        state: &mut StoreState,
        types: &TypeTree,
        idx: NodeIdx,
        manager_handle: ManagerHandle,
        handle: &crate::address_space::NodeHandle,
        owned: bool,
        subscription_id: SubscriptionId,
        publishing_interval: f64,
        timestamps: TimestampsToReturn,
        request: &MonitoredItemCreateRequest,
    ) -> Result<(MonitoredItemCreateResult, Arc<MonitoredItem>), Rejection> {
        let node = state.node(idx).ok_or((StatusCode::BAD_NODE_ID_UNKNOWN, None))?;
        if !self.hooks.is_node_accessible_for_user(ctx, node) {
            return Err((StatusCode::BAD_NODE_ID_UNKNOWN, None));
        }
        if !request.attribute_id.is_valid_for(node.node_class()) {
            return Err((StatusCode::BAD_ATTRIBUTE_ID_INVALID, None));
        }
        let index_range = match &request.index_range {
            Some(r) => IndexRange::parse(r).map_err(|s| (s, None))?,
            None => None,
        };

        let is_event = request.attribute_id == AttributeId::EventNotifier;
        if is_event {
            if !node.event_notifier().contains(EventNotifier::SUBSCRIBE_TO_EVENTS) {
                return Err((StatusCode::BAD_NOT_SUPPORTED, None));
            }
            if !self.hooks.has_permission(ctx, node, Permission::ReceiveEvents) {
                return Err((StatusCode::BAD_USER_ACCESS_DENIED, None));
            }
        } else if !self.hooks.has_permission(ctx, node, Permission::Read) {
            return Err((StatusCode::BAD_USER_ACCESS_DENIED, None));
        }

        let revised = self.revise(state, types, idx, request.attribute_id, &request.requested, publishing_interval)?;

        // Initial read. Only attribute and encoding errors are fatal.
        let initial = if is_event {
            None
        } else {
            match node.read_attribute(request.attribute_id, index_range.as_ref(), request.data_encoding.as_ref()) {
                Ok(v) => Some((v, None)),
                Err(s)
                    if s == StatusCode::BAD_ATTRIBUTE_ID_INVALID
                        || s == StatusCode::BAD_DATA_ENCODING_INVALID
                        || s == StatusCode::BAD_DATA_ENCODING_UNSUPPORTED =>
                {
                    return Err((s, None));
                }
                Err(s) => {
                    tracing::warn!(node_id = %node.node_id, status = %s, "initial read failed, queuing bad value");
                    Some((DataValue::from_status(s), Some(s)))
                }
            }
        };

        let event_support = is_event.then(|| EventSupport {
            evaluator: Arc::clone(&self.event_filter),
            translator: Arc::clone(&self.translator),
            preferred_locales: ctx.preferred_locales.clone(),
        });
        let id = self.item_ids.next();
        let result = MonitoredItemCreateResult {
            status: StatusCode::GOOD,
            monitored_item_id: id,
            revised_sampling_interval: revised.settings.sampling_interval,
            revised_queue_size: revised.settings.queue_size,
            filter_result: revised.filter_result,
        };
        let item = Arc::new(MonitoredItem::new(MonitoredItemInit {
            id,
            subscription_id,
            session_id: ctx.session_id,
            handle: manager_handle,
            attribute_id: request.attribute_id,
            index_range,
            data_encoding: request.data_encoding.clone(),
            timestamps,
            diagnostics: ctx.diagnostics_mask,
            mode: request.monitoring_mode,
            settings: revised.settings,
            calculator: revised.calculator,
            event_support,
            max_notifications_per_publish: self.config.max_notifications_per_publish,
            ready_tx: state.ready_signals.get(&subscription_id).cloned(),
        }));

        if let Some((value, error)) = initial {
            item.queue_value(&value, error, true);
        }

        let node_id = node.node_id.clone();
        state.cache.add(&state.arena, handle, idx, owned);
        state
            .monitored_nodes
            .entry(node_id.clone())
            .or_insert_with(|| MonitoredNode::new(idx))
            .add(Arc::clone(&item));
        state.items.insert(id, Arc::clone(&item));
        tracing::debug!(item_id = id, node_id = %node_id, attribute = ?request.attribute_id, "monitored item created");
        Ok((result, item))
    }

    /// Validates the filter and clamps sampling and queue parameters.
    fn revise(
        &self,
        state: &StoreState,
        types: &TypeTree,
        idx: NodeIdx,
        attribute_id: AttributeId,
        requested: &MonitoringParameters,
        publishing_interval: f64,
    ) -> Result<Revised, Rejection> {
        let node = state.node(idx).ok_or((StatusCode::BAD_NODE_ID_UNKNOWN, None))?;
        let sampling_interval = self.revise_sampling_interval(node, requested.sampling_interval, publishing_interval);
        let queue_size = requested.queue_size.clamp(1, self.config.max_queue_size);

        let mut settings = ItemSettings {
            client_handle: requested.client_handle,
            sampling_interval,
            queue_size,
            discard_oldest: requested.discard_oldest,
            filter: MonitoringFilter::None,
            range: 0.0,
        };

        if attribute_id == AttributeId::EventNotifier {
            let filter = match &requested.filter {
                MonitoringFilter::None => default_event_filter(),
                MonitoringFilter::Event(f) => f.clone(),
                MonitoringFilter::Unsupported { .. } => {
                    return Err((StatusCode::BAD_MONITORED_ITEM_FILTER_UNSUPPORTED, None));
                }
                _ => return Err((StatusCode::BAD_FILTER_NOT_ALLOWED, None)),
            };
            let result = self.event_filter.validate(&filter);
            if !result.is_good() {
                return Err((
                    StatusCode::BAD_EVENT_FILTER_INVALID,
                    Some(MonitoringFilterResult::Event(result)),
                ));
            }
            settings.sampling_interval = 0.0;
            settings.filter = MonitoringFilter::Event(filter);
            return Ok(Revised {
                settings,
                calculator: None,
                filter_result: Some(MonitoringFilterResult::Event(result)),
            });
        }

        if requested.filter.is_none() {
            return Ok(Revised {
                settings,
                calculator: None,
                filter_result: None,
            });
        }
        if attribute_id != AttributeId::Value {
            return Err((StatusCode::BAD_FILTER_NOT_ALLOWED, None));
        }
        let var = node.variable().ok_or((StatusCode::BAD_FILTER_NOT_ALLOWED, None))?;

        match &requested.filter {
            MonitoringFilter::DataChange(f) => {
                f.validate().map_err(|s| (s, None))?;
                if f.deadband_type != DeadbandType::None && !types.is_numeric(&var.data_type) {
                    return Err((StatusCode::BAD_FILTER_NOT_ALLOWED, None));
                }
                if f.deadband_type == DeadbandType::Percent {
                    let range = state
                        .property_value(idx, browse_names::EU_RANGE)
                        .and_then(|v| v.as_range())
                        .ok_or((StatusCode::BAD_FILTER_NOT_ALLOWED, None))?;
                    settings.range = range.span();
                }
                settings.filter = MonitoringFilter::DataChange(*f);
                Ok(Revised {
                    settings,
                    calculator: None,
                    filter_result: None,
                })
            }
            MonitoringFilter::Aggregate(f) => {
                let manager = self
                    .aggregates
                    .as_ref()
                    .ok_or((StatusCode::BAD_AGGREGATE_NOT_SUPPORTED, None))?;
                if !manager.is_supported(&f.aggregate_type) {
                    return Err((StatusCode::BAD_AGGREGATE_NOT_SUPPORTED, None));
                }
                if !f.processing_interval.is_finite() || f.processing_interval < 0.0 {
                    return Err((StatusCode::BAD_MONITORED_ITEM_FILTER_INVALID, None));
                }

                let minimum = match manager.minimum_processing_interval() {
                    m if m > 0.0 => m,
                    _ => self.config.min_processing_interval,
                };
                let processing_interval = f.processing_interval.max(sampling_interval).max(minimum);

                // The start may not reach back further than the queue can hold.
                let span_ms = processing_interval * f64::from(queue_size.saturating_sub(1));
                #[allow(clippy::cast_possible_truncation)]
                let earliest = Duration::try_milliseconds(span_ms as i64)
                    .and_then(|span| Utc::now().checked_sub_signed(span))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let start_time = f.start_time.max(earliest);

                let configuration = if f.configuration.use_server_capabilities_defaults {
                    manager.default_configuration()
                } else {
                    f.configuration
                };
                let spec = CalculatorSpec {
                    aggregate_type: f.aggregate_type.clone(),
                    start_time,
                    processing_interval,
                    stepped: !var.kind.is_analog(),
                    configuration,
                };
                let calculator = manager
                    .create_calculator(&spec)
                    .ok_or((StatusCode::BAD_AGGREGATE_NOT_SUPPORTED, None))?;

                let mut revised_filter = f.clone();
                revised_filter.start_time = start_time;
                revised_filter.processing_interval = processing_interval;
                revised_filter.configuration = configuration;
                settings.filter = MonitoringFilter::Aggregate(revised_filter);
                Ok(Revised {
                    settings,
                    calculator: Some(calculator),
                    filter_result: Some(MonitoringFilterResult::Aggregate {
                        revised_start_time: start_time,
                        revised_processing_interval: processing_interval,
                        revised_configuration: configuration,
                    }),
                })
            }
            MonitoringFilter::Event(_) => Err((StatusCode::BAD_FILTER_NOT_ALLOWED, None)),
            MonitoringFilter::Unsupported { type_id } => {
                tracing::debug!(filter_type = %type_id, "unsupported monitoring filter");
                Err((StatusCode::BAD_MONITORED_ITEM_FILTER_UNSUPPORTED, None))
            }
            MonitoringFilter::None => Ok(Revised {
                settings,
                calculator: None,
                filter_result: None,
            }),
        }
    }

    fn revise_sampling_interval(&self, node: &Node, requested: f64, publishing_interval: f64) -> f64 {
        let mut interval = if requested < 0.0 { publishing_interval } else { requested };
        if let Some(var) = node.variable() {
            if interval < var.minimum_sampling_interval {
                interval = var.minimum_sampling_interval;
            }
        }
        interval.min(self.config.max_sampling_interval)
    }

    /// True if `item` was created by this manager and is still live.
    fn owns_item(state: &StoreState, item: &Arc<MonitoredItem>) -> bool {
        state.items.get(&item.id()).is_some_and(|own| Arc::ptr_eq(own, item))
    }

    /// Applies new parameters to items this manager owns. A negative
    /// requested sampling interval resolves to `publishing_interval`.
    pub fn modify_monitored_items(
        &self,
        ctx: &OperationContext,
        publishing_interval: f64,
        timestamps: TimestampsToReturn,
        items: &[Arc<MonitoredItem>],
        requests: &[MonitoredItemModifyRequest],
        results: &mut [MonitoredItemModifyResult],
    ) -> UaResult<()> {
        check_len("requests", items.len(), requests.len())?;
        check_len("results", items.len(), results.len())?;

        let mut modified = Vec::new();
        {
            let state = self.lock_state()?;
            let types = self.read_types()?;
            for (i, item) in items.iter().enumerate() {
                if !Self::owns_item(&state, item) {
                    continue;
                }
                let idx = state
                    .monitored_nodes
                    .get(item.node_id())
                    .map(|m| m.node)
                    .or_else(|| state.find(item.node_id()));
                let Some(idx) = idx else {
                    results[i].status = StatusCode::BAD_NODE_ID_UNKNOWN;
                    continue;
                };
                let requested = &requests[i].requested;
                match self.revise(&state, &types, idx, item.attribute_id(), requested, publishing_interval) {
                    Ok(revised) => {
                        results[i] = MonitoredItemModifyResult {
                            status: StatusCode::GOOD,
                            revised_sampling_interval: revised.settings.sampling_interval,
                            revised_queue_size: revised.settings.queue_size,
                            filter_result: revised.filter_result,
                        };
                        item.modify(revised.settings, timestamps, ctx.diagnostics_mask, revised.calculator);
                        modified.push(Arc::clone(item));
                    }
                    Err((status, filter_result)) => {
                        results[i] = MonitoredItemModifyResult {
                            status,
                            filter_result,
                            ..MonitoredItemModifyResult::default()
                        };
                    }
                }
            }
        }
        if !modified.is_empty() {
            self.hooks.on_monitored_items_modified(ctx, &modified);
        }
        Ok(())
    }

    /// Changes the monitoring mode of owned items. Leaving Disabled samples
    /// the node at once so the client gets a current value.
    pub fn set_monitoring_mode(
        &self,
        ctx: &OperationContext,
        mode: MonitoringMode,
        items: &[Arc<MonitoredItem>],
        processed: &mut [bool],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("processed", items.len(), processed.len())?;
        check_len("errors", items.len(), errors.len())?;

        let mut changed = Vec::new();
        {
            let state = self.lock_state()?;
            for (i, item) in items.iter().enumerate() {
                if processed[i] || !Self::owns_item(&state, item) {
                    continue;
                }
                processed[i] = true;
                errors[i] = StatusCode::GOOD;
                let previous = item.set_monitoring_mode(mode);
                if previous == mode {
                    continue;
                }
                if previous == MonitoringMode::Disabled && !item.is_event_item() {
                    if let Some(node) = state
                        .monitored_nodes
                        .get(item.node_id())
                        .and_then(|m| state.node(m.node))
                    {
                        sample_into(item, node, true);
                    }
                }
                changed.push(Arc::clone(item));
            }
        }
        if !changed.is_empty() {
            self.hooks.on_monitoring_mode_changed(ctx, &changed);
        }
        Ok(())
    }

    /// Deletes owned items, releasing their cache entries.
    pub fn delete_monitored_items(
        &self,
        ctx: &OperationContext,
        items: &[Arc<MonitoredItem>],
        processed: &mut [bool],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("processed", items.len(), processed.len())?;
        check_len("errors", items.len(), errors.len())?;

        let mut deleted = Vec::new();
        {
            let mut state = self.lock_state()?;
            for (i, item) in items.iter().enumerate() {
                if processed[i] || !Self::owns_item(&state, item) {
                    continue;
                }
                processed[i] = true;
                errors[i] = StatusCode::GOOD;
                state.detach_item(item);
                tracing::debug!(item_id = item.id(), node_id = %item.node_id(), "monitored item deleted");
                deleted.push(Arc::clone(item));
            }
        }
        if !deleted.is_empty() {
            self.hooks.on_monitored_items_deleted(ctx, &deleted);
        }
        Ok(())
    }

    /// Rebinds owned items to `subscription_id` after the subscription layer
    /// moved them. With `send_initial_values` each data item resends its
    /// current value.
    pub fn transfer_monitored_items(
        &self,
        ctx: &OperationContext,
        subscription_id: SubscriptionId,
        send_initial_values: bool,
        items: &[Arc<MonitoredItem>],
        processed: &mut [bool],
        errors: &mut [StatusCode],
    ) -> UaResult<()> {
        check_len("processed", items.len(), processed.len())?;
        check_len("errors", items.len(), errors.len())?;

        let mut transferred = Vec::new();
        {
            let state = self.lock_state()?;
            let ready_tx = state.ready_signals.get(&subscription_id).cloned();
            for (i, item) in items.iter().enumerate() {
                if processed[i] || !Self::owns_item(&state, item) {
                    continue;
                }
                processed[i] = true;
                errors[i] = StatusCode::GOOD;
                item.transfer(subscription_id, ctx.session_id, ready_tx.clone());
                if send_initial_values {
                    item.setup_resend_data_trigger();
                }
                transferred.push(Arc::clone(item));
            }
        }
        if !transferred.is_empty() {
            tracing::debug!(subscription_id, count = transferred.len(), "monitored items transferred");
            self.hooks.on_monitored_items_transferred(ctx, &transferred);
        }
        Ok(())
    }
}
