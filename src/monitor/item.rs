//! Monitored items.
//!
//! Each item guards its sampling, queue and mode state with its own mutex so
//! publishing and sampling of different items never contend. The store lock
//! is never taken while an item lock is held.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{Sender, TrySendError};
use uuid::Uuid;

use crate::address_space::ManagerHandle;
use crate::attributes::{AttributeId, MonitoringMode};
use crate::context::{DiagnosticInfo, DiagnosticsMask};
use crate::node_id::{NodeId, QualifiedName};
use crate::status::StatusCode;
use crate::value::{DataValue, IndexRange, TimestampsToReturn};

use super::aggregate::AggregateCalculator;
use super::events::{
    select_fields, EventFieldList, EventFilterEvaluator, EventInstance, SharedEvent, Translator,
};
use super::filter::{value_changed, MonitoringFilter};
use super::queue::{DataChangeQueue, EnqueueOutcome};

/// Server-wide monitored item id.
pub type MonitoredItemId = u32;

/// Subscription id as assigned by the subscription layer.
pub type SubscriptionId = u32;

/// Allocator for server-wide unique monitored item ids. Shared between node
/// managers of one server. Zero is never handed out.
#[derive(Debug, Default)]
pub struct MonitoredItemIds(AtomicU32);

impl MonitoredItemIds {
    /// A generator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    /// Next id; 0 is never returned.
    pub fn next(&self) -> MonitoredItemId {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// What an item watches.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    DataChange,
    Event,
}

/// One data-change notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

/// Revised, mutable parameters of an item.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSettings {
    pub client_handle: u32,
    /// Milliseconds; 0 means report on every change.
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub filter: MonitoringFilter,
    /// EURange span for percent deadbands.
    pub range: f64,
}

/// Event filtering collaborators captured when an event item is created.
#[allow(missing_docs)]
#[derive(Clone)]
pub struct EventSupport {
    pub evaluator: Arc<dyn EventFilterEvaluator>,
    pub translator: Arc<dyn Translator>,
    pub preferred_locales: Vec<String>,
}

impl fmt::Debug for EventSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSupport")
            .field("preferred_locales", &self.preferred_locales)
            .finish_non_exhaustive()
    }
}

/// Everything needed to construct a [`MonitoredItem`].
#[allow(missing_docs)]
pub struct MonitoredItemInit {
    pub id: MonitoredItemId,
    pub subscription_id: SubscriptionId,
    pub session_id: Option<Uuid>,
    pub handle: ManagerHandle,
    pub attribute_id: AttributeId,
    pub index_range: Option<IndexRange>,
    pub data_encoding: Option<QualifiedName>,
    pub timestamps: TimestampsToReturn,
    pub diagnostics: DiagnosticsMask,
    pub mode: MonitoringMode,
    pub settings: ItemSettings,
    pub calculator: Option<Box<dyn AggregateCalculator>>,
    pub event_support: Option<EventSupport>,
    pub max_notifications_per_publish: usize,
    pub ready_tx: Option<Sender<MonitoredItemId>>,
}

struct ItemState {
    subscription_id: SubscriptionId,
    session_id: Option<Uuid>,
    mode: MonitoringMode,
    timestamps: TimestampsToReturn,
    diagnostics: DiagnosticsMask,
    settings: ItemSettings,
    queue: Option<DataChangeQueue>,
    last_value: Option<DataValue>,
    last_error: Option<StatusCode>,
    events: Vec<EventFieldList>,
    events_overflow: bool,
    calculator: Option<Box<dyn AggregateCalculator>>,
    event_support: Option<EventSupport>,
    next_sample_time: DateTime<Utc>,
    ready_to_publish: bool,
    ready_to_trigger: bool,
    triggered: bool,
    resend_data: bool,
    semantics_changed: bool,
    structure_changed: bool,
    ready_tx: Option<Sender<MonitoredItemId>>,
}

/// A client's subscription to one node attribute or one event source.
pub struct MonitoredItem {
    id: MonitoredItemId,
    kind: ItemKind,
    handle: ManagerHandle,
    attribute_id: AttributeId,
    index_range: Option<IndexRange>,
    data_encoding: Option<QualifiedName>,
    max_notifications_per_publish: usize,
    created_at: DateTime<Utc>,
    state: Mutex<ItemState>,
}

impl fmt::Debug for MonitoredItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItem")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("node_id", &self.handle.node_id)
            .field("attribute_id", &self.attribute_id)
            .finish_non_exhaustive()
    }
}

fn queue_for(settings: &ItemSettings, kind: ItemKind) -> Option<DataChangeQueue> {
    (kind == ItemKind::DataChange && settings.queue_size > 1)
        .then(|| DataChangeQueue::new(settings.queue_size as usize, settings.discard_oldest))
}

impl MonitoredItem {
    /// Builds an item from validated settings.
    #[must_use]
    pub fn new(init: MonitoredItemInit) -> Self {
        let kind = if init.attribute_id == AttributeId::EventNotifier {
            ItemKind::Event
        } else {
            ItemKind::DataChange
        };
        let now = Utc::now();
        let state = ItemState {
            subscription_id: init.subscription_id,
            session_id: init.session_id,
            mode: init.mode,
            timestamps: init.timestamps,
            diagnostics: init.diagnostics,
            queue: queue_for(&init.settings, kind),
            settings: init.settings,
            last_value: None,
            last_error: None,
            events: Vec::new(),
            events_overflow: false,
            calculator: init.calculator,
            event_support: init.event_support,
            next_sample_time: now,
            ready_to_publish: false,
            ready_to_trigger: false,
            triggered: false,
            resend_data: false,
            semantics_changed: false,
            structure_changed: false,
            ready_tx: init.ready_tx,
        };
        Self {
            id: init.id,
            kind,
            handle: init.handle,
            attribute_id: init.attribute_id,
            index_range: init.index_range,
            data_encoding: init.data_encoding,
            max_notifications_per_publish: init.max_notifications_per_publish.max(1),
            created_at: now,
            state: Mutex::new(state),
        }
    }

    // Item state is left consistent between statements, so a panic on
    // another thread does not invalidate it.
    fn state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Server-assigned id.
    #[must_use]
    pub const fn id(&self) -> MonitoredItemId {
        self.id
    }

    /// Data-change or event item.
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        self.kind
    }

    /// True for items watching an event notifier.
    #[must_use]
    pub fn is_event_item(&self) -> bool {
        self.kind == ItemKind::Event
    }

    /// Monitored node.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.handle.node_id
    }

    /// Handle the owning manager resolved for the node.
    #[must_use]
    pub const fn manager_handle(&self) -> &ManagerHandle {
        &self.handle
    }

    /// Monitored attribute.
    #[must_use]
    pub const fn attribute_id(&self) -> AttributeId {
        self.attribute_id
    }

    /// Requested index range, if any.
    #[must_use]
    pub const fn index_range(&self) -> Option<&IndexRange> {
        self.index_range.as_ref()
    }

    /// Requested data encoding, if any.
    #[must_use]
    pub const fn data_encoding(&self) -> Option<&QualifiedName> {
        self.data_encoding.as_ref()
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Owning subscription.
    #[must_use]
    pub fn subscription_id(&self) -> SubscriptionId {
        self.state().subscription_id
    }

    /// Session that created (or last took over) the item.
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.state().session_id
    }

    /// Client-chosen handle echoed in notifications.
    #[must_use]
    pub fn client_handle(&self) -> u32 {
        self.state().settings.client_handle
    }

    /// Current monitoring mode.
    #[must_use]
    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.state().mode
    }

    /// Snapshot of the revised settings.
    #[must_use]
    pub fn settings(&self) -> ItemSettings {
        self.state().settings.clone()
    }

    /// Revised sampling interval in milliseconds.
    #[must_use]
    pub fn sampling_interval(&self) -> f64 {
        self.state().settings.sampling_interval
    }

    /// Revised queue size.
    #[must_use]
    pub fn queue_size(&self) -> u32 {
        self.state().settings.queue_size
    }

    /// Timestamps kept on published values.
    #[must_use]
    pub fn timestamps_to_return(&self) -> TimestampsToReturn {
        self.state().timestamps
    }

    /// Last value accepted by the change filter.
    #[must_use]
    pub fn last_value(&self) -> Option<DataValue> {
        self.state().last_value.clone()
    }

    /// Number of values or events waiting to be published.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.state();
        match self.kind {
            ItemKind::Event => state.events.len(),
            ItemKind::DataChange => match &state.queue {
                Some(q) => q.len(),
                None => usize::from(state.ready_to_publish && state.last_value.is_some()),
            },
        }
    }

    /// Registers the channel used to signal publish readiness.
    pub fn set_ready_signal(&self, tx: Option<Sender<MonitoredItemId>>) {
        self.state().ready_tx = tx;
    }

    /// Changes the monitoring mode and returns the previous one.
    ///
    /// Disabling discards everything queued. Leaving Disabled restarts the
    /// sampling clock; the caller seeds a fresh value.
    pub fn set_monitoring_mode(&self, mode: MonitoringMode) -> MonitoringMode {
        let mut state = self.state();
        let previous = state.mode;
        if previous == mode {
            return previous;
        }
        state.mode = mode;
        if mode == MonitoringMode::Disabled {
            if let Some(q) = state.queue.as_mut() {
                q.clear();
            }
            state.events.clear();
            state.events_overflow = false;
            state.last_value = None;
            state.last_error = None;
            state.ready_to_publish = false;
            state.ready_to_trigger = false;
            state.triggered = false;
            state.resend_data = false;
        } else if previous == MonitoringMode::Disabled {
            state.next_sample_time = Utc::now();
        }
        tracing::debug!(item_id = self.id, ?previous, ?mode, "monitoring mode changed");
        previous
    }

    /// Applies revised settings from ModifyMonitoredItems.
    pub fn modify(
        &self,
        settings: ItemSettings,
        timestamps: TimestampsToReturn,
        diagnostics: DiagnosticsMask,
        calculator: Option<Box<dyn AggregateCalculator>>,
    ) {
        let mut state = self.state();
        state.timestamps = timestamps;
        state.diagnostics = diagnostics;
        if calculator.is_some() || settings.filter.aggregate().is_none() {
            state.calculator = calculator;
        }

        match self.kind {
            ItemKind::DataChange => {
                if settings.queue_size <= 1 {
                    state.queue = None;
                } else if let Some(q) = state.queue.as_mut() {
                    q.set_capacity(settings.queue_size as usize, settings.discard_oldest);
                } else {
                    let mut q = DataChangeQueue::new(settings.queue_size as usize, settings.discard_oldest);
                    if state.ready_to_publish {
                        if let Some(last) = state.last_value.clone() {
                            q.enqueue(last, state.last_error);
                        }
                    }
                    state.queue = Some(q);
                }
            }
            ItemKind::Event => {
                let max = settings.queue_size.max(1) as usize;
                if state.events.len() > max {
                    let excess = state.events.len() - max;
                    if settings.discard_oldest {
                        state.events.drain(..excess);
                    } else {
                        state.events.truncate(max);
                    }
                    state.events_overflow = true;
                }
            }
        }

        if (settings.sampling_interval - state.settings.sampling_interval).abs() > f64::EPSILON {
            state.next_sample_time = Utc::now();
        }
        state.settings = settings;
        tracing::debug!(item_id = self.id, "monitored item modified");
    }

    /// Moves the item to another subscription.
    pub fn transfer(
        &self,
        subscription_id: SubscriptionId,
        session_id: Option<Uuid>,
        ready_tx: Option<Sender<MonitoredItemId>>,
    ) {
        let mut state = self.state();
        state.subscription_id = subscription_id;
        state.session_id = session_id;
        state.ready_tx = ready_tx;
    }

    /// Queues a sampled value (or error) for publishing.
    ///
    /// With `bypass_filter` the change filter is skipped; used for initial
    /// and forced values.
    pub fn queue_value(&self, value: &DataValue, error: Option<StatusCode>, bypass_filter: bool) {
        let mut state = self.state();
        if state.mode == MonitoringMode::Disabled || self.kind == ItemKind::Event {
            return;
        }

        let mut value = value.clone();
        if let Some(err) = error {
            if !err.same_code(value.status) {
                value.status = err;
            }
        }

        if state.calculator.is_some() {
            self.queue_aggregate_input(&mut state, &value);
            return;
        }

        if !bypass_filter
            && !value_changed(
                &value,
                error,
                state.last_value.as_ref(),
                state.last_error,
                state.settings.filter.data_change(),
                state.settings.range,
            )
        {
            tracing::debug!(item_id = self.id, value = %value.value, "value filtered");
            return;
        }

        self.add_value_to_queue(&mut state, value, error);
    }

    fn queue_aggregate_input(&self, state: &mut ItemState, value: &DataValue) {
        let Some(calc) = state.calculator.as_mut() else {
            return;
        };
        if !calc.queue_raw_value(value) {
            tracing::warn!(item_id = self.id, "aggregate rejected out of order raw value");
        }
        let mut processed = Vec::new();
        while let Some(v) = calc.get_processed_value(false) {
            processed.push(v);
        }
        for v in processed {
            self.add_value_to_queue(state, v, None);
        }
    }

    fn add_value_to_queue(&self, state: &mut ItemState, value: DataValue, error: Option<StatusCode>) {
        if let Some(q) = state.queue.as_mut() {
            match q.enqueue(value.clone(), error) {
                EnqueueOutcome::Queued => {}
                outcome => tracing::debug!(item_id = self.id, ?outcome, "monitored item queue overflow"),
            }
        }
        tracing::trace!(item_id = self.id, value = %value.value, "value queued");
        state.last_value = Some(value);
        state.last_error = error;
        state.ready_to_publish = true;
        state.ready_to_trigger = true;
        self.signal_ready(state);
    }

    /// Queues an event. Duplicate instances already pending are ignored.
    pub fn queue_event(&self, event: &SharedEvent, bypass_filter: bool) {
        let mut state = self.state();
        if state.mode == MonitoringMode::Disabled || self.kind != ItemKind::Event {
            return;
        }
        if state.events.iter().any(|e| e.is_from(event)) {
            return;
        }
        let (Some(filter), Some(support)) = (state.settings.filter.event(), state.event_support.as_ref())
        else {
            return;
        };
        if !bypass_filter && !support.evaluator.matches(filter, event) {
            tracing::debug!(item_id = self.id, event_type = %event.event_type, "event filtered");
            return;
        }

        let fields = select_fields(filter, event, support.translator.as_ref(), &support.preferred_locales);
        let entry = EventFieldList {
            client_handle: state.settings.client_handle,
            event_fields: fields,
            source: Some(Arc::clone(event)),
        };

        if state.events.len() >= state.settings.queue_size.max(1) as usize {
            state.events_overflow = true;
            if !state.settings.discard_oldest {
                tracing::debug!(item_id = self.id, "event queue full, new event dropped");
                return;
            }
            state.events.remove(0);
        }
        state.events.push(entry);
        state.ready_to_publish = true;
        state.ready_to_trigger = true;
        tracing::trace!(item_id = self.id, event_type = %event.event_type, "event queued");
        self.signal_ready(&state);
    }

    fn signal_ready(&self, state: &ItemState) {
        if state.mode != MonitoringMode::Reporting {
            return;
        }
        if let Some(tx) = &state.ready_tx {
            match tx.try_send(self.id) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(item_id = self.id, "ready signal channel full");
                }
            }
        }
    }

    /// Marks the owning variable's semantics as changed; the next published
    /// value carries the SemanticsChanged bit.
    pub fn set_semantics_changed(&self) {
        self.state().semantics_changed = true;
    }

    /// The next published value carries the StructureChanged bit.
    pub fn set_structure_changed(&self) {
        self.state().structure_changed = true;
    }

    /// Requests the current value be sent again (after a transfer).
    pub fn setup_resend_data_trigger(&self) {
        let mut state = self.state();
        if self.kind == ItemKind::DataChange && state.mode == MonitoringMode::Reporting {
            state.resend_data = true;
            self.signal_ready(&state);
        }
    }

    /// Fires a triggering link. Returns true if the item had data to publish.
    pub fn set_triggered(&self) -> bool {
        let mut state = self.state();
        if state.ready_to_publish {
            state.triggered = true;
            return true;
        }
        false
    }

    /// True if new data arrived since the last time this item triggered
    /// its linked items.
    #[must_use]
    pub fn is_ready_to_trigger(&self) -> bool {
        let state = self.state();
        state.mode != MonitoringMode::Disabled && state.ready_to_trigger
    }

    /// Clears the trigger flag after linked items were fired.
    pub fn reset_ready_to_trigger(&self) {
        self.state().ready_to_trigger = false;
    }

    /// Readiness at the current time.
    #[must_use]
    pub fn is_ready_to_publish(&self) -> bool {
        self.is_ready_to_publish_at(Utc::now())
    }

    /// Readiness at `now`: a finished aggregate interval, a resend request,
    /// or a Reporting item that was triggered or whose sample time is due.
    pub fn is_ready_to_publish_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state();

        let interval_done = state
            .calculator
            .as_ref()
            .is_some_and(|c| c.has_end_time_passed(now));
        if interval_done {
            let mut processed = Vec::new();
            if let Some(calc) = state.calculator.as_mut() {
                while let Some(v) = calc.get_processed_value(false) {
                    processed.push(v);
                }
            }
            for v in processed {
                self.add_value_to_queue(&mut state, v, None);
            }
        }

        if state.resend_data {
            return true;
        }
        if !state.ready_to_publish {
            return false;
        }
        if state.mode != MonitoringMode::Disabled && state.triggered {
            return true;
        }
        if state.mode != MonitoringMode::Reporting {
            return false;
        }
        state.settings.sampling_interval <= 0.0 || state.next_sample_time <= now
    }

    /// Drains queued values into `notifications`, pairing each with an
    /// optional diagnostic. Returns the number of notifications produced.
    pub fn publish(
        &self,
        notifications: &mut Vec<MonitoredItemNotification>,
        diagnostics: &mut Vec<Option<DiagnosticInfo>>,
    ) -> usize {
        let mut state = self.state();
        if self.kind != ItemKind::DataChange || (!state.ready_to_publish && !state.resend_data) {
            return 0;
        }
        Self::increment_sample_time(&mut state, Utc::now());

        let mut drained = Vec::new();
        if state.resend_data {
            let from_queue = state.queue.as_mut().and_then(DataChangeQueue::dequeue);
            match from_queue {
                Some(entry) => {
                    drained.push(entry);
                    state.resend_data = state.queue.as_ref().is_some_and(|q| !q.is_empty());
                }
                None => {
                    if let Some(last) = state.last_value.clone() {
                        drained.push((last, state.last_error));
                    }
                    state.resend_data = false;
                }
            }
        } else if let Some(queue) = state.queue.as_mut() {
            while drained.len() < self.max_notifications_per_publish {
                let Some(entry) = queue.dequeue() else {
                    break;
                };
                drained.push(entry);
            }
        } else if let Some(last) = state.last_value.clone() {
            drained.push((last, state.last_error));
        }

        let count = drained.len();
        for (value, error) in drained {
            let (notification, diag) = Self::build_notification(&mut state, value, error);
            notifications.push(notification);
            diagnostics.push(diag);
        }

        let remaining = state.queue.as_ref().is_some_and(|q| !q.is_empty());
        state.ready_to_publish = remaining;
        if !remaining {
            state.triggered = false;
        }
        state.ready_to_trigger = false;
        tracing::trace!(item_id = self.id, count, "published values");
        count
    }

    fn build_notification(
        state: &mut ItemState,
        mut value: DataValue,
        error: Option<StatusCode>,
    ) -> (MonitoredItemNotification, Option<DiagnosticInfo>) {
        if let Some(err) = error {
            value.status = err;
        }
        if state.semantics_changed {
            value.status = value.status.with_semantics_changed();
            state.semantics_changed = false;
        }
        if state.structure_changed {
            value.status = value.status.with_structure_changed();
            state.structure_changed = false;
        }
        value.apply_timestamps(state.timestamps);

        let diag = match error {
            Some(err) if state.diagnostics.wants_operation_diagnostics() => {
                Some(DiagnosticInfo::new(err))
            }
            _ => None,
        };
        (
            MonitoredItemNotification {
                client_handle: state.settings.client_handle,
                value,
            },
            diag,
        )
    }

    /// Drains queued events into `notifications`, adding an overflow event
    /// if the queue overflowed. Returns the number of events produced.
    pub fn publish_events(&self, notifications: &mut Vec<EventFieldList>) -> usize {
        let mut state = self.state();
        if self.kind != ItemKind::Event {
            return 0;
        }
        let mut events = std::mem::take(&mut state.events);

        if state.events_overflow {
            if let (Some(filter), Some(support)) = (state.settings.filter.event(), state.event_support.as_ref()) {
                let overflow = Arc::new(EventInstance::queue_overflow(self.handle.node_id.clone()));
                let fields = select_fields(filter, &overflow, support.translator.as_ref(), &support.preferred_locales);
                let entry = EventFieldList {
                    client_handle: state.settings.client_handle,
                    event_fields: fields,
                    source: Some(overflow),
                };
                if state.settings.discard_oldest {
                    events.insert(0, entry);
                } else {
                    events.push(entry);
                }
            }
        }

        let count = events.len();
        notifications.extend(events);
        state.events_overflow = false;
        state.ready_to_publish = false;
        state.ready_to_trigger = false;
        state.triggered = false;
        tracing::trace!(item_id = self.id, count, "published events");
        count
    }

    fn increment_sample_time(state: &mut ItemState, now: DateTime<Utc>) {
        #[allow(clippy::cast_possible_truncation)]
        let interval_us = (state.settings.sampling_interval * 1000.0) as i64;
        if interval_us <= 0 {
            state.next_sample_time = now;
            return;
        }
        if state.next_sample_time <= now {
            let behind = (now - state.next_sample_time).num_microseconds().unwrap_or(i64::MAX);
            let steps = behind / interval_us + 1;
            state.next_sample_time = state
                .next_sample_time
                .checked_add_signed(Duration::microseconds(interval_us.saturating_mul(steps)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        }
    }
}
