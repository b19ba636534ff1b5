//! Monitored items and notification delivery.
//!
//! Items sample node attributes (or collect events), filter and queue the
//! results, and hand them to the subscription layer on publish. The node
//! manager hosts their lifecycle; see [`lifecycle`] and [`notifier`].

/// Aggregate calculator contracts.
pub mod aggregate;
/// Event instances, event filters and field selection.
pub mod events;
/// Data-change and aggregate filters.
pub mod filter;
/// The monitored item itself.
pub mod item;
/// Create/modify/delete/transfer of monitored items.
pub mod lifecycle;
/// Event fan-out and condition refresh.
pub mod notifier;
/// Bounded data-change queue.
pub mod queue;

mod monitored_node;

pub(crate) use monitored_node::MonitoredNode;

pub use aggregate::{AggregateCalculator, AggregateConfiguration, AggregateManager, CalculatorSpec};
pub use events::{
    select_fields, ContentFilter, ContentFilterElement, EventFieldList, EventFilter, EventFilterEvaluator,
    EventFilterResult, EventInstance, FilterOperand, FilterOperator, IdentityTranslator, PermissiveEventFilter,
    SharedEvent, SimpleAttributeOperand, Translator,
};
pub use filter::{
    value_changed, AggregateFilter, DataChangeFilter, DataChangeTrigger, DeadbandType, MonitoringFilter,
    MonitoringFilterResult,
};
pub use item::{
    EventSupport, ItemKind, ItemSettings, MonitoredItem, MonitoredItemId, MonitoredItemIds, MonitoredItemInit,
    MonitoredItemNotification, SubscriptionId,
};
pub use lifecycle::{
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemModifyRequest, MonitoredItemModifyResult,
    MonitoringParameters,
};
pub use queue::{DataChangeQueue, EnqueueOutcome};
