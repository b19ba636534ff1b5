//! # uaspace - address space and monitored items for OPC UA-class servers
//!
//! `uaspace` is the node-manager core of an industrial information-model
//! server: it stores a typed graph of nodes, answers browse, read, write and
//! method calls against it, and turns value changes and events into queued
//! notifications for subscriptions.
//!
//! ## Core Concepts
//!
//! - **Node**: an addressable element with a NodeClass, attributes and typed references
//! - **NodeManager**: owns the nodes of a set of namespaces and serves batch calls
//! - **Component NodeId**: a synthetic id naming a node inside a dynamically materialized subtree
//! - **MonitoredItem**: a client's subscription to one attribute or one event notifier
//!
//! ## Usage
//!
//! ```
//! use uaspace::{
//!     DataValue, ExternalReferences, MonitoredItemCreateRequest, MonitoringParameters, NodeDefinition,
//!     NodeId, NodeManager, NodeManagerConfig, OperationContext, QualifiedName, TimestampsToReturn,
//! };
//!
//! let tank = NodeDefinition::object(NodeId::numeric(1, 1), QualifiedName::new(1, "Tank")).with_child(
//!     NodeDefinition::variable(NodeId::numeric(1, 2), QualifiedName::new(1, "Level"), 0.5f64),
//! );
//! let manager = NodeManager::new(NodeManagerConfig::default())
//!     .unwrap()
//!     .with_predefined_nodes(vec![tank]);
//! manager.create_address_space(&mut ExternalReferences::new()).unwrap();
//!
//! let ctx = OperationContext::anonymous();
//! let mut requests = vec![MonitoredItemCreateRequest::value(
//!     NodeId::numeric(1, 2),
//!     MonitoringParameters::new(7, 0.0, 10),
//! )];
//! let mut results = vec![Default::default()];
//! let mut items = vec![None];
//! manager
//!     .create_monitored_items(&ctx, 1, 100.0, TimestampsToReturn::Both, &mut requests, &mut results, &mut items)
//!     .unwrap();
//! assert!(results[0].status.is_good());
//!
//! manager.set_value(&NodeId::numeric(1, 2), DataValue::new(0.75f64)).unwrap();
//! assert_eq!(items[0].as_ref().unwrap().pending(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core value and identity types
pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod node;
pub mod node_id;
pub mod status;
pub mod value;

// Store and notification engine
pub mod address_space;
pub mod monitor;

// Re-export primary types at crate root for convenience
pub use attributes::{
    AccessLevel, AttributeId, BrowseDirection, BrowseResultMask, EventNotifier, MonitoringMode, NodeClass,
};
pub use config::NodeManagerConfig;
pub use context::{DiagnosticInfo, DiagnosticsMask, OperationContext, Permission};
pub use error::{UaError, UaResult, ValidationError};
pub use node::{load_node_set, Node, NodeBody, NodeDefinition, Reference, VariableAttributes, VariableKind};
pub use node_id::{ids, Identifier, LocalizedText, NodeId, QualifiedName};
pub use status::StatusCode;
pub use value::{DataValue, IndexRange, Range, TimestampsToReturn, Variant};

pub use address_space::{
    BrowseDescription, BrowsePathResult, BrowsePathTarget, CallMethodRequest, CallMethodResult, ContinuationPoint,
    DefaultHooks, ExternalReferences, HistoryReadDetails, HistoryReadResult, HistoryReadValueId,
    HistoryUpdateDetails, HistoryUpdateRequest, HistoryUpdateResult, ManagerHandle, MethodHandler, MethodOutcome,
    NodeHandle, NodeManager, NodeManagerHooks, ParsedNodeId, ReadValueId, ReferenceChange, ReferenceDescription,
    ReferenceTable, RelativePathElement, SharedTypeTree, TypeTree, ViewDescription, WriteValue,
};
pub use monitor::{
    AggregateCalculator, AggregateConfiguration, AggregateFilter, AggregateManager, CalculatorSpec,
    DataChangeFilter, DataChangeTrigger, DeadbandType, EventFieldList, EventFilter, EventFilterEvaluator,
    EventInstance, MonitoredItem, MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemId,
    MonitoredItemIds, MonitoredItemModifyRequest, MonitoredItemModifyResult, MonitoredItemNotification,
    MonitoringFilter, MonitoringFilterResult, MonitoringParameters, SimpleAttributeOperand, SubscriptionId,
    Translator,
};
