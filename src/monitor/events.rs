//! Event instances, event filters and select-clause extraction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attributes::AttributeId;
use crate::node_id::{ids, LocalizedText, NodeId, QualifiedName};
use crate::status::StatusCode;
use crate::value::{IndexRange, Variant};

/// An event raised by a node. Shared by every queue it lands in; identity
/// (pointer equality) is what duplicate suppression compares.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct EventInstance {
    pub event_id: Vec<u8>,
    pub event_type: NodeId,
    pub source_node: NodeId,
    pub source_name: String,
    pub time: DateTime<Utc>,
    pub receive_time: DateTime<Utc>,
    pub message: LocalizedText,
    pub severity: u16,
    /// Further fields keyed by `/`-joined browse path (e.g. `EnabledState/Id`).
    pub fields: HashMap<String, Variant>,
}

/// Reference-counted event handle.
pub type SharedEvent = Arc<EventInstance>;

impl EventInstance {
    /// An event with the standard fields set.
    pub fn new(event_type: NodeId, source_node: NodeId, message: impl Into<String>, severity: u16) -> Self {
        let now = Utc::now();
        Self {
            event_id: Uuid::new_v4().as_bytes().to_vec(),
            event_type,
            source_node,
            source_name: String::new(),
            time: now,
            receive_time: now,
            message: LocalizedText::text(message),
            severity,
            fields: HashMap::new(),
        }
    }

    /// Sets the SourceName field.
    #[must_use]
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    /// Adds a field addressed by its browse path.
    #[must_use]
    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    /// Value of the field named by a browse path.
    #[must_use]
    pub fn field(&self, browse_path: &[QualifiedName]) -> Option<Variant> {
        if let [single] = browse_path {
            let standard = match single.name.as_str() {
                "EventId" => Some(Variant::ByteString(self.event_id.clone())),
                "EventType" => Some(Variant::NodeId(self.event_type.clone())),
                "SourceNode" => Some(Variant::NodeId(self.source_node.clone())),
                "SourceName" => Some(Variant::String(self.source_name.clone())),
                "Time" => Some(Variant::DateTime(self.time)),
                "ReceiveTime" => Some(Variant::DateTime(self.receive_time)),
                "Message" => Some(Variant::LocalizedText(self.message.clone())),
                "Severity" => Some(Variant::UInt16(self.severity)),
                _ => None,
            };
            if standard.is_some() {
                return standard;
            }
        }
        let key = browse_path
            .iter()
            .map(|q| q.name.as_str())
            .collect::<Vec<_>>()
            .join("/");
        self.fields.get(&key).cloned()
    }

    /// The pseudo-event queued when an event queue overflowed.
    #[must_use]
    pub fn queue_overflow(source_node: NodeId) -> Self {
        Self::new(
            ids::EVENT_QUEUE_OVERFLOW_EVENT_TYPE,
            source_node,
            "Events lost due to queue overflow.",
            1,
        )
        .with_source_name("Internal/EventQueueOverflow")
    }
}

/// Selects one field of an event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleAttributeOperand {
    #[serde(default = "base_event_type")]
    pub type_definition_id: NodeId,
    pub browse_path: Vec<QualifiedName>,
    #[serde(default = "value_attribute")]
    pub attribute_id: AttributeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_range: Option<String>,
}

const fn base_event_type() -> NodeId {
    ids::BASE_EVENT_TYPE
}

const fn value_attribute() -> AttributeId {
    AttributeId::Value
}

impl SimpleAttributeOperand {
    /// Value of the named field of any event type.
    pub fn field(name: &str) -> Self {
        Self {
            type_definition_id: ids::BASE_EVENT_TYPE,
            browse_path: vec![QualifiedName::new(0, name)],
            attribute_id: AttributeId::Value,
            index_range: None,
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    IsNull,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Like,
    Not,
    Between,
    InList,
    And,
    Or,
    Cast,
    BitwiseAnd,
    BitwiseOr,
    OfType,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FilterOperand {
    Literal(Variant),
    Attribute(SimpleAttributeOperand),
    /// Index of another element of the same content filter.
    Element(u32),
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFilterElement {
    pub operator: FilterOperator,
    pub operands: Vec<FilterOperand>,
}

/// A where clause. Empty means "every event".
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFilter {
    pub elements: Vec<ContentFilterElement>,
}

/// Event filter of an event monitored item.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub select_clauses: Vec<SimpleAttributeOperand>,
    #[serde(default)]
    pub where_clause: ContentFilter,
}

/// Per-clause validation results.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilterResult {
    pub select_clause_results: Vec<StatusCode>,
    pub where_clause_results: Vec<StatusCode>,
}

impl EventFilterResult {
    /// True if every clause validated.
    #[must_use]
    pub fn is_good(&self) -> bool {
        self.select_clause_results
            .iter()
            .chain(&self.where_clause_results)
            .all(|s| s.is_good())
    }
}

/// Evaluates event filters. The expression language itself is supplied by
/// the server; the engine only calls through this interface.
pub trait EventFilterEvaluator: Send + Sync {
    /// Validates a filter at item creation or modification.
    fn validate(&self, filter: &EventFilter) -> EventFilterResult;

    /// True if `event` passes the filter's where clause.
    fn matches(&self, filter: &EventFilter, event: &EventInstance) -> bool;
}

/// Evaluator that accepts every event and only checks select clauses are
/// well formed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveEventFilter;

impl EventFilterEvaluator for PermissiveEventFilter {
    fn validate(&self, filter: &EventFilter) -> EventFilterResult {
        let select_clause_results = filter
            .select_clauses
            .iter()
            .map(|clause| {
                let range_ok = clause
                    .index_range
                    .as_deref()
                    .map_or(true, |r| IndexRange::parse(r).is_ok());
                if clause.browse_path.is_empty() && clause.attribute_id == AttributeId::Value {
                    StatusCode::BAD_NODE_ID_UNKNOWN
                } else if !range_ok {
                    StatusCode::BAD_INDEX_RANGE_INVALID
                } else {
                    StatusCode::GOOD
                }
            })
            .collect();
        EventFilterResult {
            select_clause_results,
            where_clause_results: vec![StatusCode::GOOD; filter.where_clause.elements.len()],
        }
    }

    fn matches(&self, _filter: &EventFilter, _event: &EventInstance) -> bool {
        true
    }
}

/// Localizes text for a client's preferred locales.
pub trait Translator: Send + Sync {
    /// Picks the best translation of `text` for the locales.
    fn translate(&self, preferred_locales: &[String], text: &LocalizedText) -> LocalizedText;
}

/// Translator that returns text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl Translator for IdentityTranslator {
    fn translate(&self, _preferred_locales: &[String], text: &LocalizedText) -> LocalizedText {
        text.clone()
    }
}

/// Event fields for one queued event notification.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub event_fields: Vec<Variant>,
    pub(crate) source: Option<SharedEvent>,
}

impl EventFieldList {
    /// True if this entry was produced from `event`.
    #[must_use]
    pub fn is_from(&self, event: &SharedEvent) -> bool {
        self.source.as_ref().is_some_and(|s| Arc::ptr_eq(s, event))
    }
}

/// Extracts the select-clause fields of `event`, translating text fields.
pub fn select_fields(
    filter: &EventFilter,
    event: &EventInstance,
    translator: &dyn Translator,
    preferred_locales: &[String],
) -> Vec<Variant> {
    filter
        .select_clauses
        .iter()
        .map(|clause| {
            if clause.attribute_id != AttributeId::Value {
                return if clause.attribute_id == AttributeId::NodeId && clause.browse_path.is_empty() {
                    Variant::NodeId(event.source_node.clone())
                } else {
                    Variant::Empty
                };
            }
            let Some(mut value) = event.field(&clause.browse_path) else {
                return Variant::Empty;
            };
            if let Some(range) = clause
                .index_range
                .as_deref()
                .and_then(|r| IndexRange::parse(r).ok().flatten())
            {
                value = range.read(&value).unwrap_or(Variant::Empty);
            }
            match value {
                Variant::LocalizedText(text) => {
                    Variant::LocalizedText(translator.translate(preferred_locales, &text))
                }
                other => other,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Translator for Upper {
        fn translate(&self, _locales: &[String], text: &LocalizedText) -> LocalizedText {
            LocalizedText::new("en", text.text.to_uppercase())
        }
    }

    #[test]
    fn test_select_fields_standard_and_custom() {
        let event = EventInstance::new(ids::BASE_EVENT_TYPE, NodeId::numeric(1, 5), "hot", 500)
            .with_source_name("Boiler")
            .with_field("Limits/High", 90.0f64);
        let filter = EventFilter {
            select_clauses: vec![
                SimpleAttributeOperand::field("Message"),
                SimpleAttributeOperand::field("Severity"),
                SimpleAttributeOperand::field("SourceName"),
                SimpleAttributeOperand {
                    browse_path: vec![QualifiedName::new(0, "Limits"), QualifiedName::new(0, "High")],
                    ..SimpleAttributeOperand::field("")
                },
                SimpleAttributeOperand::field("Missing"),
            ],
            where_clause: ContentFilter::default(),
        };
        let fields = select_fields(&filter, &event, &Upper, &[]);
        assert_eq!(fields[0], Variant::LocalizedText(LocalizedText::new("en", "HOT")));
        assert_eq!(fields[1], Variant::UInt16(500));
        assert_eq!(fields[2], Variant::String("Boiler".into()));
        assert_eq!(fields[3], Variant::Double(90.0));
        assert_eq!(fields[4], Variant::Empty);
    }

    #[test]
    fn test_permissive_validation() {
        let filter = EventFilter {
            select_clauses: vec![
                SimpleAttributeOperand::field("EventId"),
                SimpleAttributeOperand {
                    browse_path: Vec::new(),
                    ..SimpleAttributeOperand::field("")
                },
            ],
            where_clause: ContentFilter::default(),
        };
        let result = PermissiveEventFilter.validate(&filter);
        assert_eq!(result.select_clause_results[0], StatusCode::GOOD);
        assert_eq!(result.select_clause_results[1], StatusCode::BAD_NODE_ID_UNKNOWN);
        assert!(!result.is_good());
    }

    #[test]
    fn test_event_identity() {
        let event: SharedEvent = Arc::new(EventInstance::new(
            ids::BASE_EVENT_TYPE,
            NodeId::numeric(1, 1),
            "x",
            1,
        ));
        let copy = Arc::new((*event).clone());
        let entry = EventFieldList {
            client_handle: 1,
            event_fields: Vec::new(),
            source: Some(Arc::clone(&event)),
        };
        assert!(entry.is_from(&event));
        assert!(!entry.is_from(&copy));
    }
}
