//! Address-space nodes.
//!
//! A [`Node`] is one vertex of the address space: identity, names, an
//! outgoing reference list and a class-specific [`NodeBody`]. Nodes are owned
//! by the node store's arena; `parent` and `children` are arena indices.
//!
//! [`NodeDefinition`] is the serde form used to describe predefined node sets
//! and dynamically created nodes.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::address_space::{NodeIdx, TypeTree};
use crate::attributes::{AccessLevel, AttributeId, EventNotifier, NodeClass};
use crate::error::UaResult;
use crate::node_id::{browse_names, ids, LocalizedText, NodeId, QualifiedName};
use crate::status::StatusCode;
use crate::value::{DataValue, IndexRange, Variant};

/// A typed, directed edge to another node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub reference_type: NodeId,
    #[serde(default = "default_true")]
    pub is_forward: bool,
    pub target: NodeId,
}

const fn default_true() -> bool {
    true
}

impl Reference {
    /// Reference from the holder to `target`.
    pub fn forward(reference_type: NodeId, target: NodeId) -> Self {
        Self {
            reference_type,
            is_forward: true,
            target,
        }
    }

    /// Reference from `target` to the holder.
    pub fn inverse(reference_type: NodeId, target: NodeId) -> Self {
        Self {
            reference_type,
            is_forward: false,
            target,
        }
    }

    /// The same edge seen from the target.
    #[must_use]
    pub fn reversed(&self, source: &NodeId) -> Self {
        Self {
            reference_type: self.reference_type.clone(),
            is_forward: !self.is_forward,
            target: source.clone(),
        }
    }
}

/// Specialisation of a variable that decides which of its properties carry
/// semantics (a change to them invalidates how the value is interpreted).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    #[default]
    Plain,
    Property,
    DataItem,
    AnalogItem,
    TwoStateDiscrete,
    MultiStateDiscrete,
    MultiStateValueDiscrete,
    ArrayItem,
    YArrayItem,
    XyArrayItem,
    ImageItem,
    CubeItem,
    NDimensionArrayItem,
}

const ANALOG_SEMANTICS: &[&str] = &[browse_names::EU_RANGE, browse_names::ENGINEERING_UNITS];
const TWO_STATE_SEMANTICS: &[&str] = &[browse_names::FALSE_STATE, browse_names::TRUE_STATE];
const MULTI_STATE_SEMANTICS: &[&str] = &[browse_names::ENUM_STRINGS];
const ARRAY_SEMANTICS: &[&str] = &[
    browse_names::INSTRUMENT_RANGE,
    browse_names::EU_RANGE,
    browse_names::ENGINEERING_UNITS,
    browse_names::TITLE,
];
const Y_ARRAY_SEMANTICS: &[&str] = &[
    browse_names::INSTRUMENT_RANGE,
    browse_names::EU_RANGE,
    browse_names::ENGINEERING_UNITS,
    browse_names::TITLE,
    browse_names::X_AXIS_DEFINITION,
];
const IMAGE_SEMANTICS: &[&str] = &[
    browse_names::INSTRUMENT_RANGE,
    browse_names::EU_RANGE,
    browse_names::ENGINEERING_UNITS,
    browse_names::TITLE,
    browse_names::X_AXIS_DEFINITION,
    browse_names::Y_AXIS_DEFINITION,
];
const CUBE_SEMANTICS: &[&str] = &[
    browse_names::INSTRUMENT_RANGE,
    browse_names::EU_RANGE,
    browse_names::ENGINEERING_UNITS,
    browse_names::TITLE,
    browse_names::X_AXIS_DEFINITION,
    browse_names::Y_AXIS_DEFINITION,
    browse_names::Z_AXIS_DEFINITION,
];
const N_DIMENSION_SEMANTICS: &[&str] = &[
    browse_names::INSTRUMENT_RANGE,
    browse_names::EU_RANGE,
    browse_names::ENGINEERING_UNITS,
    browse_names::TITLE,
    browse_names::AXIS_DEFINITION,
];

impl VariableKind {
    /// Property browse names whose value changes alter the semantics of a
    /// variable of this kind. Array item kinds include the ArrayItem set.
    #[must_use]
    pub const fn semantic_properties(self) -> &'static [&'static str] {
        match self {
            Self::AnalogItem => ANALOG_SEMANTICS,
            Self::TwoStateDiscrete => TWO_STATE_SEMANTICS,
            Self::MultiStateDiscrete => MULTI_STATE_SEMANTICS,
            Self::ArrayItem => ARRAY_SEMANTICS,
            Self::YArrayItem | Self::XyArrayItem => Y_ARRAY_SEMANTICS,
            Self::ImageItem => IMAGE_SEMANTICS,
            Self::CubeItem => CUBE_SEMANTICS,
            Self::NDimensionArrayItem => N_DIMENSION_SEMANTICS,
            Self::Plain | Self::Property | Self::DataItem | Self::MultiStateValueDiscrete => &[],
        }
    }

    /// True if a change to property `name` alters the meaning of the variable's value.
    #[must_use]
    pub fn is_semantic_property(self, name: &str) -> bool {
        self.semantic_properties().contains(&name)
    }

    /// Analog items range-check writes against InstrumentRange and use linear
    /// (non-stepped) aggregation.
    #[must_use]
    pub const fn is_analog(self) -> bool {
        matches!(self, Self::AnalogItem)
    }
}

/// Variable-specific attributes.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableAttributes {
    pub value: DataValue,
    pub data_type: NodeId,
    /// -1 scalar, 0 one or more dimensions, n exactly n dimensions, -2 any, -3 scalar or 1-D.
    pub value_rank: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_dimensions: Option<Vec<u32>>,
    pub access_level: AccessLevel,
    pub user_access_level: AccessLevel,
    /// Fastest rate (ms) the server can sample this variable; 0 means exception based.
    pub minimum_sampling_interval: f64,
    pub historizing: bool,
    pub kind: VariableKind,
}

impl Default for VariableAttributes {
    fn default() -> Self {
        Self {
            value: DataValue::default(),
            data_type: ids::BASE_DATA_TYPE,
            value_rank: -1,
            array_dimensions: None,
            access_level: AccessLevel::CURRENT_READ,
            user_access_level: AccessLevel::CURRENT_READ,
            minimum_sampling_interval: 0.0,
            historizing: false,
            kind: VariableKind::Plain,
        }
    }
}

/// Class-specific part of a node.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_class", rename_all = "snake_case")]
pub enum NodeBody {
    Object {
        #[serde(default)]
        event_notifier: EventNotifier,
    },
    Variable(VariableAttributes),
    Method {
        #[serde(default = "default_true")]
        executable: bool,
        #[serde(default = "default_true")]
        user_executable: bool,
    },
    View {
        #[serde(default)]
        event_notifier: EventNotifier,
        #[serde(default)]
        contains_no_loops: bool,
    },
    ObjectType {
        #[serde(default)]
        is_abstract: bool,
    },
    VariableType {
        #[serde(default)]
        is_abstract: bool,
        #[serde(default)]
        value: Variant,
        #[serde(default = "base_data_type")]
        data_type: NodeId,
        #[serde(default = "scalar_rank")]
        value_rank: i32,
    },
    ReferenceType {
        #[serde(default)]
        is_abstract: bool,
        #[serde(default)]
        symmetric: bool,
        #[serde(default)]
        inverse_name: Option<LocalizedText>,
    },
    DataType {
        #[serde(default)]
        is_abstract: bool,
    },
}

const fn base_data_type() -> NodeId {
    ids::BASE_DATA_TYPE
}

const fn scalar_rank() -> i32 {
    -1
}

impl NodeBody {
    /// NodeClass of the body.
    #[must_use]
    pub const fn node_class(&self) -> NodeClass {
        match self {
            Self::Object { .. } => NodeClass::Object,
            Self::Variable(_) => NodeClass::Variable,
            Self::Method { .. } => NodeClass::Method,
            Self::View { .. } => NodeClass::View,
            Self::ObjectType { .. } => NodeClass::ObjectType,
            Self::VariableType { .. } => NodeClass::VariableType,
            Self::ReferenceType { .. } => NodeClass::ReferenceType,
            Self::DataType { .. } => NodeClass::DataType,
        }
    }

    fn is_abstract(&self) -> Option<bool> {
        match self {
            Self::ObjectType { is_abstract }
            | Self::VariableType { is_abstract, .. }
            | Self::ReferenceType { is_abstract, .. }
            | Self::DataType { is_abstract } => Some(*is_abstract),
            _ => None,
        }
    }
}

/// One vertex of the address space.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub description: Option<LocalizedText>,
    pub write_mask: u32,
    pub user_write_mask: u32,
    pub body: NodeBody,
    pub references: Vec<Reference>,
    pub(crate) parent: Option<NodeIdx>,
    pub(crate) children: Vec<NodeIdx>,
}

impl Node {
    /// A node with the browse name as display name and no references.
    pub fn new(node_id: NodeId, browse_name: QualifiedName, body: NodeBody) -> Self {
        let display_name = LocalizedText::text(browse_name.name.clone());
        Self {
            node_id,
            browse_name,
            display_name,
            description: None,
            write_mask: 0,
            user_write_mask: 0,
            body,
            references: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    /// An object with no event notifier.
    pub fn object(node_id: NodeId, browse_name: QualifiedName) -> Self {
        Self::new(
            node_id,
            browse_name,
            NodeBody::Object {
                event_notifier: EventNotifier::NONE,
            },
        )
    }

    /// NodeClass of the node.
    #[must_use]
    pub const fn node_class(&self) -> NodeClass {
        self.body.node_class()
    }

    /// Variable attributes, if this is a variable.
    #[must_use]
    pub const fn variable(&self) -> Option<&VariableAttributes> {
        match &self.body {
            NodeBody::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable variable attributes, if this is a variable.
    pub fn variable_mut(&mut self) -> Option<&mut VariableAttributes> {
        match &mut self.body {
            NodeBody::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Event notifier bits (none for non-objects).
    #[must_use]
    pub const fn event_notifier(&self) -> EventNotifier {
        match &self.body {
            NodeBody::Object { event_notifier } | NodeBody::View { event_notifier, .. } => {
                *event_notifier
            }
            _ => EventNotifier::NONE,
        }
    }

    /// Target of the forward HasTypeDefinition reference.
    #[must_use]
    pub fn type_definition(&self) -> Option<&NodeId> {
        self.references
            .iter()
            .find(|r| r.is_forward && r.reference_type == ids::HAS_TYPE_DEFINITION)
            .map(|r| &r.target)
    }

    /// Target of the inverse HasSubtype reference.
    #[must_use]
    pub fn super_type(&self) -> Option<&NodeId> {
        self.references
            .iter()
            .find(|r| !r.is_forward && r.reference_type == ids::HAS_SUBTYPE)
            .map(|r| &r.target)
    }

    /// Adds a reference unless an identical one exists. Returns true if added.
    pub fn add_reference(&mut self, reference: Reference) -> bool {
        if self.references.contains(&reference) {
            return false;
        }
        self.references.push(reference);
        true
    }

    /// Removes a matching reference. Returns true if one was removed.
    pub fn remove_reference(&mut self, reference_type: &NodeId, is_forward: bool, target: &NodeId) -> bool {
        let before = self.references.len();
        self.references.retain(|r| {
            !(r.is_forward == is_forward && &r.reference_type == reference_type && &r.target == target)
        });
        before != self.references.len()
    }

    /// Raw attribute value, without access checks.
    pub fn attribute(&self, attribute: AttributeId) -> Result<Variant, StatusCode> {
        if !attribute.is_valid_for(self.node_class()) {
            return Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
        }
        let invalid = Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
        Ok(match attribute {
            AttributeId::NodeId => Variant::NodeId(self.node_id.clone()),
            AttributeId::NodeClass => Variant::Int32(self.node_class() as i32),
            AttributeId::BrowseName => Variant::QualifiedName(self.browse_name.clone()),
            AttributeId::DisplayName => Variant::LocalizedText(self.display_name.clone()),
            AttributeId::Description => {
                Variant::LocalizedText(self.description.clone().unwrap_or_default())
            }
            AttributeId::WriteMask => Variant::UInt32(self.write_mask),
            AttributeId::UserWriteMask => Variant::UInt32(self.user_write_mask),
            AttributeId::IsAbstract => match self.body.is_abstract() {
                Some(v) => Variant::Boolean(v),
                None => return invalid,
            },
            AttributeId::Symmetric => match &self.body {
                NodeBody::ReferenceType { symmetric, .. } => Variant::Boolean(*symmetric),
                _ => return invalid,
            },
            AttributeId::InverseName => match &self.body {
                NodeBody::ReferenceType { inverse_name, .. } => {
                    Variant::LocalizedText(inverse_name.clone().unwrap_or_default())
                }
                _ => return invalid,
            },
            AttributeId::ContainsNoLoops => match &self.body {
                NodeBody::View {
                    contains_no_loops, ..
                } => Variant::Boolean(*contains_no_loops),
                _ => return invalid,
            },
            AttributeId::EventNotifier => Variant::Byte(self.event_notifier().0),
            AttributeId::Value => match &self.body {
                NodeBody::Variable(v) => v.value.value.clone(),
                NodeBody::VariableType { value, .. } => value.clone(),
                _ => return invalid,
            },
            AttributeId::DataType => match &self.body {
                NodeBody::Variable(v) => Variant::NodeId(v.data_type.clone()),
                NodeBody::VariableType { data_type, .. } => Variant::NodeId(data_type.clone()),
                _ => return invalid,
            },
            AttributeId::ValueRank => match &self.body {
                NodeBody::Variable(v) => Variant::Int32(v.value_rank),
                NodeBody::VariableType { value_rank, .. } => Variant::Int32(*value_rank),
                _ => return invalid,
            },
            AttributeId::ArrayDimensions => match self.variable() {
                Some(v) => v
                    .array_dimensions
                    .clone()
                    .map_or(Variant::Empty, Variant::from),
                None => Variant::Empty,
            },
            AttributeId::AccessLevel => match self.variable() {
                Some(v) => Variant::Byte(v.access_level.0),
                None => return invalid,
            },
            AttributeId::UserAccessLevel => match self.variable() {
                Some(v) => Variant::Byte(v.user_access_level.0),
                None => return invalid,
            },
            AttributeId::MinimumSamplingInterval => match self.variable() {
                Some(v) => Variant::Double(v.minimum_sampling_interval),
                None => return invalid,
            },
            AttributeId::Historizing => match self.variable() {
                Some(v) => Variant::Boolean(v.historizing),
                None => return invalid,
            },
            AttributeId::Executable => match &self.body {
                NodeBody::Method { executable, .. } => Variant::Boolean(*executable),
                _ => return invalid,
            },
            AttributeId::UserExecutable => match &self.body {
                NodeBody::Method {
                    user_executable, ..
                } => Variant::Boolean(*user_executable),
                _ => return invalid,
            },
        })
    }

    /// Reads an attribute the way the Read service and monitored items see it.
    ///
    /// A data encoding may only be requested for the Value attribute, and the
    /// in-memory store supports none.
    pub fn read_attribute(
        &self,
        attribute: AttributeId,
        index_range: Option<&IndexRange>,
        data_encoding: Option<&QualifiedName>,
    ) -> Result<DataValue, StatusCode> {
        if !attribute.is_valid_for(self.node_class()) {
            return Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
        }
        if data_encoding.is_some_and(|e| !e.is_null()) {
            return Err(if attribute == AttributeId::Value {
                StatusCode::BAD_DATA_ENCODING_UNSUPPORTED
            } else {
                StatusCode::BAD_DATA_ENCODING_INVALID
            });
        }

        let mut dv = match (&self.body, attribute) {
            (NodeBody::Variable(var), AttributeId::Value) => {
                if !var.access_level.contains(AccessLevel::CURRENT_READ) {
                    return Err(StatusCode::BAD_NOT_READABLE);
                }
                var.value.clone()
            }
            _ => DataValue {
                value: self.attribute(attribute)?,
                status: StatusCode::GOOD,
                source_timestamp: None,
                server_timestamp: Some(Utc::now()),
            },
        };

        if let Some(range) = index_range {
            dv.value = range.read(&dv.value)?;
        }
        Ok(dv)
    }

    /// Writes one attribute, enforcing access level, write mask and type.
    pub fn write_attribute(
        &mut self,
        attribute: AttributeId,
        index_range: Option<&IndexRange>,
        value: &DataValue,
        types: &TypeTree,
    ) -> Result<(), StatusCode> {
        if !attribute.is_valid_for(self.node_class()) {
            return Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
        }

        if attribute == AttributeId::Value {
            if let NodeBody::Variable(var) = &mut self.body {
                return write_variable_value(var, index_range, value, types);
            }
        }

        if self.write_mask & attribute.write_mask_bit() == 0 {
            return Err(StatusCode::BAD_NOT_WRITABLE);
        }
        let v = &value.value;
        let mismatch = StatusCode::BAD_TYPE_MISMATCH;
        match (attribute, &mut self.body) {
            (AttributeId::NodeId | AttributeId::NodeClass, _) => {
                return Err(StatusCode::BAD_NOT_WRITABLE);
            }
            (AttributeId::BrowseName, _) => match v {
                Variant::QualifiedName(q) => self.browse_name = q.clone(),
                _ => return Err(mismatch),
            },
            (AttributeId::DisplayName, _) => match v {
                Variant::LocalizedText(t) => self.display_name = t.clone(),
                _ => return Err(mismatch),
            },
            (AttributeId::Description, _) => match v {
                Variant::LocalizedText(t) => self.description = Some(t.clone()),
                Variant::Empty => self.description = None,
                _ => return Err(mismatch),
            },
            (AttributeId::WriteMask, _) => match v {
                Variant::UInt32(m) => self.write_mask = *m,
                _ => return Err(mismatch),
            },
            (AttributeId::UserWriteMask, _) => match v {
                Variant::UInt32(m) => self.user_write_mask = *m,
                _ => return Err(mismatch),
            },
            (
                AttributeId::EventNotifier,
                NodeBody::Object { event_notifier } | NodeBody::View { event_notifier, .. },
            ) => match v {
                Variant::Byte(b) => *event_notifier = EventNotifier(*b),
                _ => return Err(mismatch),
            },
            (
                AttributeId::IsAbstract,
                NodeBody::ObjectType { is_abstract }
                | NodeBody::VariableType { is_abstract, .. }
                | NodeBody::ReferenceType { is_abstract, .. }
                | NodeBody::DataType { is_abstract },
            ) => match v {
                Variant::Boolean(b) => *is_abstract = *b,
                _ => return Err(mismatch),
            },
            (AttributeId::Symmetric, NodeBody::ReferenceType { symmetric, .. }) => match v {
                Variant::Boolean(b) => *symmetric = *b,
                _ => return Err(mismatch),
            },
            (AttributeId::InverseName, NodeBody::ReferenceType { inverse_name, .. }) => match v {
                Variant::LocalizedText(t) => *inverse_name = Some(t.clone()),
                _ => return Err(mismatch),
            },
            (
                AttributeId::ContainsNoLoops,
                NodeBody::View {
                    contains_no_loops, ..
                },
            ) => match v {
                Variant::Boolean(b) => *contains_no_loops = *b,
                _ => return Err(mismatch),
            },
            (AttributeId::Value, NodeBody::VariableType { value: current, .. }) => {
                *current = match index_range {
                    Some(range) => range.write(current, v)?,
                    None => v.clone(),
                };
            }
            (AttributeId::DataType, NodeBody::Variable(VariableAttributes { data_type, .. }))
            | (AttributeId::DataType, NodeBody::VariableType { data_type, .. }) => match v {
                Variant::NodeId(id) => *data_type = id.clone(),
                _ => return Err(mismatch),
            },
            (AttributeId::ValueRank, NodeBody::Variable(VariableAttributes { value_rank, .. }))
            | (AttributeId::ValueRank, NodeBody::VariableType { value_rank, .. }) => match v {
                Variant::Int32(r) => *value_rank = *r,
                _ => return Err(mismatch),
            },
            (AttributeId::ArrayDimensions, NodeBody::Variable(var)) => {
                var.array_dimensions = match v {
                    Variant::Empty => None,
                    Variant::Array(items) => Some(
                        items
                            .iter()
                            .map(|i| match i {
                                Variant::UInt32(d) => Ok(*d),
                                _ => Err(mismatch),
                            })
                            .collect::<Result<_, _>>()?,
                    ),
                    _ => return Err(mismatch),
                };
            }
            (AttributeId::AccessLevel, NodeBody::Variable(var)) => match v {
                Variant::Byte(b) => var.access_level = AccessLevel(*b),
                _ => return Err(mismatch),
            },
            (AttributeId::UserAccessLevel, NodeBody::Variable(var)) => match v {
                Variant::Byte(b) => var.user_access_level = AccessLevel(*b),
                _ => return Err(mismatch),
            },
            (AttributeId::MinimumSamplingInterval, NodeBody::Variable(var)) => {
                match v.as_f64() {
                    Some(ms) if v.is_numeric() => var.minimum_sampling_interval = ms,
                    _ => return Err(mismatch),
                }
            }
            (AttributeId::Historizing, NodeBody::Variable(var)) => match v {
                Variant::Boolean(b) => var.historizing = *b,
                _ => return Err(mismatch),
            },
            (AttributeId::Executable, NodeBody::Method { executable, .. }) => match v {
                Variant::Boolean(b) => *executable = *b,
                _ => return Err(mismatch),
            },
            (AttributeId::UserExecutable, NodeBody::Method { user_executable, .. }) => match v {
                Variant::Boolean(b) => *user_executable = *b,
                _ => return Err(mismatch),
            },
            _ => return Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
        }
        Ok(())
    }
}

fn write_variable_value(
    var: &mut VariableAttributes,
    index_range: Option<&IndexRange>,
    value: &DataValue,
    types: &TypeTree,
) -> Result<(), StatusCode> {
    if !var.access_level.contains(AccessLevel::CURRENT_WRITE) {
        return Err(StatusCode::BAD_NOT_WRITABLE);
    }
    if !value.status.is_good() && !var.access_level.contains(AccessLevel::STATUS_WRITE) {
        return Err(StatusCode::BAD_WRITE_NOT_SUPPORTED);
    }

    let new_value = match index_range {
        Some(range) => range.write(&var.value.value, &value.value)?,
        None => value.value.clone(),
    };
    if !value_matches_type(&new_value, &var.data_type, var.value_rank, types) {
        return Err(StatusCode::BAD_TYPE_MISMATCH);
    }

    let now = Utc::now();
    var.value = DataValue {
        value: new_value,
        status: value.status,
        source_timestamp: Some(value.source_timestamp.unwrap_or(now)),
        server_timestamp: Some(now),
    };
    Ok(())
}

/// True if `value` may be stored in a variable declared with `data_type` and
/// `value_rank`. Unknown data types accept any value.
#[must_use]
pub fn value_matches_type(value: &Variant, data_type: &NodeId, value_rank: i32, types: &TypeTree) -> bool {
    if value.is_empty() || *data_type == ids::BASE_DATA_TYPE || !types.is_known(data_type) {
        return true;
    }
    match value {
        Variant::Array(items) => {
            if value_rank == -1 {
                return false;
            }
            items
                .iter()
                .all(|item| !item.is_array() && scalar_matches(item, data_type, types))
        }
        scalar => value_rank < 1 && scalar_matches(scalar, data_type, types),
    }
}

fn scalar_matches(value: &Variant, data_type: &NodeId, types: &TypeTree) -> bool {
    let Some(actual) = value.data_type() else {
        return true;
    };
    if types.is_type_of(&actual, data_type) {
        return true;
    }
    // Enumerations travel as Int32.
    actual == ids::INT32 && types.is_type_of(data_type, &ids::ENUMERATION)
}

/// Value given to standard-namespace variables that were defined without one.
#[must_use]
pub fn default_value(data_type: &NodeId, value_rank: i32, types: &TypeTree) -> Variant {
    if value_rank >= 0 {
        return Variant::Array(Vec::new());
    }
    if *data_type == ids::BOOLEAN {
        Variant::Boolean(false)
    } else if *data_type == ids::STRING {
        Variant::String(String::new())
    } else if *data_type == ids::LOCALIZED_TEXT {
        Variant::LocalizedText(LocalizedText::default())
    } else if *data_type == ids::QUALIFIED_NAME {
        Variant::QualifiedName(QualifiedName::default())
    } else if *data_type == ids::FLOAT {
        Variant::Float(0.0)
    } else if types.is_type_of(data_type, &ids::UINTEGER) {
        Variant::UInt32(0)
    } else if types.is_numeric(data_type) {
        if *data_type == ids::DOUBLE || *data_type == ids::NUMBER {
            Variant::Double(0.0)
        } else {
            Variant::Int32(0)
        }
    } else {
        Variant::Empty
    }
}

/// Serializable description of a node and its children.
///
/// ```
/// use uaspace::{NodeDefinition, NodeId, QualifiedName, VariableKind};
///
/// let def = NodeDefinition::object(NodeId::numeric(2, 1), QualifiedName::new(2, "Pump"))
///     .with_child(
///         NodeDefinition::variable(NodeId::numeric(2, 2), QualifiedName::new(2, "Speed"), 0.0f64)
///             .with_kind(VariableKind::AnalogItem),
///     );
/// assert_eq!(def.children.len(), 1);
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<LocalizedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LocalizedText>,
    #[serde(default)]
    pub write_mask: u32,
    pub body: NodeBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_definition: Option<NodeId>,
    /// Supertype of a type node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_type: Option<NodeId>,
    /// Reference type linking this node to its parent definition. Defaults to
    /// HasProperty for properties and HasComponent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference_type: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDefinition>,
}

impl NodeDefinition {
    /// A definition with no references or children.
    pub fn new(node_id: NodeId, browse_name: QualifiedName, body: NodeBody) -> Self {
        Self {
            node_id,
            browse_name,
            display_name: None,
            description: None,
            write_mask: 0,
            body,
            type_definition: None,
            super_type: None,
            parent_reference_type: None,
            references: Vec::new(),
            children: Vec::new(),
        }
    }

    /// An object of BaseObjectType.
    pub fn object(node_id: NodeId, browse_name: QualifiedName) -> Self {
        Self::new(
            node_id,
            browse_name,
            NodeBody::Object {
                event_notifier: EventNotifier::NONE,
            },
        )
        .with_type_definition(ids::BASE_OBJECT_TYPE)
    }

    /// An object of FolderType.
    pub fn folder(node_id: NodeId, browse_name: QualifiedName) -> Self {
        Self::object(node_id, browse_name).with_type_definition(ids::FOLDER_TYPE)
    }

    /// A readable variable; the data type is taken from the initial value.
    pub fn variable(node_id: NodeId, browse_name: QualifiedName, value: impl Into<Variant>) -> Self {
        let value = value.into();
        let value_rank = if value.is_array() { 1 } else { -1 };
        let data_type = value.data_type().unwrap_or(ids::BASE_DATA_TYPE);
        Self::new(
            node_id,
            browse_name,
            NodeBody::Variable(VariableAttributes {
                value: DataValue::new(value),
                data_type,
                value_rank,
                ..VariableAttributes::default()
            }),
        )
        .with_type_definition(ids::BASE_DATA_VARIABLE_TYPE)
    }

    /// A property variable (linked with HasProperty).
    pub fn property(node_id: NodeId, browse_name: QualifiedName, value: impl Into<Variant>) -> Self {
        Self::variable(node_id, browse_name, value)
            .with_kind(VariableKind::Property)
            .with_type_definition(ids::PROPERTY_TYPE)
    }

    /// An executable method.
    pub fn method(node_id: NodeId, browse_name: QualifiedName) -> Self {
        Self::new(
            node_id,
            browse_name,
            NodeBody::Method {
                executable: true,
                user_executable: true,
            },
        )
    }

    /// An object type below `super_type`.
    pub fn object_type(node_id: NodeId, browse_name: QualifiedName, super_type: NodeId) -> Self {
        let mut def = Self::new(node_id, browse_name, NodeBody::ObjectType { is_abstract: false });
        def.super_type = Some(super_type);
        def
    }

    /// A reference type below `super_type`.
    pub fn reference_type(node_id: NodeId, browse_name: QualifiedName, super_type: NodeId) -> Self {
        let mut def = Self::new(
            node_id,
            browse_name,
            NodeBody::ReferenceType {
                is_abstract: false,
                symmetric: false,
                inverse_name: None,
            },
        );
        def.super_type = Some(super_type);
        def
    }

    /// A view node.
    pub fn view(node_id: NodeId, browse_name: QualifiedName) -> Self {
        Self::new(
            node_id,
            browse_name,
            NodeBody::View {
                event_notifier: EventNotifier::NONE,
                contains_no_loops: true,
            },
        )
    }

    /// Adds a child linked by the default hierarchical reference.
    #[must_use]
    pub fn with_child(mut self, child: NodeDefinition) -> Self {
        self.children.push(child);
        self
    }

    /// Adds a non-hierarchical reference.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    /// Sets the HasTypeDefinition target.
    #[must_use]
    pub fn with_type_definition(mut self, type_definition: NodeId) -> Self {
        self.type_definition = Some(type_definition);
        self
    }

    /// Sets the reference type linking this node to its parent.
    #[must_use]
    pub fn with_parent_reference_type(mut self, reference_type: NodeId) -> Self {
        self.parent_reference_type = Some(reference_type);
        self
    }

    /// Overrides the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: LocalizedText) -> Self {
        self.display_name = Some(display_name);
        self
    }

    /// Sets the WriteMask attribute.
    #[must_use]
    pub const fn with_write_mask(mut self, write_mask: u32) -> Self {
        self.write_mask = write_mask;
        self
    }

    /// Sets the kind of a variable definition; no effect on other classes.
    #[must_use]
    pub fn with_kind(mut self, kind: VariableKind) -> Self {
        if let NodeBody::Variable(var) = &mut self.body {
            var.kind = kind;
        }
        self
    }

    /// Sets both access level and user access level.
    #[must_use]
    pub fn with_access_level(mut self, access: AccessLevel) -> Self {
        if let NodeBody::Variable(var) = &mut self.body {
            var.access_level = access;
            var.user_access_level = access;
        }
        self
    }

    /// Overrides the data type taken from the initial value.
    #[must_use]
    pub fn with_data_type(mut self, data_type: NodeId) -> Self {
        if let NodeBody::Variable(var) = &mut self.body {
            var.data_type = data_type;
        }
        self
    }

    /// Fastest sampling interval the variable supports, in milliseconds.
    #[must_use]
    pub fn with_minimum_sampling_interval(mut self, ms: f64) -> Self {
        if let NodeBody::Variable(var) = &mut self.body {
            var.minimum_sampling_interval = ms;
        }
        self
    }

    /// Sets the event notifier bits of an object or view.
    #[must_use]
    pub fn with_event_notifier(mut self, notifier: EventNotifier) -> Self {
        match &mut self.body {
            NodeBody::Object { event_notifier } | NodeBody::View { event_notifier, .. } => {
                *event_notifier = notifier;
            }
            _ => {}
        }
        self
    }

    /// Reference type used to link this definition under a parent.
    #[must_use]
    pub fn link_reference_type(&self) -> NodeId {
        if let Some(rt) = &self.parent_reference_type {
            return rt.clone();
        }
        match &self.body {
            NodeBody::Variable(v) if v.kind == VariableKind::Property => ids::HAS_PROPERTY,
            _ => ids::HAS_COMPONENT,
        }
    }

    /// Builds the node (without children) and returns the child definitions.
    #[must_use]
    pub fn into_node(self) -> (Node, Vec<NodeDefinition>) {
        let mut node = Node::new(self.node_id, self.browse_name, self.body);
        if let Some(dn) = self.display_name {
            node.display_name = dn;
        }
        node.description = self.description;
        node.write_mask = self.write_mask;
        node.user_write_mask = self.write_mask;
        if let Some(td) = self.type_definition {
            node.add_reference(Reference::forward(ids::HAS_TYPE_DEFINITION, td));
        }
        if let Some(st) = self.super_type {
            node.add_reference(Reference::inverse(ids::HAS_SUBTYPE, st));
        }
        for r in self.references {
            node.add_reference(r);
        }
        (node, self.children)
    }
}

/// Loads a JSON array of node definitions.
pub fn load_node_set(path: impl AsRef<Path>) -> UaResult<Vec<NodeDefinition>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analog(value: f64) -> Node {
        let (node, _) = NodeDefinition::variable(NodeId::numeric(1, 10), QualifiedName::new(1, "Temp"), value)
            .with_kind(VariableKind::AnalogItem)
            .with_access_level(AccessLevel::READ_WRITE)
            .into_node();
        node
    }

    #[test]
    fn test_semantic_property_table() {
        use browse_names as b;
        assert!(VariableKind::AnalogItem.is_semantic_property(b::EU_RANGE));
        assert!(VariableKind::AnalogItem.is_semantic_property(b::ENGINEERING_UNITS));
        assert!(!VariableKind::AnalogItem.is_semantic_property(b::INSTRUMENT_RANGE));
        assert!(VariableKind::TwoStateDiscrete.is_semantic_property(b::TRUE_STATE));
        assert!(VariableKind::MultiStateDiscrete.is_semantic_property(b::ENUM_STRINGS));
        assert!(!VariableKind::MultiStateValueDiscrete.is_semantic_property(b::ENUM_STRINGS));
        assert!(VariableKind::ArrayItem.is_semantic_property(b::INSTRUMENT_RANGE));
        assert!(VariableKind::XyArrayItem.is_semantic_property(b::X_AXIS_DEFINITION));
        assert!(VariableKind::YArrayItem.is_semantic_property(b::TITLE));
        assert!(!VariableKind::YArrayItem.is_semantic_property(b::Y_AXIS_DEFINITION));
        assert!(VariableKind::ImageItem.is_semantic_property(b::Y_AXIS_DEFINITION));
        assert!(VariableKind::CubeItem.is_semantic_property(b::Z_AXIS_DEFINITION));
        assert!(VariableKind::NDimensionArrayItem.is_semantic_property(b::AXIS_DEFINITION));
        assert!(!VariableKind::Plain.is_semantic_property(b::EU_RANGE));
    }

    #[test]
    fn test_read_attribute_rules() {
        let node = analog(3.5);
        let dv = node.read_attribute(AttributeId::Value, None, None).unwrap();
        assert_eq!(dv.value, Variant::Double(3.5));

        assert_eq!(
            node.read_attribute(AttributeId::EventNotifier, None, None).unwrap_err(),
            StatusCode::BAD_ATTRIBUTE_ID_INVALID
        );
        let enc = QualifiedName::new(0, "Default Binary");
        assert_eq!(
            node.read_attribute(AttributeId::Value, None, Some(&enc)).unwrap_err(),
            StatusCode::BAD_DATA_ENCODING_UNSUPPORTED
        );
        assert_eq!(
            node.read_attribute(AttributeId::DisplayName, None, Some(&enc)).unwrap_err(),
            StatusCode::BAD_DATA_ENCODING_INVALID
        );
        let name = node.read_attribute(AttributeId::BrowseName, None, None).unwrap();
        assert_eq!(name.value, Variant::QualifiedName(QualifiedName::new(1, "Temp")));
    }

    #[test]
    fn test_write_value_checks_access_and_type() {
        let types = TypeTree::with_standard_types();
        let mut node = analog(1.0);
        node.write_attribute(AttributeId::Value, None, &DataValue::new(2.0f64), &types)
            .unwrap();
        assert_eq!(node.variable().unwrap().value.value, Variant::Double(2.0));

        assert_eq!(
            node.write_attribute(AttributeId::Value, None, &DataValue::new("nope"), &types)
                .unwrap_err(),
            StatusCode::BAD_TYPE_MISMATCH
        );

        node.variable_mut().unwrap().access_level = AccessLevel::CURRENT_READ;
        assert_eq!(
            node.write_attribute(AttributeId::Value, None, &DataValue::new(5.0f64), &types)
                .unwrap_err(),
            StatusCode::BAD_NOT_WRITABLE
        );
    }

    #[test]
    fn test_write_mask_guards_other_attributes() {
        let types = TypeTree::with_standard_types();
        let mut node = analog(1.0);
        let text = DataValue::new(Variant::LocalizedText(LocalizedText::text("Renamed")));
        assert_eq!(
            node.write_attribute(AttributeId::DisplayName, None, &text, &types)
                .unwrap_err(),
            StatusCode::BAD_NOT_WRITABLE
        );
        node.write_mask = AttributeId::DisplayName.write_mask_bit();
        node.write_attribute(AttributeId::DisplayName, None, &text, &types)
            .unwrap();
        assert_eq!(node.display_name.text, "Renamed");
    }

    #[test]
    fn test_default_values() {
        let types = TypeTree::with_standard_types();
        assert_eq!(default_value(&ids::BOOLEAN, -1, &types), Variant::Boolean(false));
        assert_eq!(default_value(&ids::INT32, -1, &types), Variant::Int32(0));
        assert_eq!(default_value(&ids::UINT16, -1, &types), Variant::UInt32(0));
        assert_eq!(default_value(&ids::DOUBLE, -1, &types), Variant::Double(0.0));
        assert_eq!(default_value(&ids::DOUBLE, 1, &types), Variant::Array(Vec::new()));
        assert_eq!(default_value(&ids::GUID, -1, &types), Variant::Empty);
    }

    #[test]
    fn test_definition_json_roundtrip() {
        let def = NodeDefinition::folder(NodeId::numeric(2, 1), QualifiedName::new(2, "Plant"))
            .with_child(NodeDefinition::property(
                NodeId::numeric(2, 2),
                QualifiedName::new(2, "Serial"),
                "SN-1",
            ));
        let json = serde_json::to_string(&def).unwrap();
        let back: NodeDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.children.len(), 1);
        assert_eq!(back.children[0].link_reference_type(), ids::HAS_PROPERTY);
        let (node, children) = back.into_node();
        assert_eq!(node.type_definition(), Some(&ids::FOLDER_TYPE));
        assert_eq!(children.len(), 1);
    }
}
