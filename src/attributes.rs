//! Attribute identifiers, node classes and the flag sets attached to nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node attribute identifiers (wire values 1..=22).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass = 2,
    BrowseName = 3,
    DisplayName = 4,
    Description = 5,
    WriteMask = 6,
    UserWriteMask = 7,
    IsAbstract = 8,
    Symmetric = 9,
    InverseName = 10,
    ContainsNoLoops = 11,
    EventNotifier = 12,
    Value = 13,
    DataType = 14,
    ValueRank = 15,
    ArrayDimensions = 16,
    AccessLevel = 17,
    UserAccessLevel = 18,
    MinimumSamplingInterval = 19,
    Historizing = 20,
    Executable = 21,
    UserExecutable = 22,
}

impl AttributeId {
    /// Decodes a wire attribute id.
    #[must_use]
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::NodeId,
            2 => Self::NodeClass,
            3 => Self::BrowseName,
            4 => Self::DisplayName,
            5 => Self::Description,
            6 => Self::WriteMask,
            7 => Self::UserWriteMask,
            8 => Self::IsAbstract,
            9 => Self::Symmetric,
            10 => Self::InverseName,
            11 => Self::ContainsNoLoops,
            12 => Self::EventNotifier,
            13 => Self::Value,
            14 => Self::DataType,
            15 => Self::ValueRank,
            16 => Self::ArrayDimensions,
            17 => Self::AccessLevel,
            18 => Self::UserAccessLevel,
            19 => Self::MinimumSamplingInterval,
            20 => Self::Historizing,
            21 => Self::Executable,
            22 => Self::UserExecutable,
            _ => return None,
        })
    }

    /// True if nodes of `class` carry this attribute.
    #[must_use]
    pub const fn is_valid_for(self, class: NodeClass) -> bool {
        use NodeClass as C;
        match self {
            Self::NodeId
            | Self::NodeClass
            | Self::BrowseName
            | Self::DisplayName
            | Self::Description
            | Self::WriteMask
            | Self::UserWriteMask => true,
            Self::IsAbstract => matches!(
                class,
                C::ObjectType | C::VariableType | C::ReferenceType | C::DataType
            ),
            Self::Symmetric | Self::InverseName => matches!(class, C::ReferenceType),
            Self::ContainsNoLoops => matches!(class, C::View),
            Self::EventNotifier => matches!(class, C::Object | C::View),
            Self::Value => matches!(class, C::Variable | C::VariableType),
            Self::DataType | Self::ValueRank | Self::ArrayDimensions => {
                matches!(class, C::Variable | C::VariableType)
            }
            Self::AccessLevel
            | Self::UserAccessLevel
            | Self::MinimumSamplingInterval
            | Self::Historizing => matches!(class, C::Variable),
            Self::Executable | Self::UserExecutable => matches!(class, C::Method),
        }
    }

    /// Bit in the WriteMask that allows writing this attribute.
    #[must_use]
    pub const fn write_mask_bit(self) -> u32 {
        match self {
            Self::AccessLevel => 1 << 0,
            Self::ArrayDimensions => 1 << 1,
            Self::BrowseName => 1 << 2,
            Self::ContainsNoLoops => 1 << 3,
            Self::DataType => 1 << 4,
            Self::Description => 1 << 5,
            Self::DisplayName => 1 << 6,
            Self::EventNotifier => 1 << 7,
            Self::Executable => 1 << 8,
            Self::Historizing => 1 << 9,
            Self::InverseName => 1 << 10,
            Self::IsAbstract => 1 << 11,
            Self::MinimumSamplingInterval => 1 << 12,
            Self::NodeClass => 1 << 13,
            Self::NodeId => 1 << 14,
            Self::Symmetric => 1 << 15,
            Self::UserAccessLevel => 1 << 16,
            Self::UserExecutable => 1 << 17,
            Self::UserWriteMask => 1 << 18,
            Self::ValueRank => 1 << 19,
            Self::WriteMask => 1 << 20,
            Self::Value => 1 << 21,
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Category of a node.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum NodeClass {
    Object = 1,
    Variable = 2,
    Method = 4,
    ObjectType = 8,
    VariableType = 16,
    ReferenceType = 32,
    DataType = 64,
    View = 128,
}

impl NodeClass {
    /// The bit this class occupies in a browse node-class mask.
    #[must_use]
    pub const fn mask_bit(self) -> u32 {
        self as u32
    }

    /// True for the four type classes.
    #[must_use]
    pub const fn is_type(self) -> bool {
        matches!(
            self,
            Self::ObjectType | Self::VariableType | Self::ReferenceType | Self::DataType
        )
    }
}

/// Variable access level bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessLevel(pub u8);

#[allow(missing_docs)]
impl AccessLevel {
    pub const NONE: Self = Self(0);
    pub const CURRENT_READ: Self = Self(0x01);
    pub const CURRENT_WRITE: Self = Self(0x02);
    pub const HISTORY_READ: Self = Self(0x04);
    pub const HISTORY_WRITE: Self = Self(0x08);
    pub const SEMANTIC_CHANGE: Self = Self(0x10);
    pub const STATUS_WRITE: Self = Self(0x20);
    pub const TIMESTAMP_WRITE: Self = Self(0x40);
    pub const READ_WRITE: Self = Self(0x03);

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits set in either value.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        Self::CURRENT_READ
    }
}

/// Event notifier bits on objects and views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventNotifier(pub u8);

#[allow(missing_docs)]
impl EventNotifier {
    pub const NONE: Self = Self(0);
    pub const SUBSCRIBE_TO_EVENTS: Self = Self(0x01);
    pub const HISTORY_READ: Self = Self(0x04);
    pub const HISTORY_WRITE: Self = Self(0x08);

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Direction filter for browse and path translation.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowseDirection {
    #[default]
    Forward,
    Inverse,
    Both,
}

impl BrowseDirection {
    /// True if a reference with the given direction passes this filter.
    #[must_use]
    pub const fn accepts(self, is_forward: bool) -> bool {
        match self {
            Self::Forward => is_forward,
            Self::Inverse => !is_forward,
            Self::Both => true,
        }
    }
}

/// Which fields of a browse result the client wants filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrowseResultMask(pub u32);

#[allow(missing_docs)]
impl BrowseResultMask {
    pub const NONE: Self = Self(0);
    pub const REFERENCE_TYPE_ID: Self = Self(0x01);
    pub const IS_FORWARD: Self = Self(0x02);
    pub const NODE_CLASS: Self = Self(0x04);
    pub const BROWSE_NAME: Self = Self(0x08);
    pub const DISPLAY_NAME: Self = Self(0x10);
    pub const TYPE_DEFINITION: Self = Self(0x20);
    pub const ALL: Self = Self(0x3F);

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for BrowseResultMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Governs whether a monitored item samples and/or reports.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    Disabled,
    Sampling,
    #[default]
    Reporting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_roundtrip_ids() {
        for raw in 1..=22 {
            let attr = AttributeId::from_u32(raw).unwrap();
            assert_eq!(attr as u32, raw);
        }
        assert!(AttributeId::from_u32(0).is_none());
        assert!(AttributeId::from_u32(99).is_none());
    }

    #[test]
    fn test_attribute_legality_by_class() {
        assert!(AttributeId::Value.is_valid_for(NodeClass::Variable));
        assert!(!AttributeId::Value.is_valid_for(NodeClass::Object));
        assert!(AttributeId::EventNotifier.is_valid_for(NodeClass::Object));
        assert!(AttributeId::EventNotifier.is_valid_for(NodeClass::View));
        assert!(!AttributeId::EventNotifier.is_valid_for(NodeClass::Variable));
        assert!(AttributeId::Executable.is_valid_for(NodeClass::Method));
        assert!(AttributeId::IsAbstract.is_valid_for(NodeClass::DataType));
        assert!(AttributeId::BrowseName.is_valid_for(NodeClass::Method));
    }

    #[test]
    fn test_access_level_bits() {
        let rw = AccessLevel::READ_WRITE;
        assert!(rw.contains(AccessLevel::CURRENT_READ));
        assert!(rw.contains(AccessLevel::CURRENT_WRITE));
        assert!(!rw.contains(AccessLevel::HISTORY_READ));
        assert!(rw.union(AccessLevel::HISTORY_READ).contains(AccessLevel::HISTORY_READ));
    }

    #[test]
    fn test_browse_direction() {
        assert!(BrowseDirection::Forward.accepts(true));
        assert!(!BrowseDirection::Forward.accepts(false));
        assert!(BrowseDirection::Both.accepts(false));
    }
}
