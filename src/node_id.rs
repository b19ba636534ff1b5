//! Node identifiers and naming types.
//!
//! - **NodeId**: namespace-qualified identifier (numeric, string, GUID, opaque)
//! - **QualifiedName**: namespace-qualified browse name
//! - **LocalizedText**: display text with an optional locale
//! - [`ids`]: well-known namespace-zero identifiers used by the engine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{UaError, ValidationError};

/// Namespace-qualified node identifier.
///
/// # Examples
///
/// ```
/// use uaspace::NodeId;
///
/// let id = NodeId::string(2, "Boiler.Temperature");
/// assert_eq!(id.to_string(), "ns=2;s=Boiler.Temperature");
///
/// let parsed: NodeId = "ns=2;i=1001".parse().unwrap();
/// assert_eq!(parsed, NodeId::numeric(2, 1001));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = standard namespace).
    pub namespace: u16,
    /// The identifier within the namespace.
    pub identifier: Identifier,
}

/// The identifier part of a [`NodeId`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
    Opaque(Vec<u8>),
}

impl NodeId {
    /// Numeric identifier.
    #[inline]
    #[must_use]
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// String identifier.
    #[inline]
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    /// GUID identifier.
    #[inline]
    #[must_use]
    pub const fn guid(namespace: u16, value: Uuid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    /// Opaque (byte string) identifier.
    #[inline]
    #[must_use]
    pub const fn opaque(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(value),
        }
    }

    /// The null node id (`ns=0;i=0`).
    #[must_use]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// True for `ns=0;i=0` and for empty string/opaque identifiers.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match &self.identifier {
            Identifier::Numeric(v) => self.namespace == 0 && *v == 0,
            Identifier::String(s) => s.is_empty(),
            Identifier::Guid(g) => g.is_nil(),
            Identifier::Opaque(b) => b.is_empty(),
        }
    }

    /// The string identifier, if this is a string node id.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.identifier {
            Identifier::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={v}"),
            Identifier::String(v) => write!(f, "s={v}"),
            Identifier::Guid(v) => write!(f, "g={v}"),
            Identifier::Opaque(v) => {
                f.write_str("b=")?;
                for byte in v {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

fn invalid_node_id(input: &str, reason: &str) -> UaError {
    UaError::Validation(ValidationError::InvalidConfiguration {
        reason: format!("invalid node id '{input}': {reason}"),
    })
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses `ns=<n>;<t>=<value>` or `<t>=<value>` where `t` is one of
    /// `i`, `s`, `g`, `b` (opaque identifiers are hex encoded).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| invalid_node_id(s, "missing identifier after namespace"))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid_node_id(s, "invalid namespace index"))?;
                (ns, rest)
            }
            None => (0, s),
        };

        let identifier = if let Some(v) = rest.strip_prefix("i=") {
            Identifier::Numeric(
                v.parse()
                    .map_err(|_| invalid_node_id(s, "invalid numeric identifier"))?,
            )
        } else if let Some(v) = rest.strip_prefix("s=") {
            Identifier::String(v.to_string())
        } else if let Some(v) = rest.strip_prefix("g=") {
            Identifier::Guid(
                Uuid::parse_str(v).map_err(|e| invalid_node_id(s, &format!("invalid GUID: {e}")))?,
            )
        } else if let Some(v) = rest.strip_prefix("b=") {
            Identifier::Opaque(decode_hex(v).ok_or_else(|| invalid_node_id(s, "invalid hex"))?)
        } else {
            return Err(invalid_node_id(s, "expected i=, s=, g= or b="));
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

/// Namespace-qualified browse name.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    /// A name in `namespace`.
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// True for the empty name.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.namespace, self.name)
        }
    }
}

/// Human-readable text with an optional locale.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LocalizedText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    pub text: String,
}

impl LocalizedText {
    /// Text in `locale`.
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            locale: Some(locale.into()),
            text: text.into(),
        }
    }

    /// Text without a locale.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            locale: None,
            text: text.into(),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Well-known namespace-zero node identifiers.
#[allow(missing_docs)]
pub mod ids {
    use super::NodeId;

    // Reference types
    pub const REFERENCES: NodeId = NodeId::numeric(0, 31);
    pub const NON_HIERARCHICAL_REFERENCES: NodeId = NodeId::numeric(0, 32);
    pub const HIERARCHICAL_REFERENCES: NodeId = NodeId::numeric(0, 33);
    pub const HAS_CHILD: NodeId = NodeId::numeric(0, 34);
    pub const ORGANIZES: NodeId = NodeId::numeric(0, 35);
    pub const HAS_EVENT_SOURCE: NodeId = NodeId::numeric(0, 36);
    pub const HAS_MODELLING_RULE: NodeId = NodeId::numeric(0, 37);
    pub const HAS_ENCODING: NodeId = NodeId::numeric(0, 38);
    pub const HAS_TYPE_DEFINITION: NodeId = NodeId::numeric(0, 40);
    pub const GENERATES_EVENT: NodeId = NodeId::numeric(0, 41);
    pub const AGGREGATES: NodeId = NodeId::numeric(0, 44);
    pub const HAS_SUBTYPE: NodeId = NodeId::numeric(0, 45);
    pub const HAS_PROPERTY: NodeId = NodeId::numeric(0, 46);
    pub const HAS_COMPONENT: NodeId = NodeId::numeric(0, 47);
    pub const HAS_NOTIFIER: NodeId = NodeId::numeric(0, 48);
    pub const HAS_ORDERED_COMPONENT: NodeId = NodeId::numeric(0, 49);

    // Data types
    pub const BOOLEAN: NodeId = NodeId::numeric(0, 1);
    pub const SBYTE: NodeId = NodeId::numeric(0, 2);
    pub const BYTE: NodeId = NodeId::numeric(0, 3);
    pub const INT16: NodeId = NodeId::numeric(0, 4);
    pub const UINT16: NodeId = NodeId::numeric(0, 5);
    pub const INT32: NodeId = NodeId::numeric(0, 6);
    pub const UINT32: NodeId = NodeId::numeric(0, 7);
    pub const INT64: NodeId = NodeId::numeric(0, 8);
    pub const UINT64: NodeId = NodeId::numeric(0, 9);
    pub const FLOAT: NodeId = NodeId::numeric(0, 10);
    pub const DOUBLE: NodeId = NodeId::numeric(0, 11);
    pub const STRING: NodeId = NodeId::numeric(0, 12);
    pub const DATE_TIME: NodeId = NodeId::numeric(0, 13);
    pub const GUID: NodeId = NodeId::numeric(0, 14);
    pub const BYTE_STRING: NodeId = NodeId::numeric(0, 15);
    pub const NODE_ID: NodeId = NodeId::numeric(0, 17);
    pub const STATUS_CODE: NodeId = NodeId::numeric(0, 19);
    pub const QUALIFIED_NAME: NodeId = NodeId::numeric(0, 20);
    pub const LOCALIZED_TEXT: NodeId = NodeId::numeric(0, 21);
    pub const STRUCTURE: NodeId = NodeId::numeric(0, 22);
    pub const BASE_DATA_TYPE: NodeId = NodeId::numeric(0, 24);
    pub const NUMBER: NodeId = NodeId::numeric(0, 26);
    pub const INTEGER: NodeId = NodeId::numeric(0, 27);
    pub const UINTEGER: NodeId = NodeId::numeric(0, 28);
    pub const ENUMERATION: NodeId = NodeId::numeric(0, 29);
    pub const RANGE: NodeId = NodeId::numeric(0, 884);
    pub const EU_INFORMATION: NodeId = NodeId::numeric(0, 887);

    // Object and variable types
    pub const BASE_OBJECT_TYPE: NodeId = NodeId::numeric(0, 58);
    pub const FOLDER_TYPE: NodeId = NodeId::numeric(0, 61);
    pub const BASE_VARIABLE_TYPE: NodeId = NodeId::numeric(0, 62);
    pub const BASE_DATA_VARIABLE_TYPE: NodeId = NodeId::numeric(0, 63);
    pub const PROPERTY_TYPE: NodeId = NodeId::numeric(0, 68);
    pub const BASE_EVENT_TYPE: NodeId = NodeId::numeric(0, 2041);
    pub const CONDITION_TYPE: NodeId = NodeId::numeric(0, 2782);
    pub const EVENT_QUEUE_OVERFLOW_EVENT_TYPE: NodeId = NodeId::numeric(0, 3035);

    // Well-known objects
    pub const ROOT_FOLDER: NodeId = NodeId::numeric(0, 84);
    pub const OBJECTS_FOLDER: NodeId = NodeId::numeric(0, 85);
    pub const SERVER: NodeId = NodeId::numeric(0, 2253);

    // Aggregate functions
    pub const AGGREGATE_INTERPOLATIVE: NodeId = NodeId::numeric(0, 2341);
    pub const AGGREGATE_AVERAGE: NodeId = NodeId::numeric(0, 2342);
    pub const AGGREGATE_MINIMUM: NodeId = NodeId::numeric(0, 2346);
    pub const AGGREGATE_MAXIMUM: NodeId = NodeId::numeric(0, 2347);
    pub const AGGREGATE_COUNT: NodeId = NodeId::numeric(0, 2352);
}

/// Standard browse names of properties the engine inspects.
#[allow(missing_docs)]
pub mod browse_names {
    pub const EU_RANGE: &str = "EURange";
    pub const INSTRUMENT_RANGE: &str = "InstrumentRange";
    pub const ENGINEERING_UNITS: &str = "EngineeringUnits";
    pub const TITLE: &str = "Title";
    pub const AXIS_DEFINITION: &str = "AxisDefinition";
    pub const X_AXIS_DEFINITION: &str = "XAxisDefinition";
    pub const Y_AXIS_DEFINITION: &str = "YAxisDefinition";
    pub const Z_AXIS_DEFINITION: &str = "ZAxisDefinition";
    pub const FALSE_STATE: &str = "FalseState";
    pub const TRUE_STATE: &str = "TrueState";
    pub const ENUM_STRINGS: &str = "EnumStrings";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let cases = [
            NodeId::numeric(0, 85),
            NodeId::numeric(3, 1001),
            NodeId::string(2, "Line1.Pump"),
            NodeId::guid(1, Uuid::new_v4()),
            NodeId::opaque(4, vec![0xde, 0xad, 0x01]),
        ];
        for id in cases {
            let parsed: NodeId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=1".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("b=abc".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_null() {
        assert!(NodeId::null().is_null());
        assert!(NodeId::string(2, "").is_null());
        assert!(!NodeId::numeric(1, 0).is_null());
    }

    #[test]
    fn test_qualified_name_display() {
        assert_eq!(QualifiedName::new(0, "EURange").to_string(), "EURange");
        assert_eq!(QualifiedName::new(2, "Pump").to_string(), "2:Pump");
    }
}
