//! Synthetic NodeIds for components of dynamically materialized subtrees.
//!
//! Format (string identifier): `<rootType>:<rootId>[?<componentPath>]`.
//! Literal `&` and `?` inside the root id are escaped by prefixing them with
//! `&`. The component path follows the first unescaped `?` verbatim, with
//! segments separated by `/`.

use std::fmt::Write as _;

use crate::node_id::{Identifier, NodeId};

/// A decomposed synthetic NodeId.
///
/// ```
/// use uaspace::{NodeId, ParsedNodeId};
///
/// let id = NodeId::string(2, "7:Pump&?1?Motor/Speed");
/// let parsed = ParsedNodeId::parse(&id).unwrap();
/// assert_eq!(parsed.root_type, 7);
/// assert_eq!(parsed.root_id, "Pump?1");
/// assert_eq!(parsed.component_path.as_deref(), Some("Motor/Speed"));
/// assert_eq!(parsed.construct(), id);
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedNodeId {
    pub namespace: u16,
    /// Application-defined discriminator for the kind of root.
    pub root_type: u32,
    pub root_id: String,
    pub component_path: Option<String>,
}

impl ParsedNodeId {
    /// A root id without a component path.
    pub fn new(namespace: u16, root_type: u32, root_id: impl Into<String>) -> Self {
        Self {
            namespace,
            root_type,
            root_id: root_id.into(),
            component_path: None,
        }
    }

    /// Parses a NodeId; anything that is not a well-formed synthetic string id
    /// yields `None`.
    #[must_use]
    pub fn parse(node_id: &NodeId) -> Option<Self> {
        let Identifier::String(text) = &node_id.identifier else {
            return None;
        };
        let (type_part, rest) = text.split_once(':')?;
        let root_type = parse_root_type(type_part)?;

        let mut root_id = String::with_capacity(rest.len());
        let mut component_path = None;
        let mut chars = rest.char_indices();
        while let Some((pos, ch)) = chars.next() {
            match ch {
                '&' => match chars.next() {
                    Some((_, escaped @ ('&' | '?'))) => root_id.push(escaped),
                    _ => return None,
                },
                '?' => {
                    component_path = Some(rest[pos + 1..].to_string());
                    break;
                }
                other => root_id.push(other),
            }
        }

        Some(Self {
            namespace: node_id.namespace,
            root_type,
            root_id,
            component_path,
        })
    }

    /// Encodes back into a string NodeId.
    #[must_use]
    pub fn construct(&self) -> NodeId {
        let mut text = self.encoded_root();
        if let Some(path) = &self.component_path {
            text.push('?');
            text.push_str(path);
        }
        NodeId::string(self.namespace, text)
    }

    /// NodeId of the subtree root (no component path).
    #[must_use]
    pub fn root_node_id(&self) -> NodeId {
        NodeId::string(self.namespace, self.encoded_root())
    }

    /// Id of the named component under this node.
    #[must_use]
    pub fn child(&self, component: &str) -> Self {
        let component_path = match &self.component_path {
            Some(path) if !path.is_empty() => format!("{path}/{component}"),
            _ => component.to_string(),
        };
        Self {
            component_path: Some(component_path),
            ..self.clone()
        }
    }

    fn encoded_root(&self) -> String {
        let mut text = String::with_capacity(self.root_id.len() + 8);
        let _ = write!(text, "{}:", self.root_type);
        for ch in self.root_id.chars() {
            if matches!(ch, '&' | '?') {
                text.push('&');
            }
            text.push(ch);
        }
        text
    }
}

/// Decimal root type without sign or leading zeros, so parsing is lossless.
fn parse_root_type(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) {
        let id = NodeId::string(3, text);
        let parsed = ParsedNodeId::parse(&id).unwrap_or_else(|| panic!("{text} should parse"));
        assert_eq!(parsed.construct(), id, "round trip of {text}");
    }

    #[test]
    fn test_roundtrip_grammar() {
        roundtrip("1:Boiler");
        roundtrip("1:Boiler?Drum/Level");
        roundtrip("42:a&&b");
        roundtrip("42:a&?b?x/y");
        roundtrip("0:&&&?");
        roundtrip("9:root?");
        roundtrip("9:root?path?with?marks");
    }

    #[test]
    fn test_escaping_on_construct() {
        let parsed = ParsedNodeId::new(2, 5, "a&b?c");
        assert_eq!(parsed.construct(), NodeId::string(2, "5:a&&b&?c"));
        let back = ParsedNodeId::parse(&parsed.construct()).unwrap();
        assert_eq!(back.root_id, "a&b?c");
        assert_eq!(back.component_path, None);
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(ParsedNodeId::parse(&NodeId::numeric(1, 5)).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "noseparator")).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "x:abc")).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "-1:abc")).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "01:abc")).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "99999999999:abc")).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "1:trailing&")).is_none());
        assert!(ParsedNodeId::parse(&NodeId::string(1, "1:bad&escape")).is_none());
    }

    #[test]
    fn test_root_and_child_ids() {
        let parsed = ParsedNodeId::parse(&NodeId::string(1, "3:Tank?Valve")).unwrap();
        assert_eq!(parsed.root_node_id(), NodeId::string(1, "3:Tank"));
        assert_eq!(
            parsed.child("Position").construct(),
            NodeId::string(1, "3:Tank?Valve/Position")
        );
        let root = ParsedNodeId::new(1, 3, "Tank");
        assert_eq!(root.child("Valve").construct(), NodeId::string(1, "3:Tank?Valve"));
    }
}
