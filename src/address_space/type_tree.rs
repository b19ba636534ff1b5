//! Shared type hierarchy.
//!
//! The type tree records subtype relationships for data types, object and
//! variable types and reference types. It is shared between node managers of
//! one server, so it lives behind its own lock ([`SharedTypeTree`]).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::node_id::{ids, NodeId, QualifiedName};

/// A type tree shared between node managers.
pub type SharedTypeTree = Arc<RwLock<TypeTree>>;

#[derive(Debug, Clone)]
struct TypeInfo {
    super_type: Option<NodeId>,
    subtypes: Vec<NodeId>,
    reference_name: Option<QualifiedName>,
}

/// Subtype index over type node ids.
#[derive(Debug, Default)]
pub struct TypeTree {
    types: HashMap<NodeId, TypeInfo>,
    reference_types_by_name: HashMap<QualifiedName, NodeId>,
}

impl TypeTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree seeded with the standard numeric data types and reference types.
    #[must_use]
    pub fn with_standard_types() -> Self {
        let mut tree = Self::new();

        let data_types = [
            (ids::BASE_DATA_TYPE, None),
            (ids::BOOLEAN, Some(ids::BASE_DATA_TYPE)),
            (ids::STRING, Some(ids::BASE_DATA_TYPE)),
            (ids::DATE_TIME, Some(ids::BASE_DATA_TYPE)),
            (ids::GUID, Some(ids::BASE_DATA_TYPE)),
            (ids::BYTE_STRING, Some(ids::BASE_DATA_TYPE)),
            (ids::NODE_ID, Some(ids::BASE_DATA_TYPE)),
            (ids::STATUS_CODE, Some(ids::BASE_DATA_TYPE)),
            (ids::QUALIFIED_NAME, Some(ids::BASE_DATA_TYPE)),
            (ids::LOCALIZED_TEXT, Some(ids::BASE_DATA_TYPE)),
            (ids::STRUCTURE, Some(ids::BASE_DATA_TYPE)),
            (ids::RANGE, Some(ids::STRUCTURE)),
            (ids::EU_INFORMATION, Some(ids::STRUCTURE)),
            (ids::ENUMERATION, Some(ids::BASE_DATA_TYPE)),
            (ids::NUMBER, Some(ids::BASE_DATA_TYPE)),
            (ids::FLOAT, Some(ids::NUMBER)),
            (ids::DOUBLE, Some(ids::NUMBER)),
            (ids::INTEGER, Some(ids::NUMBER)),
            (ids::UINTEGER, Some(ids::NUMBER)),
            (ids::SBYTE, Some(ids::INTEGER)),
            (ids::INT16, Some(ids::INTEGER)),
            (ids::INT32, Some(ids::INTEGER)),
            (ids::INT64, Some(ids::INTEGER)),
            (ids::BYTE, Some(ids::UINTEGER)),
            (ids::UINT16, Some(ids::UINTEGER)),
            (ids::UINT32, Some(ids::UINTEGER)),
            (ids::UINT64, Some(ids::UINTEGER)),
        ];
        for (id, super_type) in data_types {
            tree.add_subtype(id, super_type);
        }

        let object_types = [
            (ids::BASE_OBJECT_TYPE, None),
            (ids::FOLDER_TYPE, Some(ids::BASE_OBJECT_TYPE)),
            (ids::BASE_EVENT_TYPE, Some(ids::BASE_OBJECT_TYPE)),
            (ids::CONDITION_TYPE, Some(ids::BASE_EVENT_TYPE)),
            (ids::EVENT_QUEUE_OVERFLOW_EVENT_TYPE, Some(ids::BASE_EVENT_TYPE)),
            (ids::BASE_VARIABLE_TYPE, None),
            (ids::BASE_DATA_VARIABLE_TYPE, Some(ids::BASE_VARIABLE_TYPE)),
            (ids::PROPERTY_TYPE, Some(ids::BASE_VARIABLE_TYPE)),
        ];
        for (id, super_type) in object_types {
            tree.add_subtype(id, super_type);
        }

        let reference_types = [
            (ids::REFERENCES, None, "References"),
            (ids::HIERARCHICAL_REFERENCES, Some(ids::REFERENCES), "HierarchicalReferences"),
            (ids::NON_HIERARCHICAL_REFERENCES, Some(ids::REFERENCES), "NonHierarchicalReferences"),
            (ids::HAS_CHILD, Some(ids::HIERARCHICAL_REFERENCES), "HasChild"),
            (ids::ORGANIZES, Some(ids::HIERARCHICAL_REFERENCES), "Organizes"),
            (ids::HAS_EVENT_SOURCE, Some(ids::HIERARCHICAL_REFERENCES), "HasEventSource"),
            (ids::HAS_NOTIFIER, Some(ids::HAS_EVENT_SOURCE), "HasNotifier"),
            (ids::AGGREGATES, Some(ids::HAS_CHILD), "Aggregates"),
            (ids::HAS_SUBTYPE, Some(ids::HAS_CHILD), "HasSubtype"),
            (ids::HAS_PROPERTY, Some(ids::AGGREGATES), "HasProperty"),
            (ids::HAS_COMPONENT, Some(ids::AGGREGATES), "HasComponent"),
            (ids::HAS_ORDERED_COMPONENT, Some(ids::HAS_COMPONENT), "HasOrderedComponent"),
            (ids::HAS_TYPE_DEFINITION, Some(ids::NON_HIERARCHICAL_REFERENCES), "HasTypeDefinition"),
            (ids::HAS_MODELLING_RULE, Some(ids::NON_HIERARCHICAL_REFERENCES), "HasModellingRule"),
            (ids::HAS_ENCODING, Some(ids::NON_HIERARCHICAL_REFERENCES), "HasEncoding"),
            (ids::GENERATES_EVENT, Some(ids::NON_HIERARCHICAL_REFERENCES), "GeneratesEvent"),
        ];
        for (id, super_type, name) in reference_types {
            tree.add_reference_subtype(id, super_type, QualifiedName::new(0, name));
        }

        tree
    }

    /// Wraps this tree for sharing.
    #[must_use]
    pub fn shared(self) -> SharedTypeTree {
        Arc::new(RwLock::new(self))
    }

    /// True if the type has been registered.
    #[must_use]
    pub fn is_known(&self, type_id: &NodeId) -> bool {
        self.types.contains_key(type_id)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registers `type_id` under `super_type`.
    ///
    /// Returns `false` if the supertype was not known; it is then recorded as
    /// a placeholder root so the subtype stays reachable. Callers that own the
    /// supertype should register it first.
    pub fn add_subtype(&mut self, type_id: NodeId, super_type: Option<NodeId>) -> bool {
        self.insert(type_id, super_type, None)
    }

    /// Registers a reference type, also indexing it by browse name.
    pub fn add_reference_subtype(
        &mut self,
        type_id: NodeId,
        super_type: Option<NodeId>,
        browse_name: QualifiedName,
    ) -> bool {
        self.reference_types_by_name
            .insert(browse_name.clone(), type_id.clone());
        self.insert(type_id, super_type, Some(browse_name))
    }

    fn insert(
        &mut self,
        type_id: NodeId,
        super_type: Option<NodeId>,
        reference_name: Option<QualifiedName>,
    ) -> bool {
        let mut super_known = true;
        if let Some(sup) = &super_type {
            if let Some(info) = self.types.get_mut(sup) {
                if !info.subtypes.contains(&type_id) {
                    info.subtypes.push(type_id.clone());
                }
            } else {
                super_known = false;
                self.types.insert(
                    sup.clone(),
                    TypeInfo {
                        super_type: None,
                        subtypes: vec![type_id.clone()],
                        reference_name: None,
                    },
                );
            }
        }

        match self.types.get_mut(&type_id) {
            Some(existing) => {
                existing.super_type = super_type;
                if reference_name.is_some() {
                    existing.reference_name = reference_name;
                }
            }
            None => {
                self.types.insert(
                    type_id,
                    TypeInfo {
                        super_type,
                        subtypes: Vec::new(),
                        reference_name,
                    },
                );
            }
        }
        super_known
    }

    /// Removes a type and all of its subtypes.
    pub fn remove(&mut self, type_id: &NodeId) {
        let Some(info) = self.types.remove(type_id) else {
            return;
        };
        if let Some(sup) = &info.super_type {
            if let Some(parent) = self.types.get_mut(sup) {
                parent.subtypes.retain(|t| t != type_id);
            }
        }
        if let Some(name) = &info.reference_name {
            if self.reference_types_by_name.get(name) == Some(type_id) {
                self.reference_types_by_name.remove(name);
            }
        }
        for sub in info.subtypes {
            self.remove(&sub);
        }
    }

    /// Direct supertype, if any.
    #[must_use]
    pub fn super_type(&self, type_id: &NodeId) -> Option<&NodeId> {
        self.types.get(type_id)?.super_type.as_ref()
    }

    /// Direct subtypes.
    #[must_use]
    pub fn subtypes(&self, type_id: &NodeId) -> &[NodeId] {
        self.types
            .get(type_id)
            .map_or(&[][..], |info| info.subtypes.as_slice())
    }

    /// True if `sub` equals `sup` or descends from it.
    #[must_use]
    pub fn is_type_of(&self, sub: &NodeId, sup: &NodeId) -> bool {
        let mut current = sub;
        // Bounded walk: a malformed tree must not loop forever.
        for _ in 0..256 {
            if current == sup {
                return true;
            }
            match self.super_type(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    /// Reference type id registered under `browse_name`.
    #[must_use]
    pub fn find_reference_type(&self, browse_name: &QualifiedName) -> Option<&NodeId> {
        self.reference_types_by_name.get(browse_name)
    }

    /// True if `data_type` is a numeric data type.
    #[must_use]
    pub fn is_numeric(&self, data_type: &NodeId) -> bool {
        self.is_type_of(data_type, &ids::NUMBER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_numeric_types() {
        let tree = TypeTree::with_standard_types();
        assert!(tree.is_numeric(&ids::DOUBLE));
        assert!(tree.is_numeric(&ids::INT32));
        assert!(tree.is_numeric(&ids::UINT64));
        assert!(!tree.is_numeric(&ids::STRING));
        assert!(!tree.is_numeric(&ids::BOOLEAN));
    }

    #[test]
    fn test_reference_hierarchy() {
        let tree = TypeTree::with_standard_types();
        assert!(tree.is_type_of(&ids::HAS_PROPERTY, &ids::HIERARCHICAL_REFERENCES));
        assert!(tree.is_type_of(&ids::HAS_NOTIFIER, &ids::HAS_EVENT_SOURCE));
        assert!(!tree.is_type_of(&ids::HAS_TYPE_DEFINITION, &ids::HIERARCHICAL_REFERENCES));
        assert_eq!(
            tree.find_reference_type(&QualifiedName::new(0, "HasComponent")),
            Some(&ids::HAS_COMPONENT)
        );
    }

    #[test]
    fn test_unknown_supertype_becomes_placeholder() {
        let mut tree = TypeTree::with_standard_types();
        let sup = NodeId::numeric(2, 100);
        let sub = NodeId::numeric(2, 101);
        assert!(!tree.add_subtype(sub.clone(), Some(sup.clone())));
        assert!(tree.is_known(&sup));
        assert!(tree.is_type_of(&sub, &sup));

        // Registering the supertype later keeps the existing link.
        assert!(tree.add_subtype(sup.clone(), Some(ids::BASE_OBJECT_TYPE)));
        assert_eq!(tree.subtypes(&sup), &[sub.clone()]);
    }

    #[test]
    fn test_remove_drops_subtree() {
        let mut tree = TypeTree::with_standard_types();
        let a = NodeId::numeric(2, 1);
        let b = NodeId::numeric(2, 2);
        tree.add_subtype(a.clone(), Some(ids::BASE_OBJECT_TYPE));
        tree.add_subtype(b.clone(), Some(a.clone()));
        tree.remove(&a);
        assert!(!tree.is_known(&a));
        assert!(!tree.is_known(&b));
        assert!(!tree.subtypes(&ids::BASE_OBJECT_TYPE).contains(&a));
    }
}
