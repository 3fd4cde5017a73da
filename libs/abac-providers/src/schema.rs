//! Namespaced attribute-key catalog. Append-only across the process
//! lifetime: there is no `unregister`, matching the write-once-at-startup,
//! read-only-thereafter lifecycle the resolver assumes.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Boolean,
    Float,
    StringList,
    Integer,
}

/// The declared attribute set for one namespace. Immutable once built -
/// there is no "nil schema" state to guard against here because an empty
/// schema is itself rejected at [`SchemaRegistry::register`] time; the type
/// only has to make "zero attributes" representable, not "absent".
#[derive(Debug, Clone, Default)]
pub struct NamespaceSchema {
    attributes: HashMap<String, AttributeType>,
}

impl NamespaceSchema {
    pub fn new(attributes: impl IntoIterator<Item = (String, AttributeType)>) -> Self {
        Self {
            attributes: attributes.into_iter().collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    namespaces: DashMap<String, NamespaceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, namespace: &str, schema: NamespaceSchema) -> Result<(), SchemaError> {
        if namespace.is_empty() {
            return Err(SchemaError::EmptyNamespace);
        }
        if schema.is_empty() {
            return Err(SchemaError::EmptySchema(namespace.to_string()));
        }
        if self.namespaces.contains_key(namespace) {
            return Err(SchemaError::AlreadyRegistered(namespace.to_string()));
        }
        self.namespaces.insert(namespace.to_string(), schema);
        Ok(())
    }

    /// Total: empty namespace or key never panics, just answers false.
    pub fn is_registered(&self, namespace: &str, key: &str) -> bool {
        if namespace.is_empty() || key.is_empty() {
            return false;
        }
        self.namespaces
            .get(namespace)
            .map(|schema| schema.contains(key))
            .unwrap_or(false)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }
}
