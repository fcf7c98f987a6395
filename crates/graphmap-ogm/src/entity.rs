//! Internal graph representation, decoupled from domain objects.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use graphmap_core::Properties;

use crate::object::ObjectRef;
use crate::ID_PROPERTY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Node,
    Relationship,
}

/// Node and relationship IDs are separate spaces in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn node(id: i64) -> Self {
        Self {
            kind: EntityKind::Node,
            id,
        }
    }

    pub fn relationship(id: i64) -> Self {
        Self {
            kind: EntityKind::Relationship,
            id,
        }
    }

    pub fn is_node(&self) -> bool {
        self.kind == EntityKind::Node
    }

    /// Query alias: `n_12`, `r_7`, placeholders as `n_m3`.
    pub fn signature(&self) -> String {
        let prefix = match self.kind {
            EntityKind::Node => 'n',
            EntityKind::Relationship => 'r',
        };
        if self.id < 0 {
            format!("{prefix}_m{}", self.id.unsigned_abs())
        } else {
            format!("{prefix}_{}", self.id)
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// A node or relationship as the engine believes it exists in the database.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEntity {
    pub key: EntityKey,
    /// Joined labels for nodes, type name for relationships.
    pub label: String,
    /// Database properties, always including the synthetic `id`.
    pub properties: Properties,
    /// Adjacent entities reachable through the bound object's fields.
    pub related: BTreeSet<EntityKey>,
    /// Relationship endpoints as (start, end) node IDs.
    pub endpoints: Option<(i64, i64)>,
    pub value: Option<ObjectRef>,
    pub type_name: Option<&'static str>,
    pub custom_id: Option<Value>,
    /// Traversal steps below this entity known to be loaded.
    pub depth: Option<u32>,
}

impl GraphEntity {
    pub fn node(id: i64, label: impl Into<String>, properties: Properties) -> Self {
        Self::new(EntityKey::node(id), label.into(), properties, None)
    }

    pub fn relationship(
        id: i64,
        rel_type: impl Into<String>,
        start: i64,
        end: i64,
        properties: Properties,
    ) -> Self {
        Self::new(
            EntityKey::relationship(id),
            rel_type.into(),
            properties,
            Some((start, end)),
        )
    }

    pub(crate) fn new(
        key: EntityKey,
        label: String,
        mut properties: Properties,
        endpoints: Option<(i64, i64)>,
    ) -> Self {
        properties.insert(ID_PROPERTY.to_string(), Value::from(key.id));
        Self {
            key,
            label,
            properties,
            related: BTreeSet::new(),
            endpoints,
            value: None,
            type_name: None,
            custom_id: None,
            depth: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.key.id
    }

    pub fn is_node(&self) -> bool {
        self.key.is_node()
    }

    pub fn signature(&self) -> String {
        self.key.signature()
    }

    pub fn is_new(&self) -> bool {
        self.key.id < 0
    }

    /// The endpoint opposite `node_id`, for relationships.
    pub fn other_end(&self, node_id: i64) -> Option<i64> {
        self.endpoints
            .map(|(start, end)| if start == node_id { end } else { start })
    }

    /// Re-key after the database assigned a real ID.
    pub fn set_id(&mut self, id: i64) {
        self.key.id = id;
        self.properties
            .insert(ID_PROPERTY.to_string(), Value::from(id));
    }

    /// Properties without the synthetic `id`.
    pub fn user_properties(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.properties.iter().filter(|(k, _)| *k != ID_PROPERTY)
    }
}
