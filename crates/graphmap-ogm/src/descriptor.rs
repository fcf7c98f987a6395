//! Field-descriptor tables for domain types.
//!
//! A domain type describes itself once through [`Entity::descriptor`]. The
//! registry turns that table into [`crate::metadata::Metadata`]; nothing is
//! discovered at run time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Produces the descriptor of a domain type. Used for relationship targets so
/// self-referencing types do not recurse while being described.
pub type DescriptorFn = fn() -> TypeDescriptor;

/// A domain type the engine can map.
///
/// Property fields come from the type's serde representation. Associations are
/// not struct fields; they live as links in the session's
/// [`crate::object::ObjectGraph`].
pub trait Entity: Serialize + DeserializeOwned {
    fn descriptor() -> TypeDescriptor;
}

/// Direction of a relationship as seen from the declaring node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Undirected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Node { labels: Vec<&'static str> },
    Relationship { rel_type: &'static str },
}

#[derive(Debug, Clone)]
pub enum FieldDescriptor {
    /// A scalar or list property. `custom_id` marks the custom identifier.
    Property {
        name: &'static str,
        custom_id: bool,
    },
    /// A string-keyed map stored as `name.key` properties.
    MapProperty { name: &'static str },
    /// Association to another node through a relationship with no properties of its own.
    NodeRelationship {
        name: &'static str,
        rel_type: &'static str,
        direction: Direction,
        cardinality: Cardinality,
        target: DescriptorFn,
    },
    /// Association to a relationship type that is itself a domain type.
    EntityRelationship {
        name: &'static str,
        cardinality: Cardinality,
        target: DescriptorFn,
    },
    StartNode {
        name: &'static str,
        target: DescriptorFn,
    },
    EndNode {
        name: &'static str,
        target: DescriptorFn,
    },
}

impl FieldDescriptor {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Property { name, .. }
            | Self::MapProperty { name }
            | Self::NodeRelationship { name, .. }
            | Self::EntityRelationship { name, .. }
            | Self::StartNode { name, .. }
            | Self::EndNode { name, .. } => name,
        }
    }

    pub fn is_link(&self) -> bool {
        !matches!(self, Self::Property { .. } | Self::MapProperty { .. })
    }

    /// Single-valued links hold at most one target.
    pub fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Self::NodeRelationship { cardinality, .. }
            | Self::EntityRelationship { cardinality, .. } => Some(*cardinality),
            Self::StartNode { .. } | Self::EndNode { .. } => Some(Cardinality::One),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<DescriptorFn> {
        match self {
            Self::NodeRelationship { target, .. }
            | Self::EntityRelationship { target, .. }
            | Self::StartNode { target, .. }
            | Self::EndNode { target, .. } => Some(*target),
            _ => None,
        }
    }
}

impl FieldDescriptor {
    /// Structural equality. Targets compare by type name.
    pub fn same_as(&self, other: &FieldDescriptor) -> bool {
        use FieldDescriptor::*;

        let same_target =
            || self.target().map(|t| t().name) == other.target().map(|t| t().name);
        match (self, other) {
            (
                Property { name, custom_id },
                Property {
                    name: other_name,
                    custom_id: other_custom_id,
                },
            ) => name == other_name && custom_id == other_custom_id,
            (MapProperty { name }, MapProperty { name: other_name }) => name == other_name,
            (
                NodeRelationship {
                    name,
                    rel_type,
                    direction,
                    cardinality,
                    ..
                },
                NodeRelationship {
                    name: other_name,
                    rel_type: other_rel_type,
                    direction: other_direction,
                    cardinality: other_cardinality,
                    ..
                },
            ) => {
                name == other_name
                    && rel_type == other_rel_type
                    && direction == other_direction
                    && cardinality == other_cardinality
                    && same_target()
            }
            (
                EntityRelationship {
                    name, cardinality, ..
                },
                EntityRelationship {
                    name: other_name,
                    cardinality: other_cardinality,
                    ..
                },
            ) => name == other_name && cardinality == other_cardinality && same_target(),
            (StartNode { name, .. }, StartNode { name: other_name, .. })
            | (EndNode { name, .. }, EndNode { name: other_name, .. }) => {
                name == other_name && same_target()
            }
            _ => false,
        }
    }
}

/// The descriptor table of one domain type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// Registry key. Must be unique per domain type.
    pub name: &'static str,
    pub kind: EntityKind,
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// A node type. Labels default to `name` unless [`label`](Self::label) is called.
    pub fn node(name: &'static str) -> Self {
        Self {
            name,
            kind: EntityKind::Node { labels: Vec::new() },
            fields: Vec::new(),
        }
    }

    pub fn relationship(name: &'static str, rel_type: &'static str) -> Self {
        Self {
            name,
            kind: EntityKind::Relationship { rel_type },
            fields: Vec::new(),
        }
    }

    pub fn label(mut self, label: &'static str) -> Self {
        if let EntityKind::Node { labels } = &mut self.kind {
            labels.push(label);
        }
        self
    }

    pub fn property(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor::Property {
            name,
            custom_id: false,
        });
        self
    }

    pub fn custom_id(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor::Property {
            name,
            custom_id: true,
        });
        self
    }

    pub fn map_property(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor::MapProperty { name });
        self
    }

    pub fn relates_to<T: Entity>(
        mut self,
        name: &'static str,
        rel_type: &'static str,
        direction: Direction,
        cardinality: Cardinality,
    ) -> Self {
        self.fields.push(FieldDescriptor::NodeRelationship {
            name,
            rel_type,
            direction,
            cardinality,
            target: T::descriptor,
        });
        self
    }

    pub fn relates_via<R: Entity>(mut self, name: &'static str, cardinality: Cardinality) -> Self {
        self.fields.push(FieldDescriptor::EntityRelationship {
            name,
            cardinality,
            target: R::descriptor,
        });
        self
    }

    pub fn start_node<N: Entity>(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor::StartNode {
            name,
            target: N::descriptor,
        });
        self
    }

    pub fn end_node<N: Entity>(mut self, name: &'static str) -> Self {
        self.fields.push(FieldDescriptor::EndNode {
            name,
            target: N::descriptor,
        });
        self
    }

    /// Whether two descriptors declare the same type.
    pub fn same_as(&self, other: &TypeDescriptor) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| a.same_as(b))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn is_node(&self) -> bool {
        matches!(self.kind, EntityKind::Node { .. })
    }

    /// Sorted labels; the type name when none were declared.
    pub fn labels(&self) -> Vec<&'static str> {
        match &self.kind {
            EntityKind::Node { labels } if labels.is_empty() => vec![self.name],
            EntityKind::Node { labels } => {
                let mut labels = labels.clone();
                labels.sort_unstable();
                labels.dedup();
                labels
            }
            EntityKind::Relationship { .. } => Vec::new(),
        }
    }

    /// Structural label: joined labels for nodes, the type name for relationships.
    pub fn structural_label(&self) -> String {
        match &self.kind {
            EntityKind::Node { .. } => self.labels().join(crate::LABEL_DELIMITER),
            EntityKind::Relationship { rel_type } => rel_type.to_string(),
        }
    }

    pub fn custom_id_field(&self) -> Option<&'static str> {
        self.fields.iter().find_map(|f| match f {
            FieldDescriptor::Property {
                name,
                custom_id: true,
            } => Some(*name),
            _ => None,
        })
    }
}
