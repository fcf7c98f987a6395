//! Structural metadata derived from a [`TypeDescriptor`].

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use graphmap_core::{OgmError, Properties, Result, Statement};

use crate::descriptor::{
    Cardinality, DescriptorFn, Direction, EntityKind, FieldDescriptor, TypeDescriptor,
};
use crate::{ID_PROPERTY, MAP_PROPERTY_DELIMITER};

/// Which end of an association a node field stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSide {
    /// The field points straight at the other node.
    Node,
    /// The field points at a relationship domain object.
    Entity,
}

/// A link field declared on a node type.
#[derive(Debug, Clone)]
pub struct RelationshipField {
    pub name: &'static str,
    pub rel_type: String,
    pub direction: Direction,
    pub side: FieldSide,
    pub cardinality: Cardinality,
    /// Node type for `FieldSide::Node`, relationship type for `FieldSide::Entity`.
    pub target: DescriptorFn,
    pub target_name: &'static str,
    /// Type of the node at the far end of the association.
    pub other_node: DescriptorFn,
    pub start_label: String,
    pub end_label: String,
}

impl RelationshipField {
    /// Whether a relationship `start -[rel_type]-> end` is represented by this
    /// field on the node `this_id`.
    fn represents(
        &self,
        this_id: i64,
        rel_type: &str,
        start: (i64, &str),
        end: (i64, &str),
    ) -> bool {
        if self.rel_type != rel_type {
            return false;
        }
        let forward = start.0 == this_id && self.start_label == start.1 && self.end_label == end.1;
        let backward = end.0 == this_id && self.end_label == end.1 && self.start_label == start.1;
        match self.direction {
            Direction::Outgoing => forward,
            Direction::Incoming => backward,
            Direction::Undirected => {
                forward
                    || (end.0 == this_id
                        && self.start_label == end.1
                        && self.end_label == start.1)
            }
        }
    }

    fn overlaps(&self, other: &RelationshipField) -> bool {
        if self.rel_type != other.rel_type {
            return false;
        }
        let same = self.start_label == other.start_label && self.end_label == other.end_label;
        let mirrored = self.start_label == other.end_label && self.end_label == other.start_label;
        match (self.direction, other.direction) {
            (a, b) if a == b => same,
            (Direction::Undirected, _) | (_, Direction::Undirected) => same || mirrored,
            _ => false,
        }
    }
}

/// An endpoint field declared on a relationship type.
#[derive(Debug, Clone)]
pub struct EndpointField {
    pub name: &'static str,
    pub target: DescriptorFn,
    pub target_name: &'static str,
    pub label: String,
}

#[derive(Debug, Clone)]
pub enum Shape {
    Node {
        labels: Vec<String>,
        relationships: Vec<RelationshipField>,
    },
    Relationship {
        start: EndpointField,
        end: EndpointField,
    },
}

/// Immutable per-type metadata, built once per (type, database).
#[derive(Debug, Clone)]
pub struct Metadata {
    pub descriptor: Arc<TypeDescriptor>,
    /// Joined labels for nodes, relationship type for relationships.
    pub label: String,
    pub properties: Vec<&'static str>,
    pub map_properties: Vec<&'static str>,
    pub custom_id: Option<&'static str>,
    pub shape: Shape,
}

impl Metadata {
    pub fn build(descriptor: TypeDescriptor) -> Result<Self> {
        let name = descriptor.name;
        if name.is_empty() {
            return Err(config_err("domain type name must not be empty"));
        }

        let mut seen = HashSet::new();
        let mut properties = Vec::new();
        let mut map_properties = Vec::new();
        let mut custom_id = None;
        for field in &descriptor.fields {
            if !seen.insert(field.name()) {
                return Err(config_err(format!(
                    "{name} declares field `{}` more than once",
                    field.name()
                )));
            }
            match field {
                FieldDescriptor::Property { name: prop, .. } if *prop == ID_PROPERTY => {
                    return Err(config_err(format!(
                        "{name}: property name `{ID_PROPERTY}` is reserved"
                    )));
                }
                FieldDescriptor::Property {
                    name: prop,
                    custom_id: is_custom,
                } => {
                    if *is_custom {
                        if custom_id.is_some() {
                            return Err(config_err(format!(
                                "{name} declares more than one custom id"
                            )));
                        }
                        custom_id = Some(*prop);
                    }
                    properties.push(*prop);
                }
                FieldDescriptor::MapProperty { name: prop } => map_properties.push(*prop),
                _ => {}
            }
        }

        let shape = match &descriptor.kind {
            EntityKind::Node { .. } => node_shape(&descriptor)?,
            EntityKind::Relationship { rel_type } => {
                if rel_type.is_empty() {
                    return Err(config_err(format!(
                        "{name} is a relationship type without a type name"
                    )));
                }
                let (start, end) = relationship_endpoints(&descriptor)?;
                Shape::Relationship { start, end }
            }
        };

        Ok(Self {
            label: descriptor.structural_label(),
            descriptor: Arc::new(descriptor),
            properties,
            map_properties,
            custom_id,
            shape,
        })
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn is_node(&self) -> bool {
        matches!(self.shape, Shape::Node { .. })
    }

    pub fn relationships(&self) -> &[RelationshipField] {
        match &self.shape {
            Shape::Node { relationships, .. } => relationships,
            Shape::Relationship { .. } => &[],
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipField> {
        self.relationships().iter().find(|f| f.name == name)
    }

    pub fn endpoints(&self) -> Option<(&EndpointField, &EndpointField)> {
        match &self.shape {
            Shape::Relationship { start, end } => Some((start, end)),
            Shape::Node { .. } => None,
        }
    }

    /// The field on node `this_id` that represents `start -[rel_type]-> end`.
    pub fn field_for(
        &self,
        this_id: i64,
        rel_type: &str,
        start: (i64, &str),
        end: (i64, &str),
    ) -> Option<&RelationshipField> {
        self.relationships()
            .iter()
            .find(|f| f.represents(this_id, rel_type, start, end))
    }

    /// Endpoint fields of this relationship type bound to `node_id`. Both for a self-loop.
    pub fn endpoint_fields_for(
        &self,
        start_id: i64,
        end_id: i64,
        node_id: i64,
    ) -> Vec<&EndpointField> {
        let mut fields = Vec::new();
        if let Some((start, end)) = self.endpoints() {
            if start_id == node_id {
                fields.push(start);
            }
            if end_id == node_id {
                fields.push(end);
            }
        }
        fields
    }

    /// Database properties for an object's properties. Maps are flattened.
    pub fn graph_properties(&self, object: &Properties) -> Properties {
        let mut props = Properties::new();
        for name in &self.properties {
            if let Some(value) = object.get(*name).filter(|v| !v.is_null()) {
                props.insert(name.to_string(), value.clone());
            }
        }
        for name in &self.map_properties {
            if let Some(Value::Object(entries)) = object.get(*name) {
                for (key, value) in entries.iter().filter(|(_, v)| !v.is_null()) {
                    props.insert(
                        format!("{name}{MAP_PROPERTY_DELIMITER}{key}"),
                        value.clone(),
                    );
                }
            }
        }
        props
    }

    /// Object properties for database properties. Undeclared keys are ignored.
    pub fn object_properties(&self, graph: &Properties) -> Properties {
        let mut props = Properties::new();
        for name in &self.properties {
            if let Some(value) = graph.get(*name) {
                props.insert(name.to_string(), value.clone());
            }
        }
        for name in &self.map_properties {
            let prefix = format!("{name}{MAP_PROPERTY_DELIMITER}");
            let entries: Map<String, Value> = graph
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|k| (k.to_string(), v.clone())))
                .collect();
            if !entries.is_empty() {
                props.insert(name.to_string(), Value::Object(entries));
            }
        }
        props
    }

    pub fn custom_id_value(&self, properties: &Properties) -> Option<Value> {
        self.custom_id
            .and_then(|name| properties.get(name))
            .filter(|v| !v.is_null())
            .cloned()
    }

    /// One-time schema assertions for this type.
    pub fn schema_statements(&self) -> Vec<Statement> {
        let Some(custom_id) = self.custom_id else {
            return Vec::new();
        };
        match &self.shape {
            Shape::Node { labels, .. } => labels
                .first()
                .map(|label| {
                    Statement::new(format!(
                        "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{label}) \
                         REQUIRE n.{custom_id} IS UNIQUE"
                    ))
                })
                .into_iter()
                .collect(),
            Shape::Relationship { .. } => vec![Statement::new(format!(
                "CREATE INDEX IF NOT EXISTS FOR ()-[r:{}]-() ON (r.{custom_id})",
                self.label
            ))],
        }
    }
}

fn config_err(msg: impl Into<String>) -> OgmError {
    OgmError::Configuration(msg.into())
}

fn node_shape(descriptor: &TypeDescriptor) -> Result<Shape> {
    let name = descriptor.name;
    let own_label = descriptor.structural_label();
    let mut relationships: Vec<RelationshipField> = Vec::new();

    for field in &descriptor.fields {
        let rel = match field {
            FieldDescriptor::StartNode { name: f, .. }
            | FieldDescriptor::EndNode { name: f, .. } => {
                return Err(config_err(format!(
                    "{name} is a node type but declares endpoint field `{f}`"
                )));
            }
            FieldDescriptor::NodeRelationship {
                name: f,
                rel_type,
                direction,
                cardinality,
                target,
            } => {
                let target_desc = target();
                if !target_desc.is_node() {
                    return Err(config_err(format!(
                        "{name}.{f} must target a node type, {} is a relationship",
                        target_desc.name
                    )));
                }
                let target_label = target_desc.structural_label();
                let (start_label, end_label) = match direction {
                    Direction::Incoming => (target_label, own_label.clone()),
                    Direction::Outgoing | Direction::Undirected => {
                        (own_label.clone(), target_label)
                    }
                };
                RelationshipField {
                    name: f,
                    rel_type: rel_type.to_string(),
                    direction: *direction,
                    side: FieldSide::Node,
                    cardinality: *cardinality,
                    target: *target,
                    target_name: target_desc.name,
                    other_node: *target,
                    start_label,
                    end_label,
                }
            }
            FieldDescriptor::EntityRelationship {
                name: f,
                cardinality,
                target,
            } => {
                let rel_desc = target();
                let rel_type = match rel_desc.kind {
                    EntityKind::Relationship { rel_type } => rel_type,
                    EntityKind::Node { .. } => {
                        return Err(config_err(format!(
                            "{name}.{f} must target a relationship type, {} is a node",
                            rel_desc.name
                        )));
                    }
                };
                let (start, end) = relationship_endpoints(&rel_desc)?;
                let (direction, other_node) = if start.label == own_label && end.label == own_label
                {
                    (Direction::Undirected, end.target)
                } else if start.label == own_label {
                    (Direction::Outgoing, end.target)
                } else if end.label == own_label {
                    (Direction::Incoming, start.target)
                } else {
                    return Err(config_err(format!(
                        "{name}.{f}: {} connects {} and {}, neither is {own_label}",
                        rel_desc.name, start.label, end.label
                    )));
                };
                RelationshipField {
                    name: f,
                    rel_type: rel_type.to_string(),
                    direction,
                    side: FieldSide::Entity,
                    cardinality: *cardinality,
                    target: *target,
                    target_name: rel_desc.name,
                    other_node,
                    start_label: start.label,
                    end_label: end.label,
                }
            }
            _ => continue,
        };

        if let Some(existing) = relationships.iter().find(|r| r.overlaps(&rel)) {
            return Err(config_err(format!(
                "{name}.{} and {name}.{} both claim {} relationships",
                existing.name, rel.name, rel.rel_type
            )));
        }
        relationships.push(rel);
    }

    let labels = descriptor.labels().into_iter().map(String::from).collect();
    Ok(Shape::Node {
        labels,
        relationships,
    })
}

fn relationship_endpoints(descriptor: &TypeDescriptor) -> Result<(EndpointField, EndpointField)> {
    let name = descriptor.name;
    let mut starts = Vec::new();
    let mut ends = Vec::new();

    for field in &descriptor.fields {
        match field {
            FieldDescriptor::StartNode { name: f, target } => {
                starts.push(endpoint(name, f, *target)?)
            }
            FieldDescriptor::EndNode { name: f, target } => ends.push(endpoint(name, f, *target)?),
            FieldDescriptor::NodeRelationship { name: f, .. }
            | FieldDescriptor::EntityRelationship { name: f, .. } => {
                return Err(config_err(format!(
                    "{name} is a relationship type and cannot declare association `{f}`"
                )));
            }
            _ => {}
        }
    }

    if starts.len() != 1 || ends.len() != 1 {
        return Err(config_err(format!(
            "{name} must declare exactly one start node and one end node (found {} and {})",
            starts.len(),
            ends.len()
        )));
    }
    Ok((starts.remove(0), ends.remove(0)))
}

fn endpoint(owner: &str, field: &'static str, target: DescriptorFn) -> Result<EndpointField> {
    let desc = target();
    if !desc.is_node() {
        return Err(config_err(format!(
            "{owner}.{field} must point at a node type, {} is a relationship",
            desc.name
        )));
    }
    Ok(EndpointField {
        name: field,
        target,
        target_name: desc.name,
        label: desc.structural_label(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Entity;
    use crate::testkit::{Company, Person, WorksAt};
    use serde_json::json;

    fn person() -> Metadata {
        Metadata::build(Person::descriptor()).unwrap()
    }

    #[test]
    fn node_metadata_resolves_fields() {
        let meta = person();
        assert_eq!(meta.label, "Person");
        assert_eq!(meta.custom_id, Some("uuid"));

        let friends = meta.relationship("friends").unwrap();
        assert_eq!(friends.side, FieldSide::Node);
        assert_eq!(
            (friends.start_label.as_str(), friends.end_label.as_str()),
            ("Person", "Person")
        );

        let employer = meta.relationship("employer").unwrap();
        assert_eq!(employer.side, FieldSide::Entity);
        assert_eq!(employer.direction, Direction::Outgoing);
        assert_eq!(employer.rel_type, "WORKS_AT");
        assert_eq!(employer.end_label, "Company");
    }

    #[test]
    fn incoming_entity_field_on_end_node() {
        let meta = Metadata::build(Company::descriptor()).unwrap();
        let staff = meta.relationship("staff").unwrap();
        assert_eq!(staff.direction, Direction::Incoming);
        assert_eq!((staff.other_node)().name, "Person");
    }

    #[test]
    fn field_lookup_respects_direction() {
        let meta = person();
        // 1 -[FRIEND]-> 2, seen from 1 and from 2
        let found = meta.field_for(1, "FRIEND", (1, "Person"), (2, "Person"));
        assert_eq!(found.map(|f| f.name), Some("friends"));
        assert!(meta.field_for(2, "FRIEND", (1, "Person"), (2, "Person")).is_none());
        assert!(meta.field_for(1, "ENEMY", (1, "Person"), (2, "Person")).is_none());
    }

    #[test]
    fn relationship_requires_both_endpoints() {
        let desc = TypeDescriptor::relationship("Dangling", "DANGLES").start_node::<Person>("from");
        let err = Metadata::build(desc).unwrap_err();
        assert!(matches!(err, OgmError::Configuration(_)));
    }

    #[test]
    fn endpoint_must_be_node() {
        let desc = TypeDescriptor::relationship("Meta", "META")
            .start_node::<Person>("from")
            .end_node::<WorksAt>("to");
        assert!(matches!(
            Metadata::build(desc),
            Err(OgmError::Configuration(_))
        ));
    }

    #[test]
    fn reserved_and_duplicate_fields_rejected() {
        let reserved = TypeDescriptor::node("Bad").property("id");
        assert!(Metadata::build(reserved).is_err());

        let dup = TypeDescriptor::node("Bad").property("name").property("name");
        assert!(Metadata::build(dup).is_err());
    }

    #[test]
    fn ambiguous_relationship_fields_rejected() {
        let desc = TypeDescriptor::node("Person")
            .relates_to::<Person>("a", "FRIEND", Direction::Outgoing, Cardinality::Many)
            .relates_to::<Person>("b", "FRIEND", Direction::Undirected, Cardinality::Many);
        assert!(matches!(
            Metadata::build(desc),
            Err(OgmError::Configuration(_))
        ));
    }

    #[test]
    fn map_properties_flatten_and_regroup() {
        let meta = person();
        let object = Properties::from([
            ("name".to_string(), json!("Ada")),
            ("attributes".to_string(), json!({"eyes": "brown", "height": 170})),
            ("undeclared".to_string(), json!(1)),
        ]);

        let graph = meta.graph_properties(&object);
        assert_eq!(graph["attributes.eyes"], json!("brown"));
        assert_eq!(graph["attributes.height"], json!(170));
        assert!(!graph.contains_key("undeclared"));

        let back = meta.object_properties(&graph);
        assert_eq!(back["attributes"], json!({"eyes": "brown", "height": 170}));
        assert_eq!(back["name"], json!("Ada"));
    }

    #[test]
    fn custom_id_produces_constraint() {
        let statements = person().schema_statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0]
            .text
            .contains("FOR (n:Person) REQUIRE n.uuid IS UNIQUE"));

        let rel = Metadata::build(WorksAt::descriptor()).unwrap();
        assert!(rel.schema_statements().is_empty());
    }
}
