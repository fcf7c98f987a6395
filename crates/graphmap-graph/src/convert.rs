//! Conversion between the core value model and Bolt values.

use std::collections::BTreeMap;

use neo4rs::{
    BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType, Query,
    Row,
};
use serde_json::{Map, Number, Value};

use graphmap_core::{DbNode, DbRelationship, DbValue, Properties, Record, Statement};

use crate::client::GraphError;

/// Build a neo4rs query with every parameter bound.
pub fn to_query(statement: Statement) -> Query {
    let mut query = neo4rs::query(&statement.text);
    for (key, value) in statement.params {
        query = query.param(&key, to_bolt(value));
    }
    query
}

pub fn to_bolt(value: Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => BoltType::Integer(BoltInteger::new(i)),
            (None, Some(f)) => BoltType::Float(BoltFloat::new(f)),
            (None, None) => BoltType::Null(BoltNull),
        },
        Value::String(s) => BoltType::String(BoltString::new(&s)),
        Value::Array(items) => BoltType::List(BoltList {
            value: items.into_iter().map(to_bolt).collect(),
        }),
        Value::Object(map) => BoltType::Map(BoltMap {
            value: map
                .into_iter()
                .map(|(k, v)| (BoltString::new(&k), to_bolt(v)))
                .collect(),
        }),
    }
}

/// Convert a row. Columns are ordered by name, since Bolt rows carry no order.
pub fn to_record(row: &Row) -> Result<Record, GraphError> {
    let columns: BTreeMap<String, BoltType> = row
        .to()
        .map_err(|e| GraphError::Conversion(format!("row: {e}")))?;

    let mut record = Record::new();
    for (column, value) in columns {
        record = record.with(column, from_bolt(value)?);
    }
    Ok(record)
}

pub fn from_bolt(value: BoltType) -> Result<DbValue, GraphError> {
    let converted = match value {
        BoltType::Node(node) => DbValue::Node(DbNode {
            id: node.id.value,
            labels: node
                .labels
                .value
                .into_iter()
                .map(|label| match label {
                    BoltType::String(s) => Ok(s.value),
                    other => Err(GraphError::Conversion(format!("node label {other:?}"))),
                })
                .collect::<Result<_, _>>()?,
            properties: properties(node.properties)?,
        }),
        BoltType::Relation(rel) => DbValue::Relationship(DbRelationship {
            id: rel.id.value,
            start_id: rel.start_node_id.value,
            end_id: rel.end_node_id.value,
            rel_type: rel.typ.value,
            properties: properties(rel.properties)?,
        }),
        BoltType::List(list) => DbValue::List(
            list.value
                .into_iter()
                .map(from_bolt)
                .collect::<Result<_, _>>()?,
        ),
        other => DbValue::Value(scalar(other)?),
    };
    Ok(converted)
}

fn properties(map: BoltMap) -> Result<Properties, GraphError> {
    map.value
        .into_iter()
        .map(|(k, v)| Ok((k.value, scalar(v)?)))
        .collect()
}

fn scalar(value: BoltType) -> Result<Value, GraphError> {
    let converted = match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => Number::from_f64(f.value).map_or(Value::Null, Value::Number),
        BoltType::String(s) => Value::String(s.value),
        BoltType::List(list) => Value::Array(
            list.value
                .into_iter()
                .map(scalar)
                .collect::<Result<_, _>>()?,
        ),
        BoltType::Map(map) => Value::Object(
            map.value
                .into_iter()
                .map(|(k, v)| Ok((k.value, scalar(v)?)))
                .collect::<Result<Map<_, _>, GraphError>>()?,
        ),
        other => {
            return Err(GraphError::Conversion(format!(
                "unsupported Bolt value {other:?}"
            )))
        }
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo4rs::BoltNode;
    use serde_json::json;

    #[test]
    fn json_parameters_become_bolt_values() {
        let bolt = to_bolt(json!({
            "name": "Ada",
            "age": 36,
            "score": 0.5,
            "tags": ["a"],
            "gone": null
        }));
        let BoltType::Map(map) = bolt else {
            panic!("expected a map, got {bolt:?}");
        };
        assert_eq!(
            map.value.get(&BoltString::new("age")),
            Some(&BoltType::Integer(BoltInteger::new(36)))
        );
        assert_eq!(
            map.value.get(&BoltString::new("score")),
            Some(&BoltType::Float(BoltFloat::new(0.5)))
        );
        assert!(matches!(map.value.get(&BoltString::new("tags")), Some(BoltType::List(_))));
        assert_eq!(map.value.get(&BoltString::new("gone")), Some(&BoltType::Null(BoltNull)));
    }

    #[test]
    fn statements_bind_every_parameter() {
        let statement = Statement::new("MATCH (n) WHERE ID(n) = $n_1_id RETURN n")
            .param("n_1_id", 1)
            .param("n_1_props", json!({"name": "Ada"}));
        let query = to_query(statement);
        assert!(query.has_param_key("n_1_id"));
        assert!(query.has_param_key("n_1_props"));
    }

    #[test]
    fn nodes_convert_with_labels_and_properties() {
        let node = BoltNode::new(
            BoltInteger::new(7),
            BoltList {
                value: vec![
                    BoltType::String(BoltString::new("Person")),
                    BoltType::String(BoltString::new("Admin")),
                ],
            },
            BoltMap {
                value: [(BoltString::new("name"), BoltType::String(BoltString::new("Ada")))]
                    .into_iter()
                    .collect(),
            },
        );
        let DbValue::Node(node) = from_bolt(BoltType::Node(node)).unwrap() else {
            panic!("expected a node");
        };
        assert_eq!(node.id, 7);
        assert_eq!(node.labels, vec!["Person", "Admin"]);
        assert_eq!(node.properties["name"], json!("Ada"));
    }

    #[test]
    fn lists_keep_their_shape() {
        let list = BoltType::List(BoltList {
            value: vec![
                BoltType::Boolean(BoltBoolean::new(false)),
                BoltType::Boolean(BoltBoolean::new(true)),
            ],
        });
        let converted = from_bolt(list).unwrap();
        assert_eq!(converted.as_bools(), Some(vec![false, true]));

        let empty = from_bolt(BoltType::List(BoltList { value: Vec::new() })).unwrap();
        assert_eq!(empty.as_list().map(<[DbValue]>::len), Some(0));
    }

    #[test]
    fn rows_convert_with_columns_sorted_by_name() {
        let node = BoltNode::new(
            BoltInteger::new(3),
            BoltList {
                value: vec![BoltType::String(BoltString::new("Person"))],
            },
            BoltMap {
                value: Default::default(),
            },
        );
        let row = Row::new(
            BoltList {
                value: vec![
                    BoltType::String(BoltString::new("total")),
                    BoltType::String(BoltString::new("n")),
                ],
            },
            BoltList {
                value: vec![BoltType::Integer(BoltInteger::new(2)), BoltType::Node(node)],
            },
        );

        let record = to_record(&row).unwrap();
        assert_eq!(record.columns, vec!["n", "total"]);
        assert_eq!(record.get_i64("total"), Some(2));
        assert!(matches!(record.get("n"), Some(DbValue::Node(node)) if node.id == 3));
    }
}
