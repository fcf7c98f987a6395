//! Values exchanged with the database collaborator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Property name to value. Ordered so generated statements are deterministic.
pub type Properties = BTreeMap<String, Value>;

/// A node as returned by the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbNode {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: Properties,
}

/// A relationship as returned by the database, in its stored direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbRelationship {
    pub id: i64,
    pub start_id: i64,
    pub end_id: i64,
    pub rel_type: String,
    pub properties: Properties,
}

/// One column value of a result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DbValue {
    /// Scalars, and lists or maps of scalars.
    Value(Value),
    Node(DbNode),
    Relationship(DbRelationship),
    List(Vec<DbValue>),
}

impl DbValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DbValue::Value(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DbValue]> {
        match self {
            DbValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Lists of scalars may arrive either as `List` or as a JSON array.
    pub fn as_bools(&self) -> Option<Vec<bool>> {
        match self {
            DbValue::List(items) => items
                .iter()
                .map(|item| match item {
                    DbValue::Value(v) => v.as_bool(),
                    _ => None,
                })
                .collect(),
            DbValue::Value(Value::Array(items)) => items.iter().map(Value::as_bool).collect(),
            _ => None,
        }
    }
}

/// A result row with named columns, in the order the database returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub columns: Vec<String>,
    pub values: Vec<DbValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: DbValue) -> Self {
        self.columns.push(column.into());
        self.values.push(value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn first(&self) -> Option<&DbValue> {
        self.values.first()
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(DbValue::as_i64)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Query text plus its bound parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    pub params: Properties,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Properties::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Properties) -> Self {
        self.params.extend(params);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_lookup_by_column() {
        let record = Record::new()
            .with("count", DbValue::Value(json!(3)))
            .with("flags", DbValue::Value(json!([true, false])));

        assert_eq!(record.get_i64("count"), Some(3));
        assert_eq!(
            record.get("flags").and_then(DbValue::as_bools),
            Some(vec![true, false])
        );
        assert!(record.get("missing").is_none());
        assert_eq!(record.first().and_then(DbValue::as_i64), Some(3));
    }

    #[test]
    fn statement_params_accumulate() {
        let stmt = Statement::new("MATCH (n) WHERE ID(n) = $id RETURN n")
            .param("id", 4)
            .with_params(Properties::from([("other".to_string(), json!("x"))]));
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.params["id"], json!(4));
    }
}
