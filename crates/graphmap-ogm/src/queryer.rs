//! Pass-through queries whose node and relationship columns are rehydrated
//! into fresh objects of registered types.
//!
//! Results bypass the identity store: nothing returned here is cached, and
//! the objects created carry no links.

use std::collections::BTreeMap;

use serde_json::Value;

use graphmap_core::{
    DbRelationship, DbValue, LoadOptions, OgmError, Properties, Record, Result, Statement,
};

use crate::cypher::{self, COUNT_COLUMN};
use crate::descriptor::{DescriptorFn, Entity};
use crate::entity::GraphEntity;
use crate::loader::node_entity;
use crate::metadata::Metadata;
use crate::object::ObjectRef;
use crate::session::Session;

/// One column of a pass-through result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Object(ObjectRef),
    Value(Value),
    List(Vec<QueryValue>),
}

impl QueryValue {
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            QueryValue::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            QueryValue::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Column name to value.
pub type QueryRow = BTreeMap<String, QueryValue>;

impl Session {
    /// Run `cypher` and rehydrate every node or relationship column whose
    /// label belongs to a registered type. `types` are registered first.
    pub async fn query(
        &mut self,
        cypher: &str,
        params: Properties,
        types: &[DescriptorFn],
        options: &LoadOptions,
    ) -> Result<Vec<QueryRow>> {
        let database = options.database.as_str();
        for descriptor in types {
            self.register_reachable(descriptor(), database).await?;
        }
        let statement = Statement::new(cypher).with_params(params);
        let records = self.run(database, statement).await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let mut row = QueryRow::new();
            for (column, value) in record.iter() {
                row.insert(column.to_string(), self.rehydrate(value, database)?);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// The single object the query returned, if any row came back. Column
    /// selection follows [`query_for_objects`](Self::query_for_objects).
    pub async fn query_for_object<T: Entity>(
        &mut self,
        cypher: &str,
        params: Properties,
        options: &LoadOptions,
    ) -> Result<Option<ObjectRef>> {
        let mut objects = self.query_for_objects::<T>(cypher, params, options).await?;
        match objects.len() {
            0 => Ok(None),
            1 => Ok(objects.pop()),
            count => Err(OgmError::MultipleResults {
                type_name: T::descriptor().name.to_string(),
                count,
            }),
        }
    }

    /// One object of `T` per row, taken from the row's only node column (only
    /// relationship column for relationship types). Rows are matched by what
    /// their columns hold, never by column position.
    pub async fn query_for_objects<T: Entity>(
        &mut self,
        cypher: &str,
        params: Properties,
        options: &LoadOptions,
    ) -> Result<Vec<ObjectRef>> {
        let database = options.database.as_str();
        let meta = self.register_reachable(T::descriptor(), database).await?;
        let statement = Statement::new(cypher).with_params(params);
        let records = self.run(database, statement).await?;

        let mut objects = Vec::with_capacity(records.len());
        for record in &records {
            let entity = match entity_column(record, &meta)? {
                Some(DbValue::Node(node)) => node_entity(node),
                Some(DbValue::Relationship(rel)) => relationship_entity(rel),
                _ => continue,
            };
            if entity.label != meta.label {
                return Err(OgmError::Mapping(format!(
                    "label `{}` of {} does not match `{}` from the result",
                    meta.label,
                    meta.name(),
                    entity.label
                )));
            }
            objects.push(self.materialize_row(&meta, &entity));
        }
        Ok(objects)
    }

    /// The integer column of the first row; 0 for no rows.
    pub async fn count(
        &mut self,
        cypher: &str,
        params: Properties,
        options: &LoadOptions,
    ) -> Result<i64> {
        let statement = Statement::new(cypher).with_params(params);
        let records = self.run(options.database.as_str(), statement).await?;
        let Some(record) = records.first() else {
            return Ok(0);
        };
        let mut counts = record.iter().filter_map(|(_, value)| value.as_i64());
        match (counts.next(), counts.next()) {
            (Some(count), None) => Ok(count),
            (None, _) => Err(OgmError::Mapping("count query returned no integer".to_string())),
            (Some(_), Some(_)) => Err(OgmError::Mapping(
                "count query returned several integer columns".to_string(),
            )),
        }
    }

    pub async fn count_entities_of_type<T: Entity>(
        &mut self,
        options: &LoadOptions,
    ) -> Result<i64> {
        let database = options.database.as_str();
        let meta = self.register_reachable(T::descriptor(), database).await?;
        let statement = cypher::count(&meta.label, meta.is_node());
        let records = self.run(database, statement).await?;
        Ok(records
            .first()
            .and_then(|r| r.get_i64(COUNT_COLUMN))
            .unwrap_or_default())
    }

    fn rehydrate(&mut self, value: &DbValue, database: &str) -> Result<QueryValue> {
        let (entity, is_node) = match value {
            DbValue::Value(value) => return Ok(QueryValue::Value(value.clone())),
            DbValue::List(items) => {
                let items = items
                    .iter()
                    .map(|item| self.rehydrate(item, database))
                    .collect::<Result<Vec<_>>>()?;
                return Ok(QueryValue::List(items));
            }
            DbValue::Node(node) => (node_entity(node), true),
            DbValue::Relationship(rel) => (relationship_entity(rel), false),
        };
        let meta = self
            .registry()
            .by_label(&entity.label, is_node, database)
            .ok_or_else(|| {
                OgmError::Mapping(format!(
                    "no registered type for {} `{}` ({})",
                    if is_node { "label" } else { "relationship type" },
                    entity.label,
                    entity.key
                ))
            })?;
        Ok(QueryValue::Object(self.materialize_row(&meta, &entity)))
    }

    fn materialize_row(&mut self, meta: &Metadata, entity: &GraphEntity) -> ObjectRef {
        let handle = self.objects.create_from(&meta.descriptor);
        self.objects
            .replace_properties(handle, meta.object_properties(&entity.properties));
        self.objects.set_id(handle, entity.id());
        handle
    }
}

fn relationship_entity(rel: &DbRelationship) -> GraphEntity {
    GraphEntity::relationship(
        rel.id,
        rel.rel_type.clone(),
        rel.start_id,
        rel.end_id,
        rel.properties.clone(),
    )
}

/// The one column holding an entity of `meta`'s kind. `None` when every
/// column is null.
fn entity_column<'r>(record: &'r Record, meta: &Metadata) -> Result<Option<&'r DbValue>> {
    let wanted = if meta.is_node() { "node" } else { "relationship" };
    let mut candidates = record.iter().filter(|(_, value)| match value {
        DbValue::Node(_) => meta.is_node(),
        DbValue::Relationship(_) => !meta.is_node(),
        _ => false,
    });
    let first = candidates.next();
    if let Some((column, _)) = candidates.next() {
        return Err(OgmError::Mapping(format!(
            "{} expects one {wanted} column, `{column}` is a second one",
            meta.name()
        )));
    }
    if let Some((_, value)) = first {
        return Ok(Some(value));
    }
    match record
        .iter()
        .find(|(_, value)| !matches!(value, DbValue::Value(Value::Null)))
    {
        Some((column, other)) => Err(OgmError::Mapping(format!(
            "{} expects a {wanted}, column `{column}` holds {}",
            meta.name(),
            kind_of(other)
        ))),
        None => Ok(None),
    }
}

fn kind_of(value: &DbValue) -> &'static str {
    match value {
        DbValue::Value(_) => "a scalar",
        DbValue::Node(_) => "a node",
        DbValue::Relationship(_) => "a relationship",
        DbValue::List(_) => "a list",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, db_node, db_rel, Person, ScriptedExecutor, WorksAt};
    use serde_json::json;

    #[tokio::test]
    async fn columns_are_rehydrated_by_label() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        db.push_response(vec![Record::new()
            .with(
                "p",
                DbValue::Node(db_node(
                    7,
                    "Person",
                    json!({"name": "Ada", "attributes.eyes": "grey"}),
                )),
            )
            .with("w", DbValue::Relationship(db_rel(9, "WORKS_AT", 7, 8, json!({"since": 2020}))))
            .with("n", DbValue::Value(json!(3)))]);

        let rows = session
            .query(
                "MATCH (p:Person)-[w:WORKS_AT]->() RETURN p, w, 3 AS n",
                Properties::new(),
                &[Person::descriptor],
                &LoadOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        let ada = row["p"].as_object().unwrap();
        let person: Person = session.objects().get(ada).unwrap();
        assert_eq!(person.name, "Ada");
        assert_eq!(person.attributes["eyes"], json!("grey"));
        assert_eq!(session.objects().id(ada), Some(7));

        let job = row["w"].as_object().unwrap();
        assert_eq!(session.objects().get::<WorksAt>(job).unwrap(), WorksAt::since(2020));
        assert_eq!(row["n"].as_value(), Some(&json!(3)));
        assert!(session.store().is_empty());
    }

    #[tokio::test]
    async fn unknown_labels_are_a_mapping_error() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let robot = DbValue::Node(db_node(1, "Robot", json!({})));
        db.push_response(vec![Record::new().with("x", robot)]);
        let err = session
            .query("MATCH (x) RETURN x", Properties::new(), &[], &LoadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OgmError::Mapping(_)));
    }

    #[tokio::test]
    async fn query_for_object_expects_at_most_one_row() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let row = |id| {
            Record::new().with("p", DbValue::Node(db_node(id, "Person", json!({"name": "P"}))))
        };

        db.push_response(vec![row(1)]);
        let one = session
            .query_for_object::<Person>(
                "MATCH (p:Person) RETURN p",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap();
        assert!(one.is_some());

        db.push_response(Vec::new());
        let none = session
            .query_for_object::<Person>(
                "MATCH (p:Person) RETURN p",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap();
        assert!(none.is_none());

        db.push_response(vec![row(1), row(2)]);
        let err = session
            .query_for_object::<Person>(
                "MATCH (p:Person) RETURN p",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OgmError::MultipleResults { count: 2, .. }));
    }

    #[tokio::test]
    async fn query_for_objects_rejects_foreign_labels() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let acme = DbValue::Node(db_node(4, "Company", json!({"name": "Acme"})));
        db.push_response(vec![Record::new().with("c", acme)]);
        let err = session
            .query_for_objects::<Person>(
                "MATCH (c) RETURN c",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OgmError::Mapping(_)));
    }

    #[tokio::test]
    async fn counts_read_the_integer_column() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        db.push_response(vec![Record::new().with("count", DbValue::Value(json!(5)))]);
        let count = session
            .count_entities_of_type::<Person>(&LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(
            db.writes().pop().unwrap().text,
            "MATCH (n:Person) RETURN count(n) AS count"
        );

        db.push_response(vec![Record::new().with("total", DbValue::Value(json!(12)))]);
        let params = Properties::from([("min".to_string(), json!(3))]);
        let count = session
            .count(
                "MATCH (n) WHERE n.age > $min RETURN count(n) AS total",
                params,
                &LoadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(count, 12);
        assert_eq!(db.writes().pop().unwrap().params["min"], json!(3));
    }

    #[tokio::test]
    async fn objects_come_from_the_entity_column_whatever_its_name() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let ada = DbValue::Node(db_node(7, "Person", json!({"name": "Ada"})));
        db.push_response(vec![Record::new()
            .with("label", DbValue::Value(json!("person")))
            .with("p", ada)]);

        let people = session
            .query_for_objects::<Person>(
                "MATCH (p:Person) RETURN p, 'person' AS label",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(session.objects().id(people[0]), Some(7));

        db.push_response(vec![Record::new()
            .with("a", DbValue::Node(db_node(1, "Person", json!({"name": "A"}))))
            .with("b", DbValue::Node(db_node(2, "Person", json!({"name": "B"}))))]);
        let err = session
            .query_for_objects::<Person>(
                "MATCH (a:Person), (b:Person) RETURN a, b",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OgmError::Mapping(_)));

        db.push_response(vec![Record::new().with("p", DbValue::Value(json!(null)))]);
        let none = session
            .query_for_objects::<Person>(
                "OPTIONAL MATCH (p:Person) RETURN p",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn counts_ignore_columns_that_are_not_integers() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        db.push_response(vec![Record::new()
            .with("kind", DbValue::Value(json!("Person")))
            .with("total", DbValue::Value(json!(4)))]);
        let count = session
            .count(
                "MATCH (n:Person) RETURN 'Person' AS kind, count(n) AS total",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(count, 4);

        db.push_response(vec![Record::new()
            .with("people", DbValue::Value(json!(4)))
            .with("robots", DbValue::Value(json!(1)))]);
        let err = session
            .count(
                "MATCH (p:Person), (r:Robot) RETURN count(p) AS people, count(r) AS robots",
                Properties::new(),
                &LoadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OgmError::Mapping(_)));
    }
}
