//! Cypher generation: per-entity fragments and type-level statements.
//!
//! Fragments are grouped by [`ClauseKind`] and rendered in that order, so every
//! CREATE sees the variables bound by MATCH and every DELETE comes last.

use std::collections::BTreeMap;

use serde_json::Value;

use graphmap_core::{Properties, Statement};

use crate::entity::{EntityKey, GraphEntity};

pub const ROOT_COLUMN: &str = "root";
pub const NODES_COLUMN: &str = "nodes";
pub const RELATIONSHIPS_COLUMN: &str = "relationships";
pub const INVERTED_COLUMN: &str = "inverted";
pub const COUNT_COLUMN: &str = "count";
pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClauseKind {
    Match,
    NodeCreate,
    RelationshipCreate,
    Set,
    Delete,
}

/// A clause for one entity, its parameters, and the entities it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub params: Properties,
    pub dependencies: Vec<EntityKey>,
}

impl Fragment {
    fn new(text: String) -> Self {
        Self {
            text,
            params: Properties::new(),
            dependencies: Vec::new(),
        }
    }

    fn param(mut self, key: String, value: Value) -> Self {
        self.params.insert(key, value);
        self
    }

    fn depends_on(mut self, keys: impl IntoIterator<Item = EntityKey>) -> Self {
        self.dependencies.extend(keys);
        self
    }
}

/// Fragments collected across a traversal, merged into one statement.
#[derive(Debug, Default)]
pub struct Clauses {
    groups: BTreeMap<ClauseKind, Vec<String>>,
    params: Properties,
}

impl Clauses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ClauseKind, fragment: Fragment) {
        self.groups.entry(kind).or_default().push(fragment.text);
        self.params.extend(fragment.params);
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }

    pub fn count(&self, kind: ClauseKind) -> usize {
        self.groups.get(&kind).map_or(0, Vec::len)
    }

    /// Render with a RETURN of `ID(sig) AS sig` for each key.
    pub fn render(&self, returns: &[EntityKey]) -> Statement {
        let mut lines: Vec<String> = self.groups.values().flatten().cloned().collect();
        if !returns.is_empty() {
            let columns: Vec<String> = returns
                .iter()
                .map(|k| {
                    let sig = k.signature();
                    format!("ID({sig}) AS {sig}")
                })
                .collect();
            lines.push(format!("RETURN {}", columns.join(", ")));
        }
        Statement::new(lines.join("\n")).with_params(self.params.clone())
    }
}

/// Builds fragments for one entity against its last stored snapshot.
pub struct EntityQuery<'a> {
    entity: &'a GraphEntity,
    stored: Option<&'a GraphEntity>,
}

impl<'a> EntityQuery<'a> {
    pub fn new(entity: &'a GraphEntity, stored: Option<&'a GraphEntity>) -> Self {
        Self { entity, stored }
    }

    /// Changed properties. Removed ones map to null, which clears them on `+=`.
    pub fn delta(&self) -> Properties {
        let current: Properties = self
            .entity
            .user_properties()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let Some(stored) = self.stored.filter(|_| !self.entity.is_new()) else {
            return current;
        };

        let mut delta: Properties = current
            .iter()
            .filter(|(k, v)| stored.properties.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, _) in stored.user_properties() {
            if !current.contains_key(key) {
                delta.insert(key.clone(), Value::Null);
            }
        }
        delta
    }

    /// New, or differing from the stored snapshot.
    pub fn is_dirty(&self) -> bool {
        self.entity.is_new() || self.stored.is_none() || !self.delta().is_empty()
    }

    pub fn create(&self) -> (ClauseKind, Fragment) {
        let sig = self.entity.signature();
        match self.endpoint_keys() {
            None => (
                ClauseKind::NodeCreate,
                Fragment::new(format!("CREATE ({sig}:{})", self.entity.label)),
            ),
            Some((start, end)) => (
                ClauseKind::RelationshipCreate,
                Fragment::new(format!(
                    "CREATE ({})-[{sig}:{}]->({})",
                    start.signature(),
                    self.entity.label,
                    end.signature()
                ))
                .depends_on([start, end]),
            ),
        }
    }

    pub fn matching(&self) -> Fragment {
        let sig = self.entity.signature();
        let id_param = format!("{sig}_id");
        let pattern = match self.endpoint_keys() {
            None => format!("({sig}:{})", self.entity.label),
            Some((start, end)) => format!(
                "({})-[{sig}:{}]->({})",
                start.signature(),
                self.entity.label,
                end.signature()
            ),
        };
        Fragment::new(format!("MATCH {pattern} WHERE ID({sig}) = ${id_param}"))
            .param(id_param, Value::from(self.entity.id()))
            .depends_on(self.endpoint_keys().map(|(s, e)| [s, e]).into_iter().flatten())
    }

    /// `SET sig += $props` restricted to the delta; `None` when nothing changed.
    pub fn set(&self) -> Option<Fragment> {
        let delta = self.delta();
        if delta.is_empty() {
            return None;
        }
        let sig = self.entity.signature();
        let props_param = format!("{sig}_props");
        let map = delta.into_iter().collect::<serde_json::Map<_, _>>();
        Some(
            Fragment::new(format!("SET {sig} += ${props_param}"))
                .param(props_param, Value::Object(map)),
        )
    }

    pub fn delete(&self) -> Fragment {
        let sig = self.entity.signature();
        if self.entity.is_node() {
            Fragment::new(format!("DETACH DELETE {sig}"))
        } else {
            Fragment::new(format!("DELETE {sig}"))
        }
    }

    fn endpoint_keys(&self) -> Option<(EntityKey, EntityKey)> {
        self.entity
            .endpoints
            .map(|(s, e)| (EntityKey::node(s), EntityKey::node(e)))
    }
}

/// How load statements select their roots.
#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Ids(Vec<i64>),
    CustomIds { property: &'static str, values: Vec<Value> },
}

fn range(hops: Option<u32>) -> String {
    match hops {
        Some(h) => format!("[*0..{h}]"),
        None => "[*0..]".to_string(),
    }
}

fn selection(var: &str, selection: &Selection) -> (String, Option<Value>) {
    match selection {
        Selection::All => (String::new(), None),
        Selection::Ids(ids) => (
            format!("\nWHERE ID({var}) IN $ids"),
            Some(Value::from(ids.clone())),
        ),
        Selection::CustomIds { property, values } => (
            format!("\nWHERE {var}.{property} IN $ids"),
            Some(Value::Array(values.clone())),
        ),
    }
}

fn path_return(var: &str) -> String {
    format!(
        "WITH {var}, path, range(0, length(path) - 1) AS steps\n\
         RETURN ID({var}) AS {ROOT_COLUMN}, nodes(path) AS {NODES_COLUMN}, \
         relationships(path) AS {RELATIONSHIPS_COLUMN}, \
         [i IN steps | CASE WHEN nodes(path)[i] = startNode(relationships(path)[i]) \
         THEN false ELSE true END] AS {INVERTED_COLUMN}"
    )
}

/// Paths of up to `hops` relationships around the selected nodes. `None` is unbounded.
pub fn load_nodes(label: &str, which: &Selection, hops: Option<u32>) -> Statement {
    let (filter, ids) = selection("n", which);
    let text = format!(
        "MATCH path = (n:{label})-{}-(){filter}\n{}",
        range(hops),
        path_return("n")
    );
    with_ids(Statement::new(text), ids)
}

/// Paths of up to `hops` relationships on either side of the selected relationships.
pub fn load_relationships(rel_type: &str, which: &Selection, hops: Option<u32>) -> Statement {
    let (filter, ids) = selection("r", which);
    let text = format!(
        "MATCH path = ()-{range}-()-[r:{rel_type}]-()-{range}-(){filter}\n{}",
        path_return("r"),
        range = range(hops),
    );
    with_ids(Statement::new(text), ids)
}

fn with_ids(statement: Statement, ids: Option<Value>) -> Statement {
    match ids {
        Some(ids) => statement.param("ids", ids),
        None => statement,
    }
}

pub fn delete_all(label: &str, is_node: bool) -> Statement {
    if is_node {
        Statement::new(format!(
            "MATCH (n:{label}) DETACH DELETE n RETURN ID(n) AS {ID_COLUMN}"
        ))
    } else {
        Statement::new(format!(
            "MATCH ()-[r:{label}]->() DELETE r RETURN ID(r) AS {ID_COLUMN}"
        ))
    }
}

pub fn count(label: &str, is_node: bool) -> Statement {
    if is_node {
        Statement::new(format!("MATCH (n:{label}) RETURN count(n) AS {COUNT_COLUMN}"))
    } else {
        Statement::new(format!(
            "MATCH ()-[r:{label}]->() RETURN count(r) AS {COUNT_COLUMN}"
        ))
    }
}

pub fn purge() -> Statement {
    Statement::new("MATCH (n) DETACH DELETE n")
}
