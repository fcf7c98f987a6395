//! Test doubles and fixture domain types.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use graphmap_core::{
    CypherExecutor, DbNode, DbRelationship, DbValue, OgmError, Properties, Record, Result,
    Statement, Transaction,
};

use crate::cypher::{INVERTED_COLUMN, NODES_COLUMN, RELATIONSHIPS_COLUMN, ROOT_COLUMN};
use crate::descriptor::{Cardinality, Direction, Entity, TypeDescriptor};
use crate::events::{EventListener, Lifecycle};
use crate::object::{Object, ObjectRef};
use crate::registry::Registry;
use crate::session::Session;

// ── Fixture domain ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl Person {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_uuid(uuid: &str, name: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            ..Self::named(name)
        }
    }
}

impl Entity for Person {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::node("Person")
            .custom_id("uuid")
            .property("name")
            .property("age")
            .map_property("attributes")
            .relates_to::<Person>("friends", "FRIEND", Direction::Outgoing, Cardinality::Many)
            .relates_via::<WorksAt>("employer", Cardinality::One)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
}

impl Company {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Entity for Company {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::node("Company")
            .property("name")
            .relates_via::<WorksAt>("staff", Cardinality::Many)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorksAt {
    pub since: i64,
}

impl WorksAt {
    pub fn since(year: i64) -> Self {
        Self { since: year }
    }
}

impl Entity for WorksAt {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::relationship("WorksAt", "WORKS_AT")
            .property("since")
            .start_node::<Person>("employee")
            .end_node::<Company>("company")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
}

impl Link {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Entity for Link {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::node("Link")
            .property("name")
            .relates_to::<Link>("next", "NEXT", Direction::Outgoing, Cardinality::One)
            .relates_to::<Link>("previous", "NEXT", Direction::Incoming, Cardinality::One)
    }
}

// ── Scripted executor ───────────────────────────────────────────

#[derive(Default)]
struct Script {
    log: Mutex<Vec<Statement>>,
    responses: Mutex<VecDeque<Vec<Record>>>,
    failures: Mutex<VecDeque<String>>,
    transactions: Mutex<Vec<&'static str>>,
    next_id: AtomicI64,
}

/// Records every statement. Replies with queued result sets; statements
/// ending in `RETURN ID(x) AS x, ...` without a queued reply get one row with
/// fresh IDs for placeholders and echoed IDs for everything else.
#[derive(Clone)]
pub struct ScriptedExecutor {
    script: Arc<Script>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        let script = Script {
            next_id: AtomicI64::new(100),
            ..Script::default()
        };
        Self {
            script: Arc::new(script),
        }
    }

    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.script.log).clone()
    }

    /// Statements other than schema assertions.
    pub fn writes(&self) -> Vec<Statement> {
        self.statements()
            .into_iter()
            .filter(|s| !is_schema(&s.text))
            .collect()
    }

    pub fn push_response(&self, records: Vec<Record>) {
        lock(&self.script.responses).push_back(records);
    }

    pub fn fail_next(&self, message: &str) {
        lock(&self.script.failures).push_back(message.to_string());
    }

    pub fn transaction_events(&self) -> Vec<&'static str> {
        lock(&self.script.transactions).clone()
    }

    fn respond(&self, statement: Statement) -> Result<Vec<Record>> {
        lock(&self.script.log).push(statement.clone());
        if let Some(message) = lock(&self.script.failures).pop_front() {
            return Err(OgmError::Transient(message));
        }
        if is_schema(&statement.text) {
            return Ok(Vec::new());
        }
        if let Some(records) = lock(&self.script.responses).pop_front() {
            return Ok(records);
        }
        Ok(self.generated_ids(&statement.text).into_iter().collect())
    }

    fn generated_ids(&self, text: &str) -> Option<Record> {
        let returns = text.rsplit_once("RETURN ")?.1;
        if !returns.starts_with("ID(") {
            return None;
        }
        let mut record = Record::new();
        for column in returns.split(", ") {
            let sig = column.rsplit_once(" AS ")?.1.trim();
            let (_, id) = sig.split_once('_')?;
            let id = match id.strip_prefix('m') {
                Some(_) => self.script.next_id.fetch_add(1, Ordering::SeqCst),
                None => id.parse().ok()?,
            };
            record = record.with(sig, DbValue::Value(json!(id)));
        }
        Some(record)
    }
}

fn is_schema(text: &str) -> bool {
    text.starts_with("CREATE CONSTRAINT") || text.starts_with("CREATE INDEX")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl CypherExecutor for ScriptedExecutor {
    async fn execute(&self, _database: &str, statement: Statement) -> Result<Vec<Record>> {
        self.respond(statement)
    }

    async fn begin(&self, _database: &str) -> Result<Box<dyn Transaction>> {
        lock(&self.script.transactions).push("begin");
        Ok(Box::new(ScriptedTransaction {
            executor: self.clone(),
        }))
    }
}

struct ScriptedTransaction {
    executor: ScriptedExecutor,
}

#[async_trait]
impl Transaction for ScriptedTransaction {
    async fn execute(&mut self, statement: Statement) -> Result<Vec<Record>> {
        self.executor.respond(statement)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        lock(&self.executor.script.transactions).push("commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        lock(&self.executor.script.transactions).push("rollback");
        Ok(())
    }
}

pub fn session(db: &ScriptedExecutor) -> Session {
    Session::new(Arc::new(db.clone()), Arc::new(Registry::new()))
}

// ── Result builders ─────────────────────────────────────────────

pub fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Properties::new(),
    }
}

pub fn db_node(id: i64, label: &str, properties: Value) -> DbNode {
    DbNode {
        id,
        labels: vec![label.to_string()],
        properties: props(properties),
    }
}

pub fn db_rel(id: i64, rel_type: &str, start: i64, end: i64, properties: Value) -> DbRelationship {
    DbRelationship {
        id,
        start_id: start,
        end_id: end,
        rel_type: rel_type.to_string(),
        properties: props(properties),
    }
}

/// One load row. Inversion flags are derived from the stored directions.
pub fn path(root: i64, nodes: Vec<DbNode>, rels: Vec<DbRelationship>) -> Record {
    let inverted: Vec<Value> = rels
        .iter()
        .zip(&nodes)
        .map(|(rel, node)| json!(rel.start_id != node.id))
        .collect();
    Record::new()
        .with(ROOT_COLUMN, DbValue::Value(json!(root)))
        .with(NODES_COLUMN, DbValue::List(nodes.into_iter().map(DbValue::Node).collect()))
        .with(
            RELATIONSHIPS_COLUMN,
            DbValue::List(rels.into_iter().map(DbValue::Relationship).collect()),
        )
        .with(INVERTED_COLUMN, DbValue::Value(Value::Array(inverted)))
}

// ── Event recorder ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PreSave(ObjectRef),
    PostSave(ObjectRef, Lifecycle),
    PreDelete(ObjectRef),
    PostDelete(ObjectRef),
    PostLoad(ObjectRef),
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn push(&self, event: Event) {
        lock(&self.events).push(event);
    }
}

impl EventListener for Recorder {
    fn on_pre_save(&self, object: &Object) {
        self.push(Event::PreSave(object.handle()));
    }

    fn on_post_save(&self, object: &Object, lifecycle: Lifecycle) {
        self.push(Event::PostSave(object.handle(), lifecycle));
    }

    fn on_pre_delete(&self, object: &Object) {
        self.push(Event::PreDelete(object.handle()));
    }

    fn on_post_delete(&self, object: &Object) {
        self.push(Event::PostDelete(object.handle()));
    }

    fn on_post_load(&self, object: &Object) {
        self.push(Event::PostLoad(object.handle()));
    }
}
