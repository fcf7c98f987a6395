//! A unit of work: one object arena, one identity store, one optional transaction.
//!
//! Load, save, delete and query operations are implemented on [`Session`] in
//! their own modules. A session is not shared between tasks; the [`Registry`]
//! it holds is.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use graphmap_core::{CypherExecutor, OgmConfig, OgmError, Record, Result, Statement, Transaction};

use crate::descriptor::{DescriptorFn, TypeDescriptor};
use crate::entity::EntityKey;
use crate::events::{EventListener, Lifecycle, ListenerId, Listeners};
use crate::metadata::Metadata;
use crate::object::{Object, ObjectGraph, ObjectRef};
use crate::registry::Registry;
use crate::store::{Eviction, IdentityStore};

/// Identifies a load target by database ID or by custom ID.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Id(i64),
    Custom(Value),
}

impl From<i64> for Key {
    fn from(id: i64) -> Self {
        Key::Id(id)
    }
}

impl From<&str> for Key {
    fn from(custom: &str) -> Self {
        Key::Custom(Value::from(custom))
    }
}

impl From<String> for Key {
    fn from(custom: String) -> Self {
        Key::Custom(Value::from(custom))
    }
}

pub struct Session {
    executor: Arc<dyn CypherExecutor>,
    registry: Arc<Registry>,
    pub(crate) store: IdentityStore,
    pub(crate) objects: ObjectGraph,
    pub(crate) listeners: Listeners,
    pub(crate) allow_cyclic_ref: bool,
    transaction: Option<Box<dyn Transaction>>,
}

impl Session {
    pub fn new(executor: Arc<dyn CypherExecutor>, registry: Arc<Registry>) -> Self {
        Self {
            executor,
            registry,
            store: IdentityStore::new(),
            objects: ObjectGraph::new(),
            listeners: Listeners::default(),
            allow_cyclic_ref: false,
            transaction: None,
        }
    }

    pub fn from_config(
        executor: Arc<dyn CypherExecutor>,
        registry: Arc<Registry>,
        config: &OgmConfig,
    ) -> Self {
        Self::new(executor, registry).with_cyclic_refs(config.allow_cyclic_ref)
    }

    /// Populate back-references that close a cycle when materializing loads.
    pub fn with_cyclic_refs(mut self, allow: bool) -> Self {
        self.allow_cyclic_ref = allow;
        self
    }

    pub fn objects(&self) -> &ObjectGraph {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectGraph {
        &mut self.objects
    }

    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Forget everything the session believes is in the database.
    pub fn clear(&mut self) {
        tracing::debug!(entries = self.store.len(), "Clearing identity store");
        self.store.clear();
    }

    pub fn register_listener(&mut self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    // ── Transactions ────────────────────────────────────────────

    pub async fn begin_transaction(&mut self, database: &str) -> Result<()> {
        if self.transaction.is_some() {
            return Err(OgmError::Transaction(
                "a transaction is already open".to_string(),
            ));
        }
        self.transaction = Some(self.executor.begin(database).await?);
        tracing::debug!(database, "Transaction opened");
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        let transaction = self
            .transaction
            .take()
            .ok_or_else(|| OgmError::Transaction("no open transaction to commit".to_string()))?;
        transaction.commit().await?;
        tracing::debug!("Transaction committed");
        Ok(())
    }

    /// Roll back the open transaction. The identity store is left as is;
    /// call `reload` to resynchronize affected objects.
    pub async fn rollback(&mut self) -> Result<()> {
        let transaction = self
            .transaction
            .take()
            .ok_or_else(|| OgmError::Transaction("no open transaction to roll back".to_string()))?;
        transaction.rollback().await?;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    // ── Engine plumbing ─────────────────────────────────────────

    /// Execute through the open transaction, or auto-committed.
    pub(crate) async fn run(
        &mut self,
        database: &str,
        statement: Statement,
    ) -> Result<Vec<Record>> {
        tracing::debug!(
            database,
            cypher = %statement.text,
            params = statement.params.len(),
            in_transaction = self.transaction.is_some(),
            "Executing statement"
        );
        match self.transaction.as_mut() {
            Some(transaction) => transaction.execute(statement).await,
            None => self.executor.execute(database, statement).await,
        }
    }

    pub(crate) async fn metadata(
        &mut self,
        descriptor: DescriptorFn,
        database: &str,
    ) -> Result<Arc<Metadata>> {
        self.registry
            .get(descriptor, database, self.executor.as_ref())
            .await
    }

    /// Register `root` and every type reachable through its fields, so
    /// results can be bound by label.
    pub(crate) async fn register_reachable(
        &mut self,
        root: TypeDescriptor,
        database: &str,
    ) -> Result<Arc<Metadata>> {
        let meta = self
            .registry
            .resolve(root, database, self.executor.as_ref())
            .await?;
        let mut seen = HashSet::from([meta.name()]);
        let mut pending = referenced_types(&meta);
        while let Some(next) = pending.pop() {
            if !seen.insert(next().name) {
                continue;
            }
            let found = self.metadata(next, database).await?;
            pending.extend(referenced_types(&found));
        }
        Ok(meta)
    }

    pub(crate) fn cached_metadata(&self, name: &str, database: &str) -> Option<Arc<Metadata>> {
        self.registry.cached(name, database)
    }

    pub(crate) fn notify(&self, handle: ObjectRef, hook: impl Fn(&dyn EventListener, &Object)) {
        if let Ok(object) = self.objects.object(handle) {
            self.listeners.each(|listener| hook(listener, object));
        }
    }

    /// Evict `key` and everything the database removes with it.
    pub(crate) fn evict(&mut self, key: EntityKey, database: &str) {
        let eviction = self.store.delete(key);
        self.apply_eviction(eviction, database);
    }

    /// Mirror an eviction onto the object arena and fire notifications.
    ///
    /// Deleted objects get the deleted sentinel ID and are unlinked from
    /// every surviving neighbour. Neighbours receive an update notification.
    pub(crate) fn apply_eviction(&mut self, eviction: Eviction, database: &str) {
        if eviction.is_empty() {
            return;
        }
        let now = Utc::now();
        let survivors: Vec<ObjectRef> = eviction
            .updated
            .iter()
            .filter_map(|key| self.store.get(*key).and_then(|e| e.value))
            .collect();

        for entity in &eviction.deleted {
            if let Some(handle) = entity.value {
                for holder in &survivors {
                    self.objects.detach(*holder, handle);
                }
                continue;
            }
            // A bare relationship: unlink the endpoint objects from each other.
            let Some((start, end)) = entity.endpoints else {
                continue;
            };
            let (Some(s), Some(e)) = (
                self.store.get(EntityKey::node(start)).cloned(),
                self.store.get(EntityKey::node(end)).cloned(),
            ) else {
                continue;
            };
            for (this, other) in [(&s, &e), (&e, &s)] {
                let (Some(holder), Some(target), Some(type_name)) =
                    (this.value, other.value, this.type_name)
                else {
                    continue;
                };
                let Some(meta) = self.cached_metadata(type_name, database) else {
                    continue;
                };
                if let Some(field) = meta.field_for(
                    this.id(),
                    &entity.label,
                    (start, &s.label),
                    (end, &e.label),
                ) {
                    if let Err(e) = self.objects.unlink(holder, field.name, target) {
                        tracing::warn!(
                            field = field.name,
                            error = %e,
                            "Could not unlink evicted relationship"
                        );
                    }
                }
            }
        }

        for entity in &eviction.deleted {
            if let Some(handle) = entity.value {
                self.objects.mark_deleted(handle, now);
                self.notify(handle, |l, o| l.on_post_delete(o));
            }
        }
        for holder in survivors {
            self.objects.mark_updated(holder, now);
            self.notify(holder, |l, o| l.on_post_save(o, Lifecycle::Update));
        }
        tracing::debug!(
            deleted = eviction.deleted.len(),
            updated = eviction.updated.len(),
            "Evicted entities"
        );
    }
}

fn referenced_types(meta: &Metadata) -> Vec<DescriptorFn> {
    let mut types: Vec<DescriptorFn> = meta
        .relationships()
        .iter()
        .flat_map(|f| [f.target, f.other_node])
        .collect();
    if let Some((start, end)) = meta.endpoints() {
        types.push(start.target);
        types.push(end.target);
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, Person, ScriptedExecutor};
    use crate::descriptor::Entity;

    #[tokio::test]
    async fn reachable_types_are_registered() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        session.register_reachable(Person::descriptor(), "").await.unwrap();

        let registry = session.registry();
        assert!(registry.cached("WorksAt", "").is_some());
        assert!(registry.cached("Company", "").is_some());
        assert_eq!(
            registry.by_label("WORKS_AT", false, "").map(|m| m.name()),
            Some("WorksAt")
        );
    }

    #[tokio::test]
    async fn statements_route_through_open_transaction() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);

        session.begin_transaction("").await.unwrap();
        assert!(session.in_transaction());
        assert!(matches!(
            session.begin_transaction("").await,
            Err(OgmError::Transaction(_))
        ));

        session.run("", Statement::new("RETURN 1")).await.unwrap();
        session.commit().await.unwrap();
        assert!(!session.in_transaction());
        assert_eq!(db.transaction_events(), vec!["begin", "commit"]);
    }

    #[tokio::test]
    async fn commit_or_rollback_without_transaction_fails() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        assert!(matches!(session.commit().await, Err(OgmError::Transaction(_))));
        assert!(matches!(session.rollback().await, Err(OgmError::Transaction(_))));

        session.begin_transaction("").await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(db.transaction_events(), vec!["begin", "rollback"]);
    }

    #[test]
    fn keys_convert_from_ids_and_strings() {
        assert_eq!(Key::from(4_i64), Key::Id(4));
        assert_eq!(Key::from("x"), Key::Custom(Value::from("x")));
        assert_eq!(Key::from("y".to_string()), Key::Custom(Value::from("y")));
    }
}
