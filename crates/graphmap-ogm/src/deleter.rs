//! Cascade deletion and store eviction.

use chrono::Utc;

use graphmap_core::{DeleteOptions, Result};

use crate::cypher::{self, ClauseKind, Clauses, EntityQuery, ID_COLUMN};
use crate::descriptor::Entity;
use crate::entity::EntityKey;
use crate::object::ObjectRef;
use crate::session::Session;

impl Session {
    /// Delete one object's entity. Objects that were never persisted, or are
    /// already deleted, are left alone.
    pub async fn delete(&mut self, handle: ObjectRef, options: &DeleteOptions) -> Result<()> {
        let database = options.database.as_str();
        let object = self.objects.object(handle)?;
        if object.is_deleted() {
            return Ok(());
        }
        let Some(id) = object.id().filter(|id| *id >= 0) else {
            return Ok(());
        };
        let descriptor = object.descriptor().clone();
        let meta = self.register_reachable(descriptor, database).await?;

        let key = if meta.is_node() {
            EntityKey::node(id)
        } else {
            EntityKey::relationship(id)
        };
        let Some(stored) = self.store.get(key).cloned() else {
            tracing::warn!(%key, "Delete of an entity the session never synchronized");
            return Ok(());
        };

        let query = EntityQuery::new(&stored, None);
        let mut clauses = Clauses::new();
        clauses.push(ClauseKind::Match, query.matching());
        clauses.push(ClauseKind::Delete, query.delete());
        let statement = clauses.render(&[key]);

        let mut doomed = vec![handle];
        match stored.endpoints {
            Some((start, end)) => doomed.extend(
                [start, end]
                    .into_iter()
                    .filter_map(|n| self.store.get(EntityKey::node(n)).and_then(|e| e.value)),
            ),
            None => doomed.extend(self.store.relationships_of(id).filter_map(|rel| rel.value)),
        }
        for object in doomed {
            self.notify(object, |l, o| l.on_pre_delete(o));
        }

        let records = self.run(database, statement).await?;
        if records.is_empty() {
            tracing::warn!(%key, "Delete matched nothing");
            return Ok(());
        }
        self.evict(key, database);
        Ok(())
    }

    /// Delete every entity of `T`, evicting each one the database reports.
    pub async fn delete_all<T: Entity>(&mut self, options: &DeleteOptions) -> Result<()> {
        let database = options.database.as_str();
        let meta = self.register_reachable(T::descriptor(), database).await?;
        let statement = cypher::delete_all(&meta.label, meta.is_node());
        let records = self.run(database, statement).await?;

        for record in &records {
            let Some(id) = record.get_i64(ID_COLUMN) else {
                continue;
            };
            let key = if meta.is_node() {
                EntityKey::node(id)
            } else {
                EntityKey::relationship(id)
            };
            self.evict(key, database);
        }
        tracing::debug!(type_name = meta.name(), deleted = records.len(), "Deleted all");
        Ok(())
    }

    /// Remove everything from the database and the identity store.
    pub async fn purge_database(&mut self, options: &DeleteOptions) -> Result<()> {
        let database = options.database.as_str();
        self.run(database, cypher::purge()).await?;

        let now = Utc::now();
        let purged = self.store.purge();
        for entity in &purged {
            if let Some(handle) = entity.value {
                self.objects.mark_deleted(handle, now);
                self.notify(handle, |l, o| l.on_post_delete(o));
            }
        }
        tracing::info!(database, evicted = purged.len(), "Database purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, Company, Event, Person, Recorder, ScriptedExecutor, WorksAt};
    use crate::events::Lifecycle;
    use crate::DELETED_ID;
    use graphmap_core::{DbValue, Record, SaveOptions};
    use serde_json::json;
    use std::sync::Arc;

    async fn friends(session: &mut Session) -> (ObjectRef, ObjectRef) {
        let objects = session.objects_mut();
        let ada = objects.insert(&Person::named("Ada")).unwrap();
        let bob = objects.insert(&Person::named("Bob")).unwrap();
        objects.link(ada, "friends", bob).unwrap();
        session.save(&[ada], &SaveOptions::default()).await.unwrap();
        (ada, bob)
    }

    #[tokio::test]
    async fn deleting_a_node_cascades_to_its_relationships() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let (ada, bob) = friends(&mut session).await;
        let recorder = Arc::new(Recorder::default());
        session.register_listener(recorder.clone());

        session.delete(bob, &DeleteOptions::default()).await.unwrap();

        assert_eq!(
            db.writes().pop().unwrap().text,
            "MATCH (n_101:Person) WHERE ID(n_101) = $n_101_id\n\
             DETACH DELETE n_101\n\
             RETURN ID(n_101) AS n_101"
        );
        let store = session.store();
        assert!(!store.contains(EntityKey::node(101)));
        assert!(!store.contains(EntityKey::relationship(102)));
        assert!(store.contains(EntityKey::node(100)));

        let objects = session.objects();
        assert_eq!(objects.id(bob), Some(DELETED_ID));
        assert!(objects.object(bob).unwrap().audit().deleted_at.is_some());
        assert!(objects.related(ada, "friends").is_empty());
        assert_eq!(
            recorder.events(),
            vec![
                Event::PreDelete(bob),
                Event::PostDelete(bob),
                Event::PostSave(ada, Lifecycle::Update),
            ]
        );
    }

    #[tokio::test]
    async fn deleting_a_relationship_entity_keeps_its_endpoints() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let objects = session.objects_mut();
        let ada = objects.insert(&Person::named("Ada")).unwrap();
        let acme = objects.insert(&Company::named("Acme")).unwrap();
        let job = objects.insert(&WorksAt::since(2020)).unwrap();
        objects.link(job, "employee", ada).unwrap();
        objects.link(job, "company", acme).unwrap();
        objects.link(ada, "employer", job).unwrap();
        session.save(&[job], &SaveOptions::default()).await.unwrap();
        let recorder = Arc::new(Recorder::default());
        session.register_listener(recorder.clone());

        session.delete(job, &DeleteOptions::default()).await.unwrap();

        let text = db.writes().pop().unwrap().text;
        assert!(text.contains("-[r_"));
        assert!(text.contains("\nDELETE r_"));
        assert_eq!(session.objects().id(job), Some(DELETED_ID));
        assert!(session.objects().related(ada, "employer").is_empty());
        assert!(session.store().contains(EntityKey::node(session.objects().id(ada).unwrap())));

        let events = recorder.events();
        assert_eq!(
            &events[..3],
            &[Event::PreDelete(job), Event::PreDelete(ada), Event::PreDelete(acme)]
        );
        assert!(events.contains(&Event::PostDelete(job)));
    }

    #[tokio::test]
    async fn deleting_a_node_deletes_its_relationship_entities() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let objects = session.objects_mut();
        let ada = objects.insert(&Person::named("Ada")).unwrap();
        let acme = objects.insert(&Company::named("Acme")).unwrap();
        let job = objects.insert(&WorksAt::since(2020)).unwrap();
        objects.link(job, "employee", ada).unwrap();
        objects.link(job, "company", acme).unwrap();
        objects.link(ada, "employer", job).unwrap();
        session.save(&[job], &SaveOptions::default()).await.unwrap();
        let job_id = session.objects().id(job).unwrap();
        let acme_id = session.objects().id(acme).unwrap();
        let recorder = Arc::new(Recorder::default());
        session.register_listener(recorder.clone());

        session.delete(ada, &DeleteOptions::default()).await.unwrap();

        let objects = session.objects();
        assert_eq!(objects.id(ada), Some(DELETED_ID));
        assert_eq!(objects.id(job), Some(DELETED_ID));
        assert_eq!(objects.id(acme), Some(acme_id));
        let store = session.store();
        assert!(!store.contains(EntityKey::relationship(job_id)));
        assert!(store.contains(EntityKey::node(acme_id)));

        let events = recorder.events();
        assert_eq!(&events[..2], &[Event::PreDelete(ada), Event::PreDelete(job)]);
        assert!(events.contains(&Event::PostDelete(ada)));
        assert!(events.contains(&Event::PostDelete(job)));
        assert!(!events.contains(&Event::PostDelete(acme)));
    }

    #[tokio::test]
    async fn unsaved_and_deleted_objects_are_ignored() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let ghost = session.objects_mut().insert(&Person::named("Ghost")).unwrap();
        session.delete(ghost, &DeleteOptions::default()).await.unwrap();
        assert!(db.statements().is_empty());

        let (_, bob) = friends(&mut session).await;
        session.delete(bob, &DeleteOptions::default()).await.unwrap();
        let writes = db.writes().len();
        session.delete(bob, &DeleteOptions::default()).await.unwrap();
        assert_eq!(db.writes().len(), writes);
    }

    #[tokio::test]
    async fn deleted_objects_are_not_saved_again() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let (_, bob) = friends(&mut session).await;
        session.delete(bob, &DeleteOptions::default()).await.unwrap();
        let writes = db.writes().len();

        session.save(&[bob], &SaveOptions::default()).await.unwrap();
        assert_eq!(db.writes().len(), writes);
        assert_eq!(session.objects().id(bob), Some(DELETED_ID));
    }

    #[tokio::test]
    async fn unmatched_delete_leaves_store_alone() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let (_, bob) = friends(&mut session).await;
        db.push_response(Vec::new());

        session.delete(bob, &DeleteOptions::default()).await.unwrap();
        assert!(session.store().contains(EntityKey::node(101)));
        assert_eq!(session.objects().id(bob), Some(101));
    }

    #[tokio::test]
    async fn delete_all_evicts_every_reported_id() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let (ada, bob) = friends(&mut session).await;
        db.push_response(vec![
            Record::new().with("id", DbValue::Value(json!(100))),
            Record::new().with("id", DbValue::Value(json!(101))),
        ]);

        session.delete_all::<Person>(&DeleteOptions::default()).await.unwrap();

        assert_eq!(
            db.writes().pop().unwrap().text,
            "MATCH (n:Person) DETACH DELETE n RETURN ID(n) AS id"
        );
        assert!(session.store().is_empty());
        assert_eq!(session.objects().id(ada), Some(DELETED_ID));
        assert_eq!(session.objects().id(bob), Some(DELETED_ID));
    }

    #[tokio::test]
    async fn purge_empties_the_store() {
        let db = ScriptedExecutor::new();
        let mut session = testkit::session(&db);
        let (ada, _) = friends(&mut session).await;
        db.push_response(Vec::new());

        session.purge_database(&DeleteOptions::default()).await.unwrap();
        assert_eq!(db.writes().pop().unwrap().text, "MATCH (n) DETACH DELETE n");
        assert!(session.store().is_empty());
        assert!(session.objects().object(ada).unwrap().is_deleted());
    }
}
