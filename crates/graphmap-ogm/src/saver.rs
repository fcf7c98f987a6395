//! Depth-bounded diff-and-persist.
//!
//! Saving walks the live object graph breadth-first from each root, turning
//! every reachable object (and every bare relationship between two node
//! objects) into a graph entity. Entities without a database ID get negative
//! placeholders. The walk is diffed against the identity store and all
//! fragments go out as one statement, so a failure leaves the store untouched.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::Utc;

use graphmap_core::options::resolve_depth;
use graphmap_core::{OgmError, Properties, Record, Result, SaveOptions};

use crate::cypher::{ClauseKind, Clauses, EntityQuery, Fragment};
use crate::descriptor::Direction;
use crate::entity::{EntityKey, GraphEntity};
use crate::events::Lifecycle;
use crate::factory::{Extraction, GraphFactory, IdAllocator};
use crate::metadata::{FieldSide, Metadata, RelationshipField};
use crate::object::ObjectRef;
use crate::session::Session;
use crate::store::IdentityStore;

#[derive(Debug)]
struct Entry {
    entity: GraphEntity,
    coord: u32,
    /// Whether this entity's associations were walked.
    expanded: bool,
}

impl Entry {
    fn key(&self) -> EntityKey {
        self.entity.key
    }
}

/// Breadth-first walk of the object graph. Reads the session, writes nothing.
struct Traversal<'a> {
    session: &'a Session,
    database: &'a str,
    max_steps: u32,
    ids: IdAllocator,
    entries: Vec<Entry>,
    index: HashMap<EntityKey, usize>,
    by_object: HashMap<ObjectRef, EntityKey>,
    /// Bare relationships planned so far, by (start, type, end).
    pairs: HashMap<(EntityKey, String, EntityKey), EntityKey>,
    /// Relationship entities re-created between new endpoints: new key -> stored key.
    replaced: HashMap<EntityKey, EntityKey>,
    queue: VecDeque<EntityKey>,
}

impl<'a> Traversal<'a> {
    fn new(session: &'a Session, database: &'a str, max_steps: u32) -> Self {
        Self {
            session,
            database,
            max_steps,
            ids: IdAllocator::new(),
            entries: Vec::new(),
            index: HashMap::new(),
            by_object: HashMap::new(),
            pairs: HashMap::new(),
            replaced: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    fn walk(&mut self, root: ObjectRef) -> Result<()> {
        if self.object_key(root, 0)?.is_none() {
            tracing::debug!(object = root.index(), "Skipping deleted root");
            return Ok(());
        }
        while let Some(key) = self.queue.pop_front() {
            self.expand(key)?;
        }
        Ok(())
    }

    /// Entity key for an object, visiting it on first sight. `None` for deleted objects.
    fn object_key(&mut self, handle: ObjectRef, coord: u32) -> Result<Option<EntityKey>> {
        if let Some(key) = self.by_object.get(&handle) {
            return Ok(Some(*key));
        }
        let object = self.session.objects.object(handle)?;
        if object.is_deleted() {
            return Ok(None);
        }
        let type_name = object.type_name();
        let meta = self
            .session
            .cached_metadata(type_name, self.database)
            .ok_or_else(|| {
                OgmError::Shape(format!(
                    "{type_name} is not registered for database `{}`",
                    self.database
                ))
            })?;

        let factory = GraphFactory::new(&self.session.objects, &self.session.store);
        let mut id = match factory.resolve_id(&meta, handle)? {
            Some(id) => id,
            None => self.ids.next(),
        };
        if self.endpoints_moved(&meta, handle, id) {
            let replacement = self.ids.next();
            self.replaced.insert(
                EntityKey::relationship(replacement),
                EntityKey::relationship(id),
            );
            id = replacement;
        }
        let entity = factory.entity(&meta, handle, id, Extraction::default())?;
        let key = entity.key;
        self.push(Entry {
            entity,
            coord,
            expanded: false,
        });
        self.by_object.insert(handle, key);
        self.queue.push_back(key);
        Ok(Some(key))
    }

    /// Whether a stored relationship entity now connects different nodes.
    /// Relationships cannot be re-pointed, so such an entity is re-created.
    fn endpoints_moved(&self, meta: &Metadata, handle: ObjectRef, id: i64) -> bool {
        let Some((start, end)) = meta.endpoints() else {
            return false;
        };
        if id < 0 {
            return false;
        }
        let Some(stored) = self.session.store.get(EntityKey::relationship(id)) else {
            return false;
        };
        let objects = &self.session.objects;
        let current = |field: &str| {
            objects
                .related_one(handle, field)
                .and_then(|node| objects.id(node))
        };
        match (current(start.name), current(end.name)) {
            (Some(s), Some(e)) => stored.endpoints != Some((s, e)),
            _ => true,
        }
    }

    fn push(&mut self, entry: Entry) {
        self.index.insert(entry.key(), self.entries.len());
        self.entries.push(entry);
    }

    fn entry_mut(&mut self, key: EntityKey) -> Option<&mut Entry> {
        let index = *self.index.get(&key)?;
        self.entries.get_mut(index)
    }

    fn expand(&mut self, key: EntityKey) -> Result<()> {
        let Some(entry) = self.index.get(&key).and_then(|i| self.entries.get(*i)) else {
            return Ok(());
        };
        let coord = entry.coord;
        let Some(handle) = entry.entity.value else {
            return Ok(());
        };
        let type_name = entry.entity.type_name.unwrap_or_default();
        let Some(meta) = self.session.cached_metadata(type_name, self.database) else {
            return Ok(());
        };

        if let Some((start_field, end_field)) = meta.endpoints() {
            let start = self.endpoint(handle, start_field.name, coord)?;
            let end = self.endpoint(handle, end_field.name, coord)?;
            if let Some(entry) = self.entry_mut(key) {
                entry.expanded = true;
                entry.entity.endpoints = Some((start.id, end.id));
                entry.entity.related = BTreeSet::from([start, end]);
            }
            return Ok(());
        }

        if coord.saturating_add(1) >= self.max_steps {
            return Ok(());
        }
        let mut related = BTreeSet::new();
        for field in meta.relationships() {
            let targets = self.session.objects.related(handle, field.name).to_vec();
            for target in targets {
                match field.side {
                    FieldSide::Node => {
                        let Some(other) = self.object_key(target, coord + 2)? else {
                            continue;
                        };
                        related.insert(self.bare_relationship(key, field, other, coord + 1));
                    }
                    FieldSide::Entity => {
                        if let Some(rel) = self.object_key(target, coord + 1)? {
                            related.insert(rel);
                        }
                    }
                }
            }
        }
        if let Some(entry) = self.entry_mut(key) {
            entry.expanded = true;
            entry.entity.related = related;
        }
        Ok(())
    }

    fn endpoint(&mut self, rel: ObjectRef, field: &str, coord: u32) -> Result<EntityKey> {
        let type_name = self.session.objects.object(rel)?.type_name();
        let node = self
            .session
            .objects
            .related_one(rel, field)
            .ok_or_else(|| OgmError::Mapping(format!("{type_name}.{field} is not set")))?;
        self.object_key(node, coord + 1)?.ok_or_else(|| {
            OgmError::Mapping(format!("{type_name}.{field} points at a deleted object"))
        })
    }

    /// The relationship behind a node-to-node link: one already planned, one
    /// the store knows, or a new placeholder.
    fn bare_relationship(
        &mut self,
        this: EntityKey,
        field: &RelationshipField,
        other: EntityKey,
        coord: u32,
    ) -> EntityKey {
        let (start, end) = match field.direction {
            Direction::Incoming => (other, this),
            Direction::Outgoing | Direction::Undirected => (this, other),
        };
        let undirected = field.direction == Direction::Undirected;
        let rel_type = field.rel_type.clone();

        let planned = self.pairs.get(&(start, rel_type.clone(), end)).or_else(|| {
            undirected
                .then(|| self.pairs.get(&(end, rel_type.clone(), start)))
                .flatten()
        });
        if let Some(key) = planned {
            return *key;
        }

        let stored = (start.id >= 0 && end.id >= 0)
            .then(|| {
                self.session.store.relationships_of(start.id).find(|rel| {
                    rel.value.is_none()
                        && rel.label == rel_type
                        && (rel.endpoints == Some((start.id, end.id))
                            || (undirected && rel.endpoints == Some((end.id, start.id))))
                })
            })
            .flatten()
            .filter(|rel| !self.index.contains_key(&rel.key))
            .cloned();
        let mut entity = match stored {
            Some(rel) => rel,
            None => GraphEntity::relationship(
                self.ids.next(),
                rel_type.clone(),
                start.id,
                end.id,
                Properties::new(),
            ),
        };
        entity.related.clear();
        let key = entity.key;
        self.push(Entry {
            entity,
            coord,
            expanded: true,
        });
        self.pairs.insert((start, rel_type, end), key);
        key
    }
}

/// The statement for one save, and what each entity contributed to it.
#[derive(Debug, Default)]
struct Batch {
    clauses: Clauses,
    returns: Vec<EntityKey>,
    created: HashSet<EntityKey>,
    /// Existing entities that got a SET.
    changed: HashSet<EntityKey>,
    saved: HashSet<EntityKey>,
    removed: BTreeSet<EntityKey>,
    /// Replacement key -> stored relationship it supersedes.
    replaced: HashMap<EntityKey, EntityKey>,
}

impl Batch {
    fn build(
        entries: &[Entry],
        replaced: HashMap<EntityKey, EntityKey>,
        store: &IdentityStore,
    ) -> Self {
        let mut batch = Batch::default();
        let mut fragments: Vec<(ClauseKind, Fragment)> = Vec::new();
        let mut bound: HashSet<EntityKey> = HashSet::new();
        let mut touched: Vec<EntityKey> = Vec::new();
        let in_save: HashSet<EntityKey> = entries.iter().map(Entry::key).collect();

        let mut superseded = BTreeSet::new();
        for old in replaced.values() {
            let Some(rel) = store.get(*old) else {
                continue;
            };
            let query = EntityQuery::new(rel, None);
            fragments.push((ClauseKind::Match, query.matching()));
            fragments.push((ClauseKind::Delete, query.delete()));
            bound.insert(*old);
            superseded.insert(*old);
        }
        batch.replaced = replaced;

        for entry in entries {
            let key = entry.key();
            let stored = if entry.entity.is_new() {
                None
            } else {
                store.get(key)
            };
            let query = EntityQuery::new(&entry.entity, stored);

            if entry.entity.is_new() {
                fragments.push(query.create());
                batch.created.insert(key);
            } else if query.is_dirty() {
                fragments.push((ClauseKind::Match, query.matching()));
            }
            if entry.entity.is_new() || query.is_dirty() {
                bound.insert(key);
                if let Some(set) = query.set() {
                    fragments.push((ClauseKind::Set, set));
                    if !entry.entity.is_new() {
                        batch.changed.insert(key);
                    }
                }
                batch.saved.insert(key);
                batch.returns.push(key);
            }

            // Associations dropped locally since the last sync.
            let Some(stored) = stored.filter(|_| entry.expanded && key.is_node()) else {
                continue;
            };
            for gone in stored.related.difference(&entry.entity.related) {
                if gone.is_node()
                    || in_save.contains(gone)
                    || superseded.contains(gone)
                    || batch.removed.contains(gone)
                {
                    continue;
                }
                let Some(rel) = store.get(*gone) else {
                    continue;
                };
                let query = EntityQuery::new(rel, None);
                fragments.push((ClauseKind::Match, query.matching()));
                fragments.push((ClauseKind::Delete, query.delete()));
                bound.insert(*gone);
                batch.removed.insert(*gone);
                if let Some(other) = rel.other_end(key.id) {
                    touched.push(EntityKey::node(other));
                }
            }
        }

        let mut dependencies = Vec::new();
        for (_, fragment) in &fragments {
            for dependency in &fragment.dependencies {
                if bound.insert(*dependency) {
                    dependencies.push(*dependency);
                }
            }
        }
        let by_key: HashMap<EntityKey, &GraphEntity> =
            entries.iter().map(|e| (e.key(), &e.entity)).collect();
        for dependency in dependencies {
            let entity = by_key
                .get(&dependency)
                .copied()
                .or_else(|| store.get(dependency));
            if let Some(entity) = entity {
                fragments.push((ClauseKind::Match, EntityQuery::new(entity, None).matching()));
            }
        }

        for (kind, fragment) in fragments {
            batch.clauses.push(kind, fragment);
        }
        for key in superseded
            .into_iter()
            .chain(batch.removed.iter().copied())
            .chain(touched)
        {
            if !batch.returns.contains(&key) {
                batch.returns.push(key);
            }
        }
        batch
    }
}

impl Session {
    /// Persist objects and everything reachable from them within `options.depth` hops.
    pub async fn save(&mut self, roots: &[ObjectRef], options: &SaveOptions) -> Result<()> {
        let hops = resolve_depth(options.depth)?;
        let max_steps = hops.saturating_mul(2);
        let database = options.database.as_str();

        let mut registered = HashSet::new();
        for root in roots {
            let descriptor = self.objects.object(*root)?.descriptor().clone();
            if registered.insert(descriptor.name) {
                self.register_reachable(descriptor, database).await?;
            }
        }

        let (entries, replaced) = {
            let mut traversal = Traversal::new(self, database, max_steps);
            for root in roots {
                traversal.walk(*root)?;
            }
            (traversal.entries, traversal.replaced)
        };
        if entries.is_empty() {
            return Ok(());
        }

        let batch = Batch::build(&entries, replaced, &self.store);
        for entry in &entries {
            if let Some(handle) = entry.entity.value {
                self.notify(handle, |l, o| l.on_pre_save(o));
            }
        }

        let record = if batch.clauses.is_empty() {
            Record::new()
        } else {
            let statement = batch.clauses.render(&batch.returns);
            let records = self.run(database, statement).await?;
            records.into_iter().next().ok_or_else(|| {
                OgmError::Stale("save matched nothing; reload the affected objects".to_string())
            })?
        };

        let mut assigned = HashMap::new();
        for key in &batch.created {
            let id = record.get_i64(&key.signature()).ok_or_else(|| {
                OgmError::Mapping(format!("no ID returned for new entity {key}"))
            })?;
            assigned.insert(*key, id);
        }
        self.reconcile(entries, &batch, &assigned, max_steps);

        for key in &batch.removed {
            self.evict(*key, database);
        }
        tracing::debug!(
            entities = batch.saved.len(),
            created = batch.created.len(),
            removed = batch.removed.len(),
            "Saved"
        );
        Ok(())
    }

    fn reconcile(
        &mut self,
        entries: Vec<Entry>,
        batch: &Batch,
        assigned: &HashMap<EntityKey, i64>,
        max_steps: u32,
    ) {
        let remap = |key: EntityKey| EntityKey {
            id: assigned.get(&key).copied().unwrap_or(key.id),
            ..key
        };
        let now = Utc::now();
        let mut saved_objects = Vec::new();

        for entry in entries {
            let key = entry.key();
            let mut entity = entry.entity;
            let final_key = remap(key);
            entity.set_id(final_key.id);
            entity.endpoints = entity.endpoints.map(|(s, e)| {
                (
                    remap(EntityKey::node(s)).id,
                    remap(EntityKey::node(e)).id,
                )
            });
            entity.related = entity.related.iter().map(|k| remap(*k)).collect();

            let previous = self.store.get(final_key);
            if !entry.expanded {
                if let Some(previous) = previous {
                    entity.related = previous.related.clone();
                }
            }
            let reached = max_steps.saturating_sub(entry.coord);
            entity.depth = Some(previous.and_then(|p| p.depth).map_or(reached, |d| d.max(reached)));

            if let Some(handle) = entity.value {
                self.objects.set_id(handle, final_key.id);
                if batch.saved.contains(&key) {
                    saved_objects.push((handle, key));
                }
            }
            self.store.save(entity);
        }

        for (key, old) in &batch.replaced {
            self.store.supersede(*old, remap(*key));
        }

        for (handle, key) in saved_objects {
            if batch.created.contains(&key) && !batch.replaced.contains_key(&key) {
                self.objects.mark_created(handle, now);
                self.notify(handle, |l, o| l.on_post_save(o, Lifecycle::Create));
            } else {
                if batch.changed.contains(&key) || batch.replaced.contains_key(&key) {
                    self.objects.mark_updated(handle, now);
                }
                self.notify(handle, |l, o| l.on_post_save(o, Lifecycle::Update));
            }
        }
    }
}
