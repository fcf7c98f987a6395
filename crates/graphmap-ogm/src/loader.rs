//! Depth-bounded loading from path results into the object arena.
//!
//! A load runs in three phases. Path rows are merged into one working set of
//! graph entities. A breadth-first walk from each root, bounded in traversal
//! steps (two per hop), decides which entities are in range and which object
//! fields each relationship populates. Only once that plan is complete are
//! objects materialized, linked and written to the identity store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use graphmap_core::options::resolve_depth;
use graphmap_core::{
    DbNode, DbValue, LoadOptions, OgmError, Record, Result, INFINITE_DEPTH, MAX_DEPTH,
};

use crate::cypher::{
    self, Selection, INVERTED_COLUMN, NODES_COLUMN, RELATIONSHIPS_COLUMN, ROOT_COLUMN,
};
use crate::descriptor::{Cardinality, Entity};
use crate::entity::{EntityKey, GraphEntity};
use crate::metadata::{FieldSide, Metadata};
use crate::object::ObjectRef;
use crate::session::{Key, Session};
use crate::LABEL_DELIMITER;

/// Entities merged from every returned path, with full adjacency.
#[derive(Debug, Default)]
struct Fetched {
    roots: Vec<EntityKey>,
    entities: HashMap<EntityKey, GraphEntity>,
}

impl Fetched {
    fn from_records(records: &[Record], roots_are_nodes: bool) -> Result<Self> {
        let mut fetched = Self::default();
        let mut seen_roots = HashSet::new();
        for record in records {
            let root_id = record
                .get_i64(ROOT_COLUMN)
                .ok_or_else(|| mapping("load result row has no root ID"))?;
            let root = if roots_are_nodes {
                EntityKey::node(root_id)
            } else {
                EntityKey::relationship(root_id)
            };
            if seen_roots.insert(root) {
                fetched.roots.push(root);
            }
            fetched.merge_path(record)?;
        }
        Ok(fetched)
    }

    fn merge_path(&mut self, record: &Record) -> Result<()> {
        let nodes = column_list(record, NODES_COLUMN)?;
        let rels = column_list(record, RELATIONSHIPS_COLUMN)?;
        let inverted = record.get(INVERTED_COLUMN).and_then(DbValue::as_bools);

        let mut path = Vec::with_capacity(nodes.len());
        for value in nodes {
            let DbValue::Node(node) = value else {
                return Err(mapping("path node column holds a non-node value"));
            };
            path.push(node.id);
            self.entities
                .entry(EntityKey::node(node.id))
                .or_insert_with(|| node_entity(node));
        }

        for (step, value) in rels.iter().enumerate() {
            let DbValue::Relationship(rel) = value else {
                return Err(mapping("path relationship column holds a non-relationship value"));
            };
            // Orient by the inversion flag when present; paths may run against
            // the stored direction.
            let (start, end) = match (&inverted, path.get(step), path.get(step + 1)) {
                (Some(flags), Some(a), Some(b)) if flags.get(step) == Some(&true) => (*b, *a),
                (Some(_), Some(a), Some(b)) => (*a, *b),
                _ => (rel.start_id, rel.end_id),
            };
            let key = EntityKey::relationship(rel.id);
            self.entities.entry(key).or_insert_with(|| {
                GraphEntity::relationship(
                    rel.id,
                    rel.rel_type.clone(),
                    start,
                    end,
                    rel.properties.clone(),
                )
            });
            for node_id in [start, end] {
                if let Some(node) = self.entities.get_mut(&EntityKey::node(node_id)) {
                    node.related.insert(key);
                }
            }
        }
        Ok(())
    }

    fn get(&self, key: EntityKey) -> Result<&GraphEntity> {
        self.entities
            .get(&key)
            .ok_or_else(|| mapping(format!("{key} is referenced but missing from the result")))
    }
}

pub(crate) fn node_entity(node: &DbNode) -> GraphEntity {
    let mut labels: Vec<&str> = node.labels.iter().map(String::as_str).collect();
    labels.sort_unstable();
    labels.dedup();
    GraphEntity::node(node.id, labels.join(LABEL_DELIMITER), node.properties.clone())
}

fn column_list<'a>(record: &'a Record, column: &str) -> Result<&'a [DbValue]> {
    record
        .get(column)
        .and_then(DbValue::as_list)
        .ok_or_else(|| mapping(format!("load result row has no `{column}` list")))
}

fn mapping(msg: impl Into<String>) -> OgmError {
    OgmError::Mapping(msg.into())
}

#[derive(Debug)]
struct PlannedLink {
    from: EntityKey,
    field: &'static str,
    to: EntityKey,
    one: bool,
}

/// What a load will write, decided before anything is touched.
#[derive(Debug, Default)]
struct Plan {
    /// Traversal steps still available below each entity in range.
    depth: BTreeMap<EntityKey, u32>,
    links: Vec<PlannedLink>,
    /// Relationships reachable through each entity's own fields.
    navigable: HashMap<EntityKey, BTreeSet<EntityKey>>,
    assigned: HashSet<EntityKey>,
}

impl Plan {
    fn reach(&mut self, key: EntityKey, remaining: u32) {
        let depth = self.depth.entry(key).or_insert(remaining);
        *depth = (*depth).max(remaining);
    }

    fn link(
        &mut self,
        from: EntityKey,
        field: &'static str,
        to: EntityKey,
        one: bool,
        via: EntityKey,
    ) {
        self.links.push(PlannedLink { from, field, to, one });
        self.navigable.entry(from).or_default().insert(via);
    }
}

/// Steps a traversal may take from a root. A relationship root sits one step
/// above its endpoints.
fn step_limit(root: EntityKey, hops: u32) -> u32 {
    let steps = hops.saturating_mul(2);
    if root.is_node() {
        steps
    } else {
        steps.saturating_add(1)
    }
}

fn unbounded(hops: u32) -> bool {
    hops >= MAX_DEPTH as u32
}

impl Session {
    /// Load one object by database or custom ID.
    pub async fn load<T: Entity>(
        &mut self,
        key: impl Into<Key>,
        options: &LoadOptions,
    ) -> Result<Option<ObjectRef>> {
        let mut found = self.load_all::<T>(Some(vec![key.into()]), options).await?;
        match found.len() {
            0 | 1 => Ok(found.pop()),
            count => Err(OgmError::MultipleResults {
                type_name: T::descriptor().name.to_string(),
                count,
            }),
        }
    }

    /// Load objects of `T` by key, or every object of `T` when `keys` is `None`.
    /// Roots come back in result order.
    pub async fn load_all<T: Entity>(
        &mut self,
        keys: Option<Vec<Key>>,
        options: &LoadOptions,
    ) -> Result<Vec<ObjectRef>> {
        let hops = resolve_depth(options.depth)?;
        let database = options.database.as_str();
        let meta = self.register_reachable(T::descriptor(), database).await?;

        let selection = match keys {
            None => Selection::All,
            Some(keys) if keys.is_empty() => return Ok(Vec::new()),
            Some(keys) => {
                let selection = selection_for(&meta, keys)?;
                if options.depth != INFINITE_DEPTH {
                    if let Some(cached) = self.cached_roots(&meta, &selection, hops) {
                        tracing::debug!(
                            type_name = meta.name(),
                            roots = cached.len(),
                            "Load served from identity store"
                        );
                        return Ok(cached);
                    }
                }
                selection
            }
        };

        let loaded = self.fetch(&meta, &selection, hops, database).await?;
        Ok(loaded.roots)
    }

    /// Re-read objects at the depth they were last loaded to. Cached entities
    /// the database no longer returns are evicted as deleted.
    pub async fn reload(&mut self, handles: &[ObjectRef], options: &LoadOptions) -> Result<()> {
        let database = options.database.as_str();
        for handle in handles {
            let object = self.objects.object(*handle)?;
            let Some(id) = object.id().filter(|id| *id >= 0) else {
                continue;
            };
            let type_name = object.type_name();
            let meta = self.cached_metadata(type_name, database).ok_or_else(|| {
                OgmError::Shape(format!("{type_name} is not registered for database `{database}`"))
            })?;
            let key = if meta.is_node() {
                EntityKey::node(id)
            } else {
                EntityKey::relationship(id)
            };

            let (steps, before) = match self.store.get(key).and_then(|e| e.depth) {
                Some(steps) => (steps, self.store.unwind(key, steps)),
                None => (
                    step_limit(key, resolve_depth(options.depth)?),
                    BTreeSet::from([key]),
                ),
            };
            let hops = if key.is_node() { steps / 2 } else { steps.saturating_sub(1) / 2 };

            let loaded = self
                .fetch(&meta, &Selection::Ids(vec![id]), hops, database)
                .await?;
            let gone: Vec<EntityKey> = before.difference(&loaded.keys).copied().collect();
            if !gone.is_empty() {
                tracing::info!(
                    type_name,
                    id,
                    evicted = gone.len(),
                    "Reload found entities deleted elsewhere"
                );
            }
            for key in gone {
                self.evict(key, database);
            }
        }
        Ok(())
    }

    fn cached_roots(
        &self,
        meta: &Metadata,
        selection: &Selection,
        hops: u32,
    ) -> Option<Vec<ObjectRef>> {
        let wanted = step_limit(
            if meta.is_node() { EntityKey::node(0) } else { EntityKey::relationship(0) },
            hops,
        );
        let entities: Vec<&GraphEntity> = match selection {
            Selection::All => return None,
            Selection::Ids(ids) => ids
                .iter()
                .map(|id| {
                    self.store.get(if meta.is_node() {
                        EntityKey::node(*id)
                    } else {
                        EntityKey::relationship(*id)
                    })
                })
                .collect::<Option<_>>()?,
            Selection::CustomIds { values, .. } => values
                .iter()
                .map(|value| self.store.get_by_custom_id(meta.name(), value))
                .collect::<Option<_>>()?,
        };
        entities
            .into_iter()
            .map(|entity| {
                (entity.type_name == Some(meta.name()) && entity.depth >= Some(wanted))
                    .then_some(entity.value)
                    .flatten()
                    .filter(|handle| self.objects.id(*handle) == Some(entity.id()))
            })
            .collect()
    }

    async fn fetch(
        &mut self,
        meta: &Arc<Metadata>,
        selection: &Selection,
        hops: u32,
        database: &str,
    ) -> Result<Loaded> {
        let range = (!unbounded(hops)).then_some(hops);
        let statement = if meta.is_node() {
            cypher::load_nodes(&meta.label, selection, range)
        } else {
            cypher::load_relationships(&meta.label, selection, range)
        };
        let records = self.run(database, statement).await?;
        let fetched = Fetched::from_records(&records, meta.is_node())?;

        for root in &fetched.roots {
            let label = &fetched.get(*root)?.label;
            let bound = self.registry().by_label(label, root.is_node(), database);
            if bound.map(|m| m.name()) != Some(meta.name()) {
                return Err(mapping(format!(
                    "result {root} labelled `{label}` does not map to {}",
                    meta.name()
                )));
            }
        }

        let plan = self.plan(&fetched, hops, database)?;
        let loaded = self.commit_plan(fetched, plan, database);
        tracing::debug!(
            type_name = meta.name(),
            roots = loaded.roots.len(),
            entities = loaded.keys.len(),
            "Loaded"
        );
        Ok(loaded)
    }

    fn plan(&self, fetched: &Fetched, hops: u32, database: &str) -> Result<Plan> {
        let mut plan = Plan::default();
        for root in &fetched.roots {
            let limit = step_limit(*root, hops);
            let mut seen = HashSet::from([*root]);
            let mut queue = VecDeque::from([(*root, 0u32, None::<EntityKey>)]);

            while let Some((key, coord, via)) = queue.pop_front() {
                plan.reach(key, limit - coord);
                let entity = fetched.get(key)?;
                let next: Vec<EntityKey> = if key.is_node() {
                    entity.related.iter().copied().collect()
                } else {
                    if plan.assigned.insert(key) {
                        self.plan_relationship(fetched, entity, via, &mut plan, database)?;
                    }
                    entity
                        .endpoints
                        .map(|(s, e)| vec![EntityKey::node(s), EntityKey::node(e)])
                        .unwrap_or_default()
                };
                if coord < limit {
                    for neighbour in next {
                        if seen.insert(neighbour) {
                            queue.push_back((neighbour, coord + 1, Some(key)));
                        }
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Decide which fields `rel` populates. `via` is the node the traversal
    /// came from; the opposite node's field is a back-reference.
    fn plan_relationship(
        &self,
        fetched: &Fetched,
        rel: &GraphEntity,
        via: Option<EntityKey>,
        plan: &mut Plan,
        database: &str,
    ) -> Result<()> {
        let (start_id, end_id) = rel
            .endpoints
            .ok_or_else(|| mapping(format!("{} has no endpoints", rel.key)))?;
        let start = fetched.get(EntityKey::node(start_id))?;
        let end = fetched.get(EntityKey::node(end_id))?;
        plan.reach(start.key, 0);
        plan.reach(end.key, 0);

        let registry = self.registry();
        let rel_meta = registry.by_label(&rel.label, false, database);
        if let Some(meta) = &rel_meta {
            let Some((start_field, end_field)) = meta.endpoints() else {
                return Err(mapping(format!("{} is not a relationship type", meta.name())));
            };
            if start_field.label != start.label || end_field.label != end.label {
                return Err(mapping(format!(
                    "{} {} connects {} and {}, but {} expects {} and {}",
                    rel.label,
                    rel.key,
                    start.label,
                    end.label,
                    meta.name(),
                    start_field.label,
                    end_field.label
                )));
            }
            plan.link(rel.key, start_field.name, start.key, true, start.key);
            plan.link(rel.key, end_field.name, end.key, true, end.key);
        }

        let mut mapped = rel_meta.is_some();
        let sides = if start_id == end_id {
            vec![(start, end)]
        } else {
            vec![(start, end), (end, start)]
        };
        for (this, other) in sides {
            let Some(node_meta) = registry.by_label(&this.label, true, database) else {
                continue;
            };
            let Some(field) = node_meta.field_for(
                this.id(),
                &rel.label,
                (start_id, &start.label),
                (end_id, &end.label),
            ) else {
                continue;
            };
            mapped = true;
            if via != Some(this.key) && !self.allow_cyclic_ref {
                continue;
            }
            let target = match field.side {
                FieldSide::Node => other.key,
                FieldSide::Entity if rel_meta.is_some() => rel.key,
                FieldSide::Entity => continue,
            };
            plan.link(this.key, field.name, target, field.cardinality == Cardinality::One, rel.key);
        }

        if !mapped {
            tracing::warn!(
                rel_type = %rel.label,
                id = rel.id(),
                "No field maps relationship; edge dropped"
            );
        }
        Ok(())
    }

    fn commit_plan(&mut self, mut fetched: Fetched, plan: Plan, database: &str) -> Loaded {
        let roots: HashSet<EntityKey> = fetched.roots.iter().copied().collect();
        let mut handles: HashMap<EntityKey, ObjectRef> = HashMap::new();
        let mut loaded_objects = Vec::new();
        let mut refreshed = HashSet::new();

        for (key, depth) in &plan.depth {
            let Some(entity) = fetched.entities.get(key) else {
                continue;
            };
            let stored = self.store.get(*key);
            let fresh = roots.contains(key)
                || stored.map_or(true, |s| s.depth.map_or(true, |d| d < *depth));
            if fresh {
                refreshed.insert(*key);
            }
            let Some(meta) = self.registry().by_label(&entity.label, key.is_node(), database) else {
                continue;
            };
            let reused = stored
                .and_then(|s| s.value)
                .filter(|h| {
                    self.objects
                        .object(*h)
                        .is_ok_and(|o| o.type_name() == meta.name())
                });
            let handle = match reused {
                Some(handle) if !fresh => handle,
                Some(handle) => {
                    self.materialize(handle, &meta, entity);
                    loaded_objects.push(handle);
                    handle
                }
                None => {
                    let handle = self.objects.create_from(&meta.descriptor);
                    self.materialize(handle, &meta, entity);
                    loaded_objects.push(handle);
                    handle
                }
            };
            handles.insert(*key, handle);
        }

        for link in &plan.links {
            if let (Some(from), Some(to)) = (handles.get(&link.from), handles.get(&link.to)) {
                self.objects.attach(*from, link.field, *to, link.one);
            }
        }

        for (key, depth) in &plan.depth {
            let previous = self.store.get(*key);
            let mut entity = match (refreshed.contains(key), previous) {
                (false, Some(previous)) => previous.clone(),
                _ => match fetched.entities.remove(key) {
                    Some(entity) => entity,
                    None => continue,
                },
            };
            let prior_related = previous.map(|p| p.related.clone()).unwrap_or_default();
            let prior_depth = previous.and_then(|p| p.depth);

            entity.related = prior_related;
            if let Some(navigable) = plan.navigable.get(key) {
                entity.related.extend(navigable.iter().copied());
            }
            entity.depth = Some(prior_depth.map_or(*depth, |d| d.max(*depth)));
            if let Some(handle) = handles.get(key) {
                entity.value = Some(*handle);
                let bound = self.objects.object(*handle).ok().map(|o| o.type_name());
                if let Some(meta) = bound.and_then(|name| self.cached_metadata(name, database)) {
                    entity.type_name = Some(meta.name());
                    entity.custom_id = meta.custom_id_value(&entity.properties);
                }
            }
            self.store.save(entity);
        }

        for handle in &loaded_objects {
            self.notify(*handle, |l, o| l.on_post_load(o));
        }

        Loaded {
            roots: fetched
                .roots
                .iter()
                .filter_map(|root| handles.get(root).copied())
                .collect(),
            keys: plan.depth.into_keys().collect(),
        }
    }

    fn materialize(&mut self, handle: ObjectRef, meta: &Metadata, entity: &GraphEntity) {
        self.objects
            .replace_properties(handle, meta.object_properties(&entity.properties));
        self.objects.set_id(handle, entity.id());
    }
}

/// Outcome of one load statement.
struct Loaded {
    roots: Vec<ObjectRef>,
    keys: BTreeSet<EntityKey>,
}

fn selection_for(meta: &Metadata, keys: Vec<Key>) -> Result<Selection> {
    let mut ids = Vec::new();
    let mut customs = Vec::new();
    for key in keys {
        match key {
            Key::Id(id) => ids.push(id),
            Key::Custom(value) => customs.push(value),
        }
    }
    match (ids.is_empty(), customs.is_empty()) {
        (false, false) => Err(OgmError::Shape(
            "cannot mix database IDs and custom IDs in one load".to_string(),
        )),
        (_, true) => Ok(Selection::Ids(ids)),
        (true, false) => {
            let property = meta.custom_id.ok_or_else(|| {
                OgmError::Shape(format!("{} declares no custom id", meta.name()))
            })?;
            Ok(Selection::CustomIds {
                property,
                values: customs,
            })
        }
    }
}
