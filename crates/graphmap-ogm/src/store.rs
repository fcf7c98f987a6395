//! Identity store: the engine's view of what currently exists in the database.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde_json::Value;

use crate::entity::{EntityKey, GraphEntity};

/// Entities removed by a delete, and the neighbours whose adjacency changed.
#[derive(Debug, Default)]
pub struct Eviction {
    pub deleted: Vec<GraphEntity>,
    pub updated: Vec<EntityKey>,
}

impl Eviction {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.updated.is_empty()
    }

    fn merge(&mut self, other: Eviction) {
        self.deleted.extend(other.deleted);
        for key in other.updated {
            if !self.updated.contains(&key) {
                self.updated.push(key);
            }
        }
        let deleted: BTreeSet<_> = self.deleted.iter().map(|e| e.key).collect();
        self.updated.retain(|k| !deleted.contains(k));
    }
}

#[derive(Debug, Default)]
pub struct IdentityStore {
    entities: HashMap<EntityKey, GraphEntity>,
    custom_ids: HashMap<(&'static str, String), EntityKey>,
    /// Node ID to IDs of every stored relationship touching it.
    incident: HashMap<i64, BTreeSet<i64>>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, key: EntityKey) -> Option<&GraphEntity> {
        self.entities.get(&key)
    }

    pub fn contains(&self, key: EntityKey) -> bool {
        self.entities.contains_key(&key)
    }

    pub fn get_by_custom_id(&self, type_name: &'static str, value: &Value) -> Option<&GraphEntity> {
        self.custom_ids
            .get(&(type_name, value.to_string()))
            .and_then(|key| self.entities.get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphEntity> {
        self.entities.values()
    }

    /// Stored relationships with `node_id` as an endpoint.
    pub fn relationships_of(&self, node_id: i64) -> impl Iterator<Item = &GraphEntity> {
        self.incident
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entities.get(&EntityKey::relationship(*id)))
    }

    /// Insert or replace an entry.
    pub fn save(&mut self, entity: GraphEntity) {
        if let Some(previous) = self.entities.get(&entity.key) {
            if let (Some(type_name), Some(custom)) = (previous.type_name, &previous.custom_id) {
                self.custom_ids.remove(&(type_name, custom.to_string()));
            }
        }
        if let (Some(type_name), Some(custom)) = (entity.type_name, &entity.custom_id) {
            self.custom_ids
                .insert((type_name, custom.to_string()), entity.key);
        }
        if let Some((start, end)) = entity.endpoints {
            self.incident.entry(start).or_default().insert(entity.key.id);
            self.incident.entry(end).or_default().insert(entity.key.id);
        }
        self.entities.insert(entity.key, entity);
    }

    /// Evict an entity. Deleting a node also evicts its relationships.
    pub fn delete(&mut self, key: EntityKey) -> Eviction {
        let mut eviction = Eviction::default();
        if !self.entities.contains_key(&key) {
            return eviction;
        }

        if key.is_node() {
            let rel_ids: Vec<i64> = self
                .incident
                .get(&key.id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            for rel_id in rel_ids {
                let cascade = self.delete(EntityKey::relationship(rel_id));
                eviction.merge(cascade);
            }
            self.incident.remove(&key.id);
        }

        if let Some(entity) = self.remove(key) {
            if let Some((start, end)) = entity.endpoints {
                let mut touched = Eviction::default();
                for node_id in [start, end] {
                    if let Some(ids) = self.incident.get_mut(&node_id) {
                        ids.remove(&key.id);
                    }
                    let node_key = EntityKey::node(node_id);
                    if let Some(node) = self.entities.get_mut(&node_key) {
                        node.related.remove(&key);
                        if !touched.updated.contains(&node_key) {
                            touched.updated.push(node_key);
                        }
                    }
                }
                eviction.merge(touched);
            }
            eviction.merge(Eviction {
                deleted: vec![entity],
                updated: Vec::new(),
            });
        }
        eviction
    }

    /// Drop a relationship that was re-created as `replacement`. Endpoint nodes
    /// that held the old key hold the replacement instead, if they are one of
    /// its endpoints.
    pub fn supersede(&mut self, old: EntityKey, replacement: EntityKey) {
        let Some(entity) = self.remove(old) else {
            return;
        };
        let Some((start, end)) = entity.endpoints else {
            return;
        };
        let current = self.entities.get(&replacement).and_then(|e| e.endpoints);
        for node_id in [start, end] {
            if let Some(ids) = self.incident.get_mut(&node_id) {
                ids.remove(&old.id);
            }
            let Some(node) = self.entities.get_mut(&EntityKey::node(node_id)) else {
                continue;
            };
            let still_incident = current.is_some_and(|(s, e)| node_id == s || node_id == e);
            if node.related.remove(&old) && still_incident {
                node.related.insert(replacement);
            }
        }
    }

    /// Remove every entry, returning them.
    pub fn purge(&mut self) -> Vec<GraphEntity> {
        self.custom_ids.clear();
        self.incident.clear();
        self.entities.drain().map(|(_, e)| e).collect()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.custom_ids.clear();
        self.incident.clear();
    }

    /// Keys reachable from `root` within `steps`, following stored adjacency.
    pub fn unwind(&self, root: EntityKey, steps: u32) -> BTreeSet<EntityKey> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([(root, 0u32)]);
        while let Some((key, depth)) = queue.pop_front() {
            let Some(entity) = self.entities.get(&key) else {
                continue;
            };
            if !seen.insert(key) || depth >= steps {
                continue;
            }
            let endpoints = entity
                .endpoints
                .map(|(s, e)| vec![EntityKey::node(s), EntityKey::node(e)])
                .unwrap_or_default();
            for next in entity.related.iter().copied().chain(endpoints) {
                if !seen.contains(&next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        seen
    }

    fn remove(&mut self, key: EntityKey) -> Option<GraphEntity> {
        let entity = self.entities.remove(&key)?;
        if let (Some(type_name), Some(custom)) = (entity.type_name, &entity.custom_id) {
            let slot = (type_name, custom.to_string());
            if self.custom_ids.get(&slot) == Some(&key) {
                self.custom_ids.remove(&slot);
            }
        }
        Some(entity)
    }
}
