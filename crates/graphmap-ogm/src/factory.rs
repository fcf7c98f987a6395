//! Conversion from domain objects to graph entities.

use graphmap_core::{OgmError, Result};

use crate::entity::{EntityKey, GraphEntity};
use crate::metadata::Metadata;
use crate::object::{ObjectGraph, ObjectRef};
use crate::store::IdentityStore;

/// First placeholder ID. `-1` is reserved for deleted entities.
const FIRST_PLACEHOLDER: i64 = -2;

/// Hands out strictly decreasing negative IDs for unpersisted entities.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: FIRST_PLACEHOLDER,
        }
    }

    pub fn next(&mut self) -> i64 {
        let id = self.next;
        self.next -= 1;
        id
    }
}

/// What to populate beyond ID, label and properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extraction {
    /// Immediate neighbours known to the identity store.
    pub related: bool,
}

pub(crate) struct GraphFactory<'a> {
    objects: &'a ObjectGraph,
    store: &'a IdentityStore,
}

impl<'a> GraphFactory<'a> {
    pub fn new(objects: &'a ObjectGraph, store: &'a IdentityStore) -> Self {
        Self { objects, store }
    }

    /// The object's database ID, falling back to a custom-ID lookup in the store.
    pub fn resolve_id(&self, meta: &Metadata, handle: ObjectRef) -> Result<Option<i64>> {
        let object = self.objects.object(handle)?;
        if object.type_name() != meta.name() {
            return Err(OgmError::Shape(format!(
                "object {} is a {}, expected {}",
                handle.index(),
                object.type_name(),
                meta.name()
            )));
        }
        if let Some(id) = object.id() {
            return Ok(Some(id));
        }
        Ok(meta
            .custom_id_value(object.properties())
            .and_then(|custom| self.store.get_by_custom_id(meta.name(), &custom))
            .map(GraphEntity::id))
    }

    /// Graph entity for an object under `id`. Relationship endpoints are taken
    /// from the endpoint objects when both are persisted.
    pub fn entity(
        &self,
        meta: &Metadata,
        handle: ObjectRef,
        id: i64,
        extraction: Extraction,
    ) -> Result<GraphEntity> {
        let object = self.objects.object(handle)?;
        let properties = meta.graph_properties(object.properties());

        let mut entity = if meta.is_node() {
            GraphEntity::new(EntityKey::node(id), meta.label.clone(), properties, None)
        } else {
            let endpoints = self.endpoint_ids(meta, handle);
            GraphEntity::new(
                EntityKey::relationship(id),
                meta.label.clone(),
                properties,
                endpoints,
            )
        };
        entity.value = Some(handle);
        entity.type_name = Some(meta.name());
        entity.custom_id = meta.custom_id_value(object.properties());

        if extraction.related {
            if entity.is_node() {
                entity.related = self
                    .store
                    .relationships_of(id)
                    .map(|rel| rel.key)
                    .collect();
            } else if let Some((start, end)) = entity.endpoints {
                entity.related = [EntityKey::node(start), EntityKey::node(end)].into();
            }
        }
        Ok(entity)
    }

    fn endpoint_ids(&self, meta: &Metadata, handle: ObjectRef) -> Option<(i64, i64)> {
        let (start, end) = meta.endpoints()?;
        let start = self.objects.related_one(handle, start.name)?;
        let end = self.objects.related_one(handle, end.name)?;
        Some((
            self.objects.id(start).filter(|id| *id >= 0)?,
            self.objects.id(end).filter(|id| *id >= 0)?,
        ))
    }
}
