//! Session-owned arena of domain objects.
//!
//! Objects reference each other through [`ObjectRef`] handles stored per link
//! field, so cyclic object graphs need no shared ownership. Typed structs go
//! in and out through serde; the arena keeps only declared properties.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use graphmap_core::{OgmError, Properties, Result};

use crate::descriptor::{Cardinality, DescriptorFn, Entity, FieldDescriptor, TypeDescriptor};
use crate::DELETED_ID;

/// Handle to an object in an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef(usize);

impl ObjectRef {
    pub fn index(self) -> usize {
        self.0
    }
}

/// In-memory audit stamps maintained by lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Object {
    handle: ObjectRef,
    descriptor: Arc<TypeDescriptor>,
    id: Option<i64>,
    properties: Properties,
    links: BTreeMap<&'static str, Vec<ObjectRef>>,
    audit: AuditStamps,
}

impl Object {
    pub fn handle(&self) -> ObjectRef {
        self.handle
    }

    pub fn type_name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Database ID; `None` until first persisted, `DELETED_ID` once deleted.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_deleted(&self) -> bool {
        self.id == Some(DELETED_ID)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn links(&self, field: &str) -> &[ObjectRef] {
        self.links.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn audit(&self) -> &AuditStamps {
        &self.audit
    }
}

#[derive(Debug, Default)]
pub struct ObjectGraph {
    objects: Vec<Object>,
    descriptors: HashMap<&'static str, Arc<TypeDescriptor>>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    /// Add a typed value as a new, unpersisted object.
    pub fn insert<T: Entity>(&mut self, value: &T) -> Result<ObjectRef> {
        let handle = self.create(T::descriptor);
        self.update(handle, value)?;
        Ok(handle)
    }

    /// Read an object back as its typed value.
    pub fn get<T: Entity>(&self, handle: ObjectRef) -> Result<T> {
        let object = self.object(handle)?;
        check_type::<T>(object)?;
        let map = object
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    /// Replace an object's properties with those of a typed value. Links are untouched.
    pub fn update<T: Entity>(&mut self, handle: ObjectRef, value: &T) -> Result<()> {
        let object = self.object_mut(handle)?;
        check_type::<T>(object)?;
        let Value::Object(map) = serde_json::to_value(value)? else {
            return Err(OgmError::Shape(format!(
                "{} must serialize to a map of properties",
                object.type_name()
            )));
        };
        object.properties = map
            .into_iter()
            .filter(|(k, v)| !v.is_null() && declares_property(&object.descriptor, k))
            .collect();
        Ok(())
    }

    pub fn object(&self, handle: ObjectRef) -> Result<&Object> {
        self.objects
            .get(handle.0)
            .ok_or_else(|| OgmError::Shape(format!("unknown object handle {}", handle.0)))
    }

    pub fn id(&self, handle: ObjectRef) -> Option<i64> {
        self.objects.get(handle.0).and_then(|o| o.id)
    }

    pub fn property(&self, handle: ObjectRef, name: &str) -> Option<&Value> {
        self.objects.get(handle.0).and_then(|o| o.properties.get(name))
    }

    /// Set one declared property. `Value::Null` removes it.
    pub fn set_property(
        &mut self,
        handle: ObjectRef,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let object = self.object_mut(handle)?;
        if !declares_property(&object.descriptor, name) {
            return Err(OgmError::Shape(format!(
                "{} has no property `{name}`",
                object.type_name()
            )));
        }
        let value = value.into();
        if value.is_null() {
            object.properties.remove(name);
        } else {
            object.properties.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Point `field` of `from` at `to`. Single-valued fields are replaced.
    pub fn link(&mut self, from: ObjectRef, field: &str, to: ObjectRef) -> Result<()> {
        let target_name = self.object(to)?.type_name();
        let object = self.object_mut(from)?;
        let descriptor = Arc::clone(&object.descriptor);
        let Some(declared) = descriptor.field(field).filter(|f| f.is_link()) else {
            return Err(OgmError::Shape(format!(
                "{} has no association `{field}`",
                object.type_name()
            )));
        };
        let expected = declared.target().map(|t| t().name);
        if expected != Some(target_name) {
            return Err(OgmError::Shape(format!(
                "{}.{field} expects {}, got {target_name}",
                object.type_name(),
                expected.unwrap_or("nothing")
            )));
        }

        let slot = object.links.entry(declared.name()).or_default();
        match declared.cardinality() {
            Some(Cardinality::One) => {
                slot.clear();
                slot.push(to);
            }
            _ => {
                if !slot.contains(&to) {
                    slot.push(to);
                }
            }
        }
        Ok(())
    }

    /// Remove `to` from `field` of `from`. Returns whether a link was removed.
    pub fn unlink(&mut self, from: ObjectRef, field: &str, to: ObjectRef) -> Result<bool> {
        let object = self.object_mut(from)?;
        let Some(slot) = object.links.get_mut(field) else {
            return Ok(false);
        };
        let before = slot.len();
        slot.retain(|r| *r != to);
        Ok(slot.len() != before)
    }

    pub fn related(&self, handle: ObjectRef, field: &str) -> &[ObjectRef] {
        self.objects
            .get(handle.0)
            .map(|o| o.links(field))
            .unwrap_or(&[])
    }

    pub fn related_one(&self, handle: ObjectRef, field: &str) -> Option<ObjectRef> {
        self.related(handle, field).first().copied()
    }

    // ── Engine access ───────────────────────────────────────────

    pub(crate) fn create(&mut self, descriptor: DescriptorFn) -> ObjectRef {
        let built = descriptor();
        self.create_with(built.name, || Arc::new(built))
    }

    /// New empty object for an already built descriptor.
    pub(crate) fn create_from(&mut self, descriptor: &Arc<TypeDescriptor>) -> ObjectRef {
        self.create_with(descriptor.name, || Arc::clone(descriptor))
    }

    fn create_with(
        &mut self,
        name: &'static str,
        descriptor: impl FnOnce() -> Arc<TypeDescriptor>,
    ) -> ObjectRef {
        let descriptor = Arc::clone(self.descriptors.entry(name).or_insert_with(descriptor));
        let handle = ObjectRef(self.objects.len());
        self.objects.push(Object {
            handle,
            descriptor,
            id: None,
            properties: Properties::new(),
            links: BTreeMap::new(),
            audit: AuditStamps::default(),
        });
        handle
    }

    pub(crate) fn object_mut(&mut self, handle: ObjectRef) -> Result<&mut Object> {
        self.objects
            .get_mut(handle.0)
            .ok_or_else(|| OgmError::Shape(format!("unknown object handle {}", handle.0)))
    }

    pub(crate) fn set_id(&mut self, handle: ObjectRef, id: i64) {
        if let Some(object) = self.objects.get_mut(handle.0) {
            object.id = Some(id);
        }
    }

    pub(crate) fn replace_properties(&mut self, handle: ObjectRef, properties: Properties) {
        if let Some(object) = self.objects.get_mut(handle.0) {
            object.properties = properties;
        }
    }

    /// Link without validation. Used when materializing loaded graphs.
    pub(crate) fn attach(
        &mut self,
        from: ObjectRef,
        field: &'static str,
        to: ObjectRef,
        one: bool,
    ) {
        if let Some(object) = self.objects.get_mut(from.0) {
            let slot = object.links.entry(field).or_default();
            if one {
                slot.clear();
            }
            if !slot.contains(&to) {
                slot.push(to);
            }
        }
    }

    /// Drop every link from `holder` to `target`.
    pub(crate) fn detach(&mut self, holder: ObjectRef, target: ObjectRef) {
        if let Some(object) = self.objects.get_mut(holder.0) {
            for slot in object.links.values_mut() {
                slot.retain(|r| *r != target);
            }
        }
    }

    pub(crate) fn mark_created(&mut self, handle: ObjectRef, at: DateTime<Utc>) {
        if let Some(object) = self.objects.get_mut(handle.0) {
            object.audit.created_at = Some(at);
        }
    }

    pub(crate) fn mark_updated(&mut self, handle: ObjectRef, at: DateTime<Utc>) {
        if let Some(object) = self.objects.get_mut(handle.0) {
            object.audit.updated_at = Some(at);
        }
    }

    pub(crate) fn mark_deleted(&mut self, handle: ObjectRef, at: DateTime<Utc>) {
        if let Some(object) = self.objects.get_mut(handle.0) {
            object.id = Some(DELETED_ID);
            object.audit.deleted_at = Some(at);
        }
    }
}

fn declares_property(descriptor: &TypeDescriptor, name: &str) -> bool {
    matches!(
        descriptor.field(name),
        Some(FieldDescriptor::Property { .. } | FieldDescriptor::MapProperty { .. })
    )
}

fn check_type<T: Entity>(object: &Object) -> Result<()> {
    let expected = T::descriptor().name;
    if object.type_name() != expected {
        return Err(OgmError::Shape(format!(
            "object {} is a {}, not a {expected}",
            object.handle.0,
            object.type_name()
        )));
    }
    Ok(())
}
