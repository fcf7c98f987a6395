//! Schema registry: builds and caches [`Metadata`] per (type, database).
//!
//! Shared across sessions. Lookups take a read lock; first-time registration
//! is serialized by an async gate held across metadata construction, label
//! collision checks, and schema statements, so concurrent first use of a type
//! resolves to exactly one [`Metadata`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use graphmap_core::{CypherExecutor, OgmError, Result};

use crate::descriptor::{DescriptorFn, Entity, TypeDescriptor};
use crate::metadata::Metadata;

type TypeKey = (String, String);

#[derive(Default)]
pub struct Registry {
    types: RwLock<HashMap<TypeKey, Arc<Metadata>>>,
    /// (is_node, structural label) -> owning type name.
    owners: RwLock<HashMap<(bool, String), &'static str>>,
    gate: Mutex<()>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for an already registered type.
    pub fn cached(&self, name: &str, database: &str) -> Option<Arc<Metadata>> {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        types
            .get(&(name.to_string(), database.to_string()))
            .cloned()
    }

    /// Registered node metadata whose joined labels equal `label`.
    pub fn by_label(&self, label: &str, is_node: bool, database: &str) -> Option<Arc<Metadata>> {
        let owner = {
            let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
            owners.get(&(is_node, label.to_string())).copied()?
        };
        self.cached(owner, database)
    }

    pub async fn register<T: Entity>(
        &self,
        database: &str,
        executor: &dyn CypherExecutor,
    ) -> Result<Arc<Metadata>> {
        self.get(T::descriptor, database, executor).await
    }

    /// Metadata for a type, building and registering it on first use.
    pub async fn get(
        &self,
        descriptor: DescriptorFn,
        database: &str,
        executor: &dyn CypherExecutor,
    ) -> Result<Arc<Metadata>> {
        self.resolve(descriptor(), database, executor).await
    }

    /// Like [`get`](Self::get), for a descriptor that is already built.
    pub async fn resolve(
        &self,
        descriptor: TypeDescriptor,
        database: &str,
        executor: &dyn CypherExecutor,
    ) -> Result<Arc<Metadata>> {
        if let Some(meta) = self.cached(descriptor.name, database) {
            return Self::matching(meta, &descriptor);
        }

        let _guard = self.gate.lock().await;
        if let Some(meta) = self.cached(descriptor.name, database) {
            return Self::matching(meta, &descriptor);
        }
        self.check_name(&descriptor)?;

        let meta = Arc::new(Metadata::build(descriptor)?);
        let owner_key = (meta.is_node(), meta.label.clone());
        {
            let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(owner) = owners.get(&owner_key).filter(|o| **o != meta.name()) {
                let what = if meta.is_node() { "label" } else { "relationship type" };
                return Err(OgmError::Configuration(format!(
                    "{what} `{}` of {} is already registered by {owner}",
                    meta.label,
                    meta.name()
                )));
            }
        }

        for statement in meta.schema_statements() {
            tracing::info!(type_name = meta.name(), cypher = %statement.text, "Asserting schema");
            executor.execute(database, statement).await?;
        }

        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner_key, meta.name());
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((meta.name().to_string(), database.to_string()), Arc::clone(&meta));

        tracing::debug!(
            type_name = meta.name(),
            label = %meta.label,
            database,
            "Registered domain type"
        );
        Ok(meta)
    }

    /// Cached metadata, provided it was built from the same declaration.
    fn matching(meta: Arc<Metadata>, descriptor: &TypeDescriptor) -> Result<Arc<Metadata>> {
        if meta.descriptor.same_as(descriptor) {
            Ok(meta)
        } else {
            Err(name_taken(descriptor.name))
        }
    }

    /// A type name maps to one declaration across every database.
    fn check_name(&self, descriptor: &TypeDescriptor) -> Result<()> {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        let clash = types.iter().any(|((name, _), meta)| {
            *name == descriptor.name && !meta.descriptor.same_as(descriptor)
        });
        if clash {
            return Err(name_taken(descriptor.name));
        }
        Ok(())
    }
}

fn name_taken(name: &str) -> OgmError {
    OgmError::Configuration(format!(
        "type name `{name}` is already registered with a different declaration"
    ))
}
