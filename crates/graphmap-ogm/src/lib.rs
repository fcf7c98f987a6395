//! graphmap-ogm: synchronizes typed domain objects with a property graph.
//!
//! A [`Session`] owns an [`ObjectGraph`] of domain objects and an identity
//! store of what the database is believed to hold. Loads and saves are
//! depth-bounded breadth-first traversals; saves diff against the store and
//! batch every change into a single statement.

pub mod cypher;
pub mod deleter;
pub mod descriptor;
pub mod entity;
pub mod events;
pub mod factory;
pub mod loader;
pub mod metadata;
pub mod object;
pub mod queryer;
pub mod registry;
pub mod saver;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testkit;

/// Synthetic property mirroring the database ID.
pub const ID_PROPERTY: &str = "id";

/// Joins the sorted labels of a node type.
pub const LABEL_DELIMITER: &str = ":";

/// Joins a map property name and key into a flat database property.
pub const MAP_PROPERTY_DELIMITER: &str = ".";

/// ID carried by objects whose entity was deleted. Never reused.
pub const DELETED_ID: i64 = -1;

pub use descriptor::{Cardinality, DescriptorFn, Direction, Entity, TypeDescriptor};
pub use events::{EventListener, Lifecycle, ListenerId};
pub use object::{AuditStamps, Object, ObjectGraph, ObjectRef};
pub use queryer::{QueryRow, QueryValue};
pub use registry::Registry;
pub use session::{Key, Session};

pub use graphmap_core::{DeleteOptions, LoadOptions, OgmError, Result, SaveOptions};
