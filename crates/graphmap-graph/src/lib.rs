//! graphmap-graph: Neo4j executor for the graphmap OGM.
//!
//! Implements the engine's database collaborator traits over Bolt with
//! `neo4rs`. Statements and records cross this crate boundary in the core
//! value model; nothing Bolt-specific leaks into the engine.

pub mod client;
pub mod convert;
pub mod transaction;

pub use client::{GraphClient, GraphConfig, GraphError};
pub use transaction::Neo4jTransaction;
