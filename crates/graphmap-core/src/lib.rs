//! graphmap-core: Shared values, options, configuration, and error handling for the graphmap OGM.
//!
//! This crate provides the foundation used by every other graphmap component:
//! - Property values and result records exchanged with the database
//! - Load/save/delete options and depth constants
//! - Configuration loading
//! - The error taxonomy
//! - The database collaborator traits the engine executes statements through

pub mod config;
pub mod error;
pub mod executor;
pub mod options;
pub mod record;

pub use config::OgmConfig;
pub use error::{OgmError, Result};
pub use executor::{CypherExecutor, Transaction};
pub use options::{DeleteOptions, LoadOptions, SaveOptions, INFINITE_DEPTH, MAX_DEPTH};
pub use record::{DbNode, DbRelationship, DbValue, Properties, Record, Statement};
