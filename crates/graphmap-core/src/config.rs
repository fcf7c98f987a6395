//! Configuration management for graphmap services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`GRAPHMAP__OGM__*`)
//! 2. Config file (`graphmap.toml`, `[ogm]` section)
//! 3. Defaults

use serde::Deserialize;

use crate::error::Result;

/// Connection and mapping settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OgmConfig {
    /// Bolt URI of the database server.
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Logical database; empty selects the server default.
    #[serde(default)]
    pub database: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,

    /// Populate reverse references when loading (A→R→B also sets B's field back to A).
    #[serde(default)]
    pub allow_cyclic_ref: bool,
}

impl Default for OgmConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: String::new(),
            database: String::new(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
            allow_cyclic_ref: false,
        }
    }
}

impl OgmConfig {
    /// Load from `<file_prefix>.toml` (optional) overlaid by `GRAPHMAP__` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("GRAPHMAP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<OgmConfig>("ogm") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => {
                tracing::debug!(file_prefix, "No [ogm] configuration found, using defaults");
                Ok(OgmConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}
