//! Per-call options for load, save and delete.
//!
//! Depth is always expressed in hops between domain objects. Anything
//! step-based stays inside the engine.

use serde::{Deserialize, Serialize};

use crate::error::{OgmError, Result};

/// Depth value meaning "no bound".
pub const INFINITE_DEPTH: i32 = -1;

/// Largest depth a caller may request.
pub const MAX_DEPTH: i32 = i32::MAX / 2;

/// Options for load, load-all, reload and count operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub depth: i32,
    pub database: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            database: String::new(),
        }
    }
}

impl LoadOptions {
    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    pub depth: i32,
    pub database: String,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            depth: INFINITE_DEPTH,
            database: String::new(),
        }
    }
}

impl SaveOptions {
    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub database: String,
}

impl DeleteOptions {
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

/// Check a requested depth and return it as a finite hop count.
///
/// `INFINITE_DEPTH` maps to `MAX_DEPTH`.
pub fn resolve_depth(depth: i32) -> Result<u32> {
    match depth {
        INFINITE_DEPTH => Ok(MAX_DEPTH as u32),
        d if d < INFINITE_DEPTH => Err(OgmError::Configuration(format!(
            "depth {d} is below the minimum of {INFINITE_DEPTH}"
        ))),
        d if d > MAX_DEPTH => Err(OgmError::Configuration(format!(
            "depth {d} exceeds the maximum of {MAX_DEPTH}"
        ))),
        d => Ok(d as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        assert_eq!(LoadOptions::default().depth, 1);
        assert_eq!(SaveOptions::default().depth, INFINITE_DEPTH);
        assert!(DeleteOptions::default().database.is_empty());
    }

    #[test]
    fn resolve_depth_bounds() {
        assert_eq!(resolve_depth(0).unwrap(), 0);
        assert_eq!(resolve_depth(3).unwrap(), 3);
        assert_eq!(resolve_depth(INFINITE_DEPTH).unwrap(), MAX_DEPTH as u32);
        assert!(matches!(
            resolve_depth(MAX_DEPTH + 1),
            Err(OgmError::Configuration(_))
        ));
        assert!(matches!(resolve_depth(-2), Err(OgmError::Configuration(_))));
    }
}
