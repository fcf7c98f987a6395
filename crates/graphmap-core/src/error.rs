use thiserror::Error;

/// Top-level error type for the graphmap OGM.
#[derive(Error, Debug)]
pub enum OgmError {
    /// Bad domain-type shape, duplicate label or relationship type, or an out-of-range depth.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller handed over something the engine cannot address (stale handle, wrong id kind).
    #[error("Shape error: {0}")]
    Shape(String),

    /// A result or association could not be mapped onto a domain type.
    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Expected at most one result for {type_name}, got {count}")]
    MultipleResults { type_name: String, count: usize },

    /// The database call failed. Never retried by the engine.
    #[error("Database error: {0}")]
    Transient(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A write matched nothing in the database; the cached view is out of date.
    #[error("Stale state: {0}")]
    Stale(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OgmError>;

impl From<config::ConfigError> for OgmError {
    fn from(e: config::ConfigError) -> Self {
        OgmError::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_results_message_names_type() {
        let err = OgmError::MultipleResults {
            type_name: "Person".into(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Expected at most one result for Person, got 2"
        );
    }

    #[test]
    fn serde_errors_convert() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OgmError = bad.into();
        assert!(matches!(err, OgmError::Serialization(_)));
    }
}
