//! Neo4j connection management and the auto-commit executor.

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph};

use graphmap_core::{CypherExecutor, OgmConfig, OgmError, Record, Statement, Transaction};

use crate::convert;
use crate::transaction::Neo4jTransaction;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Bolt conversion error: {0}")]
    Conversion(String),
}

impl From<GraphError> for OgmError {
    fn from(e: GraphError) -> Self {
        OgmError::Transient(e.to_string())
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig::from(&OgmConfig::default())
    }
}

impl From<&OgmConfig> for GraphConfig {
    fn from(config: &OgmConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            max_connections: config.max_connections,
            fetch_size: config.fetch_size,
        }
    }
}

/// Pooled Neo4j client. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Run a statement and collect every row.
    pub async fn fetch(
        &self,
        database: &str,
        statement: Statement,
    ) -> Result<Vec<Record>, GraphError> {
        let query = convert::to_query(statement);
        let mut stream = if database.is_empty() {
            self.graph.execute(query).await?
        } else {
            self.graph.execute_on(database, query).await?
        };
        let mut records = Vec::new();
        while let Some(row) = stream.next().await? {
            records.push(convert::to_record(&row)?);
        }
        Ok(records)
    }

    /// Begin a transaction on `database`; empty selects the server default.
    pub async fn start_txn(&self, database: &str) -> Result<neo4rs::Txn, GraphError> {
        let txn = if database.is_empty() {
            self.graph.start_txn().await?
        } else {
            self.graph.start_txn_on(database).await?
        };
        Ok(txn)
    }
}

#[async_trait]
impl CypherExecutor for GraphClient {
    async fn execute(
        &self,
        database: &str,
        statement: Statement,
    ) -> graphmap_core::Result<Vec<Record>> {
        Ok(self.fetch(database, statement).await?)
    }

    async fn begin(&self, database: &str) -> graphmap_core::Result<Box<dyn Transaction>> {
        let txn = self.start_txn(database).await?;
        Ok(Box::new(Neo4jTransaction::new(txn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_ogm_settings() {
        let ogm = OgmConfig {
            uri: "bolt://graph:7687".to_string(),
            password: "secret".to_string(),
            fetch_size: 32,
            ..OgmConfig::default()
        };
        let config = GraphConfig::from(&ogm);
        assert_eq!(config.uri, "bolt://graph:7687");
        assert_eq!(config.user, "neo4j");
        assert_eq!(config.password, "secret");
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.fetch_size, 32);
    }

    #[test]
    fn graph_errors_surface_as_transient() {
        let err: OgmError = GraphError::Conversion("unsupported".to_string()).into();
        assert!(matches!(err, OgmError::Transient(msg) if msg.contains("unsupported")));
    }
}
