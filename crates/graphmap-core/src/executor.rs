//! The database collaborator the engine executes statements through.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::{Record, Statement};

/// Executes statements against a graph database.
///
/// `database` is the logical database name; the empty string selects the server default.
#[async_trait]
pub trait CypherExecutor: Send + Sync {
    /// Execute one statement in its own auto-committed unit of work.
    async fn execute(&self, database: &str, statement: Statement) -> Result<Vec<Record>>;

    /// Open an explicit transaction on `database`.
    async fn begin(&self, database: &str) -> Result<Box<dyn Transaction>>;
}

/// An open transaction. Consumed by `commit` or `rollback`.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, statement: Statement) -> Result<Vec<Record>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
