//! Explicit transactions over a neo4rs `Txn`.

use async_trait::async_trait;

use graphmap_core::{Record, Result, Statement, Transaction};

use crate::client::GraphError;
use crate::convert;

pub struct Neo4jTransaction {
    txn: neo4rs::Txn,
}

impl Neo4jTransaction {
    pub fn new(txn: neo4rs::Txn) -> Self {
        Self { txn }
    }

    async fn fetch(
        &mut self,
        statement: Statement,
    ) -> std::result::Result<Vec<Record>, GraphError> {
        let query = convert::to_query(statement);
        let mut stream = self.txn.execute(query).await?;
        let mut records = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await? {
            records.push(convert::to_record(&row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Transaction for Neo4jTransaction {
    async fn execute(&mut self, statement: Statement) -> Result<Vec<Record>> {
        Ok(self.fetch(statement).await?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await.map_err(GraphError::from)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await.map_err(GraphError::from)?;
        Ok(())
    }
}
