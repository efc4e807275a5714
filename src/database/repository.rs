use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

/// Repositories backed by a Postgres pool that need multi-statement units
#[async_trait]
pub trait TransactionalRepository: Send + Sync {
    fn pool(&self) -> &PgPool;

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DatabaseError> {
        self.pool().begin().await.map_err(DatabaseError::from_sqlx)
    }
}
