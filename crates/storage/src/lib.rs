//! Postgres persistence for the trestle bridge service.
//!
//! Operations are grouped per table family and all take an explicit
//! `&mut PgConnection`, so the caller decides the transaction boundary:
//! the synchronizer opens one transaction per block, the claim manager one
//! per tick, and read paths may run on a plain pool connection.

mod blocks;
mod claims;
mod deposits;
mod error;
mod exit_roots;
mod merkle_store;
mod migrations;
mod monitored_txs;
mod row;
mod tokens;

pub use blocks::*;
pub use claims::*;
pub use deposits::*;
pub use error::StorageError;
pub use exit_roots::*;
pub use merkle_store::*;
pub use migrations::init_schema;
pub use monitored_txs::*;
pub use tokens::*;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Shared handle to the database. Cloning is cheap; the pool is internal.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connects lazily and runs the schema migration.
    pub async fn connect(url: &str, max_conns: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_conns)
            .connect(url)
            .await?;
        init_schema(&pool).await?;
        Ok(PgStorage { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Starts a transaction; commit or roll back through the returned
    /// handle.
    pub async fn begin(
        &self,
    ) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    /// A plain connection for single-statement reads.
    pub async fn acquire(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, StorageError> {
        Ok(self.pool.acquire().await?)
    }
}
