//! Database drivers and the connection pool.
//!
//! A [`Driver`] opens [`Connection`]s for one dialect; the [`Pool`] hands
//! them out as leases. [`AnyDriver`] talks to SQLite and PostgreSQL through
//! `sqlx`.

mod any;
pub mod pool;

#[cfg(test)]
pub(crate) mod recording;

use async_trait::async_trait;

use crate::ast::Value;
use crate::error::CqnResult;
use crate::transpiler::Dialect;

pub use any::AnyDriver;
pub use pool::{Lease, Pool, PoolConfig, PoolStats, PooledConnection};

/// One result row, columns in select order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A single database session. Statements run strictly one after another.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement returning rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> CqnResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> CqnResult<u64>;

    /// Run parameterless statements (`BEGIN`, `COMMIT`, DDL).
    async fn batch(&mut self, sql: &str) -> CqnResult<()>;

    /// Close the session.
    async fn close(self: Box<Self>) -> CqnResult<()> {
        Ok(())
    }
}

/// Opens connections to one database.
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn connect(&self) -> CqnResult<Box<dyn Connection>>;
}
