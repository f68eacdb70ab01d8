pub mod config;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;

use crate::core::Result;

pub use config::ConnectionConfig;
pub use pool::{ConnectionPool, PoolGuard, PoolStats};
pub use postgres::PgConnector;

/// Opens raw connections for a [`ConnectionPool`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;

    /// True when `connection` can no longer be used and must not go back to
    /// the idle queue.
    fn is_broken(&self, _connection: &Self::Connection) -> bool {
        false
    }
}
