// ============================================================================
// stowdb Library
// ============================================================================
//
// Transactional PostgreSQL access for a storage-management service:
// serializable transactions that are retried when the server reports a
// serialization conflict or deadlock.
//
// ============================================================================

//! # Example
//!
//! ```no_run
//! use stowdb::{ConnectionConfig, Context, Database, DbError};
//! use std::time::Duration;
//!
//! # async fn demo() -> stowdb::Result<()> {
//! let db = Database::connect(ConnectionConfig::from_url("postgres://app:pw@localhost/lake")?).await?;
//!
//! // Bind a request deadline; the original `db` is unaffected.
//! let request = db.with_context(Context::background().with_timeout(Duration::from_secs(5)));
//!
//! let moved = request
//!     .transact(
//!         async |tx| {
//!             let n = tx.exec("UPDATE objects SET tier = 'cold' WHERE tier = 'warm'", &[]).await?;
//!             tx.exec("INSERT INTO audit (moved) VALUES ($1)", &[&(n as i64)]).await?;
//!             Ok(n)
//!         },
//!         [],
//!     )
//!     .await;
//!
//! match moved {
//!     Ok(n) => println!("moved {n} objects"),
//!     Err(DbError::Serialization) => println!("gave up after repeated conflicts"),
//!     Err(err) => return Err(err),
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod context;
pub mod core;
pub mod facade;
pub mod interface;
pub mod logging;
pub mod result;
pub mod transaction;

pub use connection::{ConnectionConfig, ConnectionPool, Connector, PgConnector, PoolGuard, PoolStats};
pub use context::{CancelHandle, Context};
pub use core::{DbError, Result};
pub use facade::{Database, Params, PgTx, PgTxSource, QueryReporter, SLOW_QUERY_THRESHOLD};
pub use interface::{ContextScoped, MetadataProvider, PoolStatsProvider, Querier, Transactor};
pub use logging::{LogRecord, LogSink, Logger, MemorySink, TracingSink};
pub use result::FromRow;
pub use transaction::{
    ErrorClassifier, ErrorKind, IsolationLevel, PredicateClassifier, RetryPolicy, RetrySnapshot,
    SqlStateClassifier, TransactionExecutor, TxHandle, TxOpt, TxOptions, TxSource, read_only,
    with_context, with_isolation, with_logger,
};
