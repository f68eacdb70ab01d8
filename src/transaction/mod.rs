// ============================================================================
// Transaction Execution Module
// ============================================================================
//
// Runs caller work inside a database transaction and retries the whole unit
// when the database aborts it with a serialization conflict.
//
// - options:  per-call settings (isolation, read-only, logger, context)
// - policy:   attempt budget and linear backoff
// - classify: which errors count as conflicts
// - executor: the begin / run / commit-or-rollback loop
//
// ============================================================================

pub mod classify;
pub mod executor;
pub mod options;
pub mod policy;

use async_trait::async_trait;

use crate::core::Result;

pub use classify::{ErrorClassifier, ErrorKind, PredicateClassifier, SqlStateClassifier};
pub use executor::{RetrySnapshot, RetryStats, TransactionExecutor};
pub use options::{
    IsolationLevel, TxOpt, TxOptions, read_only, with_context, with_isolation, with_logger,
};
pub use policy::RetryPolicy;

/// Something that can open transactions.
#[async_trait]
pub trait TxSource: Send + Sync {
    type Tx: TxHandle;

    async fn begin(&self, options: &TxOptions) -> Result<Self::Tx>;
}

/// One live transaction. Terminal operations consume the handle.
#[async_trait]
pub trait TxHandle: Send + Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
