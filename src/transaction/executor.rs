use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::classify::{ErrorClassifier, SqlStateClassifier};
use super::options::TxOptions;
use super::policy::RetryPolicy;
use super::{TxHandle, TxSource};
use crate::core::{DbError, Result};

/// Counters shared by every execution running through one executor.
#[derive(Debug, Default)]
pub struct RetryStats {
    retries: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySnapshot {
    /// Attempts started after a serialization conflict.
    pub retries: u64,
    /// Executions that gave up with [`DbError::Serialization`].
    pub exhausted: u64,
}

impl RetryStats {
    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RetrySnapshot {
        RetrySnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Runs closures inside transactions opened from `S`, retrying whole
/// attempts on serialization conflicts as decided by `C`.
pub struct TransactionExecutor<S, C = SqlStateClassifier> {
    source: S,
    policy: RetryPolicy,
    classifier: C,
    stats: Arc<RetryStats>,
}

impl<S: TxSource> TransactionExecutor<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self::with_classifier(source, policy, SqlStateClassifier)
    }
}

impl<S, C> TransactionExecutor<S, C>
where
    S: TxSource,
    C: ErrorClassifier,
{
    pub fn with_classifier(source: S, policy: RetryPolicy, classifier: C) -> Self {
        Self {
            source,
            policy,
            classifier,
            stats: Arc::new(RetryStats::default()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn stats(&self) -> RetrySnapshot {
        self.stats.snapshot()
    }

    /// Runs `f` in a transaction and commits its result.
    ///
    /// `f` may be invoked once per attempt, so any effect it has outside the
    /// transaction must be safe to repeat.
    ///
    /// Returns `f`'s value after a successful commit, the first error that is
    /// not a serialization conflict (unchanged), a rollback error, or
    /// [`DbError::Serialization`] once every attempt conflicted. A done
    /// context ends the call before the next attempt starts.
    pub async fn execute<T, F>(&self, mut f: F, options: TxOptions) -> Result<T>
    where
        F: AsyncFnMut(&mut S::Tx) -> Result<T>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;

        while attempt < max_attempts {
            if attempt > 0 {
                let delay = self.policy.delay_before(attempt);
                self.stats.record_retry();
                options
                    .logger()
                    .with_field("attempt", attempt)
                    .with_field("sleep_interval", format!("{delay:?}"))
                    .warn("retrying transaction due to serialization error");
                options.context().sleep(delay).await?;
            }

            if let Some(err) = options.context().err() {
                return Err(err);
            }

            let mut tx = self.source.begin(&options).await?;

            match f(&mut tx).await {
                Err(err) => {
                    tx.rollback().await?;
                    if self.classifier.is_serialization_conflict(&err) {
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
                Ok(value) => match tx.commit().await {
                    Ok(()) => return Ok(value),
                    Err(err) if self.classifier.is_serialization_conflict(&err) => {
                        attempt += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                },
            }
        }

        options
            .logger()
            .with_field("attempt", attempt)
            .warn("transaction failed after max attempts due to serialization error");
        self.stats.record_exhausted();
        Err(DbError::Serialization)
    }
}
