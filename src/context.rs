//! Cancellation and deadline propagation.
//!
//! A [`Context`] travels with a call into the database layer. Pool
//! acquisition, `START TRANSACTION`, every query, and the retry backoff race
//! against it, so cancelling the context (or letting its deadline pass) ends
//! the current attempt with [`DbError::Cancelled`] or
//! [`DbError::DeadlineExceeded`].
//!
//! Contexts are values: deriving a child (`with_cancel`, `with_timeout`,
//! `with_value`) never changes the parent, and a child is done as soon as any
//! of its ancestors is.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::{DbError, Result};

/// Request-scoped cancellation token, deadline and logging values.
#[derive(Clone, Default)]
pub struct Context {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    values: Vec<(String, String)>,
}

/// Cancels the [`Context`] returned alongside it by [`Context::with_cancel`].
///
/// Dropping the handle without calling [`cancel`](Self::cancel) leaves the
/// context live.
#[derive(Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &*self.sender.borrow())
            .finish()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a child context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(receiver);
        (
            child,
            CancelHandle {
                sender: Arc::new(sender),
            },
        )
    }

    /// Derives a child context that expires at `deadline` (or earlier, if the
    /// parent already expires earlier).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a child context carrying an extra key/value pair. Values are
    /// picked up by [`Logger::with_context`](crate::logging::Logger::with_context).
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.values.push((key.into(), value.into()));
        child
    }

    /// Derives a child context tagged with a fresh `request_id`.
    pub fn with_request_id(&self) -> Self {
        self.with_value("request_id", uuid::Uuid::new_v4().to_string())
    }

    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The error a call bound to this context should fail with, if it is done.
    pub fn err(&self) -> Option<DbError> {
        if self.signals.iter().any(|signal| *signal.borrow()) {
            return Some(DbError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DbError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DbError {
        let cancelled = async {
            let waits: Vec<_> = self
                .signals
                .iter()
                .cloned()
                .map(|mut signal| {
                    async move {
                        // A dropped handle can no longer cancel.
                        if signal.wait_for(|cancelled| *cancelled).await.is_err() {
                            future::pending::<()>().await;
                        }
                    }
                    .boxed()
                })
                .collect();
            if waits.is_empty() {
                future::pending::<()>().await;
            } else {
                future::select_all(waits).await;
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => DbError::Cancelled,
            _ = expired => DbError::DeadlineExceeded,
        }
    }

    /// Runs `fut` unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }

    /// Waits for `duration`, returning early with the context error if it finishes first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("done", &self.is_done())
            .field("deadline", &self.deadline)
            .field("values", &self.values)
            .finish()
    }
}
