//! Scriptable in-memory transaction source for executor tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stowdb::{
    DbError, ErrorClassifier, IsolationLevel, PredicateClassifier, Result, RetryPolicy,
    TransactionExecutor, TxHandle, TxOptions, TxSource,
};
use tokio::time::Instant;

pub const CONFLICT: &str = "could not serialize access";

pub fn conflict() -> DbError {
    DbError::ExecutionError(CONFLICT.to_string())
}

pub fn failure(message: &str) -> DbError {
    DbError::ExecutionError(message.to_string())
}

pub fn is_conflict(err: &DbError) -> bool {
    matches!(err, DbError::ExecutionError(message) if message == CONFLICT)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Begin {
        tx: u32,
        isolation: IsolationLevel,
        read_only: bool,
    },
    Commit(u32),
    Rollback(u32),
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    begin_times: Vec<Instant>,
    next_tx: u32,
    begin_errors: VecDeque<DbError>,
    commit_errors: VecDeque<Option<DbError>>,
    rollback_errors: VecDeque<Option<DbError>>,
}

/// Records every begin/commit/rollback. Failures are queued up front and
/// consumed in order; an empty queue means success.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<State>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_begin(&self, err: DbError) {
        self.state.lock().unwrap().begin_errors.push_back(err);
    }

    /// Queues commit outcomes; `None` commits normally.
    pub fn script_commits(&self, outcomes: impl IntoIterator<Item = Option<DbError>>) {
        self.state.lock().unwrap().commit_errors.extend(outcomes);
    }

    pub fn script_rollbacks(&self, outcomes: impl IntoIterator<Item = Option<DbError>>) {
        self.state.lock().unwrap().rollback_errors.extend(outcomes);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn begin_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().begin_times.clone()
    }

    pub fn begins(&self) -> usize {
        self.count(|event| matches!(event, Event::Begin { .. }))
    }

    pub fn commits(&self) -> usize {
        self.count(|event| matches!(event, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|event| matches!(event, Event::Rollback(_)))
    }

    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

pub struct FakeTx {
    pub id: u32,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl TxSource for FakeSource {
    type Tx = FakeTx;

    async fn begin(&self, options: &TxOptions) -> Result<FakeTx> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.begin_errors.pop_front() {
            return Err(err);
        }
        state.next_tx += 1;
        let id = state.next_tx;
        state.events.push(Event::Begin {
            tx: id,
            isolation: options.isolation(),
            read_only: options.read_only(),
        });
        state.begin_times.push(Instant::now());
        Ok(FakeTx {
            id,
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl TxHandle for FakeTx {
    async fn commit(self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Commit(self.id));
        match state.commit_errors.pop_front().flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Rollback(self.id));
        match state.rollback_errors.pop_front().flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn executor(
    source: FakeSource,
    policy: RetryPolicy,
) -> TransactionExecutor<FakeSource, impl ErrorClassifier> {
    TransactionExecutor::with_classifier(source, policy, PredicateClassifier::new(is_conflict))
}
