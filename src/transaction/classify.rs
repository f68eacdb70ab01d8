use tokio_postgres::error::SqlState;

use crate::core::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    None,
    SerializationConflict,
    Other,
}

/// Decides which failures are worth another transaction attempt.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &DbError) -> ErrorKind;

    fn kind_of<T>(&self, result: &Result<T>) -> ErrorKind
    where
        Self: Sized,
    {
        match result {
            Ok(_) => ErrorKind::None,
            Err(err) => self.classify(err),
        }
    }

    fn is_serialization_conflict(&self, err: &DbError) -> bool {
        self.classify(err) == ErrorKind::SerializationConflict
    }
}

/// Recognizes PostgreSQL `serialization_failure` (40001) and
/// `deadlock_detected` (40P01).
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlStateClassifier;

impl ErrorClassifier for SqlStateClassifier {
    fn classify(&self, err: &DbError) -> ErrorKind {
        match err.sql_state() {
            Some(state) if is_conflict_state(state) => ErrorKind::SerializationConflict,
            _ => ErrorKind::Other,
        }
    }
}

pub fn is_conflict_state(state: &SqlState) -> bool {
    *state == SqlState::T_R_SERIALIZATION_FAILURE || *state == SqlState::T_R_DEADLOCK_DETECTED
}

/// Classifier backed by a plain predicate.
pub struct PredicateClassifier<F> {
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&DbError) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> ErrorClassifier for PredicateClassifier<F>
where
    F: Fn(&DbError) -> bool + Send + Sync,
{
    fn classify(&self, err: &DbError) -> ErrorKind {
        if (self.predicate)(err) {
            ErrorKind::SerializationConflict
        } else {
            ErrorKind::Other
        }
    }
}
