//! Slow-query reporting wrapped around every query primitive.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_postgres::types::ToSql;

use crate::core::Result;
use crate::logging::Logger;

/// Queries slower than this are logged once they finish.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(100);

/// Parameters as accepted by `tokio-postgres` query methods.
pub type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Get,
    Select,
    Query,
    Exec,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Select => "select",
            Self::Query => "start query",
            Self::Exec => "exec",
        }
    }
}

/// Times a query and reports it through the logger when it ran longer
/// than the threshold. Fast queries produce no log output.
#[derive(Debug, Clone)]
pub struct QueryReporter {
    logger: Logger,
    threshold: Duration,
}

impl QueryReporter {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            threshold: SLOW_QUERY_THRESHOLD,
        }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn track<T, F>(
        &self,
        kind: QueryKind,
        query: &str,
        params: Params<'_>,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.finish(kind, query, params, start.elapsed(), &result);
        result
    }

    fn finish<T>(
        &self,
        kind: QueryKind,
        query: &str,
        params: Params<'_>,
        elapsed: Duration,
        result: &Result<T>,
    ) {
        if elapsed <= self.threshold || !self.logger.is_enabled() {
            return;
        }
        let mut logger = self
            .logger
            .with_field("type", kind.as_str())
            .with_field("query", query)
            .with_field("args", format!("{params:?}"))
            .with_field("duration", format!("{elapsed:?}"));
        if let Err(err) = result {
            logger = logger.with_field("error", err);
        }
        logger.info("database done");
    }
}
