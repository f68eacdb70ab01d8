use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_postgres::Row;

use super::instrument::{Params, QueryKind, QueryReporter};
use super::queries;
use crate::connection::{ConnectionPool, PgConnector, PoolGuard};
use crate::context::Context;
use crate::core::{DbError, Result};
use crate::logging::Logger;
use crate::result::FromRow;
use crate::transaction::{IsolationLevel, TxHandle, TxOptions, TxSource};

/// Opens PostgreSQL transactions on connections borrowed from a pool, one
/// connection per transaction.
#[derive(Clone)]
pub struct PgTxSource {
    pool: ConnectionPool<PgConnector>,
}

impl PgTxSource {
    pub fn new(pool: ConnectionPool<PgConnector>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool<PgConnector> {
        &self.pool
    }
}

pub fn begin_statement(isolation: IsolationLevel, read_only: bool) -> String {
    let access = if read_only { "READ ONLY" } else { "READ WRITE" };
    format!(
        "START TRANSACTION ISOLATION LEVEL {}, {}",
        isolation.as_sql(),
        access
    )
}

#[async_trait]
impl TxSource for PgTxSource {
    type Tx = PgTx;

    async fn begin(&self, options: &TxOptions) -> Result<PgTx> {
        let ctx = options.context().clone();
        let mut conn = ctx.run(self.pool.get()).await?;

        // Until COMMIT or ROLLBACK goes through, the connection must not be reused.
        conn.set_reusable(false);
        let statement = begin_statement(options.isolation(), options.read_only());
        ctx.run(async { conn.batch_execute(&statement).await.map_err(DbError::from) })
            .await?;

        Ok(PgTx {
            conn,
            ctx,
            reporter: QueryReporter::new(options.logger().clone()),
            interrupted: AtomicBool::new(false),
        })
    }
}

/// A live PostgreSQL transaction handed to transactional closures.
///
/// Queries observe the context the transaction was started with and are
/// reported through the transaction's logger when slow.
pub struct PgTx {
    conn: PoolGuard<PgConnector>,
    ctx: Context,
    reporter: QueryReporter,
    /// Set once a query was cancelled on the server; the connection is
    /// closed rather than pooled when the transaction ends.
    interrupted: AtomicBool,
}

impl PgTx {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn logger(&self) -> &Logger {
        self.reporter.logger()
    }

    pub async fn get<T: FromRow>(&self, query: &str, params: Params<'_>) -> Result<T> {
        let run = self.guarded(queries::get_one(&self.conn, query, params));
        self.reporter.track(QueryKind::Get, query, params, run).await
    }

    pub async fn select<T: FromRow>(&self, query: &str, params: Params<'_>) -> Result<Vec<T>> {
        let run = self.guarded(queries::select_all(&self.conn, query, params));
        self.reporter.track(QueryKind::Select, query, params, run).await
    }

    pub async fn query(&self, query: &str, params: Params<'_>) -> Result<Vec<Row>> {
        let run = self.guarded(queries::fetch_rows(&self.conn, query, params));
        self.reporter.track(QueryKind::Query, query, params, run).await
    }

    pub async fn exec(&self, query: &str, params: Params<'_>) -> Result<u64> {
        let run = self.guarded(queries::execute(&self.conn, query, params));
        self.reporter.track(QueryKind::Exec, query, params, run).await
    }

    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let result = queries::under_context(&self.ctx, &self.conn, fut).await;
        if matches!(&result, Err(err) if err.is_context_error()) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn finish(&mut self, statement: &str) -> Result<()> {
        self.conn.batch_execute(statement).await?;
        self.conn.set_reusable(!self.interrupted.load(Ordering::SeqCst));
        Ok(())
    }
}

#[async_trait]
impl TxHandle for PgTx {
    async fn commit(mut self) -> Result<()> {
        if let Some(err) = self.ctx.err() {
            // The caller gave up on this attempt; its outcome is the context error.
            let _ = self.finish("ROLLBACK").await;
            return Err(err);
        }
        let clean = !self.interrupted.load(Ordering::SeqCst);
        match self.conn.batch_execute("COMMIT").await {
            Ok(()) => {
                self.conn.set_reusable(clean);
                Ok(())
            }
            Err(err) => {
                // A server-side COMMIT failure ends the transaction; the session stays usable.
                if err.as_db_error().is_some() {
                    self.conn.set_reusable(clean);
                }
                Err(err.into())
            }
        }
    }

    async fn rollback(mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
