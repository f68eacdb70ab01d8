use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_postgres::Row;

use super::instrument::{Params, QueryKind, QueryReporter};
use super::metadata::{self, AURORA_VERSION_QUERY, SETTINGS_QUERY, VERSION_QUERY};
use super::queries;
use super::transactions::{PgTx, PgTxSource};
use crate::connection::{
    ConnectionConfig, ConnectionPool, Connector, PgConnector, PoolGuard, PoolStats,
};
use crate::context::Context;
use crate::core::Result;
use crate::logging::Logger;
use crate::result::FromRow;
use crate::transaction::{
    RetryPolicy, RetrySnapshot, TransactionExecutor, TxOpt, TxOptions, read_only, with_logger,
};

/// Logger and context a derived facade runs its calls under.
#[derive(Debug, Clone)]
struct QueryScope {
    logger: Logger,
    ctx: Context,
}

/// PostgreSQL access for the storage service.
///
/// Direct queries (`get`, `query`, `exec`) borrow a pooled connection for a
/// single statement; `transact` runs a closure in a serializable transaction
/// and retries it on serialization conflicts. Clones share the pool and the
/// retry counters.
///
/// ```no_run
/// use stowdb::{ConnectionConfig, Database, read_only};
///
/// # async fn demo() -> stowdb::Result<()> {
/// let db = Database::connect(ConnectionConfig::from_url("postgres://app:pw@localhost/lake")?).await?;
/// db.exec("INSERT INTO objects (id) VALUES ($1)", &[&"a1"]).await?;
/// let count: i64 = db
///     .transact(async |tx| tx.get("SELECT count(*) FROM objects", &[]).await, [read_only()])
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool<PgConnector>,
    executor: Arc<TransactionExecutor<PgTxSource>>,
    scope: Option<QueryScope>,
}

impl Database {
    /// Connects with the default [`RetryPolicy`], opening `min_connections`
    /// connections up front.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        Self::connect_with_policy(config, RetryPolicy::default()).await
    }

    pub async fn connect_with_policy(config: ConnectionConfig, policy: RetryPolicy) -> Result<Self> {
        let pool = ConnectionPool::new(PgConnector::new(&config), config)?;
        pool.warm_up().await?;
        Ok(Self::new(pool, policy))
    }

    pub fn new(pool: ConnectionPool<PgConnector>, policy: RetryPolicy) -> Self {
        let executor = TransactionExecutor::new(PgTxSource::new(pool.clone()), policy);
        Self {
            pool,
            executor: Arc::new(executor),
            scope: None,
        }
    }

    /// Returns a facade whose calls are bound to `ctx` and log through a
    /// logger derived from it. `self` is left as it was.
    pub fn with_context(&self, ctx: Context) -> Self {
        Self {
            pool: self.pool.clone(),
            executor: Arc::clone(&self.executor),
            scope: Some(QueryScope {
                logger: Logger::default().with_context(&ctx),
                ctx,
            }),
        }
    }

    pub fn context(&self) -> Context {
        match &self.scope {
            Some(scope) => scope.ctx.clone(),
            None => Context::background(),
        }
    }

    pub fn logger(&self) -> Logger {
        match &self.scope {
            Some(scope) => scope.logger.clone(),
            None => Logger::default(),
        }
    }

    fn reporter(&self) -> QueryReporter {
        QueryReporter::new(self.logger())
    }

    fn tx_options(&self) -> TxOptions {
        match &self.scope {
            Some(scope) => TxOptions::scoped(scope.logger.clone(), scope.ctx.clone()),
            None => TxOptions::new(),
        }
    }

    /// First row of `query` decoded as `T`; [`DbError::NotFound`](crate::DbError::NotFound)
    /// when there is none.
    pub async fn get<T: FromRow>(&self, query: &str, params: Params<'_>) -> Result<T> {
        let ctx = self.context();
        let run = async {
            let mut conn = ctx.run(self.pool.get()).await?;
            let result =
                queries::under_context(&ctx, &conn, queries::get_one(&conn, query, params)).await;
            discard_if_interrupted(&mut conn, &result);
            result
        };
        self.reporter().track(QueryKind::Get, query, params, run).await
    }

    pub async fn query(&self, query: &str, params: Params<'_>) -> Result<Vec<Row>> {
        let ctx = self.context();
        let run = async {
            let mut conn = ctx.run(self.pool.get()).await?;
            let result =
                queries::under_context(&ctx, &conn, queries::fetch_rows(&conn, query, params))
                    .await;
            discard_if_interrupted(&mut conn, &result);
            result
        };
        self.reporter().track(QueryKind::Query, query, params, run).await
    }

    /// Runs a statement and returns the number of rows it affected.
    pub async fn exec(&self, query: &str, params: Params<'_>) -> Result<u64> {
        let ctx = self.context();
        let run = async {
            let mut conn = ctx.run(self.pool.get()).await?;
            let result =
                queries::under_context(&ctx, &conn, queries::execute(&conn, query, params)).await;
            discard_if_interrupted(&mut conn, &result);
            result
        };
        self.reporter().track(QueryKind::Exec, query, params, run).await
    }

    /// Runs `f` in a transaction, retrying on serialization conflicts.
    ///
    /// Defaults (serializable, read-write, this facade's logger and context)
    /// are overridden by `opts` in order. `f` may run more than once.
    pub async fn transact<T, F, O>(&self, f: F, opts: O) -> Result<T>
    where
        F: AsyncFnMut(&mut PgTx) -> Result<T>,
        O: IntoIterator<Item = TxOpt>,
    {
        let options = self.tx_options().apply(opts);
        self.executor.execute(f, options).await
    }

    /// Server version and selected settings. Probes that fail are left out
    /// of the result rather than reported as errors.
    pub async fn metadata(&self) -> Result<BTreeMap<String, String>> {
        let version = self
            .transact(
                async |tx: &mut PgTx| tx.get::<String>(VERSION_QUERY, &[]).await,
                [read_only(), with_logger(Logger::discard())],
            )
            .await
            .ok();

        let aurora_version = self
            .transact(
                async |tx: &mut PgTx| tx.get::<String>(AURORA_VERSION_QUERY, &[]).await,
                [read_only(), with_logger(Logger::discard())],
            )
            .await
            .ok();

        let settings = self
            .transact(
                async |tx: &mut PgTx| {
                    let rows: Vec<(String, String)> = tx.select(SETTINGS_QUERY, &[]).await?;
                    Ok(metadata::collect_settings(rows))
                },
                [read_only()],
            )
            .await
            .ok();

        Ok(metadata::merge(version, aurora_version, settings))
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn retry_stats(&self) -> RetrySnapshot {
        self.executor.stats()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.executor.policy()
    }

    pub fn pool(&self) -> &ConnectionPool<PgConnector> {
        &self.pool
    }

    /// Closes the shared pool. Affects every facade derived from the same
    /// database.
    pub fn close(&self) {
        self.pool.close();
    }
}

/// A connection whose statement was cut short by the context may still be
/// busy on the server, so it is closed instead of going back to the pool.
fn discard_if_interrupted<C: Connector, T>(conn: &mut PoolGuard<C>, result: &Result<T>) {
    if matches!(result, Err(err) if err.is_context_error()) {
        conn.set_reusable(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DbError;
    use crate::transaction::IsolationLevel;
    use std::time::Duration;

    // Nothing listens on port 1, so connecting fails fast without a server.
    fn offline() -> Database {
        let config = ConnectionConfig::new("app", "pw")
            .host("127.0.0.1")
            .port(1)
            .connect_timeout(Duration::from_secs(2));
        let pool = ConnectionPool::new(PgConnector::new(&config), config).unwrap();
        Database::new(pool, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_with_context_leaves_original_unscoped() {
        let db = offline();
        let ctx = Context::background().with_value("request_id", "req-42");
        let scoped = db.with_context(ctx);

        assert_eq!(scoped.context().value("request_id"), Some("req-42"));
        assert!(
            scoped
                .logger()
                .fields()
                .contains(&("request_id".to_string(), "req-42".to_string()))
        );
        assert!(db.context().value("request_id").is_none());
        assert!(db.logger().fields().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scope_fails_before_connecting() {
        let db = offline();
        let (ctx, cancel) = Context::background().with_cancel();
        let scoped = db.with_context(ctx);
        cancel.cancel();

        let scoped_result = scoped.exec("SELECT 1", &[]).await;
        assert!(matches!(scoped_result, Err(DbError::Cancelled)));

        let tx_result = scoped.transact(async |_tx: &mut PgTx| Ok(()), []).await;
        assert!(matches!(tx_result, Err(DbError::Cancelled)));

        // The original facade is not bound to the cancelled context.
        let original = db.exec("SELECT 1", &[]).await;
        assert!(matches!(original, Err(DbError::Postgres(_))));
        assert_eq!(db.stats().total_connections, 0);
    }

    #[tokio::test]
    async fn test_begin_failure_is_not_retried() {
        let db = offline();
        let result = db
            .transact(
                async |_tx: &mut PgTx| Ok(1),
                [crate::with_isolation(IsolationLevel::RepeatableRead)],
            )
            .await;

        assert!(matches!(result, Err(DbError::Postgres(_))));
        assert_eq!(db.retry_stats(), RetrySnapshot::default());
    }

    #[tokio::test]
    async fn test_metadata_tolerates_unreachable_server() {
        let db = offline();
        let metadata = db.metadata().await.unwrap();
        assert!(metadata.is_empty());
    }

    #[tokio::test]
    async fn test_close_rejects_new_work() {
        let db = offline();
        let scoped = db.with_context(Context::background());
        db.close();
        assert!(matches!(scoped.exec("SELECT 1", &[]).await, Err(DbError::PoolClosed)));
    }

    struct Loopback;

    #[async_trait::async_trait]
    impl Connector for Loopback {
        type Connection = ();

        async fn connect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_interrupted_connection_is_not_pooled() {
        let pool = ConnectionPool::new(Loopback, ConnectionConfig::default()).unwrap();

        let mut conn = pool.get().await.unwrap();
        discard_if_interrupted(&mut conn, &Err::<(), _>(DbError::DeadlineExceeded));
        drop(conn);
        assert_eq!(pool.stats().total_connections, 0);

        let mut conn = pool.get().await.unwrap();
        discard_if_interrupted(&mut conn, &Err::<(), _>(DbError::NotFound));
        drop(conn);
        assert_eq!(pool.stats().idle_connections, 1);
    }
}
