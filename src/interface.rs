use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use tokio_postgres::Row;

use crate::connection::PoolStats;
use crate::context::Context;
use crate::core::Result;
use crate::facade::instrument::Params;
use crate::facade::{Database, PgTx};
use crate::result::FromRow;
use crate::transaction::TxOpt;

/// Direct, non-transactional queries.
#[async_trait]
pub trait Querier: Send + Sync {
    async fn get<T: FromRow + Send>(&self, query: &str, params: Params<'_>) -> Result<T>;

    async fn query(&self, query: &str, params: Params<'_>) -> Result<Vec<Row>>;

    async fn exec(&self, query: &str, params: Params<'_>) -> Result<u64>;
}

/// Transactional execution with retry on serialization conflicts.
///
/// Consumers that only need transactions should depend on this trait rather
/// than on [`Database`].
pub trait Transactor {
    type Tx;

    fn transact<T, F, O>(&self, f: F, opts: O) -> impl Future<Output = Result<T>>
    where
        F: AsyncFnMut(&mut Self::Tx) -> Result<T>,
        O: IntoIterator<Item = TxOpt>;
}

/// Server introspection; see [`Database::metadata`].
pub trait MetadataProvider {
    fn metadata(&self) -> impl Future<Output = Result<BTreeMap<String, String>>>;
}

pub trait PoolStatsProvider {
    fn stats(&self) -> PoolStats;
}

/// Facades that can be re-bound to a request context.
pub trait ContextScoped: Sized {
    fn with_context(&self, ctx: Context) -> Self;
}

#[async_trait]
impl Querier for Database {
    async fn get<T: FromRow + Send>(&self, query: &str, params: Params<'_>) -> Result<T> {
        Database::get(self, query, params).await
    }

    async fn query(&self, query: &str, params: Params<'_>) -> Result<Vec<Row>> {
        Database::query(self, query, params).await
    }

    async fn exec(&self, query: &str, params: Params<'_>) -> Result<u64> {
        Database::exec(self, query, params).await
    }
}

impl Transactor for Database {
    type Tx = PgTx;

    async fn transact<T, F, O>(&self, f: F, opts: O) -> Result<T>
    where
        F: AsyncFnMut(&mut PgTx) -> Result<T>,
        O: IntoIterator<Item = TxOpt>,
    {
        Database::transact(self, f, opts).await
    }
}

impl MetadataProvider for Database {
    async fn metadata(&self) -> Result<BTreeMap<String, String>> {
        Database::metadata(self).await
    }
}

impl PoolStatsProvider for Database {
    fn stats(&self) -> PoolStats {
        Database::stats(self)
    }
}

impl ContextScoped for Database {
    fn with_context(&self, ctx: Context) -> Self {
        Database::with_context(self, ctx)
    }
}
