use std::future::Future;

use tokio_postgres::{Client, NoTls, Row};

use super::instrument::Params;
use crate::context::Context;
use crate::core::{DbError, Result};
use crate::result::{FromRow, decode_rows};

/// Runs `fut` against `client` unless `ctx` finishes first. In that case
/// the statement still running on the server is cancelled too, so the
/// connection is not left busy behind an abandoned query.
pub(crate) async fn under_context<T, F>(ctx: &Context, client: &Client, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    let result = ctx.run(fut).await;
    if let Err(err) = &result {
        if err.is_context_error() {
            if let Err(cancel_err) = client.cancel_token().cancel_query(NoTls).await {
                tracing::warn!(target: "stowdb", error = %cancel_err, "failed to cancel running query");
            }
        }
    }
    result
}

/// First row decoded as `T`; remaining rows are ignored.
pub(crate) async fn get_one<T: FromRow>(
    client: &Client,
    query: &str,
    params: Params<'_>,
) -> Result<T> {
    let rows = client.query(query, params).await?;
    match rows.first() {
        Some(row) => T::from_row(row),
        None => Err(DbError::NotFound),
    }
}

pub(crate) async fn select_all<T: FromRow>(
    client: &Client,
    query: &str,
    params: Params<'_>,
) -> Result<Vec<T>> {
    let rows = client.query(query, params).await?;
    decode_rows(&rows)
}

pub(crate) async fn fetch_rows(
    client: &Client,
    query: &str,
    params: Params<'_>,
) -> Result<Vec<Row>> {
    Ok(client.query(query, params).await?)
}

pub(crate) async fn execute(client: &Client, query: &str, params: Params<'_>) -> Result<u64> {
    Ok(client.execute(query, params).await?)
}
