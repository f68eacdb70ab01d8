use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use stowdb::{
    Context, ContextScoped, Database, MetadataProvider, PgTx, PoolStatsProvider, Querier,
    Transactor, read_only,
};
use tracing::info;

use super::config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "stowdb")]
#[command(about = "Inspect and exercise a stowdb PostgreSQL database", long_about = None)]
pub struct Cli {
    /// Overrides STOWDB_DATABASE_URL.
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print server version and selected settings as JSON.
    Metadata,
    /// Ping the server and print pool and retry counters as JSON.
    Stats,
    /// Run one statement and print the number of affected rows.
    Exec {
        sql: String,
        /// Run inside a serializable transaction with conflict retry.
        #[arg(long)]
        transaction: bool,
        /// Open the transaction read-only (implies --transaction).
        #[arg(long)]
        read_only: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = CliConfig::from_env()?;
    if let Some(url) = &cli.url {
        config = config.with_url(url)?;
    }

    info!(target: "stowdb", "connecting to {}", config.connection.to_url());
    let db = Database::connect_with_policy(config.connection.clone(), config.retry)
        .await
        .context("failed to connect")?;
    let scoped = bind_request(&db, &config);

    let outcome = match cli.command {
        Command::Metadata => print_json(&metadata(&scoped).await?),
        Command::Stats => print_json(&stats(&scoped).await?),
        Command::Exec {
            sql,
            transaction,
            read_only,
        } => {
            let affected = if transaction || read_only {
                exec_in_transaction(&scoped, &sql, read_only).await?
            } else {
                scoped.exec(&sql, &[]).await?
            };
            print_json(&json!({ "rows_affected": affected }))
        }
    };

    db.close();
    outcome
}

/// Every command runs under a request id and the configured timeout.
fn bind_request<D: ContextScoped>(db: &D, config: &CliConfig) -> D {
    let ctx = Context::background()
        .with_timeout(config.timeout)
        .with_request_id();
    db.with_context(ctx)
}

async fn metadata<M: MetadataProvider>(db: &M) -> Result<BTreeMap<String, String>> {
    db.metadata().await.context("failed to read server metadata")
}

async fn stats<D>(db: &D) -> Result<Value>
where
    D: Querier + PoolStatsProvider,
{
    let one: i32 = db.get("SELECT 1", &[]).await.context("ping failed")?;
    Ok(json!({ "ping": one, "pool": db.stats() }))
}

async fn exec_in_transaction<D>(db: &D, sql: &str, read_only_tx: bool) -> Result<u64>
where
    D: Transactor<Tx = PgTx>,
{
    let opts = if read_only_tx { vec![read_only()] } else { Vec::new() };
    let affected = db
        .transact(async |tx: &mut PgTx| tx.exec(sql, &[]).await, opts)
        .await?;
    Ok(affected)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
