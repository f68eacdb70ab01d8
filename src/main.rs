mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::app::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    app::run(Cli::parse()).await
}
