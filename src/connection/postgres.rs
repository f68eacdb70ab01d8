use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};

use super::Connector;
use super::config::ConnectionConfig;
use crate::core::Result;

/// Opens plain-TCP PostgreSQL connections.
///
/// Each connection's I/O driver runs on its own tokio task, which ends when
/// the [`Client`] is dropped.
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: tokio_postgres::Config,
}

impl PgConnector {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            config: config.to_pg_config(),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = Client;

    async fn connect(&self) -> Result<Client> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(target: "stowdb", error = %err, "postgres connection closed with error");
            }
        });
        Ok(client)
    }

    fn is_broken(&self, client: &Client) -> bool {
        client.is_closed()
    }
}
