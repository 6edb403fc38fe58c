// src/core/gateway/mod.rs

//! Typed gateway to a node's database engine.
//!
//! Every interaction with an engine — liveness probes, recovery checks, WAL
//! positions, identity, catalog queries — goes through [`EngineClient`]. A
//! client owns exactly one connection; it is never shared between callers.
//! Connections open under a bounded timeout so a dead host cannot stall the
//! monitor loop on authentication.

pub mod replication;

use crate::core::errors::RepGuardError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, Client, NoTls, Row};
use tracing::{debug, warn};

pub use replication::{ReplicationStats, SystemIdentity, WalPositions};

/// A single-owner connection to a database engine.
pub struct EngineClient {
    client: Client,
    cancel_token: CancelToken,
    conninfo: String,
    driver: JoinHandle<()>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("client", &self.client)
            .field("conninfo", &self.conninfo)
            .field("driver", &self.driver)
            .finish()
    }
}

impl EngineClient {
    /// Opens a connection from a connection string, bounded by `timeout`.
    ///
    /// The timeout covers the whole handshake including authentication, so an
    /// unreachable or wedged server fails fast instead of blocking the caller.
    pub async fn connect(conninfo: &str, timeout: Duration) -> Result<Self, RepGuardError> {
        let connect_fut = tokio_postgres::connect(conninfo, NoTls);
        let (client, connection) = tokio::time::timeout(timeout, connect_fut)
            .await
            .map_err(|_| {
                RepGuardError::Connection(format!(
                    "timed out after {}s connecting to \"{}\"",
                    timeout.as_secs(),
                    redact_conninfo(conninfo)
                ))
            })??;

        let cancel_token = client.cancel_token();
        let info = redact_conninfo(conninfo);
        // The connection future drives the socket; it lives as long as the client.
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("connection to \"{}\" closed: {}", info, e);
            }
        });

        Ok(Self {
            client,
            cancel_token,
            conninfo: conninfo.to_string(),
            driver,
        })
    }

    /// Tests whether a server accepts connections, without keeping one open.
    pub async fn server_reachable(conninfo: &str, timeout: Duration) -> bool {
        EngineClient::connect(conninfo, timeout).await.is_ok()
    }

    pub fn conninfo(&self) -> &str {
        &self.conninfo
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Runs a parameterised query returning all rows.
    pub async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, RepGuardError> {
        Ok(self.client.query(statement, params).await?)
    }

    /// Runs a parameterised query expected to return exactly one row.
    pub async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, RepGuardError> {
        Ok(self.client.query_one(statement, params).await?)
    }

    /// Runs a parameterised query returning zero or one rows.
    pub async fn query_opt(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, RepGuardError> {
        Ok(self.client.query_opt(statement, params).await?)
    }

    /// Executes a statement, returning the affected row count.
    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, RepGuardError> {
        Ok(self.client.execute(statement, params).await?)
    }

    /// A liveness probe: the cheapest complete round trip the engine offers.
    pub async fn ping(&self) -> Result<(), RepGuardError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// True when the connected server is in recovery, i.e. running as a standby.
    pub async fn is_in_recovery(&self) -> Result<bool, RepGuardError> {
        let row = self.query_one("SELECT pg_catalog.pg_is_in_recovery()", &[]).await?;
        Ok(row.get(0))
    }

    /// The engine's numeric version, e.g. 150004.
    pub async fn server_version_num(&self) -> Result<i32, RepGuardError> {
        let row = self
            .query_one("SELECT pg_catalog.current_setting('server_version_num')::int", &[])
            .await?;
        Ok(row.get(0))
    }

    /// Delivers a best-effort cancel request for whatever this connection is
    /// currently executing. Errors are swallowed: the server may already have
    /// finished, or be gone entirely.
    pub async fn cancel_in_flight(&self) {
        if let Err(e) = self.cancel_token.cancel_query(NoTls).await {
            warn!("query cancellation was not delivered: {}", e);
        }
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Strips password material from a connection string before it reaches a log line.
pub fn redact_conninfo(conninfo: &str) -> String {
    conninfo
        .split_whitespace()
        .map(|kv| {
            if kv.starts_with("password=") {
                "password=****".to_string()
            } else {
                kv.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
