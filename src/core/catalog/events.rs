// src/core/catalog/events.rs

//! The append-only event log and the external notification hook.
//!
//! Events are written through the primary where possible. When the primary is
//! unreachable — precisely the moment operators most need to know what
//! happened — the write is skipped but the external notification command
//! still fires.

use crate::core::catalog::{Catalog, RecordStatus};
use crate::core::errors::RepGuardError;
use crate::core::gateway::EngineClient;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tokio::process::Command;
use tracing::{info, warn};

/// Kinds of events recorded in the cluster event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    ClusterCreated,
    NodeRegister,
    NodeUnregister,
    NodeRejoin,
    StandbyClone,
    StandbyRegister,
    StandbyPromote,
    StandbyFollow,
    StandbySwitchover,
    WitnessRegister,
    RepguardSupervisorStart,
    RepguardSupervisorStop,
    RepguardFailoverPromote,
    RepguardFailoverFollow,
}

/// One row of the event log.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub node_id: i32,
    pub event_kind: String,
    pub recorded_at: DateTime<Utc>,
    pub success: bool,
    pub detail: Option<String>,
}

/// Records events to the log and invokes the configured notification command.
#[derive(Debug, Clone, Default)]
pub struct EventNotifier {
    /// External command invoked with positional arguments
    /// `(node_id, kind, success, timestamp, detail)`.
    pub command: Option<String>,
}

impl EventNotifier {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    /// Best-effort event write. `primary` may be `None` when no primary is
    /// reachable; the notification still runs so the operator is not blinded.
    pub async fn record(
        &self,
        primary: Option<&EngineClient>,
        node_id: i32,
        kind: EventKind,
        success: bool,
        detail: &str,
    ) {
        let timestamp = Utc::now();

        match primary {
            Some(client) => {
                let result = client
                    .execute(
                        "INSERT INTO repguard.events (node_id, event_kind, recorded_at, \
                             success, detail) VALUES ($1, $2, $3, $4, $5)",
                        &[&node_id, &kind.to_string(), &timestamp, &success, &detail],
                    )
                    .await;
                if let Err(e) = result {
                    warn!("unable to write event {} to the log: {}", kind, e);
                }
            }
            None => {
                warn!(
                    "no primary reachable; event {} for node {} goes unrecorded",
                    kind, node_id
                );
            }
        }

        info!(
            "event {} (node {}, success {}): {}",
            kind, node_id, success, detail
        );
        self.notify(node_id, kind, success, timestamp, detail).await;
    }

    /// Invokes the external notification command, when one is configured.
    async fn notify(
        &self,
        node_id: i32,
        kind: EventKind,
        success: bool,
        timestamp: DateTime<Utc>,
        detail: &str,
    ) {
        let Some(command) = &self.command else {
            return;
        };

        let run = Command::new("sh")
            .arg("-c")
            .arg(format!("{command} \"$@\""))
            .arg("repguard-event")
            .arg(node_id.to_string())
            .arg(kind.to_string())
            .arg(if success { "1" } else { "0" })
            .arg(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
            .arg(detail)
            .output();

        match tokio::time::timeout(Duration::from_secs(30), run).await {
            Ok(Ok(output)) if output.status.success() => {}
            Ok(Ok(output)) => warn!(
                "event notification command exited with {}",
                output.status
            ),
            Ok(Err(e)) => warn!("event notification command failed to start: {}", e),
            Err(_) => warn!("event notification command timed out"),
        }
    }
}

impl<'a> Catalog<'a> {
    /// The most recent events, optionally filtered by kind.
    pub async fn recent_events(
        &self,
        kind: Option<EventKind>,
        limit: i64,
    ) -> Result<Vec<EventRecord>, RepGuardError> {
        let rows = match kind {
            Some(kind) => {
                self.client
                    .query(
                        "SELECT node_id, event_kind, recorded_at, success, detail \
                         FROM repguard.events WHERE event_kind = $1 \
                         ORDER BY recorded_at DESC LIMIT $2",
                        &[&kind.to_string(), &limit],
                    )
                    .await?
            }
            None => {
                self.client
                    .query(
                        "SELECT node_id, event_kind, recorded_at, success, detail \
                         FROM repguard.events ORDER BY recorded_at DESC LIMIT $1",
                        &[&limit],
                    )
                    .await?
            }
        };
        Ok(rows
            .iter()
            .map(|row| EventRecord {
                node_id: row.get(0),
                event_kind: row.get(1),
                recorded_at: row.get(2),
                success: row.get(3),
                detail: row.get(4),
            })
            .collect())
    }
}

/// Convenience: locate the active primary and record an event through it.
pub async fn record_via_primary(
    notifier: &EventNotifier,
    local: &EngineClient,
    connection_timeout: Duration,
    node_id: i32,
    kind: EventKind,
    success: bool,
    detail: &str,
) {
    let catalog = Catalog::new(local);
    let primary = match catalog.get_primary_node().await {
        RecordStatus::Found(record) => {
            EngineClient::connect(&record.conninfo, connection_timeout)
                .await
                .ok()
        }
        _ => None,
    };
    notifier
        .record(primary.as_ref(), node_id, kind, success, detail)
        .await;
}
