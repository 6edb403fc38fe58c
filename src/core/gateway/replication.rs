// src/core/gateway/replication.rs

//! Replication-level facts about an engine: WAL positions, cluster identity,
//! timeline history, downstream streaming state, and replication slots.

use crate::core::errors::RepGuardError;
use crate::core::failover::timeline::TimelineHistoryEntry;
use crate::core::gateway::EngineClient;
use crate::core::lsn::Lsn;

/// WAL positions reported by one engine. On a primary only `current` is set;
/// on a standby `receive` and `replay` are set.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalPositions {
    pub current: Option<Lsn>,
    pub receive: Option<Lsn>,
    pub replay: Option<Lsn>,
}

impl WalPositions {
    /// The most advanced position this node is known to have.
    pub fn newest(&self) -> Option<Lsn> {
        [self.current, self.receive, self.replay]
            .into_iter()
            .flatten()
            .max()
    }
}

/// Identity of the cluster an engine belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemIdentity {
    pub system_identifier: u64,
    pub timeline: u32,
}

/// State of one downstream node as seen from its upstream.
#[derive(Debug, Clone)]
pub struct ReplicationStats {
    pub application_name: String,
    pub state: String,
    pub sent_lsn: Option<Lsn>,
    pub replay_lsn: Option<Lsn>,
}

fn parse_lsn_field(value: Option<String>) -> Result<Option<Lsn>, RepGuardError> {
    value.map(|s| s.parse()).transpose()
}

impl EngineClient {
    /// Fetches the server's WAL positions. LSNs come back as text and are
    /// parsed into their 64-bit form before anything compares them.
    pub async fn wal_positions(&self) -> Result<WalPositions, RepGuardError> {
        let row = self
            .query_one(
                "SELECT CASE WHEN pg_catalog.pg_is_in_recovery() THEN NULL \
                        ELSE pg_catalog.pg_current_wal_lsn()::text END, \
                        pg_catalog.pg_last_wal_receive_lsn()::text, \
                        pg_catalog.pg_last_wal_replay_lsn()::text",
                &[],
            )
            .await?;
        Ok(WalPositions {
            current: parse_lsn_field(row.get(0))?,
            receive: parse_lsn_field(row.get(1))?,
            replay: parse_lsn_field(row.get(2))?,
        })
    }

    /// The position a standby has received up to, falling back to the replay
    /// position when the receiver has not started yet.
    pub async fn last_receive_lsn(&self) -> Result<Lsn, RepGuardError> {
        let positions = self.wal_positions().await?;
        Ok(positions
            .receive
            .or(positions.replay)
            .unwrap_or(Lsn::INVALID))
    }

    /// Fetches the cluster's system identifier and current timeline.
    pub async fn identity(&self) -> Result<SystemIdentity, RepGuardError> {
        let row = self
            .query_one(
                "SELECT system_identifier::text FROM pg_catalog.pg_control_system()",
                &[],
            )
            .await?;
        let system_identifier: String = row.get(0);
        let system_identifier = system_identifier
            .parse::<u64>()
            .map_err(|_| RepGuardError::Protocol("unparseable system identifier".to_string()))?;

        let row = self
            .query_one(
                "SELECT timeline_id FROM pg_catalog.pg_control_checkpoint()",
                &[],
            )
            .await?;
        let timeline: i32 = row.get(0);

        Ok(SystemIdentity {
            system_identifier,
            timeline: timeline as u32,
        })
    }

    /// Fetches and parses the history file for timeline `tli` from this server.
    ///
    /// Reading the file requires the `pg_read_server_files` privilege; the
    /// permission error kind surfaces when the role lacks it.
    pub async fn timeline_history(
        &self,
        tli: u32,
    ) -> Result<Vec<TimelineHistoryEntry>, RepGuardError> {
        let row = self
            .query_one(
                "SELECT pg_catalog.pg_read_file(format('pg_wal/%s.history', \
                 upper(lpad(to_hex($1::int), 8, '0'))))",
                &[&(tli as i32)],
            )
            .await
            .map_err(|e| match e {
                RepGuardError::Query(msg) if msg.contains("could not open") => {
                    RepGuardError::Protocol(format!("no history file for timeline {tli}: {msg}"))
                }
                other => other,
            })?;
        let content: String = row.get(0);
        TimelineHistoryEntry::parse_history(&content)
    }

    /// Whether a named downstream node is currently streaming from this
    /// server and, if so, in which state.
    pub async fn downstream_state(
        &self,
        application_name: &str,
    ) -> Result<Option<ReplicationStats>, RepGuardError> {
        let row = self
            .query_opt(
                "SELECT application_name, state, sent_lsn::text, replay_lsn::text \
                 FROM pg_catalog.pg_stat_replication WHERE application_name = $1",
                &[&application_name],
            )
            .await?;
        row.map(|row| {
            Ok(ReplicationStats {
                application_name: row.get(0),
                state: row.get(1),
                sent_lsn: parse_lsn_field(row.get(2))?,
                replay_lsn: parse_lsn_field(row.get(3))?,
            })
        })
        .transpose()
    }

    /// All downstream nodes currently attached to this server.
    pub async fn downstream_nodes(&self) -> Result<Vec<ReplicationStats>, RepGuardError> {
        let rows = self
            .query(
                "SELECT application_name, state, sent_lsn::text, replay_lsn::text \
                 FROM pg_catalog.pg_stat_replication ORDER BY application_name",
                &[],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(ReplicationStats {
                    application_name: row.get(0),
                    state: row.get(1),
                    sent_lsn: parse_lsn_field(row.get(2))?,
                    replay_lsn: parse_lsn_field(row.get(3))?,
                })
            })
            .collect()
    }

    pub async fn replication_slot_exists(&self, slot_name: &str) -> Result<bool, RepGuardError> {
        let row = self
            .query_opt(
                "SELECT 1 FROM pg_catalog.pg_replication_slots WHERE slot_name = $1",
                &[&slot_name],
            )
            .await?;
        Ok(row.is_some())
    }

    pub async fn create_replication_slot(&self, slot_name: &str) -> Result<(), RepGuardError> {
        self.execute(
            "SELECT pg_catalog.pg_create_physical_replication_slot($1)",
            &[&slot_name],
        )
        .await?;
        Ok(())
    }

    /// Drops a replication slot. Concurrent drops of the same slot are not
    /// coordinated; an already-missing slot counts as success.
    pub async fn drop_replication_slot(&self, slot_name: &str) -> Result<(), RepGuardError> {
        if !self.replication_slot_exists(slot_name).await? {
            return Ok(());
        }
        match self
            .execute("SELECT pg_catalog.pg_drop_replication_slot($1)", &[&slot_name])
            .await
        {
            Ok(_) => Ok(()),
            Err(RepGuardError::Query(msg)) if msg.contains("does not exist") => Ok(()),
            Err(e) => Err(e),
        }
    }
}
