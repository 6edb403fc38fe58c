// src/core/catalog/mod.rs

//! The node catalog: durable metadata about every node in the cluster, stored
//! in the database engine itself and therefore replicated to every standby.
//!
//! Lookups return an explicit [`RecordStatus`] — an absent record is an
//! ordinary answer, not an error.

pub mod events;

use crate::core::errors::RepGuardError;
use crate::core::gateway::EngineClient;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use tokio_postgres::Row;

/// Role of a node in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum NodeType {
    Primary,
    Standby,
    /// A non-data node used only for location tie-breaking. Never has
    /// downstream followers and is never a promotion candidate.
    Witness,
}

/// One row of the node catalog.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: i32,
    pub node_name: String,
    pub node_type: NodeType,
    /// Zero'd out as `None`; a primary has no upstream.
    pub upstream_node_id: Option<i32>,
    pub conninfo: String,
    /// Address of the node's supervisor RPC surface.
    pub peer_addr: String,
    pub replication_user: Option<String>,
    pub slot_name: Option<String>,
    pub priority: i32,
    pub location: String,
    pub active: bool,
    pub config_path: Option<String>,
}

impl NodeRecord {
    fn from_row(row: &Row) -> Result<Self, RepGuardError> {
        let type_str: String = row.get("node_type");
        let upstream: i32 = row.get("upstream_node_id");
        Ok(NodeRecord {
            node_id: row.get("node_id"),
            node_name: row.get("node_name"),
            node_type: NodeType::from_str(&type_str)
                .map_err(|_| RepGuardError::Catalog(format!("unknown node type \"{type_str}\"")))?,
            upstream_node_id: (upstream != 0).then_some(upstream),
            conninfo: row.get("conninfo"),
            peer_addr: row.get("peer_addr"),
            replication_user: row.get("replication_user"),
            slot_name: row.get("slot_name"),
            priority: row.get("priority"),
            location: row.get("location"),
            active: row.get("active"),
            config_path: row.get("config_path"),
        })
    }
}

/// Tri-state result of a catalog lookup.
#[derive(Debug)]
pub enum RecordStatus<T> {
    Found(T),
    NotFound,
    Error(RepGuardError),
}

impl<T> RecordStatus<T> {
    /// Converts to a `Result`, mapping `NotFound` through `on_missing`.
    pub fn into_result(
        self,
        on_missing: impl FnOnce() -> RepGuardError,
    ) -> Result<T, RepGuardError> {
        match self {
            RecordStatus::Found(v) => Ok(v),
            RecordStatus::NotFound => Err(on_missing()),
            RecordStatus::Error(e) => Err(e),
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            RecordStatus::Found(v) => Some(v),
            _ => None,
        }
    }
}

const NODE_COLUMNS: &str = "node_id, node_name, node_type, upstream_node_id, conninfo, \
                            peer_addr, replication_user, slot_name, priority, location, \
                            active, config_path";

/// CRUD over the node catalog, scoped to one engine connection.
pub struct Catalog<'a> {
    client: &'a EngineClient,
}

impl<'a> Catalog<'a> {
    pub fn new(client: &'a EngineClient) -> Self {
        Self { client }
    }

    /// Creates the catalog schema. Idempotent; run by `primary register`.
    pub async fn install(&self) -> Result<(), RepGuardError> {
        self.client
            .execute("CREATE SCHEMA IF NOT EXISTS repguard", &[])
            .await?;
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS repguard.nodes (\
                     node_id integer PRIMARY KEY, \
                     node_name text NOT NULL UNIQUE, \
                     node_type text NOT NULL, \
                     upstream_node_id integer NOT NULL DEFAULT 0, \
                     conninfo text NOT NULL, \
                     peer_addr text NOT NULL, \
                     replication_user text, \
                     slot_name text, \
                     priority integer NOT NULL DEFAULT 100, \
                     location text NOT NULL DEFAULT 'default', \
                     active boolean NOT NULL DEFAULT true, \
                     config_path text)",
                &[],
            )
            .await?;
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS repguard.events (\
                     node_id integer NOT NULL, \
                     event_kind text NOT NULL, \
                     recorded_at timestamptz NOT NULL DEFAULT now(), \
                     success boolean NOT NULL DEFAULT true, \
                     detail text)",
                &[],
            )
            .await?;
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS repguard.monitoring_history (\
                     standby_node_id integer NOT NULL, \
                     recorded_at timestamptz NOT NULL DEFAULT now(), \
                     primary_lsn text NOT NULL, \
                     receive_lsn text NOT NULL, \
                     replay_lsn text NOT NULL, \
                     receive_lag bigint NOT NULL, \
                     replay_lag bigint NOT NULL)",
                &[],
            )
            .await?;
        Ok(())
    }

    pub async fn get_node(&self, node_id: i32) -> RecordStatus<NodeRecord> {
        let query = format!("SELECT {NODE_COLUMNS} FROM repguard.nodes WHERE node_id = $1");
        match self.client.query_opt(&query, &[&node_id]).await {
            Ok(Some(row)) => match NodeRecord::from_row(&row) {
                Ok(record) => RecordStatus::Found(record),
                Err(e) => RecordStatus::Error(e),
            },
            Ok(None) => RecordStatus::NotFound,
            Err(e) => RecordStatus::Error(e),
        }
    }

    pub async fn get_node_by_name(&self, name: &str) -> RecordStatus<NodeRecord> {
        let query = format!("SELECT {NODE_COLUMNS} FROM repguard.nodes WHERE node_name = $1");
        match self.client.query_opt(&query, &[&name]).await {
            Ok(Some(row)) => match NodeRecord::from_row(&row) {
                Ok(record) => RecordStatus::Found(record),
                Err(e) => RecordStatus::Error(e),
            },
            Ok(None) => RecordStatus::NotFound,
            Err(e) => RecordStatus::Error(e),
        }
    }

    /// The single active primary, when one exists.
    pub async fn get_primary_node(&self) -> RecordStatus<NodeRecord> {
        let query = format!(
            "SELECT {NODE_COLUMNS} FROM repguard.nodes \
             WHERE node_type = 'primary' AND active"
        );
        match self.client.query(&query, &[]).await {
            Ok(rows) if rows.is_empty() => RecordStatus::NotFound,
            Ok(rows) if rows.len() > 1 => RecordStatus::Error(RepGuardError::Invariant(
                format!("{} active primaries registered; expected at most one", rows.len()),
            )),
            Ok(rows) => match NodeRecord::from_row(&rows[0]) {
                Ok(record) => RecordStatus::Found(record),
                Err(e) => RecordStatus::Error(e),
            },
            Err(e) => RecordStatus::Error(e),
        }
    }

    /// Active nodes sharing `upstream_node_id`, excluding `self_id`. Includes
    /// witness nodes attached to the same upstream.
    pub async fn get_active_sibling_nodes(
        &self,
        self_id: i32,
        upstream_node_id: i32,
    ) -> Result<Vec<NodeRecord>, RepGuardError> {
        let query = format!(
            "SELECT {NODE_COLUMNS} FROM repguard.nodes \
             WHERE upstream_node_id = $1 AND node_id <> $2 AND active \
             ORDER BY node_id"
        );
        let rows = self
            .client
            .query(&query, &[&upstream_node_id, &self_id])
            .await?;
        rows.iter().map(NodeRecord::from_row).collect()
    }

    pub async fn get_all_nodes(&self) -> Result<Vec<NodeRecord>, RepGuardError> {
        let query = format!("SELECT {NODE_COLUMNS} FROM repguard.nodes ORDER BY node_id");
        let rows = self.client.query(&query, &[]).await?;
        rows.iter().map(NodeRecord::from_row).collect()
    }

    /// Inserts or fully replaces a node record.
    pub async fn upsert_node(&self, record: &NodeRecord) -> Result<(), RepGuardError> {
        self.client
            .execute(
                "INSERT INTO repguard.nodes (node_id, node_name, node_type, upstream_node_id, \
                     conninfo, peer_addr, replication_user, slot_name, priority, location, \
                     active, config_path) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (node_id) DO UPDATE SET \
                     node_name = EXCLUDED.node_name, \
                     node_type = EXCLUDED.node_type, \
                     upstream_node_id = EXCLUDED.upstream_node_id, \
                     conninfo = EXCLUDED.conninfo, \
                     peer_addr = EXCLUDED.peer_addr, \
                     replication_user = EXCLUDED.replication_user, \
                     slot_name = EXCLUDED.slot_name, \
                     priority = EXCLUDED.priority, \
                     location = EXCLUDED.location, \
                     active = EXCLUDED.active, \
                     config_path = EXCLUDED.config_path",
                &[
                    &record.node_id,
                    &record.node_name,
                    &record.node_type.to_string(),
                    &record.upstream_node_id.unwrap_or(0),
                    &record.conninfo,
                    &record.peer_addr,
                    &record.replication_user,
                    &record.slot_name,
                    &record.priority,
                    &record.location,
                    &record.active,
                    &record.config_path,
                ],
            )
            .await?;
        Ok(())
    }

    /// Re-points a node at a new upstream, adjusting its role if needed.
    pub async fn set_upstream(
        &self,
        node_id: i32,
        upstream_node_id: Option<i32>,
    ) -> Result<(), RepGuardError> {
        self.client
            .execute(
                "UPDATE repguard.nodes SET upstream_node_id = $2 WHERE node_id = $1",
                &[&node_id, &upstream_node_id.unwrap_or(0)],
            )
            .await?;
        Ok(())
    }

    /// Records a promotion: the node becomes the active primary with no
    /// upstream, and any previous primary record is marked inactive.
    pub async fn promote_node(&self, node_id: i32) -> Result<(), RepGuardError> {
        self.client
            .execute(
                "UPDATE repguard.nodes SET active = false \
                 WHERE node_type = 'primary' AND node_id <> $1",
                &[&node_id],
            )
            .await?;
        self.client
            .execute(
                "UPDATE repguard.nodes SET node_type = 'primary', upstream_node_id = 0, \
                     active = true \
                 WHERE node_id = $1",
                &[&node_id],
            )
            .await?;
        Ok(())
    }

    /// Marks a node inactive. Records are never deleted or reused.
    pub async fn unregister_node(&self, node_id: i32) -> Result<(), RepGuardError> {
        let updated = self
            .client
            .execute(
                "UPDATE repguard.nodes SET active = false WHERE node_id = $1",
                &[&node_id],
            )
            .await?;
        if updated == 0 {
            return Err(RepGuardError::Catalog(format!(
                "node {node_id} is not registered"
            )));
        }
        Ok(())
    }
}
