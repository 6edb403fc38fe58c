// src/config.rs

//! Manages node configuration: loading, defaults, validation, and the SIGHUP
//! reload path.
//!
//! A configuration error at startup is fatal. A reload that fails to parse or
//! validate leaves the previous configuration in force.

use crate::core::errors::RepGuardError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Failover behaviour of the supervisor when the upstream primary is lost.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverMode {
    /// The supervisor runs the election protocol and promotes or follows.
    #[default]
    Automatic,
    /// The supervisor only logs; an operator resolves the failure.
    Manual,
}

/// The complete, validated configuration for one node.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    // --- Identity ---
    pub node_id: i32,
    pub node_name: String,
    /// Connection string for this node's database engine.
    pub conninfo: String,
    /// Address this node's supervisor announces to peers for coordination calls.
    #[serde(default = "default_peer_bind_addr")]
    pub peer_bind_addr: String,
    /// Announced address when it differs from the bind address (NAT, containers).
    pub peer_announce_addr: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub data_directory: PathBuf,

    // --- Replication ---
    pub replication_user: Option<String>,
    #[serde(default)]
    pub use_replication_slots: bool,

    // --- Failover behaviour ---
    #[serde(default)]
    pub failover_mode: FailoverMode,
    #[serde(default)]
    pub promote_command: Option<String>,
    #[serde(default)]
    pub follow_command: Option<String>,
    /// Testing aid: sleep this long before executing the promote command.
    #[serde(with = "humantime_serde", default)]
    pub promote_delay: Duration,

    // --- Service control commands ---
    pub service_start_command: Option<String>,
    pub service_stop_command: Option<String>,
    pub service_restart_command: Option<String>,
    pub service_reload_command: Option<String>,
    pub service_promote_command: Option<String>,
    #[serde(default)]
    pub pg_ctl_options: String,

    // --- Remote access ---
    #[serde(default = "default_ssh_options")]
    pub ssh_options: String,
    #[serde(default = "default_rsync_options")]
    pub rsync_options: String,
    pub barman_host: Option<String>,
    pub restore_command: Option<String>,

    // --- Monitoring cadence ---
    #[serde(with = "humantime_serde", default = "default_monitor_interval")]
    pub monitor_interval_secs: Duration,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_reconnect_interval")]
    pub reconnect_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_primary_response_timeout")]
    pub primary_response_timeout: Duration,
    /// Zero disables the window: the daemon keeps degraded-monitoring forever.
    #[serde(with = "humantime_serde", default)]
    pub degraded_monitoring_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_node_rejoin_timeout")]
    pub node_rejoin_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_standby_reconnect_timeout")]
    pub standby_reconnect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_shutdown_check_timeout")]
    pub shutdown_check_timeout: Duration,

    // --- Logging and history ---
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(with = "humantime_serde", default = "default_log_status_interval")]
    pub log_status_interval: Duration,
    #[serde(default)]
    pub monitoring_history: bool,

    // --- Paths and hooks ---
    pub repguard_bindir: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub event_notification_command: Option<String>,

    /// Path this configuration was loaded from; not part of the file itself.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_peer_bind_addr() -> String {
    "0.0.0.0:7432".to_string()
}
fn default_location() -> String {
    "default".to_string()
}
fn default_priority() -> i32 {
    100
}
fn default_ssh_options() -> String {
    "-q -o ConnectTimeout=10 -o BatchMode=yes".to_string()
}
fn default_rsync_options() -> String {
    "--archive --checksum --compress".to_string()
}
fn default_monitor_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_reconnect_attempts() -> u32 {
    6
}
fn default_reconnect_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_primary_response_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_node_rejoin_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_standby_reconnect_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_shutdown_check_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_status_interval() -> Duration {
    Duration::from_secs(300)
}

impl NodeConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, RepGuardError> {
        let content = fs::read_to_string(path).map_err(|e| {
            RepGuardError::Config(format!("cannot read \"{}\": {e}", path.display()))
        })?;
        let mut config: NodeConfig = toml::from_str(&content)?;
        config.config_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Re-reads the file this configuration came from. Returns the fresh
    /// configuration only when it parses and validates cleanly; the caller
    /// keeps the old one otherwise.
    pub fn reload(&self) -> Result<Self, RepGuardError> {
        let fresh = Self::from_file(&self.config_path)?;
        if fresh.node_id != self.node_id {
            return Err(RepGuardError::Config(format!(
                "node_id changed from {} to {} on reload; a node's identity is immutable",
                self.node_id, fresh.node_id
            )));
        }
        Ok(fresh)
    }

    pub fn validate(&self) -> Result<(), RepGuardError> {
        if self.node_id < 1 {
            return Err(RepGuardError::Config(
                "node_id must be a positive integer".to_string(),
            ));
        }
        if self.node_name.is_empty() {
            return Err(RepGuardError::Config("node_name is required".to_string()));
        }
        if self.node_name.len() > 63 {
            return Err(RepGuardError::Config(
                "node_name must be 63 characters or less".to_string(),
            ));
        }
        if self.conninfo.is_empty() {
            return Err(RepGuardError::Config("conninfo is required".to_string()));
        }
        if self.priority < 0 {
            return Err(RepGuardError::Config(
                "priority must be zero or greater".to_string(),
            ));
        }
        if self.failover_mode == FailoverMode::Automatic {
            if self.promote_command.is_none() && self.service_promote_command.is_none() {
                return Err(RepGuardError::Config(
                    "failover_mode is \"automatic\" but no promote_command is set".to_string(),
                ));
            }
            if self.follow_command.is_none() {
                return Err(RepGuardError::Config(
                    "failover_mode is \"automatic\" but no follow_command is set".to_string(),
                ));
            }
        }
        if self.monitor_interval_secs.is_zero() {
            return Err(RepGuardError::Config(
                "monitor_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_attempts > 0 && self.reconnect_interval.is_zero() {
            warn!("reconnect_interval is zero; failed probes will be retried immediately");
        }
        Ok(())
    }

    /// The address peers should dial to reach this supervisor.
    pub fn peer_addr(&self) -> &str {
        self.peer_announce_addr.as_deref().unwrap_or(&self.peer_bind_addr)
    }

    /// Replication slot name for this node on its upstream.
    pub fn slot_name(&self) -> String {
        format!("repguard_slot_{}", self.node_id)
    }

    /// Path of the PID file, defaulting to a file next to the data directory.
    pub fn pid_file_path(&self) -> PathBuf {
        self.pid_file
            .clone()
            .unwrap_or_else(|| self.data_directory.join("repguardd.pid"))
    }

    /// The configured promote action, preferring an explicit promote_command.
    pub fn effective_promote_command(&self) -> Option<&str> {
        self.promote_command
            .as_deref()
            .or(self.service_promote_command.as_deref())
    }
}
