// src/core/errors.rs

//! Defines the primary error type for the entire application and the mapping
//! onto process exit codes.

use std::sync::Arc;
use thiserror::Error;

/// Process exit codes. The daemon and the operator command both terminate
/// through one of these so that scripts and service managers can distinguish
/// failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    BadConfig = 1,
    DbConn = 2,
    DbQuery = 3,
    BadPidfile = 4,
    MonitoringTimeout = 5,
    FailoverFail = 6,
    Internal = 7,
}

impl ExitCode {
    pub fn exit(self) -> ! {
        std::process::exit(self as i32)
    }
}

/// The main error enum, representing all possible failures within RepGuard.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum RepGuardError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Transport-level failure reaching an engine or a peer supervisor.
    #[error("Connection Error: {0}")]
    Connection(String),

    /// The logged-in role lacks a privilege the operation requires.
    #[error("Permission Error: {0}")]
    Permission(String),

    /// The server replied with something the gateway cannot interpret.
    #[error("Protocol Error: {0}")]
    Protocol(String),

    /// A query was rejected by the engine for a non-transport reason.
    #[error("Query Error: {0}")]
    Query(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    /// The node catalog or event log could not be read or written.
    #[error("Catalog Error: {0}")]
    Catalog(String),

    /// An invariant of the cluster topology would be violated.
    #[error("Invariant Violation: {0}")]
    Invariant(String),

    /// The target node cannot be attached to without a rewind.
    #[error("Timeline Error: {0}")]
    Timeline(String),

    /// A promote/follow/shutdown/rewind child process failed.
    #[error("Command '{command}' exited with status {status}")]
    Subprocess { command: String, status: i32 },

    #[error("PID File Error: {0}")]
    PidFile(String),

    /// The degraded-monitoring window was exceeded.
    #[error("Degraded monitoring timeout reached after {0} seconds")]
    MonitoringTimeout(u64),

    #[error("Peer Error: {0}")]
    Peer(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl RepGuardError {
    /// Maps an error to the exit code the process should terminate with when
    /// the error is fatal at top level.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RepGuardError::Config(_) => ExitCode::BadConfig,
            RepGuardError::Connection(_) | RepGuardError::Peer(_) => ExitCode::DbConn,
            RepGuardError::Permission(_)
            | RepGuardError::Protocol(_)
            | RepGuardError::Query(_)
            | RepGuardError::Catalog(_) => ExitCode::DbQuery,
            RepGuardError::PidFile(_) => ExitCode::BadPidfile,
            RepGuardError::MonitoringTimeout(_) => ExitCode::MonitoringTimeout,
            RepGuardError::Subprocess { .. } | RepGuardError::Timeline(_) => ExitCode::FailoverFail,
            _ => ExitCode::Internal,
        }
    }

    /// True for failures the monitor loop retries rather than surfaces.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepGuardError::Connection(_) | RepGuardError::Io(_) | RepGuardError::Peer(_)
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for RepGuardError {
    fn clone(&self) -> Self {
        match self {
            RepGuardError::Io(e) => RepGuardError::Io(Arc::clone(e)),
            RepGuardError::Connection(s) => RepGuardError::Connection(s.clone()),
            RepGuardError::Permission(s) => RepGuardError::Permission(s.clone()),
            RepGuardError::Protocol(s) => RepGuardError::Protocol(s.clone()),
            RepGuardError::Query(s) => RepGuardError::Query(s.clone()),
            RepGuardError::Config(s) => RepGuardError::Config(s.clone()),
            RepGuardError::Catalog(s) => RepGuardError::Catalog(s.clone()),
            RepGuardError::Invariant(s) => RepGuardError::Invariant(s.clone()),
            RepGuardError::Timeline(s) => RepGuardError::Timeline(s.clone()),
            RepGuardError::Subprocess { command, status } => RepGuardError::Subprocess {
                command: command.clone(),
                status: *status,
            },
            RepGuardError::PidFile(s) => RepGuardError::PidFile(s.clone()),
            RepGuardError::MonitoringTimeout(s) => RepGuardError::MonitoringTimeout(*s),
            RepGuardError::Peer(s) => RepGuardError::Peer(s.clone()),
            RepGuardError::Internal(s) => RepGuardError::Internal(s.clone()),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RepGuardError {
    fn from(e: std::io::Error) -> Self {
        RepGuardError::Io(Arc::new(e))
    }
}

impl From<tokio_postgres::Error> for RepGuardError {
    fn from(e: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        match e.as_db_error() {
            Some(db) => match db.code() {
                c if *c == SqlState::INSUFFICIENT_PRIVILEGE
                    || *c == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
                    || *c == SqlState::INVALID_PASSWORD =>
                {
                    RepGuardError::Permission(db.message().to_string())
                }
                _ => RepGuardError::Query(db.message().to_string()),
            },
            // No server-side error payload: the failure happened on the wire.
            None => RepGuardError::Connection(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepGuardError {
    fn from(e: serde_json::Error) -> Self {
        RepGuardError::Protocol(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<toml::de::Error> for RepGuardError {
    fn from(e: toml::de::Error) -> Self {
        RepGuardError::Config(e.to_string())
    }
}
