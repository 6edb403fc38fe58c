// src/cli/mod.rs

//! The operator command surface: `repguard [options] <component> <action>`.
//!
//! CLI-time problems are aggregated into error and warning lists and printed
//! together before exit; the command never continues past an error.

pub mod cluster;
pub mod node;
pub mod primary;
pub mod service;
pub mod standby;

use crate::config::NodeConfig;
use crate::core::errors::{ExitCode, RepGuardError};
use clap::{ArgAction, Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "repguard",
    version,
    about = "Replication manager and failover supervisor for primary/standby SQL clusters",
    disable_help_flag = true
)]
pub struct Cli {
    #[arg(long, action = ArgAction::HelpLong, help = "Print help")]
    help: Option<bool>,

    /// Configuration file for the local node
    #[arg(short = 'f', long = "config-file", global = true)]
    pub config_file: Option<PathBuf>,

    // Connection overrides, libpq style.
    #[arg(short = 'h', long = "host", global = true, help = "Database server host")]
    pub host: Option<String>,
    #[arg(short = 'p', long = "port", global = true, help = "Database server port")]
    pub port: Option<u16>,
    #[arg(short = 'd', long = "dbname", global = true, help = "Database name or conninfo")]
    pub dbname: Option<String>,
    #[arg(short = 'U', long = "username", global = true, help = "Database user")]
    pub username: Option<String>,

    /// Override the configured log level
    #[arg(short = 'L', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Component,
}

#[derive(Subcommand, Debug)]
pub enum Component {
    /// Primary node operations
    Primary {
        #[command(subcommand)]
        action: primary::PrimaryAction,
    },
    /// Standby node operations
    Standby {
        #[command(subcommand)]
        action: standby::StandbyAction,
    },
    /// Witness node operations
    Witness {
        #[command(subcommand)]
        action: primary::WitnessAction,
    },
    /// Local node inspection and repair
    Node {
        #[command(subcommand)]
        action: node::NodeAction,
    },
    /// Cluster-wide reports
    Cluster {
        #[command(subcommand)]
        action: cluster::ClusterAction,
    },
    /// Supervisor fleet control
    Service {
        #[command(subcommand)]
        action: service::ServiceAction,
    },
    /// The supervisor daemon
    Daemon {
        #[command(subcommand)]
        action: service::DaemonAction,
    },
}

/// Collected CLI-time diagnostics, printed together before exit.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Prints all collected diagnostics to stderr.
    pub fn emit(&self) {
        if !self.errors.is_empty() {
            let mut out = String::from("the following errors were encountered:\n");
            for error in &self.errors {
                let _ = writeln!(out, "  - {error}");
            }
            eprint!("{out}");
        }
        if !self.warnings.is_empty() {
            let mut out = String::from("the following warnings were emitted:\n");
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {warning}");
            }
            eprint!("{out}");
        }
    }
}

impl Cli {
    /// Loads the node configuration this invocation requires.
    pub fn require_config(&self) -> Result<NodeConfig, RepGuardError> {
        let path = self.config_file.clone().unwrap_or_else(|| {
            PathBuf::from("/etc/repguard/repguard.toml")
        });
        NodeConfig::from_file(&path)
    }

    /// A connection string assembled from the `-h/-p/-d/-U` overrides, when
    /// any were given. `-d` may itself be a full conninfo.
    pub fn conninfo_override(&self) -> Option<String> {
        if let Some(dbname) = &self.dbname {
            if dbname.contains('=') {
                return Some(dbname.clone());
            }
        }
        if self.host.is_none()
            && self.port.is_none()
            && self.dbname.is_none()
            && self.username.is_none()
        {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(host) = &self.host {
            parts.push(format!("host={host}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        if let Some(dbname) = &self.dbname {
            parts.push(format!("dbname={dbname}"));
        }
        if let Some(username) = &self.username {
            parts.push(format!("user={username}"));
        }
        Some(parts.join(" "))
    }
}

/// Runs the selected action and maps the outcome to an exit code.
pub async fn dispatch(cli: Cli) -> ExitCode {
    let result = match &cli.command {
        Component::Primary { action } => primary::run_primary(&cli, action).await,
        Component::Standby { action } => standby::run_standby(&cli, action).await,
        Component::Witness { action } => primary::run_witness(&cli, action).await,
        Component::Node { action } => node::run_node(&cli, action).await,
        Component::Cluster { action } => cluster::run_cluster(&cli, action).await,
        Component::Service { action } => service::run_service(&cli, action).await,
        Component::Daemon { action } => service::run_daemon(&cli, action).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
