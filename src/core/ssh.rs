// src/core/ssh.rs

//! Remote command execution over OpenSSH in batch mode, plus the rsync
//! wrapper used when copying configuration between hosts.

use crate::core::errors::RepGuardError;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// rsync reports vanished source files with this code; for our purposes the
/// copy still succeeded.
const RSYNC_VANISHED_FILES: i32 = 24;

/// Output of a completed remote command.
#[derive(Debug)]
pub struct RemoteOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs commands on a peer host over SSH.
#[derive(Debug, Clone)]
pub struct RemoteRunner {
    host: String,
    ssh_options: Vec<String>,
}

impl RemoteRunner {
    pub fn new(host: &str, ssh_options: &str) -> Self {
        Self {
            host: host.to_string(),
            ssh_options: ssh_options.split_whitespace().map(String::from).collect(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs `command` on the remote host, capturing output. A non-zero exit
    /// is returned in [`RemoteOutput`], not as an error — callers decide
    /// what a failure means.
    pub async fn run(&self, command: &str) -> Result<RemoteOutput, RepGuardError> {
        debug!("ssh {}: {}", self.host, command);
        let output = Command::new("ssh")
            .args(&self.ssh_options)
            .arg(&self.host)
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(RemoteOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Like [`run`](Self::run) but treats non-zero exit as an error.
    pub async fn run_checked(&self, command: &str) -> Result<RemoteOutput, RepGuardError> {
        let output = self.run(command).await?;
        if !output.success() {
            warn!(
                "remote command on {} failed ({}): {}",
                self.host,
                output.status,
                output.stderr.trim()
            );
            return Err(RepGuardError::Subprocess {
                command: format!("ssh {} {}", self.host, command),
                status: output.status,
            });
        }
        Ok(output)
    }

    /// Probes that the host accepts batch-mode SSH at all.
    pub async fn check_connection(&self) -> bool {
        matches!(self.run("true").await, Ok(output) if output.success())
    }
}

/// Copies files with rsync. Either side may be a `host:path` spec. Exit
/// status 24 (source files vanished during transfer) counts as success.
pub async fn rsync_copy(
    rsync_options: &str,
    source: &str,
    destination: &str,
) -> Result<(), RepGuardError> {
    let mut command = Command::new("rsync");
    command.args(rsync_options.split_whitespace());
    command.arg(source);
    command.arg(destination);
    debug!("rsync {} -> {}", source, destination);

    let output = command.stdin(Stdio::null()).output().await?;
    let status = output.status.code().unwrap_or(-1);
    if status != 0 && status != RSYNC_VANISHED_FILES {
        return Err(RepGuardError::Subprocess {
            command: format!("rsync {source} {destination}"),
            status,
        });
    }
    Ok(())
}

/// Extracts the `host=` element of a connection string, for deriving the SSH
/// target of a node from its catalog record.
pub fn host_from_conninfo(conninfo: &str) -> Option<String> {
    conninfo.split_whitespace().find_map(|kv| {
        kv.strip_prefix("host=")
            .map(|host| host.trim_matches('\'').to_string())
    })
}
