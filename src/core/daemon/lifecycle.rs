// src/core/daemon/lifecycle.rs

//! Unix process plumbing for the supervisor: PID-file handling and the
//! classic double-fork daemonization.

use crate::core::errors::RepGuardError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// An acquired PID file. Deleted on drop, i.e. on clean exit.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Claims the PID file for this process. Refuses to start when the file
    /// names a PID that is still alive; a stale file is truncated and reused.
    pub fn acquire(path: &Path) -> Result<Self, RepGuardError> {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(existing) = content.trim().parse::<i32>() {
                if pid_is_alive(existing) {
                    return Err(RepGuardError::PidFile(format!(
                        "\"{}\" names running process {existing}; is another supervisor active?",
                        path.display()
                    )));
                }
                warn!(
                    "removing stale PID file \"{}\" (process {} is gone)",
                    path.display(),
                    existing
                );
            } else if !content.trim().is_empty() {
                return Err(RepGuardError::PidFile(format!(
                    "\"{}\" does not contain a PID",
                    path.display()
                )));
            }
        }

        let mut file = fs::File::create(path).map_err(|e| {
            RepGuardError::PidFile(format!("cannot write \"{}\": {e}", path.display()))
        })?;
        writeln!(file, "{}", std::process::id()).map_err(|e| {
            RepGuardError::PidFile(format!("cannot write \"{}\": {e}", path.display()))
        })?;
        info!("PID file \"{}\" acquired", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Reads the PID recorded in a PID file, if the file exists and parses.
    pub fn read(path: &Path) -> Result<i32, RepGuardError> {
        let content = fs::read_to_string(path).map_err(|e| {
            RepGuardError::PidFile(format!("cannot read \"{}\": {e}", path.display()))
        })?;
        content.trim().parse::<i32>().map_err(|_| {
            RepGuardError::PidFile(format!("\"{}\" does not contain a PID", path.display()))
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("could not remove PID file \"{}\": {}", self.path.display(), e);
        }
    }
}

/// True when `pid` names a live process we could signal.
pub fn pid_is_alive(pid: i32) -> bool {
    // kill(pid, 0) performs the permission and existence checks only.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Sends a signal to a process, for `daemon stop`.
pub fn send_signal(pid: i32, signal: i32) -> Result<(), RepGuardError> {
    let result = unsafe { libc::kill(pid, signal) };
    if result != 0 {
        return Err(RepGuardError::Internal(format!(
            "cannot signal process {pid}: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Detaches the process from its controlling terminal: fork, `setsid`, fork
/// again, chdir next to the configuration file, and point the standard
/// descriptors at `/dev/null`.
///
/// Must run before the async runtime starts; forking a threaded process is
/// undefined behaviour territory.
pub fn daemonize(config_dir: &Path) -> Result<(), RepGuardError> {
    unsafe {
        match libc::fork() {
            -1 => {
                return Err(RepGuardError::Internal(
                    "first fork failed".to_string(),
                ));
            }
            0 => {}
            _ => libc::_exit(0),
        }

        if libc::setsid() == -1 {
            return Err(RepGuardError::Internal("setsid failed".to_string()));
        }

        match libc::fork() {
            -1 => {
                return Err(RepGuardError::Internal(
                    "second fork failed".to_string(),
                ));
            }
            0 => {}
            _ => libc::_exit(0),
        }
    }

    std::env::set_current_dir(config_dir).map_err(|e| {
        RepGuardError::Internal(format!(
            "cannot chdir to \"{}\": {e}",
            config_dir.display()
        ))
    })?;

    // Reopen stdin/stdout/stderr onto /dev/null. Logging goes through the
    // tracing subscriber, which by now writes wherever it was configured to.
    unsafe {
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if devnull >= 0 {
            libc::dup2(devnull, libc::STDIN_FILENO);
            libc::dup2(devnull, libc::STDOUT_FILENO);
            libc::dup2(devnull, libc::STDERR_FILENO);
            if devnull > libc::STDERR_FILENO {
                libc::close(devnull);
            }
        }
    }

    Ok(())
}
