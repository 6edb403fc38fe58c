// src/core/daemon/signals.rs

//! Signal handling for the supervisor.
//!
//! Handlers only set flags; the monitor loop observes them at its next safe
//! point. SIGHUP requests a configuration reload, SIGINT/SIGTERM request a
//! clean exit. Sleeps in the loop go through [`SignalFlags::interruptible_sleep`]
//! so a shutdown request never waits out a full monitor interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;
use tracing::info;

#[derive(Debug, Default)]
pub struct SignalFlags {
    reload: AtomicBool,
    shutdown: AtomicBool,
    notify: Notify,
}

impl SignalFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Consumes a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    /// Sleeps for `duration`, returning early (with `true`) when a shutdown
    /// is requested. Reload requests do not interrupt the sleep; they are
    /// serviced between loop iterations.
    pub async fn interruptible_sleep(&self, duration: Duration) -> bool {
        if self.shutdown_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.shutdown_requested(),
            _ = self.notify.notified() => self.shutdown_requested(),
        }
    }
}

/// Installs the process signal handlers and relays them onto `flags` until
/// shutdown. Runs as its own task.
pub async fn relay_signals(flags: Arc<SignalFlags>) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("cannot install SIGHUP handler: {}", e);
            return;
        }
    };
    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("cannot install SIGINT handler: {}", e);
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("cannot install SIGTERM handler: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received; configuration will be re-read");
                flags.request_reload();
            }
            _ = interrupt.recv() => {
                info!("SIGINT received; shutting down");
                flags.request_shutdown();
                return;
            }
            _ = terminate.recv() => {
                info!("SIGTERM received; shutting down");
                flags.request_shutdown();
                return;
            }
        }
    }
}
