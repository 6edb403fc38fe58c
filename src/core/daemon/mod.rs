// src/core/daemon/mod.rs

//! The supervisor daemon: one process per node, hosting the monitor loop,
//! the peer coordination listener, and the signal relay.

pub mod lifecycle;
pub mod signals;

use crate::config::NodeConfig;
use crate::core::catalog::events::{EventKind, EventNotifier, record_via_primary};
use crate::core::errors::RepGuardError;
use crate::core::gateway::EngineClient;
use crate::core::monitor::NodeMonitor;
use crate::core::peer::listener::{ListenerContext, run_peer_listener};
use crate::core::shared::SharedState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub use lifecycle::{PidFile, daemonize, pid_is_alive, send_signal};
pub use signals::SignalFlags;

/// Runs the supervisor until shutdown. Assumes daemonization (when requested)
/// already happened in `main`, before the runtime existed.
pub async fn run(config: NodeConfig) -> Result<(), RepGuardError> {
    let pid_file = PidFile::acquire(&config.pid_file_path())?;

    let shared = Arc::new(SharedState::new());
    shared.set_local_node_id(config.node_id);
    shared.set_daemon_pid(std::process::id());

    let flags = SignalFlags::new();
    let notifier = EventNotifier::new(config.event_notification_command.clone());

    // The engine must be answering before monitoring starts; otherwise the
    // very first iteration would declare the world broken.
    wait_for_local_engine(&config, &flags).await?;

    record_via_primary(
        &notifier,
        &EngineClient::connect(&config.conninfo, config.connection_timeout).await?,
        config.connection_timeout,
        config.node_id,
        EventKind::RepguardSupervisorStart,
        true,
        &format!("supervisor started on node {}", config.node_id),
    )
    .await;

    // Auxiliary tasks: the peer coordination listener and the signal relay.
    let mut aux: JoinSet<Result<(), RepGuardError>> = JoinSet::new();
    let listener_ctx = ListenerContext {
        state: shared.clone(),
        local_conninfo: config.conninfo.clone(),
        connection_timeout: config.connection_timeout,
    };
    aux.spawn(run_peer_listener(config.peer_bind_addr.clone(), listener_ctx));
    {
        let flags = flags.clone();
        aux.spawn(async move {
            signals::relay_signals(flags).await;
            Ok(())
        });
    }

    // The monitor loop decides the process fate. Auxiliary failures request
    // a shutdown but still let the monitor exit through its own safe point.
    let monitor = NodeMonitor::new(config.clone(), shared.clone(), flags.clone());
    let mut monitor_handle = tokio::spawn(monitor.run());

    let mut aux_failure: Option<RepGuardError> = None;
    let monitor_result = loop {
        tokio::select! {
            res = &mut monitor_handle => {
                break match res {
                    Ok(result) => result,
                    Err(e) => Err(RepGuardError::Internal(format!("monitor panicked: {e}"))),
                };
            }
            Some(res) = aux.join_next() => {
                match res {
                    Ok(Ok(())) => {
                        // The signal relay returns once a shutdown signal
                        // arrived; the monitor observes the flag next.
                        if !flags.shutdown_requested() {
                            warn!("a supervisor task completed unexpectedly");
                        }
                    }
                    Ok(Err(e)) => {
                        error!("a supervisor task failed: {}", e);
                        aux_failure.get_or_insert(e);
                        flags.request_shutdown();
                    }
                    Err(e) => {
                        error!("a supervisor task panicked: {}", e);
                        aux_failure
                            .get_or_insert(RepGuardError::Internal(format!("task panicked: {e}")));
                        flags.request_shutdown();
                    }
                }
            }
        }
    };
    aux.shutdown().await;

    let exit_result = match (monitor_result, aux_failure) {
        (Ok(()), Some(e)) => Err(e),
        (result, _) => result,
    };

    // Terminal event, best effort: the engine may well be the reason we exit.
    if let Ok(local) = EngineClient::connect(&config.conninfo, config.connection_timeout).await {
        record_via_primary(
            &notifier,
            &local,
            config.connection_timeout,
            config.node_id,
            EventKind::RepguardSupervisorStop,
            exit_result.is_ok(),
            &format!("supervisor stopped on node {}", config.node_id),
        )
        .await;
    }

    drop(pid_file);
    info!("supervisor exiting");
    exit_result
}

/// Waits for the local engine to answer at startup, bounded by
/// `standby_reconnect_timeout` and interruptible by signal.
async fn wait_for_local_engine(
    config: &NodeConfig,
    flags: &Arc<SignalFlags>,
) -> Result<(), RepGuardError> {
    let deadline = tokio::time::Instant::now() + config.standby_reconnect_timeout;
    loop {
        match EngineClient::connect(&config.conninfo, config.connection_timeout).await {
            Ok(_) => return Ok(()),
            Err(e) if tokio::time::Instant::now() < deadline => {
                warn!("local engine not ready: {}; retrying", e);
                if flags.interruptible_sleep(Duration::from_secs(1)).await {
                    return Err(RepGuardError::Internal(
                        "shutdown requested during startup".to_string(),
                    ));
                }
            }
            Err(e) => return Err(e),
        }
    }
}
