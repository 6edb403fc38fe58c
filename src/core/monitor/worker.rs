// src/core/monitor/worker.rs

//! The monitor loop itself.

use crate::config::{FailoverMode, NodeConfig};
use crate::core::catalog::events::{EventKind, EventNotifier};
use crate::core::catalog::{Catalog, NodeRecord, NodeType, RecordStatus};
use crate::core::daemon::signals::SignalFlags;
use crate::core::election::{
    self, ElectionContext, ElectionOutcome, SiblingInfo, notify_best_candidate,
    wait_for_new_primary,
};
use crate::core::errors::RepGuardError;
use crate::core::failover::{
    FailoverContext, FollowOutcome, PromoteOutcome, follow_new_primary, notify_followers,
    promote_self,
};
use crate::core::gateway::EngineClient;
use crate::core::monitor::MonitoringState;
use crate::core::shared::SharedState;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What one loop iteration decided should happen next.
enum Tick {
    /// Nothing to do beyond sleeping until the next probe.
    Continue,
    /// The local role changed; re-resolve records before the next iteration.
    RoleChanged,
}

/// The per-node monitor. One instance per supervisor process.
pub struct NodeMonitor {
    config: NodeConfig,
    shared: Arc<SharedState>,
    notifier: EventNotifier,
    flags: Arc<SignalFlags>,
    state: MonitoringState,
    last_status_log: Instant,
}

impl NodeMonitor {
    pub fn new(config: NodeConfig, shared: Arc<SharedState>, flags: Arc<SignalFlags>) -> Self {
        let notifier = EventNotifier::new(config.event_notification_command.clone());
        Self {
            config,
            shared,
            notifier,
            flags,
            state: MonitoringState::Normal,
            last_status_log: Instant::now(),
        }
    }

    /// Runs until shutdown. The only error that escapes is the degraded
    /// monitoring timeout; everything transient is absorbed and retried.
    pub async fn run(mut self) -> Result<(), RepGuardError> {
        info!(
            "monitor starting for node {} ({})",
            self.config.node_id, self.config.node_name
        );

        loop {
            if self.flags.shutdown_requested() {
                info!("monitor loop exiting on shutdown request");
                return Ok(());
            }
            if self.flags.take_reload() {
                self.reload_config();
            }

            match self.tick().await {
                Ok(Tick::RoleChanged) => {
                    // Skip the sleep so the new role is picked up promptly.
                    continue;
                }
                Ok(Tick::Continue) => {}
                Err(e @ RepGuardError::MonitoringTimeout(_)) => {
                    error!("{}; terminating", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("monitor iteration failed: {}", e);
                }
            }

            if self
                .flags
                .interruptible_sleep(self.config.monitor_interval_secs)
                .await
            {
                info!("monitor loop exiting on shutdown request");
                return Ok(());
            }
        }
    }

    fn reload_config(&mut self) {
        match self.config.reload() {
            Ok(fresh) => {
                info!("configuration reloaded from {}", fresh.config_path.display());
                self.notifier = EventNotifier::new(fresh.event_notification_command.clone());
                self.config = fresh;
            }
            Err(e) => {
                warn!("configuration reload failed, keeping previous settings: {}", e);
            }
        }
    }

    /// One iteration: resolve the local role, then run the role's probe.
    async fn tick(&mut self) -> Result<Tick, RepGuardError> {
        // The local engine is the source of truth for both our own record
        // and (on standbys) the catalog, which replication keeps current.
        let local = match EngineClient::connect(
            &self.config.conninfo,
            self.config.connection_timeout,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                return self.handle_local_down(e).await;
            }
        };

        let catalog = Catalog::new(&local);
        let record = catalog
            .get_node(self.config.node_id)
            .await
            .into_result(|| {
                RepGuardError::Catalog(format!(
                    "node {} is not registered; run \"repguard standby register\" first",
                    self.config.node_id
                ))
            })?;

        self.shared.set_last_updated();

        match record.node_type {
            NodeType::Primary => self.tick_primary(&local, &record).await,
            NodeType::Standby | NodeType::Witness => {
                self.tick_standby(&local, &catalog, &record).await
            }
        }
    }

    /// The local engine did not answer. For a primary this is the entry into
    /// degraded monitoring; for a standby it is treated the same way, since
    /// without the local engine there is nothing useful to do.
    async fn handle_local_down(&mut self, cause: RepGuardError) -> Result<Tick, RepGuardError> {
        match self.state {
            MonitoringState::Normal => {
                warn!("local engine unreachable: {}", cause);
                if self.probe_survives_reconnect_policy(&self.config.conninfo.clone()).await {
                    self.state = MonitoringState::Normal;
                    return Ok(Tick::Continue);
                }
                info!("entering degraded monitoring of the local engine");
                self.state = MonitoringState::Degraded {
                    since: Instant::now(),
                };
                Ok(Tick::Continue)
            }
            MonitoringState::Degraded { since } => {
                self.check_degraded_window(since)?;
                debug!("local engine still unreachable: {}", cause);
                Ok(Tick::Continue)
            }
        }
    }

    fn check_degraded_window(&self, since: Instant) -> Result<(), RepGuardError> {
        let window = self.config.degraded_monitoring_timeout;
        if !window.is_zero() && since.elapsed() > window {
            return Err(RepGuardError::MonitoringTimeout(window.as_secs()));
        }
        Ok(())
    }

    // --- Primary-side monitoring ---

    async fn tick_primary(
        &mut self,
        local: &EngineClient,
        record: &NodeRecord,
    ) -> Result<Tick, RepGuardError> {
        // A primary that reports itself in recovery was demoted behind our
        // back (a switchover, most likely): fall through to standby handling
        // on the next iteration.
        if local.is_in_recovery().await? {
            info!("local node is in recovery again; resuming standby monitoring");
            return Ok(Tick::RoleChanged);
        }

        if self.state.is_degraded() {
            info!("local engine is reachable again; leaving degraded monitoring");
            self.state = MonitoringState::Normal;
        }
        self.log_status(&format!(
            "monitoring cluster primary \"{}\" (node {})",
            record.node_name, record.node_id
        ));
        Ok(Tick::Continue)
    }

    // --- Standby-side monitoring ---

    async fn tick_standby(
        &mut self,
        local: &EngineClient,
        catalog: &Catalog<'_>,
        record: &NodeRecord,
    ) -> Result<Tick, RepGuardError> {
        // An announced new primary takes precedence over everything: this is
        // how losing nodes and bystanders converge after a failover.
        if let Some(new_primary_id) = self.shared.get_new_primary() {
            return self
                .converge_on_new_primary(local, catalog, record, new_primary_id)
                .await;
        }

        let Some(upstream_id) = record.upstream_node_id else {
            warn!(
                "standby node {} has no upstream recorded; cannot monitor",
                record.node_id
            );
            return Ok(Tick::Continue);
        };
        let upstream = catalog.get_node(upstream_id).await.into_result(|| {
            RepGuardError::Catalog(format!("upstream node {upstream_id} is not in the catalog"))
        })?;

        match EngineClient::connect(&upstream.conninfo, self.config.connection_timeout).await {
            Ok(upstream_client) => {
                if self.state.is_degraded() {
                    info!(
                        "upstream node {} is reachable again; resuming normal monitoring",
                        upstream.node_id
                    );
                    self.state = MonitoringState::Normal;
                }
                if self.config.monitoring_history && record.node_type == NodeType::Standby {
                    self.sample_replication_lag(local, &upstream_client, record)
                        .await;
                }
                self.log_status(&format!(
                    "node \"{}\" (node {}) monitoring upstream node {}",
                    record.node_name, record.node_id, upstream.node_id
                ));
                Ok(Tick::Continue)
            }
            Err(e) => {
                if let MonitoringState::Degraded { since } = self.state {
                    self.check_degraded_window(since)?;
                    debug!("upstream node {} still unreachable: {}", upstream.node_id, e);
                    return Ok(Tick::Continue);
                }

                warn!(
                    "unable to reach upstream node {}: {}",
                    upstream.node_id, e
                );
                if self.probe_survives_reconnect_policy(&upstream.conninfo).await {
                    return Ok(Tick::Continue);
                }
                self.on_upstream_declared_down(local, catalog, record, &upstream)
                    .await
            }
        }
    }

    /// Applies the reconnection policy: the node is declared unreachable only
    /// after `reconnect_attempts` failed probes spaced `reconnect_interval`
    /// apart. Returns true when a probe succeeded.
    async fn probe_survives_reconnect_policy(&self, conninfo: &str) -> bool {
        for attempt in 1..=self.config.reconnect_attempts {
            if self
                .flags
                .interruptible_sleep(self.config.reconnect_interval)
                .await
            {
                return true; // Shutting down; let the main loop observe it.
            }
            match EngineClient::connect(conninfo, self.config.connection_timeout).await {
                Ok(_) => {
                    info!("reconnected on attempt {}/{}", attempt, self.config.reconnect_attempts);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "reconnect attempt {}/{} failed: {}",
                        attempt, self.config.reconnect_attempts, e
                    );
                }
            }
        }
        false
    }

    /// The upstream is gone past the reconnection budget.
    async fn on_upstream_declared_down(
        &mut self,
        local: &EngineClient,
        catalog: &Catalog<'_>,
        record: &NodeRecord,
        upstream: &NodeRecord,
    ) -> Result<Tick, RepGuardError> {
        warn!(
            "upstream node {} declared unreachable after {} attempts",
            upstream.node_id, self.config.reconnect_attempts
        );

        if record.node_type == NodeType::Witness {
            // A witness only observes; it neither votes for itself nor
            // re-parents data it does not have.
            self.state = MonitoringState::Degraded { since: Instant::now() };
            return Ok(Tick::Continue);
        }

        match upstream.node_type {
            NodeType::Primary => {
                if self.config.failover_mode == FailoverMode::Manual {
                    warn!("failover_mode is \"manual\"; waiting for operator intervention");
                    self.state = MonitoringState::Degraded { since: Instant::now() };
                    return Ok(Tick::Continue);
                }
                if self.shared.is_paused() {
                    warn!("supervisor is paused; automatic failover suppressed");
                    self.state = MonitoringState::Degraded { since: Instant::now() };
                    return Ok(Tick::Continue);
                }
                self.run_failover(local, record, upstream).await
            }
            // The upstream was itself a standby: re-parent to the active
            // primary without an election.
            NodeType::Standby => self.cascaded_reattach(local, catalog, record).await,
            NodeType::Witness => {
                warn!("upstream node {} is a witness; nothing to follow", upstream.node_id);
                Ok(Tick::Continue)
            }
        }
    }

    /// Election plus follow-up actions. This is the ELECTING state.
    async fn run_failover(
        &mut self,
        local: &EngineClient,
        record: &NodeRecord,
        upstream: &NodeRecord,
    ) -> Result<Tick, RepGuardError> {
        let outcome = {
            let ctx = ElectionContext {
                config: &self.config,
                shared: self.shared.clone(),
                local,
                local_record: record,
                upstream,
            };
            election::run_election(&ctx).await?
        };

        match outcome {
            ElectionOutcome::Won { term, snapshot } => {
                info!("won election in term {}; promoting", term);
                self.promote(record, Some(upstream), &snapshot).await
            }
            ElectionOutcome::Lost { best: Some(best), snapshot } if best == record.node_id => {
                info!("election not unanimous but this node is the strongest candidate; promoting");
                self.promote(record, Some(upstream), &snapshot).await
            }
            ElectionOutcome::Lost { best: Some(best), snapshot } => {
                info!("node {} is the strongest candidate; deferring to it", best);
                if let Err(e) =
                    notify_best_candidate(&snapshot, best, self.config.connection_timeout).await
                {
                    warn!("could not notify the chosen candidate: {}", e);
                }
                self.await_announcement().await
            }
            ElectionOutcome::Lost { best: None, .. } => {
                warn!("no electable candidate found; entering degraded monitoring");
                self.shared.reset_voting_status();
                self.state = MonitoringState::Degraded { since: Instant::now() };
                Ok(Tick::Continue)
            }
            ElectionOutcome::NotCandidate => self.await_announcement().await,
            ElectionOutcome::Cancelled => {
                self.state = MonitoringState::Degraded { since: Instant::now() };
                Ok(Tick::Continue)
            }
        }
    }

    async fn promote(
        &mut self,
        record: &NodeRecord,
        former_upstream: Option<&NodeRecord>,
        snapshot: &[SiblingInfo],
    ) -> Result<Tick, RepGuardError> {
        let ctx = FailoverContext {
            config: &self.config,
            shared: self.shared.clone(),
            notifier: &self.notifier,
            local_record: record,
            former_upstream,
        };
        match promote_self(&ctx, snapshot).await {
            Ok(PromoteOutcome::Promoted) => {
                notify_followers(snapshot, record.node_id, self.config.connection_timeout).await;
                self.state = MonitoringState::Normal;
                Ok(Tick::RoleChanged)
            }
            Ok(PromoteOutcome::PrimaryReappeared) => {
                info!("original primary reappeared; continuing as its standby");
                self.state = MonitoringState::Normal;
                Ok(Tick::Continue)
            }
            Err(e) => {
                error!("promotion failed: {}; entering degraded monitoring", e);
                self.shared.reset_voting_status();
                self.state = MonitoringState::Degraded { since: Instant::now() };
                Ok(Tick::Continue)
            }
        }
    }

    /// Waits for some other node's promotion to be announced, then converges.
    async fn await_announcement(&mut self) -> Result<Tick, RepGuardError> {
        match wait_for_new_primary(&self.shared).await {
            Some(_) => Ok(Tick::RoleChanged),
            None => {
                // NO_NEW_PRIMARY: the next loop iteration may re-initiate.
                self.shared.reset_voting_status();
                Ok(Tick::Continue)
            }
        }
    }

    /// Acts on an announced new primary: promote when it names this node,
    /// follow otherwise.
    async fn converge_on_new_primary(
        &mut self,
        local: &EngineClient,
        catalog: &Catalog<'_>,
        record: &NodeRecord,
        new_primary_id: i32,
    ) -> Result<Tick, RepGuardError> {
        if new_primary_id == record.node_id {
            info!("this node was designated the new primary; promoting");
            let already_primary = !local.is_in_recovery().await?;
            if already_primary {
                self.shared.reset_voting_status();
                return Ok(Tick::Continue);
            }
            return self.promote(record, None, &[]).await;
        }

        if record.upstream_node_id == Some(new_primary_id) {
            // Already following the announced node; clear the flag.
            self.shared.reset_voting_status();
            return Ok(Tick::Continue);
        }

        let new_primary = catalog.get_node(new_primary_id).await.into_result(|| {
            RepGuardError::Catalog(format!("announced primary {new_primary_id} is not in the catalog"))
        })?;

        info!(
            "re-parenting under announced primary node {} ({})",
            new_primary.node_id, new_primary.node_name
        );
        let failover_ctx = FailoverContext {
            config: &self.config,
            shared: self.shared.clone(),
            notifier: &self.notifier,
            local_record: record,
            former_upstream: None,
        };
        match follow_new_primary(&failover_ctx, &new_primary, EventKind::RepguardFailoverFollow).await? {
            FollowOutcome::Followed => {
                self.state = MonitoringState::Normal;
                Ok(Tick::RoleChanged)
            }
            FollowOutcome::Failed(reason) => {
                error!("follow failed: {}; entering degraded monitoring", reason);
                self.shared.reset_voting_status();
                self.state = MonitoringState::Degraded { since: Instant::now() };
                Ok(Tick::Continue)
            }
        }
    }

    /// CASCADED_REATTACH: the lost upstream was itself a standby; re-parent
    /// to the active primary without voting.
    async fn cascaded_reattach(
        &mut self,
        _local: &EngineClient,
        catalog: &Catalog<'_>,
        record: &NodeRecord,
    ) -> Result<Tick, RepGuardError> {
        let primary = match catalog.get_primary_node().await {
            RecordStatus::Found(primary) => primary,
            RecordStatus::NotFound => {
                warn!("no active primary to reattach to; will retry");
                self.state = MonitoringState::Degraded { since: Instant::now() };
                return Ok(Tick::Continue);
            }
            RecordStatus::Error(e) => return Err(e),
        };

        info!(
            "cascaded upstream lost; reattaching to primary node {}",
            primary.node_id
        );
        let failover_ctx = FailoverContext {
            config: &self.config,
            shared: self.shared.clone(),
            notifier: &self.notifier,
            local_record: record,
            former_upstream: None,
        };
        match follow_new_primary(&failover_ctx, &primary, EventKind::RepguardFailoverFollow).await? {
            FollowOutcome::Followed => {
                self.state = MonitoringState::Normal;
                Ok(Tick::RoleChanged)
            }
            FollowOutcome::Failed(reason) => {
                error!("cascaded reattach failed: {}", reason);
                self.state = MonitoringState::Degraded { since: Instant::now() };
                Ok(Tick::Continue)
            }
        }
    }

    /// Writes one replication-lag sample through the upstream (the catalog
    /// and history tables are only writable there).
    async fn sample_replication_lag(
        &self,
        local: &EngineClient,
        upstream: &EngineClient,
        record: &NodeRecord,
    ) {
        let sample = async {
            let upstream_positions = upstream.wal_positions().await?;
            let local_positions = local.wal_positions().await?;
            let primary_lsn = upstream_positions.newest().unwrap_or_default();
            let receive = local_positions.receive.unwrap_or_default();
            let replay = local_positions.replay.unwrap_or_default();
            upstream
                .execute(
                    "INSERT INTO repguard.monitoring_history (standby_node_id, primary_lsn, \
                         receive_lsn, replay_lsn, receive_lag, replay_lag) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &record.node_id,
                        &primary_lsn.to_string(),
                        &receive.to_string(),
                        &replay.to_string(),
                        &(primary_lsn.saturating_diff(receive) as i64),
                        &(primary_lsn.saturating_diff(replay) as i64),
                    ],
                )
                .await?;
            Ok::<(), RepGuardError>(())
        };
        if let Err(e) = sample.await {
            debug!("could not record replication lag sample: {}", e);
        }
    }

    /// Emits the periodic "alive" line, independent of probe cadence.
    fn log_status(&mut self, message: &str) {
        if self.last_status_log.elapsed() >= self.config.log_status_interval {
            info!("{}", message);
            self.last_status_log = Instant::now();
        }
    }
}
