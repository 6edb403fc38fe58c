// src/cli/primary.rs

//! `primary register/unregister` and `witness register/unregister`.

use crate::cli::{Cli, Diagnostics};
use crate::core::catalog::events::{EventKind, EventNotifier};
use crate::core::catalog::{Catalog, NodeRecord, NodeType, RecordStatus};
use crate::core::errors::{ExitCode, RepGuardError};
use crate::core::gateway::EngineClient;
use clap::Subcommand;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum PrimaryAction {
    /// Register the local node as the cluster primary
    Register {
        /// Overwrite an existing record for this node id
        #[arg(short = 'F', long)]
        force: bool,
    },
    /// Mark the local primary's record inactive
    Unregister,
}

#[derive(Subcommand, Debug)]
pub enum WitnessAction {
    /// Register the local node as a witness attached to the primary
    Register {
        #[arg(short = 'F', long)]
        force: bool,
    },
    /// Mark the witness record inactive
    Unregister,
}

pub async fn run_primary(cli: &Cli, action: &PrimaryAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    let notifier = EventNotifier::new(config.event_notification_command.clone());

    match action {
        PrimaryAction::Register { force } => {
            let mut diagnostics = Diagnostics::default();
            let local =
                EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
            if local.is_in_recovery().await? {
                diagnostics.error("this node is in recovery; a primary must not be");
            }

            let catalog = Catalog::new(&local);
            catalog.install().await?;

            match catalog.get_primary_node().await {
                RecordStatus::Found(existing) if existing.node_id != config.node_id => {
                    diagnostics.error(format!(
                        "an active primary (node {}) is already registered",
                        existing.node_id
                    ));
                }
                RecordStatus::Found(_) if !force => {
                    diagnostics.error(
                        "this node is already registered as primary; use --force to update",
                    );
                }
                RecordStatus::Error(e) => return Err(e),
                _ => {}
            }
            match catalog.get_node(config.node_id).await {
                RecordStatus::Found(_) if !force => {
                    diagnostics
                        .error("a record for this node id exists; use --force to overwrite");
                }
                RecordStatus::Error(e) => return Err(e),
                _ => {}
            }

            if diagnostics.has_errors() {
                diagnostics.emit();
                return Ok(ExitCode::BadConfig);
            }

            let first_registration = catalog.get_all_nodes().await?.is_empty();
            let record = record_from_config(&config, NodeType::Primary, None);
            catalog.upsert_node(&record).await?;
            if first_registration {
                notifier
                    .record(
                        Some(&local),
                        config.node_id,
                        EventKind::ClusterCreated,
                        true,
                        &format!("cluster created with primary node {}", config.node_id),
                    )
                    .await;
            }
            notifier
                .record(
                    Some(&local),
                    config.node_id,
                    EventKind::NodeRegister,
                    true,
                    &format!("primary node {} registered", config.node_id),
                )
                .await;
            info!("primary node {} registered", config.node_id);
            diagnostics.emit();
            Ok(ExitCode::Success)
        }
        PrimaryAction::Unregister => {
            unregister(&config, &notifier).await?;
            Ok(ExitCode::Success)
        }
    }
}

pub async fn run_witness(cli: &Cli, action: &WitnessAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    let notifier = EventNotifier::new(config.event_notification_command.clone());

    match action {
        WitnessAction::Register { force } => {
            // A witness registers through the primary: it has no replicated
            // catalog of its own until the copy below.
            let primary_conninfo = cli.conninfo_override().ok_or_else(|| {
                RepGuardError::Config(
                    "witness register needs the primary's conninfo via -d/-h".to_string(),
                )
            })?;
            let primary =
                EngineClient::connect(&primary_conninfo, config.connection_timeout).await?;
            if primary.is_in_recovery().await? {
                return Err(RepGuardError::Invariant(
                    "the node given with -d/-h is not a primary".to_string(),
                ));
            }
            let catalog = Catalog::new(&primary);
            let primary_record = catalog
                .get_primary_node()
                .await
                .into_result(|| RepGuardError::Catalog("no active primary registered".to_string()))?;

            match catalog.get_node(config.node_id).await {
                RecordStatus::Found(_) if !force => {
                    return Err(RepGuardError::Invariant(
                        "a record for this node id exists; use --force to overwrite".to_string(),
                    ));
                }
                RecordStatus::Error(e) => return Err(e),
                _ => {}
            }

            let record =
                record_from_config(&config, NodeType::Witness, Some(primary_record.node_id));
            catalog.upsert_node(&record).await?;

            // Keep a copy of the catalog on the witness so it can answer
            // location queries when the primary is gone.
            let local =
                EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
            let local_catalog = Catalog::new(&local);
            local_catalog.install().await?;
            for node in catalog.get_all_nodes().await? {
                local_catalog.upsert_node(&node).await?;
            }

            notifier
                .record(
                    Some(&primary),
                    config.node_id,
                    EventKind::WitnessRegister,
                    true,
                    &format!("witness node {} registered", config.node_id),
                )
                .await;
            info!("witness node {} registered", config.node_id);
            Ok(ExitCode::Success)
        }
        WitnessAction::Unregister => {
            unregister(&config, &notifier).await?;
            Ok(ExitCode::Success)
        }
    }
}

/// Shared unregister path: mark inactive through the primary and drop the
/// node's replication slot if one exists.
async fn unregister(
    config: &crate::config::NodeConfig,
    notifier: &EventNotifier,
) -> Result<(), RepGuardError> {
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&local);
    let primary = match catalog.get_primary_node().await {
        RecordStatus::Found(primary) if primary.node_id != config.node_id => {
            Some(EngineClient::connect(&primary.conninfo, config.connection_timeout).await?)
        }
        _ => None,
    };
    let writer = primary.as_ref().unwrap_or(&local);

    Catalog::new(writer).unregister_node(config.node_id).await?;
    if config.use_replication_slots {
        // Already-missing slots count as dropped; concurrent unregisters race
        // here and that is fine.
        writer.drop_replication_slot(&config.slot_name()).await?;
    }
    notifier
        .record(
            Some(writer),
            config.node_id,
            EventKind::NodeUnregister,
            true,
            &format!("node {} unregistered", config.node_id),
        )
        .await;
    info!("node {} unregistered", config.node_id);
    Ok(())
}

/// Builds a catalog record for the local node from its configuration.
pub fn record_from_config(
    config: &crate::config::NodeConfig,
    node_type: NodeType,
    upstream_node_id: Option<i32>,
) -> NodeRecord {
    NodeRecord {
        node_id: config.node_id,
        node_name: config.node_name.clone(),
        node_type,
        upstream_node_id,
        conninfo: config.conninfo.clone(),
        peer_addr: config.peer_addr().to_string(),
        replication_user: config.replication_user.clone(),
        slot_name: config.use_replication_slots.then(|| config.slot_name()),
        priority: config.priority,
        location: config.location.clone(),
        active: true,
        config_path: Some(config.config_path.display().to_string()),
    }
}
