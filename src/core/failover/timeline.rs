// src/core/failover/timeline.rs

//! Attach-safety checks: decides whether a node can follow or rejoin a target
//! without corrupting itself.
//!
//! The rules compare the local node's (system identifier, timeline, LSN)
//! against the target's. Divergence past a fork point is only recoverable by
//! a rewind, and some configurations cannot be recovered at all.

use crate::core::errors::RepGuardError;
use crate::core::lsn::Lsn;

/// One line of an engine timeline-history file: the timeline that ended, and
/// the position at which its successor forked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineHistoryEntry {
    pub tli: u32,
    pub switchpoint: Lsn,
}

impl TimelineHistoryEntry {
    /// Parses the content of a timeline history file.
    ///
    /// Each non-comment line has the form `<parent_tli>\t<switchpoint>\t<reason>`;
    /// blank lines and `#` comments are skipped.
    pub fn parse_history(content: &str) -> Result<Vec<TimelineHistoryEntry>, RepGuardError> {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let tli = fields
                .next()
                .and_then(|f| f.parse::<u32>().ok())
                .ok_or_else(|| {
                    RepGuardError::Protocol(format!("malformed history line \"{line}\""))
                })?;
            let switchpoint: Lsn = fields
                .next()
                .ok_or_else(|| {
                    RepGuardError::Protocol(format!("malformed history line \"{line}\""))
                })?
                .parse()?;
            entries.push(TimelineHistoryEntry { tli, switchpoint });
        }
        Ok(entries)
    }

    /// The position at which timeline `tli` ended, if the history records it.
    pub fn fork_end(entries: &[TimelineHistoryEntry], tli: u32) -> Option<Lsn> {
        entries.iter().find(|e| e.tli == tli).map(|e| e.switchpoint)
    }
}

/// The (identity, timeline, position) triple of one node, as used by the
/// attach-safety decision.
#[derive(Debug, Clone, Copy)]
pub struct NodePosition {
    pub system_identifier: u64,
    pub timeline: u32,
    pub lsn: Lsn,
}

/// Outcome of the attach-safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachDecision {
    /// The local node can attach to the target as-is.
    Safe,
    /// Attaching requires a rewind to the fork point first.
    NeedsRewind(String),
    /// No safe way to attach exists, rewind or not.
    Refuse(String),
}

impl AttachDecision {
    pub fn is_safe(&self) -> bool {
        matches!(self, AttachDecision::Safe)
    }
}

/// Minimum engine version with a usable rewind facility.
pub const MIN_REWIND_VERSION_NUM: i32 = 90600;

/// Decides whether `local` can attach to (follow or rejoin) `target`.
///
/// `fork_end` is the end of the local timeline as recorded in the target's
/// history, required only when the target is on a later timeline.
pub fn attach_safety(
    local: &NodePosition,
    target: &NodePosition,
    fork_end: Option<Lsn>,
) -> AttachDecision {
    if local.system_identifier != target.system_identifier {
        return AttachDecision::Refuse(format!(
            "system identifier mismatch (local {}, target {}): the target belongs to a \
             different cluster",
            local.system_identifier, target.system_identifier
        ));
    }

    if target.timeline < local.timeline {
        return AttachDecision::NeedsRewind(format!(
            "local timeline {} is ahead of target timeline {}",
            local.timeline, target.timeline
        ));
    }

    if target.timeline == local.timeline {
        if local.lsn > target.lsn {
            // Same timeline with the local node ahead: there is no fork point
            // to rewind to, so this cannot be repaired.
            return AttachDecision::Refuse(format!(
                "local node is ahead of the target on shared timeline {} ({} > {})",
                local.timeline, local.lsn, target.lsn
            ));
        }
        return AttachDecision::Safe;
    }

    // target.timeline > local.timeline: the target forked away at some point.
    let Some(fork_end) = fork_end else {
        return AttachDecision::Refuse(format!(
            "target history has no entry for timeline {}; cannot establish the fork point",
            local.timeline
        ));
    };
    if local.lsn > fork_end {
        AttachDecision::NeedsRewind(format!(
            "local node proceeded to {} past the fork point {} of timeline {}",
            local.lsn, fork_end, local.timeline
        ))
    } else {
        AttachDecision::Safe
    }
}

/// Applies the operator's rewind opt-in to a decision, producing either
/// permission to continue (`Ok(true)` means a rewind must run first) or the
/// error to surface.
pub fn resolve_decision(
    decision: AttachDecision,
    rewind_requested: bool,
    server_version_num: i32,
) -> Result<bool, RepGuardError> {
    match decision {
        AttachDecision::Safe => Ok(false),
        AttachDecision::NeedsRewind(reason) => {
            if !rewind_requested {
                Err(RepGuardError::Timeline(format!(
                    "{reason}; re-run with --force-rewind to rewind the node first"
                )))
            } else if server_version_num < MIN_REWIND_VERSION_NUM {
                Err(RepGuardError::Timeline(format!(
                    "{reason}; the engine (version {server_version_num}) is too old to rewind"
                )))
            } else {
                Ok(true)
            }
        }
        AttachDecision::Refuse(reason) => Err(RepGuardError::Timeline(reason)),
    }
}
