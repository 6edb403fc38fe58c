use repguard::core::failover::timeline::{
    AttachDecision, NodePosition, TimelineHistoryEntry, attach_safety, resolve_decision,
};
use repguard::core::lsn::Lsn;

fn position(system_identifier: u64, timeline: u32, lsn: &str) -> NodePosition {
    NodePosition {
        system_identifier,
        timeline,
        lsn: lsn.parse().unwrap(),
    }
}

#[test]
fn test_parse_history_file() {
    let content = "# comment line\n\
                   \n\
                   1\t0/3000\tno recovery target specified\n\
                   2\t0/5000\tno recovery target specified\n";
    let entries = TimelineHistoryEntry::parse_history(content).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].tli, 1);
    assert_eq!(entries[0].switchpoint, Lsn(0x3000));
    assert_eq!(TimelineHistoryEntry::fork_end(&entries, 2), Some(Lsn(0x5000)));
    assert_eq!(TimelineHistoryEntry::fork_end(&entries, 5), None);
}

#[test]
fn test_parse_history_rejects_garbage() {
    assert!(TimelineHistoryEntry::parse_history("not a history line").is_err());
}

#[test]
fn test_system_identifier_mismatch_is_refused() {
    let local = position(1111, 7, "0/4800");
    let target = position(2222, 8, "0/9000");
    let decision = attach_safety(&local, &target, Some(Lsn(0x5000)));
    assert!(matches!(decision, AttachDecision::Refuse(_)));
    // Rewind cannot help across clusters.
    assert!(resolve_decision(decision, true, 150000).is_err());
}

#[test]
fn test_target_behind_on_timeline_needs_rewind() {
    let local = position(1111, 8, "0/4800");
    let target = position(1111, 7, "0/9000");
    assert!(matches!(
        attach_safety(&local, &target, None),
        AttachDecision::NeedsRewind(_)
    ));
}

#[test]
fn test_same_timeline_local_ahead_is_refused() {
    // No fork point exists on a shared timeline, so rewind does not help.
    let local = position(1111, 7, "0/9000");
    let target = position(1111, 7, "0/4800");
    let decision = attach_safety(&local, &target, None);
    assert!(matches!(decision, AttachDecision::Refuse(_)));
}

#[test]
fn test_same_timeline_local_behind_is_safe() {
    let local = position(1111, 7, "0/4800");
    let target = position(1111, 7, "0/9000");
    assert_eq!(attach_safety(&local, &target, None), AttachDecision::Safe);
}

#[test]
fn test_attach_before_fork_point_is_safe() {
    // Local timeline 7 ended at 0/5000 on the target's history; local only
    // reached 0/4800, so it can attach without a rewind.
    let local = position(1111, 7, "0/4800");
    let target = position(1111, 8, "0/9000");
    assert_eq!(
        attach_safety(&local, &target, Some(Lsn(0x5000))),
        AttachDecision::Safe
    );
}

#[test]
fn test_attach_past_fork_point_needs_rewind() {
    let local = position(1111, 7, "0/6000");
    let target = position(1111, 8, "0/9000");
    let decision = attach_safety(&local, &target, Some(Lsn(0x5000)));
    assert!(matches!(decision, AttachDecision::NeedsRewind(_)));

    // Not requested: surfaced as an error with a hint.
    assert!(resolve_decision(decision.clone(), false, 150000).is_err());
    // Requested on a modern engine: proceed, rewinding first.
    assert_eq!(resolve_decision(decision.clone(), true, 150000).unwrap(), true);
    // Requested on an engine too old to rewind: refused.
    assert!(resolve_decision(decision, true, 90500).is_err());
}

#[test]
fn test_missing_history_entry_is_refused() {
    let local = position(1111, 7, "0/4800");
    let target = position(1111, 9, "0/9000");
    assert!(matches!(
        attach_safety(&local, &target, None),
        AttachDecision::Refuse(_)
    ));
}
