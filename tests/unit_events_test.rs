use repguard::core::catalog::NodeType;
use repguard::core::catalog::events::EventKind;
use repguard::core::gateway::redact_conninfo;
use repguard::core::rejoin::ControlFileInfo;
use repguard::core::ssh::host_from_conninfo;
use repguard::core::switchover::parse_checkpoint_lsn;
use std::str::FromStr;

#[test]
fn test_event_kind_string_forms() {
    assert_eq!(EventKind::StandbyClone.to_string(), "standby_clone");
    assert_eq!(
        EventKind::RepguardFailoverPromote.to_string(),
        "repguard_failover_promote"
    );
    assert_eq!(
        EventKind::from_str("repguard_failover_follow").unwrap(),
        EventKind::RepguardFailoverFollow
    );
    assert_eq!(
        EventKind::from_str("cluster_created").unwrap(),
        EventKind::ClusterCreated
    );
    assert!(EventKind::from_str("no_such_event").is_err());
}

#[test]
fn test_node_type_string_forms() {
    assert_eq!(NodeType::Primary.to_string(), "primary");
    assert_eq!(NodeType::from_str("witness").unwrap(), NodeType::Witness);
    assert!(NodeType::from_str("coordinator").is_err());
}

#[test]
fn test_conninfo_redaction() {
    let conninfo = "host=alpha port=5432 password=hunter2 user=repguard";
    let redacted = redact_conninfo(conninfo);
    assert!(!redacted.contains("hunter2"));
    assert!(redacted.contains("password=****"));
    assert!(redacted.contains("host=alpha"));
}

#[test]
fn test_host_extraction_from_conninfo() {
    assert_eq!(
        host_from_conninfo("host=alpha port=5432 dbname=repguard"),
        Some("alpha".to_string())
    );
    assert_eq!(
        host_from_conninfo("dbname=repguard host='10.1.2.3'"),
        Some("10.1.2.3".to_string())
    );
    assert_eq!(host_from_conninfo("dbname=repguard"), None);
}

#[test]
fn test_checkpoint_lsn_parsing() {
    let report = "state: clean\ncheckpoint_lsn: 0/5000\n";
    assert_eq!(parse_checkpoint_lsn(report).unwrap().0, 0x5000);
    assert!(parse_checkpoint_lsn("state: running\n").is_none());
    assert!(parse_checkpoint_lsn("checkpoint_lsn: junk\n").is_none());
}

#[test]
fn test_control_file_parsing() {
    let output = "\
pg_control version number:            1300
Database system identifier:           7016174912345678901
Database cluster state:               shut down
Latest checkpoint location:           0/5000
Latest checkpoint's TimeLineID:       7
";
    let control = ControlFileInfo::parse(output).unwrap();
    assert_eq!(control.system_identifier, 7016174912345678901);
    assert_eq!(control.timeline, 7);
    assert_eq!(control.checkpoint_lsn.0, 0x5000);
    assert!(control.cleanly_shut_down);
}

#[test]
fn test_control_file_running_state_is_not_clean() {
    let output = "\
Database system identifier:           7016174912345678901
Database cluster state:               in production
Latest checkpoint location:           0/5000
Latest checkpoint's TimeLineID:       7
";
    let control = ControlFileInfo::parse(output).unwrap();
    assert!(!control.cleanly_shut_down);
}

#[test]
fn test_control_file_missing_fields_is_an_error() {
    assert!(ControlFileInfo::parse("Database cluster state: shut down\n").is_err());
}
