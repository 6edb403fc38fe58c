use repguard::config::{FailoverMode, NodeConfig};
use std::io::Write;
use std::time::Duration;

fn minimal() -> &'static str {
    r#"
        node_id = 1
        node_name = "alpha"
        conninfo = "host=alpha dbname=repguard user=repguard"
        data_directory = "/var/lib/engine/data"
        promote_command = "pg_ctl promote -D /var/lib/engine/data"
        follow_command = "repguard standby follow -f /etc/repguard/repguard.toml"
    "#
}

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_minimal_config_gets_defaults() {
    let file = write_config(minimal());
    let config = NodeConfig::from_file(file.path()).unwrap();

    assert_eq!(config.node_id, 1);
    assert_eq!(config.priority, 100);
    assert_eq!(config.location, "default");
    assert_eq!(config.failover_mode, FailoverMode::Automatic);
    assert_eq!(config.monitor_interval_secs, Duration::from_secs(2));
    assert_eq!(config.reconnect_attempts, 6);
    assert_eq!(config.reconnect_interval, Duration::from_secs(10));
    assert_eq!(config.connection_timeout, Duration::from_secs(10));
    assert_eq!(config.log_status_interval, Duration::from_secs(300));
    assert!(config.degraded_monitoring_timeout.is_zero());
    assert!(!config.monitoring_history);
    assert_eq!(config.config_path, file.path());
}

#[test]
fn test_humantime_durations() {
    let content = format!(
        "{}\nmonitor_interval_secs = \"5s\"\nreconnect_interval = \"1m\"\n\
         degraded_monitoring_timeout = \"2h\"",
        minimal()
    );
    let file = write_config(&content);
    let config = NodeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.monitor_interval_secs, Duration::from_secs(5));
    assert_eq!(config.reconnect_interval, Duration::from_secs(60));
    assert_eq!(config.degraded_monitoring_timeout, Duration::from_secs(7200));
}

#[test]
fn test_automatic_failover_requires_commands() {
    let content = r#"
        node_id = 2
        node_name = "beta"
        conninfo = "host=beta"
        data_directory = "/data"
    "#;
    let file = write_config(content);
    let error = NodeConfig::from_file(file.path()).unwrap_err();
    assert!(error.to_string().contains("promote_command"));
}

#[test]
fn test_manual_failover_needs_no_commands() {
    let content = r#"
        node_id = 2
        node_name = "beta"
        conninfo = "host=beta"
        data_directory = "/data"
        failover_mode = "manual"
    "#;
    let file = write_config(content);
    assert!(NodeConfig::from_file(file.path()).is_ok());
}

#[test]
fn test_invalid_identity_is_rejected() {
    for (field, value) in [("node_id", "0"), ("priority", "-1")] {
        let content = format!(
            r#"
                node_id = 1
                node_name = "alpha"
                conninfo = "host=alpha"
                data_directory = "/data"
                failover_mode = "manual"
                {field} = {value}
            "#
        );
        let file = write_config(&content);
        assert!(
            NodeConfig::from_file(file.path()).is_err(),
            "{field}={value} should be rejected"
        );
    }
}

#[test]
fn test_reload_rejects_node_id_change() {
    let file = write_config(minimal());
    let config = NodeConfig::from_file(file.path()).unwrap();

    let changed = minimal().replace("node_id = 1", "node_id = 9");
    std::fs::write(file.path(), changed).unwrap();
    assert!(config.reload().is_err());
}

#[test]
fn test_reload_picks_up_new_values() {
    let file = write_config(minimal());
    let config = NodeConfig::from_file(file.path()).unwrap();

    let changed = format!("{}\npriority = 42", minimal());
    std::fs::write(file.path(), changed).unwrap();
    let fresh = config.reload().unwrap();
    assert_eq!(fresh.priority, 42);
}

#[test]
fn test_derived_paths_and_names() {
    let file = write_config(minimal());
    let config = NodeConfig::from_file(file.path()).unwrap();

    assert_eq!(config.slot_name(), "repguard_slot_1");
    assert_eq!(
        config.pid_file_path(),
        std::path::Path::new("/var/lib/engine/data/repguardd.pid")
    );
    assert_eq!(config.peer_addr(), "0.0.0.0:7432");

    let content = format!(
        "{}\npeer_announce_addr = \"10.0.0.5:7432\"\npid_file = \"/run/repguardd.pid\"",
        minimal()
    );
    let file = write_config(&content);
    let config = NodeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.peer_addr(), "10.0.0.5:7432");
    assert_eq!(config.pid_file_path(), std::path::Path::new("/run/repguardd.pid"));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let error = NodeConfig::from_file(std::path::Path::new("/nonexistent/repguard.toml"))
        .unwrap_err();
    assert!(matches!(
        error,
        repguard::core::errors::RepGuardError::Config(_)
    ));
}
