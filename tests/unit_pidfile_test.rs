use repguard::core::daemon::lifecycle::{PidFile, pid_is_alive};

#[test]
fn test_acquire_writes_own_pid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repguardd.pid");

    let pid_file = PidFile::acquire(&path).unwrap();
    let recorded = PidFile::read(&path).unwrap();
    assert_eq!(recorded as u32, std::process::id());
    drop(pid_file);

    // Deleted on clean exit.
    assert!(!path.exists());
}

#[test]
fn test_refuses_when_recorded_pid_is_alive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repguardd.pid");

    // Our own PID is certainly alive.
    std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();
    assert!(PidFile::acquire(&path).is_err());
    // The existing file is left alone.
    assert!(path.exists());
}

#[test]
fn test_stale_pid_file_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repguardd.pid");

    // PIDs near the kernel maximum are almost certainly unused; skip the
    // test in the unlucky case.
    let stale_pid = 4194301;
    if pid_is_alive(stale_pid) {
        return;
    }
    std::fs::write(&path, format!("{stale_pid}\n")).unwrap();

    let pid_file = PidFile::acquire(&path).unwrap();
    assert_eq!(PidFile::read(&path).unwrap() as u32, std::process::id());
    drop(pid_file);
}

#[test]
fn test_garbage_content_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repguardd.pid");
    std::fs::write(&path, "not a pid\n").unwrap();
    assert!(PidFile::acquire(&path).is_err());
    assert!(PidFile::read(&path).is_err());
}

#[test]
fn test_pid_liveness_probe() {
    assert!(pid_is_alive(std::process::id() as i32));
    assert!(!pid_is_alive(4194301));
}
