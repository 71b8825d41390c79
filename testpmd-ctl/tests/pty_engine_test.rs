//! PTY transport against a shell script posing as testpmd.
//!
//! Skipped when the host cannot allocate a pseudo-terminal.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serial_test::serial;
use testpmd_ctl::engine::{EngineCommand, EngineSession, PtyTransport};
use testpmd_ctl::mock::{FakeBus, FakeDevice};
use testpmd_ctl::{Error, PciAddress, Settings, Testpmd};

const FAKE_TESTPMD: &str = r#"
printf 'EAL: Detected 4 lcore(s)\nInteractive-mode selected\ntestpmd> '
while IFS= read -r line; do
  case "$line" in
    quit) printf 'Bye...\n'; exit 0 ;;
    exit) exit 3 ;;
    "show device info all") printf 'Port id: 0\nMAC address: 3C:FD:FE:B4:D2:40\nDevice name: 0000:86:00.0\n' ;;
    hang) sleep 30 ;;
  esac
  printf 'testpmd> '
done
"#;

const DEVICE_INFO: &str = "Port id: 0\nMAC address: 3C:FD:FE:B4:D2:40\nDevice name: 0000:86:00.0\n";

fn settings(hugepages: &Path) -> Settings {
    Settings::new()
        .start_timeout(Duration::from_secs(10))
        .command_timeout(Duration::from_millis(500))
        .stop_timeout(Duration::from_secs(2))
        .hugepage_dir(hugepages)
}

fn spawn_fake() -> Option<PtyTransport> {
    let cmd = EngineCommand::new("/bin/sh").eal_arg("-c").eal_arg(FAKE_TESTPMD);
    match PtyTransport::spawn(&cmd) {
        Ok(t) => Some(t),
        Err(e) => {
            eprintln!("skipping: cannot spawn on a pty: {}", e);
            None
        }
    }
}

#[test]
#[serial]
fn test_execute_over_pty() {
    let Some(transport) = spawn_fake() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ptytestmap_0"), b"").unwrap();

    let mut session = EngineSession::attach(transport, "ptytest", &settings(dir.path())).unwrap();
    assert!(session.is_ready());

    let out = session.execute("show device info all").unwrap();
    assert_eq!(out, DEVICE_INFO);

    // unknown commands just bring the prompt back
    assert_eq!(session.execute("set fwd io").unwrap(), "");

    session.stop();
    assert!(!dir.path().join("ptytestmap_0").exists());
}

#[test]
#[serial]
fn test_command_timeout_then_kill() {
    let Some(transport) = spawn_fake() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let mut session = EngineSession::attach(transport, "ptytest", &settings(dir.path())).unwrap();

    let err = session.execute("hang").unwrap_err();
    assert!(matches!(err, Error::CommandTimeout { .. }));
    assert!(!session.is_ready());

    // the script is stuck in sleep, so stop has to kill it
    let begin = Instant::now();
    session.stop();
    assert!(begin.elapsed() < Duration::from_secs(10));
}

#[test]
#[serial]
fn test_engine_exit_is_reported() {
    let Some(transport) = spawn_fake() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let mut session = EngineSession::attach(transport, "ptytest", &settings(dir.path())).unwrap();

    let err = session.execute("exit").unwrap_err();
    assert!(matches!(
        err,
        Error::EngineExited | Error::CommandTimeout { .. }
    ));
    assert!(!session.is_ready());
}

/// Executable stand-in for testpmd that ignores its EAL arguments.
fn install_fake(dir: &Path) -> PathBuf {
    let path = dir.join("testpmd");
    fs::write(&path, format!("#!/bin/sh\n{}", FAKE_TESTPMD)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn two_node_bus(second_node: i32) -> FakeBus {
    FakeBus::new()
        .with_device(FakeDevice::new("0000:3b:00.0", "0x8086", "0x158b").numa_node(0))
        .with_device(FakeDevice::new("0000:86:00.0", "0x8086", "0x158b").numa_node(second_node))
}

fn addresses() -> Vec<PciAddress> {
    vec![
        PciAddress::parse("3b:00.0").unwrap(),
        PciAddress::parse("86:00.0").unwrap(),
    ]
}

#[test]
#[serial]
fn test_start_session_spawns_engine() {
    let dir = tempfile::tempdir().unwrap();
    let engine = install_fake(dir.path());
    let mut testpmd = Testpmd::new(two_node_bus(1), settings(dir.path()).cpus(vec![0, 1, 2]));

    if let Err(e) = testpmd.start_session(&addresses(), 1, 256, &engine) {
        eprintln!("skipping: cannot start the engine on a pty: {}", e);
        return;
    }
    assert!(testpmd.has_session());
    assert_eq!(testpmd.list_ports().unwrap()[0].device_name, "0000:86:00.0");
    assert!(matches!(
        testpmd.start_session(&addresses(), 1, 256, &engine),
        Err(Error::SessionActive)
    ));

    testpmd.stop_session().unwrap();
    assert!(!testpmd.has_session());
}

#[test]
#[serial]
fn test_start_session_rejects_bad_plan() {
    let dir = tempfile::tempdir().unwrap();
    let engine = install_fake(dir.path());

    // no numa node reported
    let mut testpmd = Testpmd::new(two_node_bus(-1), settings(dir.path()).cpus(vec![0, 1, 2]));
    assert!(matches!(
        testpmd.start_session(&addresses(), 1, 256, &engine),
        Err(Error::Configuration { .. })
    ));

    // two ports with one queue need three cpus
    let mut testpmd = Testpmd::new(two_node_bus(1), settings(dir.path()).cpus(vec![0, 1]));
    assert!(matches!(
        testpmd.start_session(&addresses(), 1, 256, &engine),
        Err(Error::Configuration { .. })
    ));
    assert!(!testpmd.has_session());
}

#[test]
#[serial]
fn test_start_session_missing_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mut testpmd = Testpmd::new(two_node_bus(1), settings(dir.path()).cpus(vec![0, 1, 2]));
    let err = testpmd
        .start_session(&addresses(), 1, 256, &dir.path().join("no-such-testpmd"))
        .unwrap_err();
    // a host without ptys fails before the spawn
    assert!(
        matches!(err, Error::ProcessSpawn { .. } | Error::Transport(_)),
        "unexpected error: {err}"
    );
    assert!(!testpmd.has_session());
}
