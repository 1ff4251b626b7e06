//! The hidden `worker` subcommand, run as a real process.

use lbmon::daemon::SupervisorIdentity;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serial_test::serial;
use std::fs;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

use super::helpers::{wait_for, Sandbox};

const TOKEN: &str = "7d1f4c2e-1111-4222-8333-123456789abc";

fn spawn_worker(sandbox: &Sandbox, cluster_id: u32, token: &str) -> Child {
    Command::new(env!("CARGO_BIN_EXE_lbmon"))
        .arg("--config")
        .arg(sandbox.write_config())
        .arg("worker")
        .arg("--cluster-id")
        .arg(cluster_id.to_string())
        .arg("--parent-pid")
        .arg(std::process::id().to_string())
        .arg("--parent-token")
        .arg(token)
        .stdin(Stdio::null())
        .spawn()
        .unwrap()
}

/// Sentinel naming this test process as the supervisor.
fn write_sentinel(sandbox: &Sandbox, token: &str) {
    let identity = SupervisorIdentity::new(std::process::id(), token);
    fs::write(sandbox.pid_file(), identity.render()).unwrap();
}

fn exit_code(child: &mut Child) -> Option<i32> {
    child
        .wait_timeout(Duration::from_secs(10))
        .unwrap()
        .and_then(|status| status.code())
}

#[test]
#[serial]
fn test_worker_claims_and_releases_on_sigterm() {
    let sandbox = Sandbox::new();
    write_sentinel(&sandbox, TOKEN);
    let mut child = spawn_worker(&sandbox, 4, TOKEN);

    assert!(wait_for(Duration::from_secs(10), || {
        fs::read_to_string(sandbox.marker(4)).ok() == Some(child.id().to_string())
    }));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    assert_eq!(exit_code(&mut child), Some(0));
    assert!(!sandbox.marker(4).exists());
}

#[test]
#[serial]
fn test_worker_treats_sighup_like_sigterm() {
    let sandbox = Sandbox::new();
    write_sentinel(&sandbox, TOKEN);
    let mut child = spawn_worker(&sandbox, 5, TOKEN);
    assert!(wait_for(Duration::from_secs(10), || sandbox.marker(5).exists()));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGHUP).unwrap();

    assert_eq!(exit_code(&mut child), Some(0));
    assert!(!sandbox.marker(5).exists());
}

#[test]
#[serial]
fn test_duplicate_worker_exits_cleanly() {
    let sandbox = Sandbox::new();
    write_sentinel(&sandbox, TOKEN);
    // Claimed by this (live) test process
    fs::write(sandbox.marker(6), std::process::id().to_string()).unwrap();

    let mut child = spawn_worker(&sandbox, 6, TOKEN);

    assert_eq!(exit_code(&mut child), Some(0));
    assert_eq!(
        fs::read_to_string(sandbox.marker(6)).unwrap(),
        std::process::id().to_string()
    );
}

#[test]
#[serial]
fn test_worker_exits_when_sentinel_removed() {
    let sandbox = Sandbox::new();
    write_sentinel(&sandbox, TOKEN);
    let mut child = spawn_worker(&sandbox, 7, TOKEN);
    assert!(wait_for(Duration::from_secs(10), || sandbox.marker(7).exists()));

    fs::remove_file(sandbox.pid_file()).unwrap();

    assert_eq!(exit_code(&mut child), Some(0));
    assert!(!sandbox.marker(7).exists());
}

#[test]
#[serial]
fn test_worker_rejects_foreign_supervisor_token() {
    let sandbox = Sandbox::new();
    write_sentinel(&sandbox, "someone-else");

    let mut child = spawn_worker(&sandbox, 8, TOKEN);

    assert_eq!(exit_code(&mut child), Some(0));
    assert!(!sandbox.marker(8).exists());
}

#[test]
fn test_invalid_invocation_exits_with_usage_code() {
    let status = Command::new(env!("CARGO_BIN_EXE_lbmon"))
        .args(["worker", "--cluster-id", "not-a-number"])
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn test_invalid_config_is_fatal() {
    let sandbox = Sandbox::new();
    let config = sandbox.path().join("bad.toml");
    fs::write(&config, "poll_interval_secs = 0\n").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_lbmon"))
        .arg("--config")
        .arg(&config)
        .arg("stop")
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
