//! The supervisor driving real watcher processes over SQLite and marker files.

use lbmon::daemon::{SentinelFile, SupervisorIdentity};
use lbmon::marker::{FsMarkerRegistry, MarkerRegistry};
use lbmon::store::{ClusterStateStore, RetryPolicy, SqliteSource};
use lbmon::supervisor::{
    CommandLauncher, ExitSummary, RunExit, StopOutcome, Supervisor, SupervisorSettings,
};
use lbmon::tick::{Shutdown, SystemTicker, Ticker};
use serial_test::serial;
use std::fs;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::helpers::{wait_for, Sandbox};

const STATUS_UP: i64 = 1;
const STATUS_DOWN: i64 = 0;

type RealSupervisor = Supervisor<SqliteSource, FsMarkerRegistry, CommandLauncher>;

struct Running {
    supervisor: RealSupervisor,
    // Keeps the watchers' parent check satisfied
    _sentinel: SentinelFile,
}

fn lbmon_launcher(sandbox: &Sandbox, ticker: Arc<dyn Ticker>) -> CommandLauncher {
    CommandLauncher::new(env!("CARGO_BIN_EXE_lbmon"), ticker).config(sandbox.write_config())
}

fn start(
    sandbox: &Sandbox,
    poll_interval: Duration,
    launcher: impl FnOnce(Arc<dyn Ticker>) -> CommandLauncher,
) -> Running {
    let identity = SupervisorIdentity::generate();
    let sentinel = SentinelFile::acquire(&sandbox.pid_file(), identity.clone()).unwrap();
    let ticker: Arc<dyn Ticker> = Arc::new(SystemTicker::new(Shutdown::new()));
    let store = ClusterStateStore::new(
        SqliteSource::new(
            sandbox.global_db(),
            sandbox.path().join("lb_{id}.sqlite").to_string_lossy(),
            Duration::from_secs(1),
        ),
        RetryPolicy::default(),
        Arc::clone(&ticker),
    );
    let supervisor = Supervisor::new(
        SupervisorSettings {
            poll_interval,
            join_timeout: Duration::from_secs(1),
            sentinel_path: sandbox.pid_file(),
        },
        identity,
        store,
        FsMarkerRegistry::new(sandbox.marker_dir()),
        launcher(Arc::clone(&ticker)),
        ticker,
    );
    Running {
        supervisor,
        _sentinel: sentinel,
    }
}

fn claimed_by_handle(running: &Running, cluster_id: u32) -> bool {
    let Some(handle) = running.supervisor.handle(cluster_id) else {
        return false;
    };
    running.supervisor.markers().owner(cluster_id) == Some(handle.pid)
}

#[test]
#[serial]
fn test_converges_to_desired_clusters() {
    let sandbox = Sandbox::new();
    sandbox.set_cluster(1, STATUS_UP, true);
    sandbox.set_cluster(2, STATUS_UP, true);
    sandbox.set_cluster(3, STATUS_UP, false);
    sandbox.set_cluster(4, STATUS_DOWN, true);
    let mut running = start(&sandbox, Duration::from_secs(1), |t| lbmon_launcher(&sandbox, t));

    let report = running.supervisor.tick();
    assert_eq!(report.spawned, vec![1, 2]);
    assert!(wait_for(Duration::from_secs(10), || {
        claimed_by_handle(&running, 1) && claimed_by_handle(&running, 2)
    }));

    // Steady state: nothing to do
    assert!(running.supervisor.tick().is_noop());

    sandbox.set_cluster(2, STATUS_DOWN, true);
    let report = running.supervisor.tick();

    assert_eq!(report.stopped.len(), 1);
    assert!(matches!(report.stopped[0], (2, StopOutcome::Exited(_))));
    assert_eq!(running.supervisor.tracked(), vec![1]);
    assert!(!sandbox.marker(2).exists());
    assert!(sandbox.marker(1).exists());

    running.supervisor.shutdown();
    assert!(!sandbox.marker(1).exists());
}

#[test]
#[serial]
fn test_stubborn_watcher_is_killed_after_join_timeout() {
    let sandbox = Sandbox::new();
    sandbox.set_cluster(9, STATUS_UP, true);
    let marker = sandbox.marker(9);
    // Ignores SIGTERM, claims the marker once the trap is in place
    let script = format!(
        "trap '' TERM; echo $$ > '{}'; while :; do sleep 0.05; done",
        marker.display()
    );
    let mut running = start(&sandbox, Duration::from_secs(1), |ticker| {
        CommandLauncher::new("sh", ticker)
            .arg("-c")
            .arg(script)
            .arg("stubborn-watcher")
    });

    assert_eq!(running.supervisor.tick().spawned, vec![9]);
    assert!(wait_for(Duration::from_secs(10), || claimed_by_handle(&running, 9)));

    sandbox.set_cluster(9, STATUS_DOWN, true);
    let report = running.supervisor.tick();

    assert_eq!(
        report.stopped,
        vec![(9, StopOutcome::Killed(ExitSummary::Signal(libc::SIGKILL)))]
    );
    assert!(!marker.exists());
}

#[test]
#[serial]
fn test_stale_marker_reclaimed_on_restart() {
    let sandbox = Sandbox::new();
    sandbox.set_cluster(1, STATUS_UP, true);
    // Left by a watcher that died with the previous supervisor
    fs::write(sandbox.marker(1), "999999999").unwrap();
    let mut running = start(&sandbox, Duration::from_secs(1), |t| lbmon_launcher(&sandbox, t));

    let report = running.supervisor.tick();

    assert_eq!(report.reclaimed, vec![1]);
    assert_eq!(report.spawned, vec![1]);
    assert!(wait_for(Duration::from_secs(10), || claimed_by_handle(&running, 1)));

    running.supervisor.shutdown();
    assert!(!sandbox.marker(1).exists());
}

#[test]
#[serial]
fn test_run_stops_when_sentinel_removed() {
    let sandbox = Sandbox::new();
    sandbox.set_cluster(1, STATUS_UP, true);
    let running = start(&sandbox, Duration::from_millis(100), |t| {
        lbmon_launcher(&sandbox, t)
    });
    let Running {
        mut supervisor,
        _sentinel,
    } = running;

    let worker = thread::spawn(move || supervisor.run());
    assert!(wait_for(Duration::from_secs(10), || sandbox.marker(1).exists()));

    fs::remove_file(sandbox.pid_file()).unwrap();

    assert_eq!(worker.join().unwrap(), RunExit::SentinelLost);
    assert!(!sandbox.marker(1).exists());
}

#[test]
#[serial]
fn test_marker_with_recycled_pid_never_signals_its_process() {
    let sandbox = Sandbox::new();
    sandbox.set_cluster(5, STATUS_DOWN, true);
    // The pid left in the marker now belongs to an unrelated process
    let mut bystander = Command::new("sleep").arg("30").spawn().unwrap();
    fs::write(sandbox.marker(5), bystander.id().to_string()).unwrap();
    let mut running = start(&sandbox, Duration::from_secs(1), |t| lbmon_launcher(&sandbox, t));

    let report = running.supervisor.tick();

    assert!(report.stopped.is_empty());
    assert!(!sandbox.marker(5).exists());
    assert_eq!(bystander.try_wait().unwrap(), None);

    bystander.kill().unwrap();
    bystander.wait().unwrap();
}
