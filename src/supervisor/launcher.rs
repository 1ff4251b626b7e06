//! Starting watcher processes and controlling them afterwards.

use nix::sys::signal::Signal;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::daemon::SupervisorIdentity;
use crate::error::MonitorError;
use crate::process::{command_line, is_process_alive, send_signal};
use crate::tick::Ticker;

/// How long a process we cannot reap may take to disappear after SIGKILL.
const FOREIGN_KILL_GRACE: Duration = Duration::from_secs(10);
const FOREIGN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a watcher process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSummary {
    Code(i32),
    Signal(i32),
    /// Not our child, so the status was never observed.
    Unknown,
}

impl From<ExitStatus> for ExitSummary {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitSummary::Code(code),
            (None, Some(signal)) => ExitSummary::Signal(signal),
            (None, None) => ExitSummary::Unknown,
        }
    }
}

impl fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitSummary::Code(code) => write!(f, "exit code {code}"),
            ExitSummary::Signal(signal) => write!(f, "signal {signal}"),
            ExitSummary::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Control surface over one watcher process.
pub trait ChildHandle: Send {
    fn pid(&self) -> u32;

    /// Non-blocking reap. `Ok(None)` while the process is still running.
    fn try_wait(&mut self) -> io::Result<Option<ExitSummary>>;

    /// Ask the process to exit (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit (SIGKILL).
    fn kill(&mut self) -> io::Result<()>;

    /// Block up to `timeout` for exit. `Ok(None)` on timeout.
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitSummary>>;

    fn wait(&mut self) -> io::Result<ExitSummary>;
}

pub trait WorkerLauncher: Send {
    /// Start a watcher for `cluster_id`, bound to the `parent` supervisor.
    fn spawn(
        &mut self,
        cluster_id: u32,
        parent: &SupervisorIdentity,
    ) -> Result<Box<dyn ChildHandle>, MonitorError>;

    /// Control handle for a watcher that some other process started.
    ///
    /// `None` when `pid` is not a watcher for `cluster_id`, e.g. a recycled
    /// pid recorded in a marker whose watcher was killed outright. Such a
    /// process must never be signalled.
    fn adopt(&mut self, cluster_id: u32, pid: u32) -> Option<Box<dyn ChildHandle>>;
}

/// Whether `args` is the command line of a watcher for `cluster_id`.
fn is_watcher_command(args: &[String], cluster_id: u32) -> bool {
    let id = cluster_id.to_string();
    args.windows(3)
        .any(|w| w[0] == "worker" && w[1] == "--cluster-id" && w[2] == id)
}

/// Launches watchers by re-executing a program with the hidden `worker`
/// subcommand.
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    config_path: Option<PathBuf>,
    ticker: Arc<dyn Ticker>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            config_path: None,
            ticker,
        }
    }

    /// Extra argument placed before the `worker` subcommand.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Configuration file forwarded to each watcher.
    pub fn config(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// The command line that would start a watcher for `cluster_id`.
    pub fn command(&self, cluster_id: u32, parent: &SupervisorIdentity) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(config) = &self.config_path {
            cmd.arg("--config").arg(config);
        }
        cmd.arg("worker")
            .arg("--cluster-id")
            .arg(cluster_id.to_string())
            .arg("--parent-pid")
            .arg(parent.pid.to_string())
            .arg("--parent-token")
            .arg(&parent.token)
            .stdin(Stdio::null());
        cmd
    }
}

impl WorkerLauncher for CommandLauncher {
    fn spawn(
        &mut self,
        cluster_id: u32,
        parent: &SupervisorIdentity,
    ) -> Result<Box<dyn ChildHandle>, MonitorError> {
        let child = self
            .command(cluster_id, parent)
            .spawn()
            .map_err(|source| MonitorError::ProcessSpawn { cluster_id, source })?;
        Ok(Box::new(ProcessChild { child }))
    }

    fn adopt(&mut self, cluster_id: u32, pid: u32) -> Option<Box<dyn ChildHandle>> {
        let args = command_line(pid)?;
        if !is_watcher_command(&args, cluster_id) {
            return None;
        }
        Some(Box::new(ForeignProcess::new(pid, Arc::clone(&self.ticker))))
    }
}

/// A watcher this process spawned and can reap.
pub struct ProcessChild {
    child: Child,
}

impl ProcessChild {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ChildHandle for ProcessChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitSummary>> {
        Ok(self.child.try_wait()?.map(ExitSummary::from))
    }

    fn terminate(&mut self) -> io::Result<()> {
        send_signal(self.child.id(), Signal::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitSummary>> {
        Ok(ChildExt::wait_timeout(&mut self.child, timeout)?.map(ExitSummary::from))
    }

    fn wait(&mut self) -> io::Result<ExitSummary> {
        Ok(self.child.wait()?.into())
    }
}

/// A watcher started by an earlier supervisor instance.
///
/// It cannot be reaped from here, so exit is observed by polling liveness.
pub struct ForeignProcess {
    pid: u32,
    ticker: Arc<dyn Ticker>,
}

impl ForeignProcess {
    pub fn new(pid: u32, ticker: Arc<dyn Ticker>) -> Self {
        Self { pid, ticker }
    }

    fn poll_until_gone(&self, timeout: Duration) -> Option<ExitSummary> {
        let deadline = self.ticker.now() + timeout;
        loop {
            if !is_process_alive(self.pid) {
                return Some(ExitSummary::Unknown);
            }
            if self.ticker.now() >= deadline {
                return None;
            }
            self.ticker.sleep(FOREIGN_POLL_INTERVAL);
        }
    }
}

impl ChildHandle for ForeignProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitSummary>> {
        Ok((!is_process_alive(self.pid)).then_some(ExitSummary::Unknown))
    }

    fn terminate(&mut self) -> io::Result<()> {
        send_signal(self.pid, Signal::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<()> {
        send_signal(self.pid, Signal::SIGKILL)
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitSummary>> {
        Ok(self.poll_until_gone(timeout))
    }

    fn wait(&mut self) -> io::Result<ExitSummary> {
        self.poll_until_gone(FOREIGN_KILL_GRACE).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("process {} still present after SIGKILL", self.pid),
            )
        })
    }
}
