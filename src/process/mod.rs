//! Process utilities for lbmon
//!
//! Liveness probing, signal delivery and termination-signal handling shared by
//! the supervisor and its watcher processes.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getppid, Pid};
use std::fs;
use std::io;

use crate::error::MonitorError;
use crate::tick::Shutdown;

/// Check if a process with the given PID is alive
///
/// Sends signal 0, which performs the existence and permission checks without
/// delivering anything. `EPERM` means the process exists but belongs to
/// someone else, so it still counts as alive.
///
/// # Example
/// ```ignore
/// use lbmon::process::is_process_alive;
///
/// assert!(is_process_alive(std::process::id()));
/// assert!(!is_process_alive(999999999));
/// ```
pub fn is_process_alive(pid: u32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };
    match kill(pid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Deliver `signal` to `pid`. A process that is already gone is not an error.
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let Some(target) = to_pid(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    };
    match kill(target, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Arguments of a running process, read from `/proc/<pid>/cmdline`.
///
/// `None` when the process is gone, unreadable, or a kernel thread with an
/// empty command line.
pub fn command_line(pid: u32) -> Option<Vec<String>> {
    to_pid(pid)?;
    let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let args: Vec<String> = raw
        .split(|&b| b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();
    (!args.is_empty()).then_some(args)
}

/// PID of the process that currently parents this one.
pub fn parent_pid() -> u32 {
    getppid().as_raw() as u32
}

// pid 0 and negative values address process groups, never a single process
fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Liveness check used for marker staleness, swappable in tests.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the kernel process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl LivenessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }
}

/// Route SIGINT, SIGTERM and SIGHUP to `shutdown`.
///
/// The reload-class SIGHUP deliberately behaves exactly like a terminate.
/// Can only be installed once per process.
pub fn install_shutdown_handler(shutdown: Shutdown) -> Result<(), MonitorError> {
    ctrlc::set_handler(move || shutdown.trigger()).map_err(|e| {
        MonitorError::Configuration(format!("failed to install signal handlers: {e}"))
    })
}
