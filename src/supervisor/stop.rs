//! Graceful-stop protocol: SIGTERM, bounded join, then SIGKILL.
//!
//! Split into [`begin_stop`] and [`finish_stop`] so that a whole-process
//! shutdown can signal every watcher before joining any of them.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::launcher::{ChildHandle, ExitSummary};
use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited on its own within the join timeout.
    Exited(ExitSummary),
    /// Needed SIGKILL.
    Killed(ExitSummary),
    /// Had already exited before the stop began.
    AlreadyGone,
}

/// Send SIGTERM unless the process has already exited.
///
/// Returns the final outcome when there is nothing left to join.
pub fn begin_stop(cluster_id: u32, child: &mut dyn ChildHandle) -> Option<StopOutcome> {
    let pid = child.pid();
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(cluster_id, pid, %status, "watcher already exited");
            return Some(StopOutcome::AlreadyGone);
        }
        Ok(None) => {}
        Err(e) => warn!(cluster_id, pid, error = %e, "failed to poll watcher"),
    }

    info!(cluster_id, pid, "sending SIGTERM to watcher");
    if let Err(e) = child.terminate() {
        warn!(cluster_id, pid, error = %e, "failed to send SIGTERM");
    }
    None
}

/// Join for up to `timeout`, then kill and wait unconditionally.
pub fn finish_stop(cluster_id: u32, child: &mut dyn ChildHandle, timeout: Duration) -> StopOutcome {
    let pid = child.pid();
    match child.wait_timeout(timeout) {
        Ok(Some(status)) => {
            info!(cluster_id, pid, %status, "watcher exited");
            return StopOutcome::Exited(status);
        }
        Ok(None) => {
            let timeout_err = MonitorError::ChildTimeout {
                cluster_id,
                pid,
                timeout,
            };
            warn!("{timeout_err}; sending SIGKILL");
        }
        Err(e) => warn!(cluster_id, pid, error = %e, "failed to join watcher; sending SIGKILL"),
    }

    if let Err(e) = child.kill() {
        error!(cluster_id, pid, error = %e, "failed to send SIGKILL");
    }
    match child.wait() {
        Ok(status) => {
            info!(cluster_id, pid, %status, "watcher killed");
            StopOutcome::Killed(status)
        }
        Err(e) => {
            error!(cluster_id, pid, error = %e, "failed to reap killed watcher");
            StopOutcome::Killed(ExitSummary::Unknown)
        }
    }
}

pub fn graceful_stop(cluster_id: u32, child: &mut dyn ChildHandle, timeout: Duration) -> StopOutcome {
    begin_stop(cluster_id, child).unwrap_or_else(|| finish_stop(cluster_id, child, timeout))
}
