//! Per-cluster watcher process.
//!
//! A watcher claims its cluster's marker, then idles in a cooperative probe
//! loop until it is signalled or loses its supervisor. Whatever ends the loop,
//! the marker is released before the process exits.

mod state;

pub use state::WorkerState;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::daemon::{read_identity, SentinelFile, SupervisorIdentity};
use crate::error::MonitorError;
use crate::marker::{ClaimError, MarkerRegistry};
use crate::process::parent_pid;
use crate::tick::{TickOutcome, Ticker};

/// Answers "is the supervisor that launched me still there?"
pub trait ParentProbe: Send + Sync {
    fn parent_alive(&self) -> bool;
}

/// Parent probe bound to a specific supervisor instance.
///
/// The parent counts as alive only while the sentinel exists, still carries
/// the identity this watcher was launched with, and the kernel still reports
/// that pid as our parent. The last check catches pid reuse: an orphaned
/// watcher is reparented, so `getppid` changes even if the old pid is recycled.
#[derive(Debug, Clone)]
pub struct SentinelParentProbe {
    sentinel: PathBuf,
    identity: SupervisorIdentity,
}

impl SentinelParentProbe {
    pub fn new(sentinel: impl Into<PathBuf>, identity: SupervisorIdentity) -> Self {
        Self {
            sentinel: sentinel.into(),
            identity,
        }
    }
}

impl ParentProbe for SentinelParentProbe {
    fn parent_alive(&self) -> bool {
        if !SentinelFile::is_present(&self.sentinel) {
            debug!(sentinel = %self.sentinel.display(), "sentinel is gone");
            return false;
        }
        let recorded = read_identity(&self.sentinel);
        if !recorded.is_some_and(|current| current.matches(&self.identity)) {
            debug!("sentinel belongs to a different supervisor");
            return false;
        }
        parent_pid() == self.identity.pid
    }
}

/// Why a running watcher left its probe loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Signalled,
    ParentLost,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Another watcher already owns the cluster.
    Duplicate,
    Finished(ExitReason),
}

pub struct WorkerProcess<M, P> {
    cluster_id: u32,
    pid: u32,
    markers: M,
    parent: P,
    ticker: Arc<dyn Ticker>,
    probe_interval: Duration,
    state: WorkerState,
}

impl<M: MarkerRegistry, P: ParentProbe> WorkerProcess<M, P> {
    /// The ticker's shutdown token is the quit flag observed by the probe loop.
    pub fn new(
        cluster_id: u32,
        markers: M,
        parent: P,
        ticker: Arc<dyn Ticker>,
        probe_interval: Duration,
    ) -> Self {
        Self {
            cluster_id,
            pid: std::process::id(),
            markers,
            parent,
            ticker,
            probe_interval,
            state: WorkerState::Init,
        }
    }

    /// Claim markers under `pid` instead of this process id.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn markers(&self) -> &M {
        &self.markers
    }

    fn transition(&mut self, next: WorkerState) -> Result<(), MonitorError> {
        self.state = self.state.try_transition(next)?;
        debug!(cluster_id = self.cluster_id, state = %self.state, "worker state changed");
        Ok(())
    }

    /// Drive the watcher from `Init` to `Terminated`.
    ///
    /// `install_handlers` receives the shutdown token and must arrange for
    /// termination signals to trigger it. It runs before the claim, so a
    /// signal that lands while claiming is seen by the first probe and the
    /// marker is still released.
    ///
    /// # Returns
    /// * `Ok(WorkerExit::Duplicate)` - The cluster was already claimed
    /// * `Ok(WorkerExit::Finished(_))` - The watcher ran and released its marker
    /// * `Err(MonitorError::Configuration)` - Handlers or marker could not be set up
    pub fn run<F>(&mut self, install_handlers: F) -> Result<WorkerExit, MonitorError>
    where
        F: FnOnce(crate::tick::Shutdown) -> Result<(), MonitorError>,
    {
        if let Err(e) = install_handlers(self.ticker.shutdown().clone()) {
            error!(cluster_id = self.cluster_id, error = %e, "cannot run watcher");
            self.transition(WorkerState::Terminated)?;
            return Err(e);
        }

        match self.markers.claim(self.cluster_id, self.pid) {
            Ok(path) => {
                self.transition(WorkerState::Claimed)?;
                info!(cluster_id = self.cluster_id, marker = %path.display(), "claimed cluster");
            }
            Err(ClaimError::AlreadyClaimed { owner }) => {
                let race = MonitorError::MarkerRace {
                    cluster_id: self.cluster_id,
                    owner,
                };
                info!("{race}; exiting");
                self.transition(WorkerState::Terminated)?;
                return Ok(WorkerExit::Duplicate);
            }
            Err(ClaimError::Io(e)) => {
                self.transition(WorkerState::Terminated)?;
                return Err(MonitorError::Configuration(format!(
                    "cannot create marker {}: {e}",
                    self.markers.marker_path(self.cluster_id).display()
                )));
            }
        }

        self.transition(WorkerState::Running)?;
        let reason = self.watch_guarded();
        Ok(WorkerExit::Finished(self.finish(reason)))
    }

    /// The probe loop, with panics turned into an exit reason so the marker
    /// is still released.
    fn watch_guarded(&self) -> ExitReason {
        match catch_unwind(AssertUnwindSafe(|| self.watch())) {
            Ok(reason) => reason,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(cluster_id = self.cluster_id, %message, "watcher loop panicked");
                ExitReason::Failed(message)
            }
        }
    }

    fn watch(&self) -> ExitReason {
        let shutdown = self.ticker.shutdown();
        loop {
            if shutdown.is_triggered() {
                info!(cluster_id = self.cluster_id, "received termination signal");
                return ExitReason::Signalled;
            }
            if !self.parent.parent_alive() {
                info!(cluster_id = self.cluster_id, "supervisor is gone, exiting");
                return ExitReason::ParentLost;
            }
            if self.ticker.wait(self.probe_interval) == TickOutcome::Cancelled {
                info!(cluster_id = self.cluster_id, "received termination signal");
                return ExitReason::Signalled;
            }
        }
    }

    fn finish(&mut self, reason: ExitReason) -> ExitReason {
        if let Err(e) = self.transition(WorkerState::Exiting) {
            warn!(error = %e, "unexpected state while exiting");
            self.state = WorkerState::Exiting;
        }

        match self.markers.release_if_owned(self.cluster_id, self.pid) {
            Ok(true) => debug!(cluster_id = self.cluster_id, "released marker"),
            Ok(false) => warn!(
                cluster_id = self.cluster_id,
                "marker no longer owned by this watcher, leaving it"
            ),
            Err(e) => error!(cluster_id = self.cluster_id, error = %e, "failed to remove marker"),
        }

        if let Err(e) = self.transition(WorkerState::Terminated) {
            warn!(error = %e, "unexpected state while terminating");
            self.state = WorkerState::Terminated;
        }
        info!(cluster_id = self.cluster_id, ?reason, "watcher finished");
        reason
    }
}
