//! The reconciliation loop.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::handle::WorkerHandle;
use super::launcher::WorkerLauncher;
use super::stop::{begin_stop, finish_stop, graceful_stop, StopOutcome};
use crate::config::MonitorConfig;
use crate::daemon::{SentinelFile, SupervisorIdentity};
use crate::marker::MarkerRegistry;
use crate::store::{ClusterSource, ClusterStateStore};
use crate::tick::{TickOutcome, Ticker};

/// Step used while waiting for the cluster store to appear.
const STORE_WAIT_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub join_timeout: Duration,
    /// Removing this file ends the loop.
    pub sentinel_path: PathBuf,
}

impl SupervisorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            join_timeout: config.join_timeout(),
            sentinel_path: config.pid_file.clone(),
        }
    }
}

/// What one reconciliation tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tracked watchers found dead and reaped.
    pub reaped: Vec<u32>,
    pub stopped: Vec<(u32, StopOutcome)>,
    pub spawned: Vec<u32>,
    /// Desired clusters left alone because a live marker already covers them.
    pub skipped: Vec<u32>,
    /// Desired clusters whose stale marker was removed before spawning.
    pub reclaimed: Vec<u32>,
    pub spawn_failures: Vec<u32>,
}

impl TickReport {
    pub fn is_noop(&self) -> bool {
        self.reaped.is_empty()
            && self.stopped.is_empty()
            && self.spawned.is_empty()
            && self.reclaimed.is_empty()
            && self.spawn_failures.is_empty()
    }
}

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Signalled,
    SentinelLost,
}

/// Keeps one watcher per up, always-on cluster.
pub struct Supervisor<S, M, L> {
    settings: SupervisorSettings,
    identity: SupervisorIdentity,
    store: ClusterStateStore<S>,
    markers: M,
    launcher: L,
    ticker: Arc<dyn Ticker>,
    workers: BTreeMap<u32, WorkerHandle>,
}

impl<S, M, L> Supervisor<S, M, L>
where
    S: ClusterSource,
    M: MarkerRegistry,
    L: WorkerLauncher,
{
    pub fn new(
        settings: SupervisorSettings,
        identity: SupervisorIdentity,
        store: ClusterStateStore<S>,
        markers: M,
        launcher: L,
        ticker: Arc<dyn Ticker>,
    ) -> Self {
        Self {
            settings,
            identity,
            store,
            markers,
            launcher,
            ticker,
            workers: BTreeMap::new(),
        }
    }

    /// Cluster ids with a tracked watcher.
    pub fn tracked(&self) -> Vec<u32> {
        self.workers.keys().copied().collect()
    }

    pub fn handle(&self, cluster_id: u32) -> Option<&WorkerHandle> {
        self.workers.get(&cluster_id)
    }

    pub fn markers(&self) -> &M {
        &self.markers
    }

    /// Run until signalled or until the sentinel disappears, then shut down.
    pub fn run(&mut self) -> RunExit {
        info!(pid = self.identity.pid, "supervisor started");

        let exit = if self.wait_until_available() {
            self.reconcile_loop()
        } else {
            RunExit::Signalled
        };

        self.shutdown();
        info!(?exit, "supervisor stopped");
        exit
    }

    /// Block until the cluster store exists. `false` if cancelled first.
    fn wait_until_available(&self) -> bool {
        while !self.store.is_available() {
            warn!("cluster store is not available yet, waiting");
            if self.ticker.wait(STORE_WAIT_STEP) == TickOutcome::Cancelled {
                return false;
            }
        }
        true
    }

    fn reconcile_loop(&mut self) -> RunExit {
        let shutdown = self.ticker.shutdown().clone();
        loop {
            if shutdown.is_triggered() {
                return RunExit::Signalled;
            }
            if !SentinelFile::is_present(&self.settings.sentinel_path) {
                info!(
                    sentinel = %self.settings.sentinel_path.display(),
                    "sentinel removed, leaving reconciliation loop"
                );
                return RunExit::SentinelLost;
            }

            let report = self.tick();
            if !report.is_noop() {
                debug!(?report, "tick finished");
            }

            if self.ticker.wait(self.settings.poll_interval) == TickOutcome::Cancelled {
                return RunExit::Signalled;
            }
        }
    }

    /// One reconciliation pass: reap, stop, then spawn.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport {
            reaped: self.reap(),
            ..Default::default()
        };

        let snapshot = self.store.get_cluster_ids();

        let mut desired = BTreeSet::new();
        let mut switched_off = BTreeSet::new();
        for &cluster_id in &snapshot.running {
            match self.store.always_on_lookup(cluster_id) {
                Some(true) => {
                    desired.insert(cluster_id);
                }
                Some(false) => {
                    switched_off.insert(cluster_id);
                }
                // Unknown: neither spawn nor stop
                None => {}
            }
        }

        let mut to_stop: BTreeSet<u32> = snapshot.stopped.clone();
        for &cluster_id in self.workers.keys() {
            if switched_off.contains(&cluster_id) {
                info!(cluster_id, "cluster is no longer always-on");
                to_stop.insert(cluster_id);
            } else if snapshot.fresh && !snapshot.lists(cluster_id) {
                info!(cluster_id, "cluster no longer listed");
                to_stop.insert(cluster_id);
            }
        }

        for cluster_id in to_stop {
            if let Some(outcome) = self.stop_cluster(cluster_id) {
                report.stopped.push((cluster_id, outcome));
            }
        }

        for cluster_id in desired {
            if self.workers.contains_key(&cluster_id) {
                continue;
            }
            self.ensure_worker(cluster_id, &mut report);
        }

        report
    }

    /// Drop handles of watchers that have exited.
    fn reap(&mut self) -> Vec<u32> {
        let mut reaped = Vec::new();
        for (&cluster_id, handle) in self.workers.iter_mut() {
            match handle.child.try_wait() {
                Ok(Some(status)) => {
                    warn!(cluster_id, pid = handle.pid, %status, "watcher exited unexpectedly");
                    reaped.push(cluster_id);
                }
                Ok(None) => {}
                Err(e) => warn!(cluster_id, pid = handle.pid, error = %e, "failed to poll watcher"),
            }
        }

        for cluster_id in &reaped {
            if let Some(handle) = self.workers.remove(cluster_id) {
                self.release_after_exit(*cluster_id, handle.pid);
            }
        }
        reaped
    }

    /// Stop whatever supervises `cluster_id`. `None` when nothing was running.
    fn stop_cluster(&mut self, cluster_id: u32) -> Option<StopOutcome> {
        if let Some(mut handle) = self.workers.remove(&cluster_id) {
            let outcome =
                graceful_stop(cluster_id, handle.child.as_mut(), self.settings.join_timeout);
            self.release_after_exit(cluster_id, handle.pid);
            return Some(outcome);
        }

        if self.markers.is_stale(cluster_id) {
            info!(cluster_id, "removing stale marker of stopped cluster");
            self.release(cluster_id);
            return None;
        }

        // Live marker from a watcher we did not start
        let pid = self.markers.owner(cluster_id)?;
        let Some(mut child) = self.launcher.adopt(cluster_id, pid) else {
            warn!(cluster_id, pid, "marker owner is not a watcher for this cluster, removing marker");
            if let Err(e) = self.markers.release_if_owned(cluster_id, pid) {
                error!(cluster_id, error = %e, "failed to remove marker");
            }
            return None;
        };
        info!(cluster_id, pid, "stopping watcher left by another supervisor");
        let outcome = graceful_stop(cluster_id, child.as_mut(), self.settings.join_timeout);
        self.release_after_exit(cluster_id, pid);
        Some(outcome)
    }

    fn ensure_worker(&mut self, cluster_id: u32, report: &mut TickReport) {
        if self.markers.is_live(cluster_id) {
            debug!(
                cluster_id,
                owner = ?self.markers.owner(cluster_id),
                "cluster already has a live watcher"
            );
            report.skipped.push(cluster_id);
            return;
        }
        if self.markers.exists(cluster_id) {
            info!(
                cluster_id,
                owner = ?self.markers.owner(cluster_id),
                "reclaiming stale marker"
            );
            self.release(cluster_id);
            report.reclaimed.push(cluster_id);
        }

        match self.launcher.spawn(cluster_id, &self.identity) {
            Ok(child) => {
                let handle =
                    WorkerHandle::new(cluster_id, self.markers.marker_path(cluster_id), child);
                info!(cluster_id, pid = handle.pid, "spawned watcher");
                self.workers.insert(cluster_id, handle);
                report.spawned.push(cluster_id);
            }
            Err(e) => {
                error!(cluster_id, error = %e, "failed to spawn watcher, will retry next tick");
                report.spawn_failures.push(cluster_id);
            }
        }
    }

    /// Remove the marker left behind by `pid`, if any.
    fn release_after_exit(&self, cluster_id: u32, pid: u32) {
        if self.markers.owner(cluster_id) == Some(pid) || self.markers.is_stale(cluster_id) {
            self.release(cluster_id);
        }
    }

    fn release(&self, cluster_id: u32) {
        if let Err(e) = self.markers.release(cluster_id) {
            error!(cluster_id, error = %e, "failed to remove marker");
        }
    }

    /// Stop every tracked watcher and clear residual markers.
    ///
    /// All watchers are signalled before any of them is joined, so the total
    /// wait is bounded by one join timeout rather than one per watcher.
    pub fn shutdown(&mut self) -> Vec<(u32, StopOutcome)> {
        let mut workers = std::mem::take(&mut self.workers);
        if !workers.is_empty() {
            info!(count = workers.len(), "stopping all watchers");
        }

        let mut outcomes = Vec::with_capacity(workers.len());
        let mut pending = Vec::new();
        for (&cluster_id, handle) in workers.iter_mut() {
            match begin_stop(cluster_id, handle.child.as_mut()) {
                Some(outcome) => outcomes.push((cluster_id, outcome)),
                None => pending.push(cluster_id),
            }
        }

        // The deadline is shared: later joins get whatever time is left
        let deadline = self.ticker.now() + self.settings.join_timeout;
        for cluster_id in pending {
            if let Some(handle) = workers.get_mut(&cluster_id) {
                let remaining = deadline.saturating_sub(self.ticker.now());
                outcomes.push((
                    cluster_id,
                    finish_stop(cluster_id, handle.child.as_mut(), remaining),
                ));
            }
        }
        outcomes.sort_by_key(|(cluster_id, _)| *cluster_id);

        for (cluster_id, handle) in &workers {
            self.release_after_exit(*cluster_id, handle.pid);
        }
        for cluster_id in self.markers.claimed() {
            if self.markers.is_stale(cluster_id) {
                debug!(cluster_id, "removing residual marker");
                self.release(cluster_id);
            }
        }
        outcomes
    }
}
