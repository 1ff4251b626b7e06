//! Read-only view of cluster membership and always-on flags.
//!
//! [`ClusterSource`] performs single fallible reads; [`ClusterStateStore`] wraps
//! a source with the bounded retry policy and keeps the last good snapshot so a
//! store outage degrades into stale data instead of an error.

mod memory;
mod retry;
mod sqlite;

pub use memory::MemorySource;
pub use retry::RetryPolicy;
pub use sqlite::SqliteSource;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::tick::Ticker;

/// Status code of a cluster that is up.
pub const STATUS_UP: i64 = 1;
/// Status code of a retired cluster; such rows are ignored entirely.
pub const STATUS_RETIRED: i64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Up,
    Down,
    Retired,
}

impl ClusterStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            STATUS_UP => ClusterStatus::Up,
            STATUS_RETIRED => ClusterStatus::Retired,
            _ => ClusterStatus::Down,
        }
    }
}

/// One row of the global cluster registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSummary {
    pub cluster_id: u32,
    pub status: ClusterStatus,
}

/// Everything the store knows about one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRecord {
    pub cluster_id: u32,
    pub status: ClusterStatus,
    pub always_on: bool,
}

impl ClusterRecord {
    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            cluster_id: self.cluster_id,
            status: self.status,
        }
    }
}

/// Result of [`ClusterStateStore::get_cluster_ids`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub running: BTreeSet<u32>,
    pub stopped: BTreeSet<u32>,
    /// `false` when the snapshot was replayed from cache after the store failed.
    pub fresh: bool,
}

impl ClusterSnapshot {
    pub fn from_summaries(summaries: &[ClusterSummary]) -> Self {
        let mut snapshot = ClusterSnapshot {
            fresh: true,
            ..Default::default()
        };
        for summary in summaries {
            match summary.status {
                ClusterStatus::Up => {
                    snapshot.running.insert(summary.cluster_id);
                }
                ClusterStatus::Down => {
                    snapshot.stopped.insert(summary.cluster_id);
                }
                ClusterStatus::Retired => {}
            }
        }
        snapshot
    }

    /// Whether the cluster appears in the registry at all.
    pub fn lists(&self, cluster_id: u32) -> bool {
        self.running.contains(&cluster_id) || self.stopped.contains(&cluster_id)
    }
}

/// Raw, single-attempt access to the persisted cluster registry.
pub trait ClusterSource: Send {
    /// All non-retired clusters with their status.
    fn fetch_clusters(&self) -> Result<Vec<ClusterSummary>, StoreError>;

    fn fetch_always_on(&self, cluster_id: u32) -> Result<bool, StoreError>;

    /// Whether the backing store exists yet.
    fn is_available(&self) -> bool {
        true
    }
}

pub struct ClusterStateStore<S> {
    source: S,
    policy: RetryPolicy,
    ticker: Arc<dyn Ticker>,
    last_snapshot: Option<ClusterSnapshot>,
}

impl<S: ClusterSource> ClusterStateStore<S> {
    pub fn new(source: S, policy: RetryPolicy, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            source,
            policy,
            ticker,
            last_snapshot: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    /// Running and stopped cluster ids.
    ///
    /// Never fails: once retries are exhausted the previous snapshot is
    /// returned with `fresh == false` (an empty one if nothing was ever read).
    pub fn get_cluster_ids(&mut self) -> ClusterSnapshot {
        let result = self
            .policy
            .run(self.ticker.as_ref(), || self.source.fetch_clusters());

        match result {
            Ok(summaries) => {
                let snapshot = ClusterSnapshot::from_summaries(&summaries);
                self.last_snapshot = Some(snapshot.clone());
                snapshot
            }
            Err(e) => {
                error!(error = %e, "failed to list clusters, reusing last known state");
                let mut snapshot = self.last_snapshot.clone().unwrap_or_default();
                snapshot.fresh = false;
                snapshot
            }
        }
    }

    /// Always-on flag, or `None` when it could not be read.
    pub fn always_on_lookup(&self, cluster_id: u32) -> Option<bool> {
        let result = self.policy.run(self.ticker.as_ref(), || {
            self.source.fetch_always_on(cluster_id)
        });

        match result {
            Ok(always_on) => {
                debug!(cluster_id, always_on, "read always-on flag");
                Some(always_on)
            }
            Err(e) => {
                error!(cluster_id, error = %e, "failed to read always-on flag");
                None
            }
        }
    }

    /// Always-on flag; an unreadable flag counts as `false`.
    pub fn is_always_on(&self, cluster_id: u32) -> bool {
        self.always_on_lookup(cluster_id).unwrap_or(false)
    }
}
