//! Advisory per-cluster claims.
//!
//! A marker records the pid of the watcher that owns a cluster. Ownership is
//! inferred from that pid plus a liveness check; nothing is locked by the
//! kernel, so a crashed watcher leaves a stale marker until someone removes it.

mod fs;
mod memory;

pub use fs::FsMarkerRegistry;
pub use memory::MemoryMarkers;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimError {
    /// Someone else, live or stale, already holds the marker.
    #[error("marker already claimed (owner: {owner:?})")]
    AlreadyClaimed { owner: Option<u32> },

    #[error("marker i/o failed: {0}")]
    Io(#[from] io::Error),
}

pub trait MarkerRegistry: Send + Sync {
    fn marker_path(&self, cluster_id: u32) -> PathBuf;

    /// Create the marker for `cluster_id` owned by `pid`, only if absent.
    fn claim(&self, cluster_id: u32, pid: u32) -> Result<PathBuf, ClaimError>;

    /// Recorded owner, or `None` when the marker is missing or unreadable.
    fn owner(&self, cluster_id: u32) -> Option<u32>;

    fn exists(&self, cluster_id: u32) -> bool;

    /// A marker exists but its recorded owner is not a live process.
    fn is_stale(&self, cluster_id: u32) -> bool;

    /// Remove the marker. Removing a missing marker succeeds.
    fn release(&self, cluster_id: u32) -> io::Result<()>;

    /// Remove the marker only if `pid` owns it.
    fn release_if_owned(&self, cluster_id: u32, pid: u32) -> io::Result<bool> {
        if self.owner(cluster_id) == Some(pid) {
            self.release(cluster_id)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Cluster ids that currently have a marker.
    fn claimed(&self) -> Vec<u32>;

    /// Marker present and owned by a live process.
    fn is_live(&self, cluster_id: u32) -> bool {
        self.exists(cluster_id) && !self.is_stale(cluster_id)
    }
}
