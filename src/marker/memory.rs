use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ClaimError, MarkerRegistry};

#[derive(Debug, Default)]
struct MemoryState {
    markers: BTreeMap<u32, u32>,
    alive: BTreeSet<u32>,
}

/// In-memory marker namespace; the test decides which pids are alive.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryMarkers {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_alive(&self, pid: u32, alive: bool) {
        let mut state = self.lock();
        if alive {
            state.alive.insert(pid);
        } else {
            state.alive.remove(&pid);
        }
    }

    /// Plant a marker directly, bypassing the absent-only rule.
    pub fn insert(&self, cluster_id: u32, pid: u32) {
        self.lock().markers.insert(cluster_id, pid);
    }
}

impl MarkerRegistry for MemoryMarkers {
    fn marker_path(&self, cluster_id: u32) -> PathBuf {
        PathBuf::from(format!("monitor_{cluster_id}.file"))
    }

    fn claim(&self, cluster_id: u32, pid: u32) -> Result<PathBuf, ClaimError> {
        let mut state = self.lock();
        if let Some(&owner) = state.markers.get(&cluster_id) {
            return Err(ClaimError::AlreadyClaimed { owner: Some(owner) });
        }
        state.markers.insert(cluster_id, pid);
        Ok(self.marker_path(cluster_id))
    }

    fn owner(&self, cluster_id: u32) -> Option<u32> {
        self.lock().markers.get(&cluster_id).copied()
    }

    fn exists(&self, cluster_id: u32) -> bool {
        self.lock().markers.contains_key(&cluster_id)
    }

    fn is_stale(&self, cluster_id: u32) -> bool {
        let state = self.lock();
        state
            .markers
            .get(&cluster_id)
            .is_some_and(|pid| !state.alive.contains(pid))
    }

    fn release(&self, cluster_id: u32) -> io::Result<()> {
        self.lock().markers.remove(&cluster_id);
        Ok(())
    }

    fn claimed(&self) -> Vec<u32> {
        self.lock().markers.keys().copied().collect()
    }
}
