use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ClusterRecord, ClusterSource, ClusterStatus, ClusterSummary};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<u32, ClusterRecord>,
    fail_next: u32,
    reads: u32,
}

/// In-memory cluster registry with failure injection.
///
/// Clones share state, so a test can keep one handle while the supervisor owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, cluster_id: u32, status: ClusterStatus, always_on: bool) {
        self.lock().records.insert(
            cluster_id,
            ClusterRecord {
                cluster_id,
                status,
                always_on,
            },
        );
    }

    pub fn remove(&self, cluster_id: u32) {
        self.lock().records.remove(&cluster_id);
    }

    /// Make the next `count` reads fail, whatever they are.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Number of read attempts served so far, failed ones included.
    pub fn reads(&self) -> u32 {
        self.lock().reads
    }

    fn begin_read(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let mut state = self.lock();
        state.reads += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(StoreError::Unavailable("database is locked".to_string()));
        }
        Ok(state)
    }
}

impl ClusterSource for MemorySource {
    fn fetch_clusters(&self) -> Result<Vec<ClusterSummary>, StoreError> {
        let state = self.begin_read()?;
        Ok(state
            .records
            .values()
            .filter(|record| record.status != ClusterStatus::Retired)
            .map(ClusterRecord::summary)
            .collect())
    }

    fn fetch_always_on(&self, cluster_id: u32) -> Result<bool, StoreError> {
        let state = self.begin_read()?;
        Ok(state
            .records
            .get(&cluster_id)
            .is_some_and(|record| record.always_on))
    }
}
