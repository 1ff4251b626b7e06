use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

use super::launcher::ChildHandle;

/// A watcher the supervisor started and still has to reap.
pub struct WorkerHandle {
    pub cluster_id: u32,
    pub pid: u32,
    pub spawned_at: DateTime<Utc>,
    pub marker_path: PathBuf,
    pub child: Box<dyn ChildHandle>,
}

impl WorkerHandle {
    pub fn new(cluster_id: u32, marker_path: PathBuf, child: Box<dyn ChildHandle>) -> Self {
        Self {
            cluster_id,
            pid: child.pid(),
            spawned_at: Utc::now(),
            marker_path,
            child,
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("cluster_id", &self.cluster_id)
            .field("pid", &self.pid)
            .field("spawned_at", &self.spawned_at)
            .field("marker_path", &self.marker_path)
            .finish_non_exhaustive()
    }
}
