//! Error taxonomy for the supervisor and its workers.
//!
//! [`MonitorError::Configuration`] is fatal; every other variant is logged and
//! contained to the cluster it concerns.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::worker::WorkerState;

/// Normal exit, including a worker that found its cluster already claimed.
pub const EXIT_OK: u8 = 0;
/// Fatal configuration or permission problem.
pub const EXIT_FATAL: u8 = 1;
/// Invalid command-line invocation.
pub const EXIT_USAGE: u8 = 2;

/// A single failed read against the cluster status store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store read failed after {attempts} attempts: {source}")]
    TransientStore {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("failed to spawn watcher for cluster {cluster_id}: {source}")]
    ProcessSpawn {
        cluster_id: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("marker for cluster {cluster_id} already claimed by {}", owner_label(.owner))]
    MarkerRace { cluster_id: u32, owner: Option<u32> },

    #[error("watcher {pid} for cluster {cluster_id} did not exit within {timeout:?}")]
    ChildTimeout {
        cluster_id: u32,
        pid: u32,
        timeout: Duration,
    },

    #[error("invalid worker state transition: {from} -> {to}")]
    InvalidTransition { from: WorkerState, to: WorkerState },
}

fn owner_label(owner: &Option<u32>) -> String {
    match owner {
        Some(pid) => format!("pid {pid}"),
        None => "an unknown owner".to_string(),
    }
}

impl MonitorError {
    /// Process exit code for an error that reached `main`.
    ///
    /// Losing a marker race is the only failure that still exits cleanly.
    pub fn exit_code(&self) -> u8 {
        match self {
            MonitorError::MarkerRace { .. } => EXIT_OK,
            _ => EXIT_FATAL,
        }
    }
}
