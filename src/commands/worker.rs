//! Hidden `worker` subcommand: one watcher process per cluster.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info_span;

use super::load_config;
use crate::daemon::SupervisorIdentity;
use crate::error::{EXIT_FATAL, EXIT_OK};
use crate::marker::FsMarkerRegistry;
use crate::process::install_shutdown_handler;
use crate::tick::{Shutdown, SystemTicker};
use crate::worker::{ExitReason, SentinelParentProbe, WorkerExit, WorkerProcess};

/// Run the watcher for `cluster_id` and return its process exit code.
pub fn execute(
    config_path: &Path,
    cluster_id: u32,
    parent_pid: u32,
    parent_token: String,
) -> Result<u8> {
    let span = info_span!("worker", cluster_id);
    let _enter = span.enter();

    let (config, _) = load_config(config_path)?;
    let parent = SentinelParentProbe::new(
        &config.pid_file,
        SupervisorIdentity::new(parent_pid, parent_token),
    );
    let ticker = Arc::new(SystemTicker::new(Shutdown::new()));
    let mut worker = WorkerProcess::new(
        cluster_id,
        FsMarkerRegistry::new(&config.marker_dir),
        parent,
        ticker,
        config.probe_interval(),
    );

    let code = match worker.run(install_shutdown_handler)? {
        WorkerExit::Duplicate => EXIT_OK,
        WorkerExit::Finished(ExitReason::Signalled | ExitReason::ParentLost) => EXIT_OK,
        WorkerExit::Finished(ExitReason::Failed(_)) => EXIT_FATAL,
    };
    Ok(code)
}
