//! `start`, `stop`, `restart` and `foreground`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::load_config;
use crate::config::MonitorConfig;
use crate::daemon::{Daemon, Readiness, SentinelFile, SupervisorIdentity};
use crate::marker::FsMarkerRegistry;
use crate::process::install_shutdown_handler;
use crate::store::{ClusterStateStore, SqliteSource};
use crate::supervisor::{CommandLauncher, Supervisor, SupervisorSettings};
use crate::tick::{Shutdown, SystemTicker, Ticker};

pub fn start(config_path: &Path, debug: bool) -> Result<()> {
    let (config, config_path) = load_config(config_path)?;
    Daemon::from_config(&config)
        .start(|readiness| run_supervisor(&config, &config_path, debug, readiness))
}

pub fn stop(config_path: &Path) -> Result<()> {
    let (config, _) = load_config(config_path)?;
    if !Daemon::from_config(&config).stop()? {
        info!(pid_file = %config.pid_file.display(), "supervisor is not running");
    }
    Ok(())
}

pub fn restart(config_path: &Path, debug: bool) -> Result<()> {
    let (config, config_path) = load_config(config_path)?;
    Daemon::from_config(&config)
        .restart(|readiness| run_supervisor(&config, &config_path, debug, readiness))
}

pub fn foreground(config_path: &Path, debug: bool) -> Result<()> {
    let (config, config_path) = load_config(config_path)?;
    Daemon::from_config(&config)
        .foreground(|readiness| run_supervisor(&config, &config_path, debug, readiness))
}

/// Wire the production collaborators together and run until stopped.
pub fn run_supervisor(
    config: &MonitorConfig,
    config_path: &Path,
    debug: bool,
    readiness: Readiness,
) -> Result<()> {
    let identity = SupervisorIdentity::generate();
    let sentinel = SentinelFile::acquire(&config.pid_file, identity.clone())?;

    let shutdown = Shutdown::new();
    install_shutdown_handler(shutdown.clone())?;
    let ticker: Arc<dyn Ticker> = Arc::new(SystemTicker::new(shutdown));

    let markers = FsMarkerRegistry::new(&config.marker_dir);
    markers.ensure_dir().with_context(|| {
        format!(
            "Failed to create marker directory {}",
            config.marker_dir.display()
        )
    })?;

    let store = ClusterStateStore::new(
        SqliteSource::from_config(config),
        config.retry_policy(),
        Arc::clone(&ticker),
    );

    let mut launcher =
        CommandLauncher::new(config.worker_program()?, Arc::clone(&ticker)).config(config_path);
    if debug {
        launcher = launcher.arg("--debug");
    }

    let mut supervisor = Supervisor::new(
        SupervisorSettings::from_config(config),
        identity,
        store,
        markers,
        launcher,
        ticker,
    );

    info!(
        pid = sentinel.identity().pid,
        config = %config_path.display(),
        store = %config.global_db.display(),
        "supervisor ready"
    );
    readiness.notify();

    supervisor.run();
    drop(sentinel);
    Ok(())
}
