pub mod supervise;
pub mod worker;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::MonitorConfig;

/// Load the configuration with every path made absolute.
///
/// Relative paths resolve against the directory of the configuration file,
/// so the supervisor (which changes directory when daemonizing) and its
/// watchers agree on them. Returns the absolute configuration path as well.
pub fn load_config(path: &Path) -> Result<(MonitorConfig, PathBuf)> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to determine current directory")?
            .join(path)
    };
    let mut config = MonitorConfig::load(&path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("/"));
    config.absolutize(base);
    Ok((config, path))
}
