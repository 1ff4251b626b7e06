use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MonitorError;
use crate::store::RetryPolicy;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "monitor.toml";

/// Placeholder substituted with the cluster id in path templates.
pub const CLUSTER_ID_PLACEHOLDER: &str = "{id}";

/// Parsed `monitor.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub join_timeout_secs: u64,
    pub probe_interval_ms: u64,
    pub store_retry_attempts: u32,
    pub store_retry_delay_ms: u64,
    pub store_busy_timeout_secs: u64,
    pub global_db: PathBuf,
    pub cluster_db_template: String,
    pub marker_dir: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    /// Executable launched for each watcher; defaults to the running binary.
    pub worker_program: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            join_timeout_secs: 60,
            probe_interval_ms: 1000,
            store_retry_attempts: 10,
            store_retry_delay_ms: 100,
            store_busy_timeout_secs: 30,
            global_db: PathBuf::from("lb.sqlite"),
            cluster_db_template: "lb_{id}.sqlite".to_string(),
            marker_dir: PathBuf::from("/var/run"),
            pid_file: PathBuf::from("/var/run/monitor.pid"),
            log_file: PathBuf::from("/var/log/lbmon.log"),
            worker_program: None,
        }
    }
}

impl MonitorConfig {
    /// Load and validate the configuration file
    ///
    /// # Returns
    /// * `Ok(MonitorConfig)` - Parsed file, or defaults when the file doesn't exist
    /// * `Err(MonitorError::Configuration)` - Unreadable, malformed or invalid file
    pub fn load(path: &Path) -> Result<Self, MonitorError> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                MonitorError::Configuration(format!("failed to read {}: {e}", path.display()))
            })?;
            Self::parse(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, MonitorError> {
        toml::from_str(content)
            .map_err(|e| MonitorError::Configuration(format!("failed to parse config: {e}")))
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: &str| Err(MonitorError::Configuration(msg.to_string()));

        if self.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be greater than zero");
        }
        if self.probe_interval_ms == 0 {
            return invalid("probe_interval_ms must be greater than zero");
        }
        if self.store_retry_attempts == 0 {
            return invalid("store_retry_attempts must be at least 1");
        }
        if !self.cluster_db_template.contains(CLUSTER_ID_PLACEHOLDER) {
            return invalid("cluster_db_template must contain {id}");
        }
        Ok(())
    }

    /// Resolve relative paths against `base`.
    ///
    /// Called before daemonizing, which changes the working directory to `/`.
    pub fn absolutize(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.global_db);
        resolve(&mut self.marker_dir);
        resolve(&mut self.pid_file);
        resolve(&mut self.log_file);
        if let Some(program) = self.worker_program.as_mut() {
            resolve(program);
        }
        if Path::new(&self.cluster_db_template).is_relative() {
            self.cluster_db_template = base
                .join(&self.cluster_db_template)
                .to_string_lossy()
                .into_owned();
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.store_busy_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.store_retry_attempts,
            delay: Duration::from_millis(self.store_retry_delay_ms),
        }
    }

    /// Executable to launch for watchers.
    pub fn worker_program(&self) -> Result<PathBuf, MonitorError> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| {
                MonitorError::Configuration(format!("cannot locate own executable: {e}"))
            }),
        }
    }
}
