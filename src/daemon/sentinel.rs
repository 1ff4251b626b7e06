//! Supervisor pid file, doubling as the liveness sentinel for watchers.
//!
//! Layout: the supervisor pid on the first line, its start token on the second.
//! Tools that only expect a pid file read the first line.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::MonitorError;

/// Binds watchers to the supervisor instance that launched them.
///
/// The token is minted at start-up, so a recycled pid never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorIdentity {
    pub pid: u32,
    pub token: String,
}

impl SupervisorIdentity {
    pub fn new(pid: u32, token: impl Into<String>) -> Self {
        Self {
            pid,
            token: token.into(),
        }
    }

    /// Identity for the current process with a fresh token.
    pub fn generate() -> Self {
        Self::new(std::process::id(), uuid::Uuid::new_v4().to_string())
    }

    /// Compare against another identity; the token comparison is constant-time.
    pub fn matches(&self, other: &SupervisorIdentity) -> bool {
        self.pid == other.pid
            && self.token.len() == other.token.len()
            && self
                .token
                .as_bytes()
                .iter()
                .zip(other.token.as_bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.pid, self.token)
    }

    pub fn parse(content: &str) -> Option<Self> {
        let mut lines = content.lines().map(str::trim);
        let pid = lines.next()?.parse().ok()?;
        let token = lines.next().filter(|t| !t.is_empty())?;
        Some(Self::new(pid, token))
    }
}

/// Identity recorded in the sentinel at `path`, if readable.
pub fn read_identity(path: &Path) -> Option<SupervisorIdentity> {
    SupervisorIdentity::parse(&fs::read_to_string(path).ok()?)
}

/// Pid recorded on the first line of a pid file
///
/// # Returns
/// * `Ok(Some(pid))` - File exists and names a pid
/// * `Ok(None)` - File doesn't exist, or holds no valid pid
/// * `Err(_)` - File exists but can't be read
pub fn read_pid(path: &Path) -> io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .next()
            .and_then(|line| line.trim().parse().ok())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Exclusive, locked sentinel file held for the supervisor's lifetime.
///
/// Dropping it removes the file, unless another instance has replaced it.
#[derive(Debug)]
pub struct SentinelFile {
    path: PathBuf,
    identity: SupervisorIdentity,
    // Holds the advisory lock until drop
    _file: File,
}

impl SentinelFile {
    pub fn acquire(path: &Path, identity: SupervisorIdentity) -> Result<Self, MonitorError> {
        let config_err = |what: &str, e: io::Error| {
            MonitorError::Configuration(format!("{what} {}: {e}", path.display()))
        };

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| config_err("cannot open pid file", e))?;

        file.try_lock_exclusive().map_err(|_| {
            MonitorError::Configuration(format!(
                "pid file {} is locked; is another supervisor running?",
                path.display()
            ))
        })?;

        file.set_len(0)
            .and_then(|()| file.write_all(identity.render().as_bytes()))
            .and_then(|()| file.sync_all())
            .map_err(|e| config_err("cannot write pid file", e))?;

        // Restrict to owner-only access even if the file pre-existed
        fs::set_permissions(path, Permissions::from_mode(0o600))
            .map_err(|e| config_err("cannot set permissions on", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            identity,
            _file: file,
        })
    }

    /// Whether the sentinel at `path` still exists.
    pub fn is_present(path: &Path) -> bool {
        path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &SupervisorIdentity {
        &self.identity
    }
}

impl Drop for SentinelFile {
    fn drop(&mut self) {
        let ours = read_identity(&self.path).is_some_and(|current| current.matches(&self.identity));
        if !ours {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
            }
        }
    }
}
