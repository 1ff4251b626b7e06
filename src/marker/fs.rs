use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{ClaimError, MarkerRegistry};
use crate::process::{LivenessProbe, SystemProbe};

const MARKER_PREFIX: &str = "monitor_";
const MARKER_SUFFIX: &str = ".file";

/// Markers stored as `<dir>/monitor_<id>.file` holding the owner pid in decimal.
#[derive(Debug, Clone)]
pub struct FsMarkerRegistry<P = SystemProbe> {
    dir: PathBuf,
    probe: P,
}

impl FsMarkerRegistry<SystemProbe> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_probe(dir, SystemProbe)
    }
}

impl<P: LivenessProbe> FsMarkerRegistry<P> {
    pub fn with_probe(dir: impl Into<PathBuf>, probe: P) -> Self {
        Self {
            dir: dir.into(),
            probe,
        }
    }

    /// Create the marker directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    fn read_owner(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

fn parse_cluster_id(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix(MARKER_PREFIX)?
        .strip_suffix(MARKER_SUFFIX)?
        .parse()
        .ok()
}

impl<P: LivenessProbe> MarkerRegistry for FsMarkerRegistry<P> {
    fn marker_path(&self, cluster_id: u32) -> PathBuf {
        self.dir
            .join(format!("{MARKER_PREFIX}{cluster_id}{MARKER_SUFFIX}"))
    }

    /// Write the pid to a private temporary file, then hard-link it into place.
    ///
    /// `link(2)` refuses to replace an existing path, which makes the claim
    /// atomic, and readers never observe a marker without its pid.
    fn claim(&self, cluster_id: u32, pid: u32) -> Result<PathBuf, ClaimError> {
        let path = self.marker_path(cluster_id);
        let staging = self.dir.join(format!(
            ".{MARKER_PREFIX}{cluster_id}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = fs::write(&staging, pid.to_string()) {
            let _ = fs::remove_file(&staging);
            return Err(ClaimError::Io(e));
        }
        let linked = fs::hard_link(&staging, &path);
        if let Err(e) = fs::remove_file(&staging) {
            warn!(path = %staging.display(), error = %e, "failed to remove staging file");
        }

        match linked {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(ClaimError::AlreadyClaimed {
                owner: Self::read_owner(&path),
            }),
            Err(e) => Err(ClaimError::Io(e)),
        }
    }

    fn owner(&self, cluster_id: u32) -> Option<u32> {
        Self::read_owner(&self.marker_path(cluster_id))
    }

    fn exists(&self, cluster_id: u32) -> bool {
        self.marker_path(cluster_id).exists()
    }

    fn is_stale(&self, cluster_id: u32) -> bool {
        let path = self.marker_path(cluster_id);
        if !path.exists() {
            return false;
        }
        // Garbage content cannot name a live owner
        match Self::read_owner(&path) {
            Some(pid) => !self.probe.is_alive(pid),
            None => true,
        }
    }

    fn release(&self, cluster_id: u32) -> io::Result<()> {
        match fs::remove_file(self.marker_path(cluster_id)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn claimed(&self) -> Vec<u32> {
        let pattern = format!(
            "{}/{MARKER_PREFIX}*{MARKER_SUFFIX}",
            glob::Pattern::escape(&self.dir.to_string_lossy())
        );
        let Ok(paths) = glob::glob(&pattern) else {
            return Vec::new();
        };
        let mut ids: Vec<u32> = paths
            .filter_map(Result::ok)
            .filter_map(|path| parse_cluster_id(&path))
            .collect();
        ids.sort_unstable();
        ids
    }
}
