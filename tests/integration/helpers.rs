use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Scratch layout: cluster databases, marker directory, pid file and config.
pub struct Sandbox {
    pub dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("run")).unwrap();
        let sandbox = Self { dir };
        let conn = Connection::open(sandbox.global_db()).unwrap();
        conn.execute("CREATE TABLE lb_summary (id INTEGER, status INTEGER)", [])
            .unwrap();
        sandbox
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn global_db(&self) -> PathBuf {
        self.path().join("lb.sqlite")
    }

    pub fn marker_dir(&self) -> PathBuf {
        self.path().join("run")
    }

    pub fn marker(&self, cluster_id: u32) -> PathBuf {
        self.marker_dir().join(format!("monitor_{cluster_id}.file"))
    }

    pub fn pid_file(&self) -> PathBuf {
        self.marker_dir().join("monitor.pid")
    }

    /// Config with fast probes, pointing everything into the sandbox.
    pub fn write_config(&self) -> PathBuf {
        let path = self.path().join("monitor.toml");
        fs::write(
            &path,
            format!(
                "probe_interval_ms = 50\n\
                 join_timeout_secs = 5\n\
                 marker_dir = \"{}\"\n\
                 pid_file = \"{}\"\n",
                self.marker_dir().display(),
                self.pid_file().display()
            ),
        )
        .unwrap();
        path
    }

    /// Insert or update a cluster row and its always-on flag.
    pub fn set_cluster(&self, cluster_id: u32, status: i64, always_on: bool) {
        let conn = Connection::open(self.global_db()).unwrap();
        conn.execute("DELETE FROM lb_summary WHERE id = ?1", [cluster_id])
            .unwrap();
        conn.execute(
            "INSERT INTO lb_summary (id, status) VALUES (?1, ?2)",
            (cluster_id, status),
        )
        .unwrap();

        let conn =
            Connection::open(self.path().join(format!("lb_{cluster_id}.sqlite"))).unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS lb_clusters (alwayson INTEGER)",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM lb_clusters", []).unwrap();
        conn.execute(
            "INSERT INTO lb_clusters (alwayson) VALUES (?1)",
            [i64::from(always_on)],
        )
        .unwrap();
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}
