// SQLite-backed cluster registry

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use super::{ClusterSource, ClusterStatus, ClusterSummary, STATUS_RETIRED};
use crate::config::{MonitorConfig, CLUSTER_ID_PLACEHOLDER};
use crate::error::StoreError;

/// Reads `lb_summary` from the global database and `lb_clusters` from each
/// per-cluster database. Connections are opened read-only for every call.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    global_db: PathBuf,
    cluster_db_template: String,
    busy_timeout: Duration,
}

impl SqliteSource {
    pub fn new(
        global_db: impl Into<PathBuf>,
        cluster_db_template: impl Into<String>,
        busy_timeout: Duration,
    ) -> Self {
        Self {
            global_db: global_db.into(),
            cluster_db_template: cluster_db_template.into(),
            busy_timeout,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.global_db.clone(),
            config.cluster_db_template.clone(),
            config.busy_timeout(),
        )
    }

    pub fn global_db(&self) -> &Path {
        &self.global_db
    }

    pub fn cluster_db_path(&self, cluster_id: u32) -> PathBuf {
        PathBuf::from(
            self.cluster_db_template
                .replace(CLUSTER_ID_PLACEHOLDER, &cluster_id.to_string()),
        )
    }

    fn open(&self, path: &Path) -> Result<Connection, StoreError> {
        // A missing file is usually a cluster still being provisioned
        if !path.exists() {
            return Err(StoreError::Missing(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

impl ClusterSource for SqliteSource {
    fn fetch_clusters(&self) -> Result<Vec<ClusterSummary>, StoreError> {
        let conn = self.open(&self.global_db)?;
        let mut stmt = conn.prepare(
            "SELECT CAST(id AS INTEGER), CAST(status AS INTEGER) FROM lb_summary WHERE CAST(status AS INTEGER) <> ?1",
        )?;
        let rows = stmt.query_map([STATUS_RETIRED], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, status) = row?;
            let Ok(cluster_id) = u32::try_from(id) else {
                warn!(id, "ignoring cluster with out-of-range id");
                continue;
            };
            summaries.push(ClusterSummary {
                cluster_id,
                status: ClusterStatus::from_code(status),
            });
        }
        Ok(summaries)
    }

    fn fetch_always_on(&self, cluster_id: u32) -> Result<bool, StoreError> {
        let conn = self.open(&self.cluster_db_path(cluster_id))?;
        let value: Option<Option<i64>> = conn
            .query_row(
                "SELECT CAST(alwayson AS INTEGER) FROM lb_clusters LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten().is_some_and(|flag| flag != 0))
    }

    fn is_available(&self) -> bool {
        self.global_db.exists()
    }
}
