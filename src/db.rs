use rusqlite::{Connection, Result as SqlResult, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::store::ArtifactKind;

/// Capture index kept next to the artifacts: `{data_dir}/captures.db`.
///
/// WAL mode is enabled so the core loop (writer) and API server (reader) can
/// operate concurrently without blocking each other.
pub struct CaptureDb {
    conn: Mutex<Connection>,
}

impl CaptureDb {
    /// Open (or create) the capture index under `data_dir`.
    /// Creates `data_dir` if it does not exist.
    pub fn open(data_dir: &Path) -> SqlResult<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|_e| rusqlite::Error::InvalidPath(data_dir.into()))?;

        let db_path = data_dir.join("captures.db");
        let conn = Connection::open(&db_path)?;

        // Enable WAL for concurrent reader (API) + writer (core loop)
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS captures (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                started_ms   INTEGER NOT NULL,
                artifact_dir TEXT    NOT NULL,
                kind         TEXT    NOT NULL CHECK(kind IN ('images','video')),
                frame_count  INTEGER NOT NULL,
                fps          INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_started
                ON captures(started_ms);",
        )?;

        info!(path = db_path.display().to_string(), "capture index opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record a persisted capture. Returns the new row id.
    pub fn insert_capture(
        &self,
        started_ms: i64,
        artifact_dir: &str,
        kind: ArtifactKind,
        frame_count: usize,
        fps: u32,
    ) -> SqlResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO captures (started_ms, artifact_dir, kind, frame_count, fps)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                started_ms,
                artifact_dir,
                kind.as_str(),
                frame_count as i64,
                fps as i64
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, started_ms, artifact_dir, "inserted capture");
        Ok(id)
    }

    /// Most recent captures, newest first.
    pub fn recent(&self, limit: usize) -> SqlResult<Vec<CaptureRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, started_ms, artifact_dir, kind, frame_count, fps
             FROM captures ORDER BY started_ms DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(CaptureRecord {
                id: row.get(0)?,
                started_ms: row.get(1)?,
                artifact_dir: row.get(2)?,
                kind: row.get(3)?,
                frame_count: row.get(4)?,
                fps: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: i64,
    pub started_ms: i64,
    pub artifact_dir: String,
    pub kind: String,
    pub frame_count: i64,
    pub fps: i64,
}
