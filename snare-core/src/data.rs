use crate::graph::Graph;
use crate::taint::{TaintTracker, TrackingRecord};
use rusqlite::{Connection, OptionalExtension, Result, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Which table a marker came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerFlow {
    Payload,
    Tracker,
}

impl MarkerFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerFlow::Payload => "payload",
            MarkerFlow::Tracker => "tracker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub target_url: String,
    pub configuration: Option<String>, // JSON
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionRow {
    pub id: i64,
    pub marker: String,
    pub flow: String,
    pub vector: String,
    pub vector_kind: String,
    pub target: String,
    pub parameter: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionRow {
    pub marker: String,
    pub flow: String,
    pub injected_at: String,
    pub parameter: String,
    pub payload: String,
    pub url: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRow {
    pub seq: i64,
    pub from_url: String,
    pub to_url: String,
    pub method: String,
    pub label: String,
    pub visited: bool,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Database {
    pub fn drop(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed', 'cancelled')),
    target_url TEXT NOT NULL,
    configuration TEXT        -- JSON configuration used
);

-- Final crawl graph, one row per edge in insertion order
CREATE TABLE IF NOT EXISTS crawl_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    from_url TEXT NOT NULL,
    to_url TEXT NOT NULL,
    method TEXT NOT NULL,
    label TEXT NOT NULL,
    visited BOOLEAN NOT NULL,
    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_crawl_edges_session ON crawl_edges(session_id);

CREATE TABLE IF NOT EXISTS injections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    marker TEXT NOT NULL,
    flow TEXT NOT NULL CHECK(flow IN ('payload', 'tracker')),
    vector_kind TEXT NOT NULL,
    vector TEXT NOT NULL,
    target TEXT NOT NULL,
    parameter TEXT NOT NULL,
    payload TEXT NOT NULL,
    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, flow, marker)
);

CREATE INDEX IF NOT EXISTS idx_injections_session ON injections(session_id);

CREATE TABLE IF NOT EXISTS reflections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    injection_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    location TEXT NOT NULL,
    FOREIGN KEY(injection_id) REFERENCES injections(id) ON DELETE CASCADE,
    UNIQUE(injection_id, url, location)
);

CREATE INDEX IF NOT EXISTS idx_reflections_injection ON reflections(injection_id);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, target_url: &str, configuration: Option<&str>) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, status, target_url, configuration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &session_id,
                timestamp,
                SessionStatus::Running.as_str(),
                target_url,
                configuration
            ],
        )?;

        Ok(session_id)
    }

    fn finish_session(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let timestamp = current_timestamp();
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![status.as_str(), timestamp, session_id],
        )?;
        Ok(())
    }

    pub fn complete_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed)
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Failed)
    }

    pub fn cancel_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Cancelled)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.conn
            .query_row(
                "SELECT id, start_time, end_time, status, target_url, configuration
                 FROM crawl_sessions WHERE id = ?1",
                [session_id],
                |row| {
                    Ok(SessionRecord {
                        id: row.get(0)?,
                        start_time: row.get(1)?,
                        end_time: row.get(2)?,
                        status: row.get(3)?,
                        target_url: row.get(4)?,
                        configuration: row.get(5)?,
                    })
                },
            )
            .optional()
    }

    pub fn latest_session(&self) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT id FROM crawl_sessions ORDER BY start_time DESC, rowid DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
    }

    // Graph
    pub fn save_graph(&self, session_id: &str, graph: &Graph) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO crawl_edges (session_id, seq, from_url, to_url, method, label, visited)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, (id, edge)) in graph.edges().enumerate() {
                let (Some(from), Some(to)) = (graph.source(id), graph.target(id)) else {
                    continue;
                };
                stmt.execute(params![
                    session_id,
                    seq as i64,
                    &from.url,
                    &to.url,
                    edge.label.method().as_str(),
                    edge.label.data().to_string(),
                    edge.visited,
                ])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn get_edges(&self, session_id: &str) -> Result<Vec<EdgeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, from_url, to_url, method, label, visited
             FROM crawl_edges WHERE session_id = ?1 ORDER BY seq",
        )?;
        stmt.query_map([session_id], |row| {
            Ok(EdgeRow {
                seq: row.get(0)?,
                from_url: row.get(1)?,
                to_url: row.get(2)?,
                method: row.get(3)?,
                label: row.get(4)?,
                visited: row.get(5)?,
            })
        })?
        .collect()
    }

    // Injections and reflections
    fn insert_record(
        &self,
        session_id: &str,
        flow: MarkerFlow,
        marker: &str,
        record: &TrackingRecord,
    ) -> Result<i64> {
        let injected = &record.injected;
        self.conn.execute(
            "INSERT OR IGNORE INTO injections (session_id, marker, flow, vector_kind, vector, target, parameter, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                marker,
                flow.as_str(),
                injected.vector.kind(),
                injected.vector.to_string(),
                injected.vector.target(),
                injected.parameter.to_string(),
                &injected.payload,
            ],
        )?;

        let injection_id: i64 = self.conn.query_row(
            "SELECT id FROM injections WHERE session_id = ?1 AND flow = ?2 AND marker = ?3",
            params![session_id, flow.as_str(), marker],
            |row| row.get(0),
        )?;

        for (url, location) in &record.reflected {
            self.conn.execute(
                "INSERT OR IGNORE INTO reflections (injection_id, url, location) VALUES (?1, ?2, ?3)",
                params![injection_id, url, location],
            )?;
        }

        Ok(injection_id)
    }

    /// Stores every armed payload and tracker together with their
    /// reflections. Saving the same tracker twice only adds new reflections.
    pub fn save_tracker(&self, session_id: &str, tracker: &TaintTracker) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        for (marker, record) in tracker.payloads() {
            self.insert_record(session_id, MarkerFlow::Payload, marker, record)?;
            count += 1;
        }
        for (marker, record) in tracker.trackers() {
            self.insert_record(session_id, MarkerFlow::Tracker, marker, record)?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn get_injections(&self, session_id: &str) -> Result<Vec<InjectionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, marker, flow, vector, vector_kind, target, parameter, payload
             FROM injections WHERE session_id = ?1 ORDER BY id",
        )?;
        stmt.query_map([session_id], |row| {
            Ok(InjectionRow {
                id: row.get(0)?,
                marker: row.get(1)?,
                flow: row.get(2)?,
                vector: row.get(3)?,
                vector_kind: row.get(4)?,
                target: row.get(5)?,
                parameter: row.get(6)?,
                payload: row.get(7)?,
            })
        })?
        .collect()
    }

    pub fn get_reflections(&self, session_id: &str) -> Result<Vec<ReflectionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.marker, i.flow, i.target, i.parameter, i.payload, r.url, r.location
             FROM reflections r
             JOIN injections i ON r.injection_id = i.id
             WHERE i.session_id = ?1
             ORDER BY i.flow, i.id, r.id",
        )?;
        stmt.query_map([session_id], |row| {
            Ok(ReflectionRow {
                marker: row.get(0)?,
                flow: row.get(1)?,
                injected_at: row.get(2)?,
                parameter: row.get(3)?,
                payload: row.get(4)?,
                url: row.get(5)?,
                location: row.get(6)?,
            })
        })?
        .collect()
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}
