use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::session::FinishedSession;

/// Durable home for finished sessions.
///
/// Writes are keyed by session id and must be idempotent: saving the same
/// session twice leaves one record.
pub trait SessionStore {
    fn save_session(&mut self, session: &FinishedSession) -> Result<()>;
}

fn payload_digest(payload: &str) -> [u8; 32] {
    Sha256::digest(payload.as_bytes()).into()
}

pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    /// Open or create the store. `file:` URIs are accepted.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS sessions (
              id TEXT PRIMARY KEY,
              started_at_ms INTEGER NOT NULL,
              finished_at_ms INTEGER NOT NULL,
              stop_reason TEXT NOT NULL,
              frames_processed INTEGER NOT NULL,
              track_count INTEGER NOT NULL,
              top_label TEXT,
              payload_json TEXT NOT NULL,
              payload_sha256 BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at_ms);
            "#,
        )?;
        Ok(())
    }

    /// Oldest first. Fails on a record whose payload no longer matches its digest.
    pub fn load_sessions(&self, limit: usize) -> Result<Vec<FinishedSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, payload_json, payload_sha256 FROM sessions ORDER BY started_at_ms ASC, id ASC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let payload: String = row.get(1)?;
            let digest: Vec<u8> = row.get(2)?;
            if digest.as_slice() != payload_digest(&payload).as_slice() {
                return Err(anyhow!("corrupt session record {}: payload digest mismatch", id));
            }
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl SessionStore for SqliteSessionStore {
    fn save_session(&mut self, session: &FinishedSession) -> Result<()> {
        let started_at = i64::try_from(session.started_at_ms)
            .map_err(|_| anyhow!("session start exceeds i64 range"))?;
        let finished_at = i64::try_from(session.finished_at_ms)
            .map_err(|_| anyhow!("session finish exceeds i64 range"))?;
        let stop_reason = serde_json::to_string(&session.stop_reason)?;
        let payload_json = serde_json::to_string(session)?;
        let digest = payload_digest(&payload_json);

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions(
              id, started_at_ms, finished_at_ms, stop_reason, frames_processed,
              track_count, top_label, payload_json, payload_sha256
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                session.id,
                started_at,
                finished_at,
                stop_reason.trim_matches('"'),
                session.frames_processed,
                session.tracks.len() as i64,
                session.top_label().map(|l| l.label.clone()),
                payload_json,
                digest.to_vec()
            ],
        )?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Vec<FinishedSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[FinishedSession] {
        &self.sessions
    }
}

impl SessionStore for InMemorySessionStore {
    fn save_session(&mut self, session: &FinishedSession) -> Result<()> {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => self.sessions.push(session.clone()),
        }
        Ok(())
    }
}
