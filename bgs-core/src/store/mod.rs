//! SQLite persistence for facts and region snapshots.
//!
//! A [`Database`] is a cloneable handle around one connection. The feed
//! and telemetry instances are separate files, each opened in WAL mode.

mod facts;
mod regions;

pub use facts::FactStore;
pub use regions::RegionStore;

pub(crate) use facts::insert_fact;
pub(crate) use regions::replace_region;

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS facts (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
    id                TEXT NOT NULL UNIQUE,
    kind              TEXT NOT NULL,
    schema_ref        TEXT,
    gateway_timestamp INTEGER,
    tick_id           TEXT,
    tick_time         TEXT,
    timestamp         INTEGER NOT NULL,
    actor             TEXT,
    region            TEXT,
    region_address    INTEGER,
    report            TEXT,
    payload           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_facts_tick ON facts (tick_id);
CREATE INDEX IF NOT EXISTS idx_facts_timestamp ON facts (timestamp);

CREATE TABLE IF NOT EXISTS region_info (
    region              TEXT PRIMARY KEY,
    address             INTEGER,
    controlling_faction TEXT,
    controlling_power   TEXT,
    population          INTEGER,
    security            TEXT,
    government          TEXT,
    allegiance          TEXT,
    updated_at          INTEGER NOT NULL,
    source_fact         TEXT
);

CREATE TABLE IF NOT EXISTS region_factions (
    region            TEXT NOT NULL,
    name              TEXT NOT NULL,
    influence         REAL NOT NULL,
    state             TEXT,
    allegiance        TEXT,
    government        TEXT,
    pending_states    TEXT NOT NULL,
    active_states     TEXT NOT NULL,
    recovering_states TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_region_factions ON region_factions (region);

CREATE TABLE IF NOT EXISTS region_conflicts (
    region     TEXT NOT NULL,
    war_type   TEXT,
    status     TEXT,
    faction_a  TEXT NOT NULL,
    stake_a    TEXT,
    won_days_a INTEGER,
    faction_b  TEXT NOT NULL,
    stake_b    TEXT,
    won_days_b INTEGER
);
CREATE INDEX IF NOT EXISTS idx_region_conflicts ON region_conflicts (region);

CREATE TABLE IF NOT EXISTS region_spheres (
    region           TEXT NOT NULL,
    powers           TEXT NOT NULL,
    powerplay_state  TEXT,
    control_progress REAL,
    reinforcement    REAL,
    undermining      REAL
);
CREATE INDEX IF NOT EXISTS idx_region_spheres ON region_spheres (region);
"#;

/// Shared handle to one SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file in WAL mode and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(target: "bgs::store", path = %path.display(), journal_mode = %mode, "database opened");
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Run `f` inside one transaction. Commits when `f` succeeds; any
    /// error rolls everything back.
    pub fn unit_of_work<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Reclaim free pages (`VACUUM`).
    pub fn compact(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch("VACUUM")?;
            Ok(())
        })
    }
}
