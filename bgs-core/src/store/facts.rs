//! Append-only fact log.

use super::{Database, StoreError};
use crate::fact::{Fact, FactId, FactKind, RegionReport, TickId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const FACT_COLUMNS: &str = "id, kind, schema_ref, gateway_timestamp, tick_id, tick_time, \
     timestamp, actor, region, region_address, report, payload";

/// Accepted facts, in insertion order. Facts are never updated; the only
/// removal is the retention sweep.
#[derive(Clone)]
pub struct FactStore {
    db: Database,
}

impl FactStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Append one fact in its own transaction.
    pub fn append(&self, fact: &Fact) -> Result<FactId, StoreError> {
        self.db.unit_of_work(|tx| insert_fact(tx, fact))
    }

    /// Append a batch atomically: either every fact is stored or none is.
    pub fn append_all(&self, facts: &[Fact]) -> Result<usize, StoreError> {
        self.db.unit_of_work(|tx| {
            for fact in facts {
                insert_fact(tx, fact)?;
            }
            Ok(facts.len())
        })
    }

    /// Visit every fact of `tick` in insertion order. Rows that no longer
    /// decode are skipped with a warning. Returns the number visited.
    pub fn scan_by_tick(
        &self,
        tick: &TickId,
        mut visit: impl FnMut(Fact),
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE tick_id = ?1 ORDER BY seq ASC"
            ))?;
            let rows = stmt.query_map(params![tick.as_str()], FactRow::from_row)?;

            let mut visited = 0;
            for row in rows {
                match row?.into_fact() {
                    Ok(fact) => {
                        visit(fact);
                        visited += 1;
                    }
                    Err(e) => {
                        tracing::warn!(target: "bgs::store", tick = %tick, error = %e, "skipping undecodable fact");
                    }
                }
            }
            Ok(visited)
        })
    }

    /// Delete every fact with a timestamp strictly before `cutoff`.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM facts WHERE timestamp < ?1",
                params![cutoff.timestamp_millis()],
            )?)
        })
    }

    /// Distinct tick ids, most recently seen first.
    pub fn latest_ticks(&self, limit: usize) -> Result<Vec<TickId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tick_id, MAX(timestamp) AS latest, MAX(seq) AS last_seq
                 FROM facts
                 WHERE tick_id IS NOT NULL AND tick_id != ''
                 GROUP BY tick_id
                 ORDER BY latest DESC, last_seq DESC
                 LIMIT ?1",
            )?;
            let ticks = stmt
                .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ticks.into_iter().filter_map(TickId::new).collect())
        })
    }

    /// Look a fact up by id.
    pub fn get(&self, id: FactId) -> Result<Option<Fact>, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?1"),
                    params![id.to_string()],
                    FactRow::from_row,
                )
                .optional()?;
            row.map(FactRow::into_fact).transpose()
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM facts", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }

    /// Reclaim space after sweeps.
    pub fn compact(&self) -> Result<(), StoreError> {
        self.db.compact()
    }
}

/// Insert a fact on an open connection or transaction.
pub(crate) fn insert_fact(conn: &Connection, fact: &Fact) -> Result<FactId, StoreError> {
    let report = fact.report.as_ref().map(serde_json::to_string).transpose()?;
    let payload = serde_json::to_string(&fact.payload)?;

    conn.execute(
        "INSERT INTO facts (id, kind, schema_ref, gateway_timestamp, tick_id, tick_time,
                            timestamp, actor, region, region_address, report, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            fact.id.to_string(),
            fact.kind.as_str(),
            fact.schema_ref,
            fact.gateway_timestamp.map(|t| t.timestamp_millis()),
            fact.tick_id.as_ref().map(TickId::as_str),
            fact.tick_time,
            fact.timestamp.timestamp_millis(),
            fact.actor,
            fact.region,
            fact.region_address,
            report,
            payload,
        ],
    )?;
    Ok(fact.id)
}

/// A fact row as stored, before JSON decoding.
struct FactRow {
    id: String,
    kind: String,
    schema_ref: Option<String>,
    gateway_timestamp: Option<i64>,
    tick_id: Option<String>,
    tick_time: Option<String>,
    timestamp: i64,
    actor: Option<String>,
    region: Option<String>,
    region_address: Option<i64>,
    report: Option<String>,
    payload: String,
}

impl FactRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            schema_ref: row.get(2)?,
            gateway_timestamp: row.get(3)?,
            tick_id: row.get(4)?,
            tick_time: row.get(5)?,
            timestamp: row.get(6)?,
            actor: row.get(7)?,
            region: row.get(8)?,
            region_address: row.get(9)?,
            report: row.get(10)?,
            payload: row.get(11)?,
        })
    }

    fn into_fact(self) -> Result<Fact, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupt(format!("fact id {}: {e}", self.id)))?;
        let timestamp = DateTime::from_timestamp_millis(self.timestamp)
            .ok_or_else(|| StoreError::Corrupt(format!("fact {} timestamp", self.id)))?;
        let report = self
            .report
            .as_deref()
            .map(serde_json::from_str::<RegionReport>)
            .transpose()?;

        Ok(Fact {
            id: FactId(id),
            kind: FactKind::from_event(&self.kind),
            schema_ref: self.schema_ref,
            gateway_timestamp: self.gateway_timestamp.and_then(DateTime::from_timestamp_millis),
            tick_id: self.tick_id.and_then(TickId::new),
            tick_time: self.tick_time,
            timestamp,
            actor: self.actor,
            region: self.region,
            region_address: self.region_address,
            report,
            payload: serde_json::from_str(&self.payload)?,
        })
    }
}
