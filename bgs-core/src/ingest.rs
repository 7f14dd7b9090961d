//! Telemetry batch ingestion.
//!
//! Commander clients upload batches of journal events, each stamped with
//! the `tickid` the client believed current. Batches are stored atomically
//! and their tick id is a second source for the [`EpochTracker`].

use crate::epoch::EpochTracker;
use crate::fact::{parse_time, Fact, FactId, FactKind, RegionReport, TickId};
use crate::notify::{FanoutReport, Notifier};
use crate::store::{FactStore, StoreError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors from ingesting a batch. Any error rejects the whole batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("event {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("event {index} is missing `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("event {index} has an invalid `{field}`")]
    InvalidField { index: usize, field: &'static str },

    #[error("event {index} has an unreadable region report: {source}")]
    Report {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub appended: usize,
    /// The tick id offered to the tracker, if the batch had one.
    pub candidate: Option<TickId>,
    pub tick_changed: bool,
    /// Present when the tick changed and a fan-out ran.
    pub fanout: Option<FanoutReport>,
}

/// Stores telemetry batches and reports their tick to the tracker.
pub struct TelemetryIngestor {
    facts: FactStore,
    tracker: Arc<EpochTracker>,
    notifier: Option<Arc<Notifier>>,
}

impl TelemetryIngestor {
    pub fn new(facts: FactStore, tracker: Arc<EpochTracker>) -> Self {
        Self {
            facts,
            tracker,
            notifier: None,
        }
    }

    /// Fan out through `notifier` when a batch changes the tick.
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validate and append a batch in one transaction, then observe the
    /// first non-empty `tickid` of the batch.
    pub async fn ingest(&self, batch: &[Value]) -> Result<IngestReport, IngestError> {
        let facts = batch
            .iter()
            .enumerate()
            .map(|(index, event)| telemetry_fact(index, event))
            .collect::<Result<Vec<_>, _>>()?;

        let appended = self.facts.append_all(&facts)?;
        let mut report = IngestReport {
            appended,
            candidate: batch_tick(batch),
            ..Default::default()
        };
        tracing::debug!(target: "bgs::ingest", appended, "telemetry batch stored");

        let Some(candidate) = report.candidate.clone() else {
            return Ok(report);
        };
        report.tick_changed = self.tracker.observe(candidate.as_str());

        if report.tick_changed {
            tracing::info!(target: "bgs::ingest", tick = %candidate, "tick change reported by telemetry");
            if let Some(notifier) = &self.notifier {
                report.fanout = Some(notifier.tick_changed(&candidate).await);
            }
        }
        Ok(report)
    }
}

/// The first non-empty `tickid` in batch order.
pub fn batch_tick(batch: &[Value]) -> Option<TickId> {
    batch
        .iter()
        .filter_map(|event| event.get("tickid").and_then(Value::as_str))
        .find_map(TickId::new)
}

fn telemetry_fact(index: usize, event: &Value) -> Result<Fact, IngestError> {
    if !event.is_object() {
        return Err(IngestError::NotAnObject { index });
    }

    let kind = FactKind::from_event(required(event, index, "event")?);
    let timestamp = parse_time(required(event, index, "timestamp")?)
        .ok_or(IngestError::InvalidField { index, field: "timestamp" })?;
    let tick_id = TickId::new(required(event, index, "tickid")?)
        .ok_or(IngestError::MissingField { index, field: "tickid" })?;

    let report = if carries_report(&kind, event) {
        Some(RegionReport::deserialize(event).map_err(|source| IngestError::Report { index, source })?)
    } else {
        None
    };

    let text = |name: &str| event.get(name).and_then(Value::as_str).map(str::to_string);

    Ok(Fact {
        id: FactId::new(),
        kind,
        schema_ref: None,
        gateway_timestamp: None,
        tick_id: Some(tick_id),
        tick_time: text("ticktime"),
        timestamp,
        actor: text("cmdr"),
        region: text("StarSystem"),
        region_address: event.get("SystemAddress").and_then(Value::as_i64),
        report,
        payload: event.clone(),
    })
}

/// Region-bearing events always carry a report. Any other event does when
/// it lists conflicts (`CarrierJump`, for one).
fn carries_report(kind: &FactKind, event: &Value) -> bool {
    kind.is_region_bearing() || event.get("Conflicts").is_some_and(|c| !c.is_null())
}

fn required<'a>(event: &'a Value, index: usize, field: &'static str) -> Result<&'a str, IngestError> {
    match event.get(field) {
        None | Some(Value::Null) => Err(IngestError::MissingField { index, field }),
        Some(value) => value.as_str().ok_or(IngestError::InvalidField { index, field }),
    }
}
