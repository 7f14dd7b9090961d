//! Testing utilities for the BGS pipeline.
//!
//! This module provides scripted collaborators for integration testing:
//! - `ScriptedFeed` replays frames without a ZeroMQ relay
//! - `ScriptedTickSource` answers tick polls from a script
//! - `RecordingSink` captures notifications instead of posting them
//! - Builders for envelopes, facts and telemetry events

use crate::fact::{ConflictPair, ConflictSide, Fact, FactId, FactKind, FactionPresence, RegionReport, TickId};
use crate::feed::{FeedError, FeedSource};
use crate::notify::{NotificationSink, SinkError};
use crate::poller::{SourceError, TickSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

// ============================================================================
// Scripted collaborators
// ============================================================================

/// A feed that replays scripted frames, then reports `Closed`.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    frames: VecDeque<Result<Vec<u8>, FeedError>>,
}

impl ScriptedFeed {
    pub fn new(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a transport error.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.frames.push_back(Err(FeedError::Transport(message.into())));
    }

    pub fn push_frame(&mut self, frame: Vec<u8>) {
        self.frames.push_back(Ok(frame));
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    async fn next_frame(&mut self) -> Result<Vec<u8>, FeedError> {
        self.frames.pop_front().unwrap_or(Err(FeedError::Closed))
    }
}

/// A tick source answering from a script. Once exhausted, every poll fails.
#[derive(Debug, Default)]
pub struct ScriptedTickSource {
    ticks: Mutex<VecDeque<String>>,
}

impl ScriptedTickSource {
    pub fn new<S: Into<String>>(ticks: impl IntoIterator<Item = S>) -> Self {
        Self {
            ticks: Mutex::new(ticks.into_iter().map(Into::into).collect()),
        }
    }

    /// A source that is always unreachable.
    pub fn failing() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TickSource for ScriptedTickSource {
    async fn latest_tick(&self) -> Result<String, SourceError> {
        self.ticks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| SourceError::Other("tick source unavailable".to_string()))
    }
}

/// A notification sink that records every message.
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every message (and records nothing).
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Messages delivered so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, content: &str) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Rejected("recording sink set to fail".to_string()));
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(content.to_string());
        Ok(())
    }
}

// ============================================================================
// Payload builders
// ============================================================================

/// zlib-compress a JSON value, the way the relay sends it.
pub fn compress(value: &Value) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(&bytes);
    encoder.finish().unwrap_or_default()
}

/// A journal envelope around `message`, with `event` and `timestamp` set.
pub fn eddn_envelope(event: &str, message: Value) -> Value {
    let mut message = match message {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    message.insert("event".to_string(), json!(event));
    message
        .entry("timestamp")
        .or_insert_with(|| json!(Utc::now().to_rfc3339()));

    json!({
        "$schemaRef": "https://eddn.edcd.io/schemas/journal/1",
        "header": {
            "uploaderID": "test",
            "softwareName": "bgs-tests",
            "softwareVersion": "0.1.0",
            "gatewayTimestamp": Utc::now().to_rfc3339(),
        },
        "message": message,
    })
}

/// A telemetry event as uploaded by a commander client.
pub fn telemetry_event(event: &str, tick: &str, cmdr: &str, extra: Value) -> Value {
    let mut body = match extra {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    body.insert("event".to_string(), json!(event));
    body.insert("tickid".to_string(), json!(tick));
    body.insert("cmdr".to_string(), json!(cmdr));
    body.entry("timestamp")
        .or_insert_with(|| json!(Utc::now().to_rfc3339()));
    Value::Object(body)
}

/// A faction with one current state.
pub fn faction(name: &str, influence: f64, state: &str) -> FactionPresence {
    FactionPresence {
        name: name.to_string(),
        influence,
        state: Some(state.to_string()),
        ..Default::default()
    }
}

/// An active conflict between two factions.
pub fn conflict(war_type: &str, side_a: &str, side_b: &str) -> ConflictPair {
    ConflictPair {
        war_type: Some(war_type.to_string()),
        status: Some("active".to_string()),
        side_a: ConflictSide {
            name: side_a.to_string(),
            stake: Some(String::new()),
            won_days: Some(0),
        },
        side_b: ConflictSide {
            name: side_b.to_string(),
            stake: Some(String::new()),
            won_days: Some(0),
        },
    }
}

/// Builder for region-bearing facts.
#[derive(Debug, Clone)]
pub struct FactBuilder {
    kind: FactKind,
    region: String,
    tick: Option<TickId>,
    actor: Option<String>,
    timestamp: DateTime<Utc>,
    event_time: Option<DateTime<Utc>>,
    factions: Vec<FactionPresence>,
    conflicts: Vec<ConflictPair>,
}

impl FactBuilder {
    pub fn new(kind: FactKind, region: &str) -> Self {
        Self {
            kind,
            region: region.to_string(),
            tick: None,
            actor: None,
            timestamp: Utc::now(),
            event_time: None,
            factions: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn fsd_jump(region: &str) -> Self {
        Self::new(FactKind::FsdJump, region)
    }

    pub fn location(region: &str) -> Self {
        Self::new(FactKind::Location, region)
    }

    pub fn tick(mut self, tick: &str) -> Self {
        self.tick = TickId::new(tick);
        self
    }

    pub fn actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    /// Wall-clock time of the fact.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Time embedded in the event itself.
    pub fn event_time(mut self, time: DateTime<Utc>) -> Self {
        self.event_time = Some(time);
        self
    }

    pub fn faction(mut self, faction: FactionPresence) -> Self {
        self.factions.push(faction);
        self
    }

    pub fn conflict(mut self, conflict: ConflictPair) -> Self {
        self.conflicts.push(conflict);
        self
    }

    pub fn build(self) -> Fact {
        let report = RegionReport {
            region: Some(self.region.clone()),
            timestamp: self.event_time,
            factions: self.factions,
            conflicts: self.conflicts,
            ..Default::default()
        };
        let mut payload = serde_json::to_value(&report).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.insert("event".to_string(), json!(self.kind.as_str()));
        }

        Fact {
            id: FactId::new(),
            kind: self.kind,
            schema_ref: None,
            gateway_timestamp: None,
            tick_id: self.tick,
            tick_time: None,
            timestamp: self.timestamp,
            actor: self.actor,
            region: Some(self.region),
            region_address: None,
            report: Some(report),
            payload,
        }
    }
}
