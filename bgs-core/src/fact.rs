//! Telemetry facts and the region reports decoded from them.
//!
//! A [`Fact`] is one accepted inbound record. Region-bearing facts, and
//! telemetry events listing conflicts, carry a [`RegionReport`] decoded once
//! at ingestion time, so downstream consumers never re-parse the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a stored fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub Uuid);

impl FactId {
    /// Create a new random fact ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FactId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque galaxy tick identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickId(String);

impl TickId {
    /// Wrap a tick identifier, rejecting blank values.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TickId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The journal event a fact was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactKind {
    /// Commander logged in or arrived somewhere without jumping.
    Location,
    /// Hyperspace jump into a system.
    FsdJump,
    /// Any other journal event (telemetry only).
    Other(String),
}

impl FactKind {
    /// Map a journal `event` name to a kind.
    pub fn from_event(name: &str) -> Self {
        match name {
            "Location" => FactKind::Location,
            "FSDJump" => FactKind::FsdJump,
            other => FactKind::Other(other.to_string()),
        }
    }

    /// The journal `event` name.
    pub fn as_str(&self) -> &str {
        match self {
            FactKind::Location => "Location",
            FactKind::FsdJump => "FSDJump",
            FactKind::Other(name) => name,
        }
    }

    /// Whether facts of this kind describe a whole region and may replace
    /// its snapshot. These are the only kinds accepted from the feed.
    pub fn is_region_bearing(&self) -> bool {
        matches!(self, FactKind::Location | FactKind::FsdJump)
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable ingested telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub id: FactId,
    pub kind: FactKind,
    /// Schema of the feed envelope, if the fact came from the feed.
    pub schema_ref: Option<String>,
    /// When the feed gateway relayed the message.
    pub gateway_timestamp: Option<DateTime<Utc>>,
    pub tick_id: Option<TickId>,
    pub tick_time: Option<String>,
    /// Wall-clock time of the fact. Retention is measured against this.
    pub timestamp: DateTime<Utc>,
    /// Acting commander, if known.
    pub actor: Option<String>,
    pub region: Option<String>,
    pub region_address: Option<i64>,
    /// Typed region content. Present for region-bearing facts and for any
    /// telemetry event that lists conflicts.
    pub report: Option<RegionReport>,
    /// The full original payload.
    pub payload: Value,
}

impl Fact {
    /// The time the event itself happened, falling back to the fact time.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.report
            .as_ref()
            .and_then(|r| r.timestamp)
            .unwrap_or(self.timestamp)
    }

    /// Conflicts reported in this fact.
    pub fn conflicts(&self) -> &[ConflictPair] {
        self.report
            .as_ref()
            .map(|r| r.conflicts.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// Region report
// ============================================================================

/// Strongly-typed view of a journal `Location`/`FSDJump` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    #[serde(rename = "StarSystem", default)]
    pub region: Option<String>,

    #[serde(rename = "SystemAddress", default)]
    pub address: Option<i64>,

    /// Embedded event time.
    #[serde(default, deserialize_with = "lenient_time")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "SystemFaction", default)]
    pub controlling_faction: Option<FactionRef>,

    #[serde(rename = "ControllingPower", default)]
    pub controlling_power: Option<String>,

    #[serde(rename = "Population", default)]
    pub population: Option<u64>,

    #[serde(rename = "SystemSecurity", default)]
    pub security: Option<String>,

    #[serde(rename = "SystemGovernment", default)]
    pub government: Option<String>,

    #[serde(rename = "SystemAllegiance", default)]
    pub allegiance: Option<String>,

    #[serde(rename = "Factions", default, deserialize_with = "null_as_default")]
    pub factions: Vec<FactionPresence>,

    #[serde(rename = "Conflicts", default, deserialize_with = "null_as_default")]
    pub conflicts: Vec<ConflictPair>,

    /// Powers with a presence here. The journal sends a bare string or a list.
    #[serde(rename = "Powers", default, deserialize_with = "one_or_many")]
    pub powers: Vec<String>,

    #[serde(rename = "PowerplayState", default)]
    pub powerplay_state: Option<String>,

    #[serde(rename = "PowerplayStateControlProgress", default)]
    pub control_progress: Option<f64>,

    #[serde(rename = "PowerplayStateReinforcement", default)]
    pub reinforcement: Option<f64>,

    #[serde(rename = "PowerplayStateUndermining", default)]
    pub undermining: Option<f64>,
}

impl RegionReport {
    /// Whether the report carries any powerplay information.
    pub fn has_powerplay(&self) -> bool {
        !self.powers.is_empty() || self.powerplay_state.is_some()
    }
}

/// Name reference to the controlling faction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionRef {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "FactionState", default)]
    pub state: Option<String>,
}

/// A faction present in a region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactionPresence {
    #[serde(rename = "Name", default)]
    pub name: String,

    /// Influence as a fraction in `0.0..=1.0`.
    #[serde(rename = "Influence", default)]
    pub influence: f64,

    #[serde(rename = "FactionState", default)]
    pub state: Option<String>,

    #[serde(rename = "Allegiance", default)]
    pub allegiance: Option<String>,

    #[serde(rename = "Government", default)]
    pub government: Option<String>,

    #[serde(rename = "PendingStates", default, deserialize_with = "null_as_default")]
    pub pending_states: Vec<StateEntry>,

    #[serde(rename = "ActiveStates", default, deserialize_with = "null_as_default")]
    pub active_states: Vec<StateEntry>,

    #[serde(rename = "RecoveringStates", default, deserialize_with = "null_as_default")]
    pub recovering_states: Vec<StateEntry>,
}

impl FactionPresence {
    /// Whether the faction is in `state` now, or has it pending, active or
    /// recovering.
    pub fn has_state(&self, state: &str) -> bool {
        self.state.as_deref() == Some(state)
            || self
                .pending_states
                .iter()
                .chain(&self.active_states)
                .chain(&self.recovering_states)
                .any(|s| s.state == state)
    }
}

/// One entry of a faction's pending/active/recovering state list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    #[serde(rename = "State", default)]
    pub state: String,

    #[serde(rename = "Trend", default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<i64>,
}

/// A conflict between two factions in one region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPair {
    #[serde(rename = "WarType", default)]
    pub war_type: Option<String>,

    #[serde(rename = "Status", default)]
    pub status: Option<String>,

    #[serde(rename = "Faction1", default)]
    pub side_a: ConflictSide,

    #[serde(rename = "Faction2", default)]
    pub side_b: ConflictSide,
}

impl ConflictPair {
    /// Whether either side's faction name contains `needle` (case-sensitive).
    pub fn involves(&self, needle: &str) -> bool {
        self.side_a.name.contains(needle) || self.side_b.name.contains(needle)
    }
}

/// One side of a conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSide {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Stake", default)]
    pub stake: Option<String>,

    #[serde(rename = "WonDays", default)]
    pub won_days: Option<u32>,
}

// ============================================================================
// Lenient field decoding
// ============================================================================

/// Parse an RFC 3339 journal timestamp.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn lenient_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => parse_time(&s),
        _ => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(power)) if !power.is_empty() => vec![power],
        Some(OneOrMany::Many(powers)) => powers,
        _ => Vec::new(),
    })
}
