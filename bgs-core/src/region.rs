//! Latest-known region snapshots and the filters used to query them.

use crate::fact::{ConflictPair, FactId, FactionPresence, RegionReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scalar state of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub region: String,
    pub address: Option<i64>,
    pub controlling_faction: Option<String>,
    pub controlling_power: Option<String>,
    pub population: Option<u64>,
    pub security: Option<String>,
    pub government: Option<String>,
    pub allegiance: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// The fact this snapshot was built from.
    pub source_fact: Option<FactId>,
}

/// Powerplay presence in a region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfluenceSphere {
    pub powers: Vec<String>,
    pub state: Option<String>,
    pub control_progress: Option<f64>,
    pub reinforcement: Option<f64>,
    pub undermining: Option<f64>,
}

/// Everything known about a region, as last reported.
///
/// A snapshot is always replaced as a whole: a report with no factions
/// leaves the region with no factions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub info: SystemInfo,
    pub factions: Vec<FactionPresence>,
    pub conflicts: Vec<ConflictPair>,
    pub spheres: Vec<InfluenceSphere>,
}

impl RegionSnapshot {
    /// Build a snapshot from a decoded report. `None` if the report does
    /// not name its region.
    pub fn from_report(
        report: &RegionReport,
        source_fact: Option<FactId>,
        updated_at: DateTime<Utc>,
    ) -> Option<Self> {
        let region = report.region.as_ref().filter(|r| !r.is_empty())?.clone();

        let spheres = if report.has_powerplay() {
            vec![InfluenceSphere {
                powers: report.powers.clone(),
                state: report.powerplay_state.clone(),
                control_progress: report.control_progress,
                reinforcement: report.reinforcement,
                undermining: report.undermining,
            }]
        } else {
            Vec::new()
        };

        Some(Self {
            info: SystemInfo {
                region,
                address: report.address,
                controlling_faction: report.controlling_faction.as_ref().map(|f| f.name.clone()),
                controlling_power: report.controlling_power.clone(),
                population: report.population,
                security: report.security.clone(),
                government: report.government.clone(),
                allegiance: report.allegiance.clone(),
                updated_at,
                source_fact,
            },
            factions: report.factions.clone(),
            conflicts: report.conflicts.clone(),
            spheres,
        })
    }

    pub fn name(&self) -> &str {
        &self.info.region
    }

    /// Look up a present faction by exact name.
    pub fn faction(&self, name: &str) -> Option<&FactionPresence> {
        self.factions.iter().find(|f| f.name == name)
    }
}

/// Population constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationFilter {
    Exact(u64),
    /// Inclusive on both ends.
    Range { min: u64, max: u64 },
}

impl PopulationFilter {
    pub fn matches(&self, population: u64) -> bool {
        match *self {
            PopulationFilter::Exact(n) => population == n,
            PopulationFilter::Range { min, max } => (min..=max).contains(&population),
        }
    }
}

/// Region query. Every set field narrows the result; the default filter
/// matches every region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionFilter {
    pub controlling_faction: Option<String>,
    pub controlling_power: Option<String>,
    /// Any power listed in the region's sphere.
    pub power: Option<String>,
    /// A faction present in the region.
    pub faction: Option<String>,
    /// Current, pending, active or recovering faction state.
    pub faction_state: Option<String>,
    /// Only regions with at least one conflict.
    pub in_conflict: bool,
    pub population: Option<PopulationFilter>,
    pub powerplay_state: Option<String>,
}

impl RegionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_controlling_faction(mut self, name: impl Into<String>) -> Self {
        self.controlling_faction = Some(name.into());
        self
    }

    pub fn with_controlling_power(mut self, name: impl Into<String>) -> Self {
        self.controlling_power = Some(name.into());
        self
    }

    pub fn with_power(mut self, name: impl Into<String>) -> Self {
        self.power = Some(name.into());
        self
    }

    pub fn with_faction(mut self, name: impl Into<String>) -> Self {
        self.faction = Some(name.into());
        self
    }

    pub fn with_faction_state(mut self, state: impl Into<String>) -> Self {
        self.faction_state = Some(state.into());
        self
    }

    pub fn in_conflict(mut self) -> Self {
        self.in_conflict = true;
        self
    }

    pub fn with_population(mut self, population: PopulationFilter) -> Self {
        self.population = Some(population);
        self
    }

    pub fn with_powerplay_state(mut self, state: impl Into<String>) -> Self {
        self.powerplay_state = Some(state.into());
        self
    }

    /// Whether no constraint is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
