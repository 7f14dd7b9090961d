//! Per-tick conflict reduction over stored telemetry facts.
//!
//! For one tick, every fact's region report is scanned for the first
//! conflict involving the faction of interest. The reduction keeps, per
//! region, the conflict state from the most recent event and the union of
//! every commander who reported it.

use crate::fact::{ConflictSide, Fact, FactKind, TickId};
use crate::store::{FactStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Latest known conflict state in one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionConflict {
    pub region: String,
    /// Event time of the fact the state was taken from.
    pub last_seen: DateTime<Utc>,
    pub event: FactKind,
    pub tick_id: TickId,
    pub tick_time: Option<String>,
    pub war_type: Option<String>,
    pub status: Option<String>,
    pub side_a: ConflictSide,
    pub side_b: ConflictSide,
    /// Every distinct commander who reported a matching conflict here.
    pub actors: BTreeSet<String>,
}

/// Conflict state per region for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictView {
    regions: BTreeMap<String, RegionConflict>,
}

impl ConflictView {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn get(&self, region: &str) -> Option<&RegionConflict> {
        self.regions.get(region)
    }

    /// Regions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &RegionConflict> {
        self.regions.values()
    }

    /// Regions, most recently updated first.
    pub fn by_recency(&self) -> Vec<&RegionConflict> {
        let mut regions: Vec<_> = self.regions.values().collect();
        regions.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.region.cmp(&b.region)));
        regions
    }

    fn absorb(&mut self, fact: &Fact, tick: &TickId, filter: &str) {
        let Some(region) = fact
            .region
            .as_ref()
            .or_else(|| fact.report.as_ref().and_then(|r| r.region.as_ref()))
        else {
            return;
        };
        let Some(conflict) = fact.conflicts().iter().find(|c| c.involves(filter)) else {
            return;
        };

        let seen = fact.event_time();
        let entry = self
            .regions
            .entry(region.clone())
            .or_insert_with(|| RegionConflict {
                region: region.clone(),
                last_seen: seen,
                event: fact.kind.clone(),
                tick_id: tick.clone(),
                tick_time: fact.tick_time.clone(),
                war_type: conflict.war_type.clone(),
                status: conflict.status.clone(),
                side_a: conflict.side_a.clone(),
                side_b: conflict.side_b.clone(),
                actors: BTreeSet::new(),
            });

        // Strictly newer only: on equal times the earlier fact stays.
        if seen > entry.last_seen {
            entry.last_seen = seen;
            entry.event = fact.kind.clone();
            entry.tick_time = fact.tick_time.clone();
            entry.war_type = conflict.war_type.clone();
            entry.status = conflict.status.clone();
            entry.side_a = conflict.side_a.clone();
            entry.side_b = conflict.side_b.clone();
        }

        if let Some(actor) = fact.actor.as_ref().filter(|a| !a.is_empty()) {
            entry.actors.insert(actor.clone());
        }
    }
}

/// A reduction labelled with its tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickConflicts {
    pub tick: TickId,
    pub view: ConflictView,
}

/// Reductions for the two most recent ticks seen in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentConflicts {
    pub current: Option<TickConflicts>,
    pub previous: Option<TickConflicts>,
}

/// Answers "what is the latest conflict state per region" for a tick.
#[derive(Clone)]
pub struct ConflictReducer {
    facts: FactStore,
}

impl ConflictReducer {
    pub fn new(facts: FactStore) -> Self {
        Self { facts }
    }

    /// Reduce every fact of `tick`. `filter` is a case-sensitive substring
    /// matched against each side's faction name; an empty filter matches
    /// every conflict.
    pub fn reduce(&self, tick: &TickId, filter: &str) -> Result<ConflictView, StoreError> {
        let mut view = ConflictView::default();
        self.facts.scan_by_tick(tick, |fact| view.absorb(&fact, tick, filter))?;
        Ok(view)
    }

    /// Reduce the two most recent ticks.
    pub fn recent(&self, filter: &str) -> Result<RecentConflicts, StoreError> {
        let ticks = self.facts.latest_ticks(2)?;
        let mut recent = RecentConflicts::default();

        let mut ticks = ticks.into_iter();
        if let Some(tick) = ticks.next() {
            recent.current = Some(self.labelled(tick, filter)?);
        }
        if let Some(tick) = ticks.next() {
            recent.previous = Some(self.labelled(tick, filter)?);
        }
        Ok(recent)
    }

    /// Reduce the most recent tick only.
    pub fn current(&self, filter: &str) -> Result<Option<TickConflicts>, StoreError> {
        match self.facts.latest_ticks(1)?.into_iter().next() {
            Some(tick) => Ok(Some(self.labelled(tick, filter)?)),
            None => Ok(None),
        }
    }

    fn labelled(&self, tick: TickId, filter: &str) -> Result<TickConflicts, StoreError> {
        let view = self.reduce(&tick, filter)?;
        Ok(TickConflicts { tick, view })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::testing::{conflict, FactBuilder};
    use chrono::Duration;

    fn reducer() -> (FactStore, ConflictReducer) {
        let facts = FactStore::new(Database::open_in_memory().unwrap());
        (facts.clone(), ConflictReducer::new(facts))
    }

    #[test]
    fn test_first_matching_conflict_per_fact() {
        let (facts, reducer) = reducer();
        facts
            .append(
                &FactBuilder::fsd_jump("Sol")
                    .tick("T1")
                    .conflict(conflict("war", "Other", "Someone"))
                    .conflict(conflict("election", "East India Company", "B"))
                    .conflict(conflict("civilwar", "East India Company", "C"))
                    .build(),
            )
            .unwrap();

        let view = reducer.reduce(&TickId::new("T1").unwrap(), "India").unwrap();
        let sol = view.get("Sol").unwrap();
        assert_eq!(sol.war_type.as_deref(), Some("election"));
        assert_eq!(sol.side_b.name, "B");
    }

    #[test]
    fn test_ties_keep_first_fact() {
        let (facts, reducer) = reducer();
        let at = Utc::now();
        for (opponent, actor) in [("First", "Cmdr A"), ("Second", "Cmdr B")] {
            facts
                .append(
                    &FactBuilder::fsd_jump("Sol")
                        .tick("T1")
                        .actor(actor)
                        .event_time(at)
                        .conflict(conflict("war", "Us", opponent))
                        .build(),
                )
                .unwrap();
        }

        let view = reducer.reduce(&TickId::new("T1").unwrap(), "Us").unwrap();
        let sol = view.get("Sol").unwrap();
        assert_eq!(sol.side_b.name, "First");
        assert_eq!(sol.actors.len(), 2);
    }

    #[test]
    fn test_recent_labels_current_and_previous() {
        let (facts, reducer) = reducer();
        let now = Utc::now();
        facts
            .append(
                &FactBuilder::fsd_jump("Sol")
                    .tick("T1")
                    .at(now - Duration::hours(2))
                    .conflict(conflict("war", "Us", "Them"))
                    .build(),
            )
            .unwrap();
        facts
            .append(
                &FactBuilder::fsd_jump("Lave")
                    .tick("T2")
                    .at(now)
                    .conflict(conflict("war", "Us", "Them"))
                    .build(),
            )
            .unwrap();

        let recent = reducer.recent("Us").unwrap();
        let current = recent.current.unwrap();
        let previous = recent.previous.unwrap();
        assert_eq!(current.tick.as_str(), "T2");
        assert!(current.view.get("Lave").is_some());
        assert_eq!(previous.tick.as_str(), "T1");
        assert!(previous.view.get("Sol").is_some());

        assert_eq!(reducer.current("Us").unwrap().unwrap().tick.as_str(), "T2");
    }

    #[test]
    fn test_empty_store() {
        let (_, reducer) = reducer();
        assert_eq!(reducer.recent("Us").unwrap(), RecentConflicts::default());
        assert!(reducer.current("Us").unwrap().is_none());
    }

    #[test]
    fn test_by_recency_orders_newest_first() {
        let (facts, reducer) = reducer();
        let now = Utc::now();
        for (region, age) in [("Old", 3), ("New", 1), ("Mid", 2)] {
            facts
                .append(
                    &FactBuilder::fsd_jump(region)
                        .tick("T1")
                        .event_time(now - Duration::hours(age))
                        .conflict(conflict("war", "Us", "Them"))
                        .build(),
                )
                .unwrap();
        }

        let view = reducer.reduce(&TickId::new("T1").unwrap(), "").unwrap();
        let order: Vec<_> = view.by_recency().into_iter().map(|c| c.region.as_str()).collect();
        assert_eq!(order, vec!["New", "Mid", "Old"]);
    }
}
