//! The feed consumer: one sequential task turning feed frames into facts
//! and region snapshots, with inline retention and compaction.

use crate::epoch::EpochTracker;
use crate::fact::{FactId, FactKind};
use crate::feed::{DecodeError, Envelope, FeedError, FeedSource};
use crate::region::RegionSnapshot;
use crate::store::{insert_fact, replace_region, Database, FactStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retention and compaction thresholds for the feed database.
#[derive(Debug, Clone)]
pub struct MaintenancePolicy {
    /// Facts older than this are swept.
    pub retention: Duration,
    /// Sweep when this much time has passed since the last sweep...
    pub sweep_interval: Duration,
    /// ...or after this many accepted messages.
    pub sweep_every: u64,
    pub compaction_interval: Duration,
    pub compact_on_start: bool,
    /// Pause after a transport error before receiving again.
    pub reconnect_delay: Duration,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            sweep_every: 100,
            compaction_interval: Duration::from_secs(12 * 60 * 60),
            compact_on_start: true,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// What happened to one frame.
#[derive(Debug)]
pub enum Outcome {
    /// Stored; `region` names the replaced snapshot, if any.
    Stored { fact: FactId, region: Option<String> },
    /// Not a region-bearing event.
    Discarded { event: String },
    /// Could not be decoded.
    Malformed(DecodeError),
    /// The unit of work failed and was rolled back.
    Dropped(StoreError),
}

/// Running totals, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub stored: u64,
    pub discarded: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub swept: u64,
    pub compactions: u64,
}

/// Sole writer of the feed database.
pub struct StreamConsumer {
    db: Database,
    facts: FactStore,
    tracker: Option<Arc<EpochTracker>>,
    policy: MaintenancePolicy,
    since_sweep: u64,
    last_sweep: Instant,
    last_compaction: Option<Instant>,
    stats: ConsumerStats,
}

impl StreamConsumer {
    pub fn new(db: Database) -> Self {
        Self {
            facts: FactStore::new(db.clone()),
            db,
            tracker: None,
            policy: MaintenancePolicy::default(),
            since_sweep: 0,
            last_sweep: Instant::now(),
            last_compaction: None,
            stats: ConsumerStats::default(),
        }
    }

    /// Stamp stored facts with the tracker's current tick.
    pub fn with_tracker(mut self, tracker: Arc<EpochTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_policy(mut self, policy: MaintenancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// Handle one raw frame received now.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Outcome {
        self.handle_frame_at(frame, Utc::now())
    }

    /// Handle one raw frame as if received at `received_at`.
    pub fn handle_frame_at(&mut self, frame: &[u8], received_at: DateTime<Utc>) -> Outcome {
        let outcome = self.process(frame, received_at);
        match &outcome {
            Outcome::Stored { .. } => {
                self.stats.stored += 1;
                self.since_sweep += 1;
            }
            Outcome::Discarded { .. } => self.stats.discarded += 1,
            Outcome::Malformed(e) => {
                self.stats.malformed += 1;
                tracing::warn!(target: "bgs::consumer", error = %e, "skipping malformed feed message");
            }
            Outcome::Dropped(e) => {
                self.stats.dropped += 1;
                tracing::error!(target: "bgs::consumer", error = %e, "feed message dropped, unit of work rolled back");
            }
        }
        outcome
    }

    fn process(&self, frame: &[u8], received_at: DateTime<Utc>) -> Outcome {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => return Outcome::Malformed(e),
        };

        match envelope.kind() {
            Some(kind) if kind.is_region_bearing() => {}
            Some(FactKind::Other(event)) => return Outcome::Discarded { event },
            Some(kind) => return Outcome::Discarded { event: kind.to_string() },
            None => return Outcome::Malformed(DecodeError::MissingEvent),
        }

        let tick = self.tracker.as_ref().and_then(|t| t.current());
        let fact = match envelope.into_fact(tick, received_at) {
            Ok(fact) => fact,
            Err(e) => return Outcome::Malformed(e),
        };
        let snapshot = fact
            .report
            .as_ref()
            .and_then(|report| RegionSnapshot::from_report(report, Some(fact.id), received_at));

        let result = self.db.unit_of_work(|tx| {
            insert_fact(tx, &fact)?;
            if let Some(snapshot) = &snapshot {
                replace_region(tx, snapshot)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                let region = snapshot.map(|s| s.info.region);
                tracing::trace!(target: "bgs::consumer", kind = %fact.kind, region = ?region, "fact stored");
                Outcome::Stored {
                    fact: fact.id,
                    region,
                }
            }
            Err(e) => Outcome::Dropped(e),
        }
    }

    /// Run any maintenance that is due.
    pub fn maintain(&mut self) {
        self.maintain_at(Instant::now(), Utc::now());
    }

    /// Run due maintenance against explicit clocks.
    pub fn maintain_at(&mut self, now: Instant, wall: DateTime<Utc>) {
        let sweep_due = self.since_sweep >= self.policy.sweep_every
            || now.duration_since(self.last_sweep) >= self.policy.sweep_interval;
        if sweep_due {
            self.sweep(wall);
            self.since_sweep = 0;
            self.last_sweep = now;
        }

        let compaction_due = match self.last_compaction {
            Some(last) => now.duration_since(last) >= self.policy.compaction_interval,
            None if self.policy.compact_on_start => true,
            None => {
                // Start the interval clock without compacting.
                self.last_compaction = Some(now);
                false
            }
        };
        if compaction_due {
            match self.db.compact() {
                Ok(()) => {
                    self.stats.compactions += 1;
                    tracing::info!(target: "bgs::consumer", "feed database compacted");
                }
                Err(e) => tracing::error!(target: "bgs::consumer", error = %e, "compaction failed"),
            }
            self.last_compaction = Some(now);
        }
    }

    /// Delete facts older than the retention window, relative to `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.policy.retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.facts.delete_older_than(cutoff) {
            Ok(removed) => {
                self.stats.swept += removed as u64;
                tracing::info!(target: "bgs::consumer", removed, cutoff = %cutoff, "retention sweep");
                removed
            }
            Err(e) => {
                tracing::error!(target: "bgs::consumer", error = %e, "retention sweep failed");
                0
            }
        }
    }

    /// Consume `source` until it closes. Transport errors pause and retry.
    pub async fn run(&mut self, source: &mut impl FeedSource) {
        tracing::info!(target: "bgs::consumer", "feed consumer started");
        self.maintain();

        loop {
            match source.next_frame().await {
                Ok(frame) => {
                    self.handle_frame(&frame);
                    self.maintain();
                }
                Err(FeedError::Closed) => {
                    tracing::info!(target: "bgs::consumer", stats = ?self.stats, "feed closed");
                    return;
                }
                Err(e) => {
                    tracing::warn!(target: "bgs::consumer", error = %e, "feed receive failed");
                    tokio::time::sleep(self.policy.reconnect_delay).await;
                }
            }
        }
    }
}
