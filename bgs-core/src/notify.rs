//! Tick-change fan-out to notification targets.

use crate::conflict::{ConflictReducer, TickConflicts};
use crate::fact::TickId;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] bgs_http::Error),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Somewhere a text notification can be sent. One attempt per call.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, content: &str) -> Result<(), SinkError>;
}

#[async_trait]
impl NotificationSink for bgs_http::Webhook {
    async fn send(&self, content: &str) -> Result<(), SinkError> {
        Ok(self.post(content).await?)
    }
}

/// A configured notification target.
#[derive(Clone)]
pub struct Target {
    pub name: String,
    /// Faction to report conflicts for. `None` sends the announcement only.
    pub faction: Option<String>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Target {
    pub fn new(name: impl Into<String>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            name: name.into(),
            faction: None,
            sink,
        }
    }

    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = Some(faction.into());
        self
    }
}

/// What one fan-out achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Targets that received the announcement.
    pub announced: usize,
    /// Conflict reports delivered.
    pub reports_sent: usize,
    /// Targets whose faction had no conflicts.
    pub silent: usize,
    /// Failed sends or reductions, across all targets.
    pub failures: usize,
}

impl FanoutReport {
    fn merge(&mut self, other: FanoutReport) {
        self.announced += other.announced;
        self.reports_sent += other.reports_sent;
        self.silent += other.silent;
        self.failures += other.failures;
    }
}

/// Sends the tick announcement and the per-faction conflict report to
/// every target.
pub struct Notifier {
    targets: Vec<Target>,
    conflicts: Option<ConflictReducer>,
}

impl Notifier {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets,
            conflicts: None,
        }
    }

    /// Enable conflict reports, reduced from the given store.
    pub fn with_conflicts(mut self, reducer: ConflictReducer) -> Self {
        self.conflicts = Some(reducer);
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Notify every target of a tick change. Targets run concurrently and a
    /// failing target never affects the others.
    pub async fn tick_changed(&self, tick: &TickId) -> FanoutReport {
        let announcement = format_announcement(tick);
        let reductions = self.reduce_factions().await;
        let runs = self
            .targets
            .iter()
            .map(|target| self.notify_target(target, &announcement, &reductions));

        let mut report = FanoutReport::default();
        for outcome in join_all(runs).await {
            report.merge(outcome);
        }

        tracing::info!(
            target: "bgs::notify",
            tick = %tick,
            announced = report.announced,
            reports = report.reports_sent,
            failures = report.failures,
            "tick fan-out finished"
        );
        report
    }

    /// Reduce once per distinct target faction, off the async workers.
    async fn reduce_factions(&self) -> BTreeMap<String, Reduction> {
        let Some(reducer) = self.conflicts.clone() else {
            return BTreeMap::new();
        };
        let factions: BTreeSet<String> = self
            .targets
            .iter()
            .filter_map(|t| t.faction.clone())
            .collect();
        if factions.is_empty() {
            return BTreeMap::new();
        }

        let reduced = tokio::task::spawn_blocking(move || {
            factions
                .into_iter()
                .map(|faction| {
                    let reduction = match reducer.current(&faction) {
                        Ok(Some(conflicts)) if !conflicts.view.is_empty() => Reduction::Found(conflicts),
                        Ok(_) => Reduction::Empty,
                        Err(e) => {
                            tracing::error!(target: "bgs::notify", faction = %faction, error = %e, "conflict reduction failed");
                            Reduction::Failed
                        }
                    };
                    (faction, reduction)
                })
                .collect()
        })
        .await;

        reduced.unwrap_or_else(|e| {
            tracing::error!(target: "bgs::notify", error = %e, "conflict reduction task failed");
            BTreeMap::new()
        })
    }

    async fn notify_target(
        &self,
        target: &Target,
        announcement: &str,
        reductions: &BTreeMap<String, Reduction>,
    ) -> FanoutReport {
        let mut report = FanoutReport::default();

        match target.sink.send(announcement).await {
            Ok(()) => report.announced += 1,
            Err(e) => {
                report.failures += 1;
                tracing::warn!(target: "bgs::notify", tenant = %target.name, error = %e, "tick announcement failed");
            }
        }

        let Some(faction) = target.faction.as_deref().filter(|_| self.conflicts.is_some()) else {
            return report;
        };

        let conflicts = match reductions.get(faction) {
            Some(Reduction::Found(conflicts)) => conflicts,
            Some(Reduction::Empty) => {
                tracing::debug!(target: "bgs::notify", tenant = %target.name, faction, "no conflicts to report");
                report.silent += 1;
                return report;
            }
            Some(Reduction::Failed) | None => {
                report.failures += 1;
                return report;
            }
        };

        match target.sink.send(&format_conflict_report(faction, conflicts)).await {
            Ok(()) => report.reports_sent += 1,
            Err(e) => {
                report.failures += 1;
                tracing::warn!(target: "bgs::notify", tenant = %target.name, error = %e, "conflict report failed");
            }
        }
        report
    }
}

/// One faction's conflicts for the current fan-out.
enum Reduction {
    Found(TickConflicts),
    Empty,
    Failed,
}

/// Short message announcing a new tick.
pub fn format_announcement(tick: &TickId) -> String {
    format!("**New BGS tick detected**\nTime: `{tick}`")
}

/// Conflict report for one faction, newest region first.
pub fn format_conflict_report(faction: &str, conflicts: &TickConflicts) -> String {
    let mut out = format!("__**Detected {faction} Conflicts**__\n");

    for entry in conflicts.view.by_recency() {
        let war = entry.war_type.as_deref().unwrap_or("conflict");
        let _ = writeln!(out);
        let _ = writeln!(out, "**{} ({war})**", entry.region);
        let _ = writeln!(out, "```");
        for (label, side) in [("Faction 1", &entry.side_a), ("Faction 2", &entry.side_b)] {
            let _ = writeln!(out, "{label}: {}", side.name);
            let _ = writeln!(out, "  Stake: {}", side.stake.as_deref().unwrap_or(""));
            let _ = writeln!(out, "  Won Days: {}", won_days(side.won_days));
        }
        let _ = writeln!(out, "```");
        let _ = writeln!(
            out,
            "**{} vs {}**",
            won_days(entry.side_a.won_days),
            won_days(entry.side_b.won_days)
        );
        let actors: Vec<&str> = entry.actors.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Cmdrs: {}", actors.join(", "));
        let _ = writeln!(out, "Detected: {}", entry.last_seen.to_rfc3339());
    }

    let _ = write!(out, "\nTick: `{}`", conflicts.tick);
    out
}

fn won_days(days: Option<u32>) -> String {
    days.map(|d| d.to_string()).unwrap_or_else(|| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, FactStore};
    use crate::testing::{conflict, FactBuilder, RecordingSink};

    fn reducer_with_conflict() -> ConflictReducer {
        let facts = FactStore::new(Database::open_in_memory().unwrap());
        facts
            .append(
                &FactBuilder::fsd_jump("Sol")
                    .tick("T1")
                    .actor("Cmdr Jameson")
                    .conflict(conflict("war", "East India Company", "Pirates"))
                    .build(),
            )
            .unwrap();
        ConflictReducer::new(facts)
    }

    #[tokio::test]
    async fn test_announcement_only_without_faction() {
        let sink = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(vec![Target::new("plain", sink.clone())])
            .with_conflicts(reducer_with_conflict());

        let report = notifier.tick_changed(&TickId::new("T2").unwrap()).await;
        assert_eq!(report.announced, 1);
        assert_eq!(report.reports_sent, 0);
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.messages()[0].contains("T2"));
    }

    #[tokio::test]
    async fn test_report_sent_for_matching_faction() {
        let sink = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(vec![
            Target::new("eic", sink.clone()).with_faction("East India"),
        ])
        .with_conflicts(reducer_with_conflict());

        let report = notifier.tick_changed(&TickId::new("T2").unwrap()).await;
        assert_eq!(report.reports_sent, 1);

        let messages = sink.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("**Sol (war)**"));
        assert!(messages[1].contains("Cmdr Jameson"));
    }

    #[tokio::test]
    async fn test_unmatched_faction_is_silent() {
        let sink = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(vec![Target::new("x", sink.clone()).with_faction("Nobody")])
            .with_conflicts(reducer_with_conflict());

        let report = notifier.tick_changed(&TickId::new("T2").unwrap()).await;
        assert_eq!(report.silent, 1);
        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_target_is_isolated() {
        let good = Arc::new(RecordingSink::new());
        let bad = Arc::new(RecordingSink::failing());
        let notifier = Notifier::new(vec![
            Target::new("bad", bad.clone()).with_faction("East India"),
            Target::new("good", good.clone()).with_faction("East India"),
        ])
        .with_conflicts(reducer_with_conflict());

        let report = notifier.tick_changed(&TickId::new("T2").unwrap()).await;
        assert_eq!(report.announced, 1);
        assert_eq!(report.reports_sent, 1);
        assert_eq!(report.failures, 2);
        assert_eq!(good.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_shared_faction_reported_to_each_target() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(vec![
            Target::new("one", first.clone()).with_faction("East India"),
            Target::new("two", second.clone()).with_faction("East India"),
        ])
        .with_conflicts(reducer_with_conflict());

        let report = notifier.tick_changed(&TickId::new("T2").unwrap()).await;
        assert_eq!(report.announced, 2);
        assert_eq!(report.reports_sent, 2);
        assert_eq!(first.messages()[1], second.messages()[1]);
    }

    #[tokio::test]
    async fn test_reduction_failure_keeps_announcement() {
        let facts = FactStore::new(Database::open_in_memory().unwrap());
        facts
            .database()
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE facts")?;
                Ok(())
            })
            .unwrap();

        let sink = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(vec![Target::new("eic", sink.clone()).with_faction("East India")])
            .with_conflicts(ConflictReducer::new(facts));

        let report = notifier.tick_changed(&TickId::new("T2").unwrap()).await;
        assert_eq!(report.announced, 1);
        assert_eq!(report.reports_sent, 0);
        assert_eq!(report.failures, 1);
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn test_conflict_report_layout() {
        let conflicts = reducer_with_conflict().current("India").unwrap().unwrap();
        let text = format_conflict_report("East India Company", &conflicts);

        assert!(text.starts_with("__**Detected East India Company Conflicts**__"));
        assert!(text.contains("Faction 1: East India Company"));
        assert!(text.contains("Faction 2: Pirates"));
        assert!(text.ends_with("Tick: `T1`"));
    }
}
