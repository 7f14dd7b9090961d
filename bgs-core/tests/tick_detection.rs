//! Tick detection tests.
//!
//! These tests verify that the authority poller and telemetry ingestion
//! share one tracker, and that each change fans out exactly once.

use bgs_core::fact::TickId;
use bgs_core::testing::{conflict, telemetry_event, RecordingSink, ScriptedTickSource};
use bgs_core::{
    ConflictReducer, Database, EpochPoller, EpochTracker, FactStore, Notifier, PollOutcome,
    TelemetryIngestor, Target,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn notifier(sinks: &[Arc<RecordingSink>]) -> Arc<Notifier> {
    let targets = sinks
        .iter()
        .enumerate()
        .map(|(i, sink)| Target::new(format!("tenant-{i}"), sink.clone()))
        .collect();
    Arc::new(Notifier::new(targets))
}

// =============================================================================
// TRACKER TESTS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_observers_across_tasks() {
    let tracker = Arc::new(EpochTracker::starting_at(TickId::new("T1").unwrap()));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.observe("T2") })
        })
        .collect();

    let mut changed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            changed += 1;
        }
    }

    assert_eq!(changed, 1);
    assert_eq!(tracker.current(), TickId::new("T2"));
    assert_eq!(tracker.state().changes, 1);
}

// =============================================================================
// POLLER TESTS
// =============================================================================

#[tokio::test]
async fn test_poller_fans_out_once_per_target() {
    let sinks: Vec<_> = (0..3).map(|_| Arc::new(RecordingSink::new())).collect();
    let tracker = Arc::new(EpochTracker::new());
    let poller = EpochPoller::new(
        Arc::new(ScriptedTickSource::new(["T1", "T2", "T2"])),
        tracker.clone(),
        notifier(&sinks),
    );

    assert_eq!(poller.bootstrap().await, TickId::new("T1"));
    assert!(sinks.iter().all(|s| s.messages().is_empty()));

    let outcome = poller.poll_once().await;
    let PollOutcome::Changed { tick, report } = outcome else {
        panic!("expected a tick change, got {outcome:?}");
    };
    assert_eq!(tick.as_str(), "T2");
    assert_eq!(report.announced, 3);

    assert!(matches!(poller.poll_once().await, PollOutcome::Unchanged(_)));
    for sink in &sinks {
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.messages()[0].contains("T2"));
    }
}

#[tokio::test]
async fn test_failed_bootstrap_lets_telemetry_decide() {
    let sink = Arc::new(RecordingSink::new());
    let tracker = Arc::new(EpochTracker::new());
    let notifier = notifier(&[sink.clone()]);
    let poller = EpochPoller::new(Arc::new(ScriptedTickSource::failing()), tracker.clone(), notifier.clone());

    assert!(poller.bootstrap().await.is_none());
    assert!(matches!(poller.poll_once().await, PollOutcome::Failed(_)));

    let facts = FactStore::new(Database::open_in_memory().unwrap());
    let ingestor = TelemetryIngestor::new(facts, tracker.clone()).with_notifier(notifier);
    let report = ingestor
        .ingest(&[telemetry_event("Docked", "T5", "Cmdr A", json!({}))])
        .await
        .unwrap();

    assert!(report.tick_changed);
    assert_eq!(report.fanout.unwrap().announced, 1);
    assert_eq!(tracker.current(), TickId::new("T5"));
    assert_eq!(sink.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_poller_waits_one_interval() {
    let sink = Arc::new(RecordingSink::new());
    let tracker = Arc::new(EpochTracker::starting_at(TickId::new("T1").unwrap()));
    let handle = EpochPoller::new(
        Arc::new(ScriptedTickSource::new(["T2"])),
        tracker.clone(),
        notifier(&[sink.clone()]),
    )
    .with_interval(Duration::from_secs(300))
    .spawn();

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert!(sink.messages().is_empty());
    assert_eq!(tracker.current(), TickId::new("T1"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.messages().len(), 1);
    assert_eq!(tracker.current(), TickId::new("T2"));

    // Later polls fail (script exhausted) and change nothing.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(sink.messages().len(), 1);
    assert!(!handle.is_finished());
    handle.abort();
}

// =============================================================================
// INGESTION TESTS
// =============================================================================

#[tokio::test]
async fn test_poller_and_telemetry_agree_on_one_change() {
    let sink = Arc::new(RecordingSink::new());
    let tracker = Arc::new(EpochTracker::starting_at(TickId::new("T1").unwrap()));
    let notifier = notifier(&[sink.clone()]);

    let facts = FactStore::new(Database::open_in_memory().unwrap());
    let ingestor = TelemetryIngestor::new(facts, tracker.clone()).with_notifier(notifier.clone());
    let poller = EpochPoller::new(Arc::new(ScriptedTickSource::new(["T2"])), tracker.clone(), notifier);

    let report = ingestor
        .ingest(&[telemetry_event("FSDJump", "T2", "Cmdr A", json!({ "StarSystem": "Sol" }))])
        .await
        .unwrap();
    assert!(report.tick_changed);

    assert!(matches!(poller.poll_once().await, PollOutcome::Unchanged(_)));
    assert_eq!(sink.messages().len(), 1);
}

#[tokio::test]
async fn test_tick_change_sends_conflict_report() {
    let facts = FactStore::new(Database::open_in_memory().unwrap());
    let tracker = Arc::new(EpochTracker::starting_at(TickId::new("T1").unwrap()));
    let sink = Arc::new(RecordingSink::new());
    let notifier = Arc::new(
        Notifier::new(vec![Target::new("eic", sink.clone()).with_faction("East India Company")])
            .with_conflicts(ConflictReducer::new(facts.clone())),
    );
    let ingestor = TelemetryIngestor::new(facts, tracker).with_notifier(notifier);

    let conflicts = serde_json::to_value(vec![conflict("war", "East India Company", "Pirates")]).unwrap();
    let report = ingestor
        .ingest(&[telemetry_event(
            "FSDJump",
            "T2",
            "Cmdr Jameson",
            json!({ "StarSystem": "Sol", "Conflicts": conflicts }),
        )])
        .await
        .unwrap();

    let fanout = report.fanout.unwrap();
    assert_eq!(fanout.announced, 1);
    assert_eq!(fanout.reports_sent, 1);

    let messages = sink.messages();
    assert!(messages[1].contains("East India Company"));
    assert!(messages[1].contains("Cmdr Jameson"));
    assert!(messages[1].contains("Tick: `T2`"));
}
