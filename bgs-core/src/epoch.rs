//! Process-wide galaxy tick tracking.

use crate::fact::TickId;
use std::sync::{PoisonError, RwLock};

/// Snapshot of the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochState {
    /// Last observed tick, `None` until the first observation.
    pub tick: Option<TickId>,
    /// Number of observed changes since start.
    pub changes: u64,
}

/// Holds the last-known tick. Shared by `Arc` between the poller, the
/// ingestor and the feed consumer.
#[derive(Debug, Default)]
pub struct EpochTracker {
    state: RwLock<EpochState>,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known tick without counting it as a change.
    pub fn starting_at(tick: TickId) -> Self {
        Self {
            state: RwLock::new(EpochState {
                tick: Some(tick),
                changes: 0,
            }),
        }
    }

    /// Record `candidate` as the current tick.
    ///
    /// Returns `true` only for the call that actually changed the stored
    /// value; concurrent callers observing the same new tick see exactly one
    /// `true`. Blank candidates are ignored.
    pub fn observe(&self, candidate: &str) -> bool {
        let Some(candidate) = TickId::new(candidate) else {
            return false;
        };

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.tick.as_ref() == Some(&candidate) {
                return false;
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.tick.as_ref() == Some(&candidate) {
            return false;
        }

        let previous = state.tick.replace(candidate.clone());
        state.changes += 1;
        tracing::info!(
            target: "bgs::epoch",
            tick = %candidate,
            previous = previous.as_ref().map(TickId::as_str).unwrap_or("<none>"),
            changes = state.changes,
            "galaxy tick changed"
        );
        true
    }

    /// The current tick, if any has been observed.
    pub fn current(&self) -> Option<TickId> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tick
            .clone()
    }

    pub fn state(&self) -> EpochState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observe_changes_once() {
        let tracker = EpochTracker::new();
        assert!(tracker.current().is_none());

        assert!(tracker.observe("T1"));
        assert!(!tracker.observe("T1"));
        assert!(tracker.observe("T2"));
        assert!(tracker.observe("T1"));

        let state = tracker.state();
        assert_eq!(state.tick, TickId::new("T1"));
        assert_eq!(state.changes, 3);
    }

    #[test]
    fn test_blank_is_ignored() {
        let tracker = EpochTracker::starting_at(TickId::new("T1").unwrap());
        assert!(!tracker.observe(""));
        assert!(!tracker.observe("  "));
        assert_eq!(tracker.current(), TickId::new("T1"));
        assert_eq!(tracker.state().changes, 0);
    }

    #[test]
    fn test_concurrent_observers_see_one_change() {
        let tracker = EpochTracker::starting_at(TickId::new("T1").unwrap());
        let winners = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if tracker.observe("T2") {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.current(), TickId::new("T2"));
        assert_eq!(tracker.state().changes, 1);
    }
}
