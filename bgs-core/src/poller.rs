//! Background polling of the external tick authority.

use crate::epoch::EpochTracker;
use crate::fact::TickId;
use crate::notify::{FanoutReport, Notifier};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// How often the authority is asked for the current tick.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Errors from a tick source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] bgs_http::Error),

    #[error("{0}")]
    Other(String),
}

/// Anything that can report the current galaxy tick.
#[async_trait]
pub trait TickSource: Send + Sync {
    async fn latest_tick(&self) -> Result<String, SourceError>;
}

#[async_trait]
impl TickSource for bgs_http::TickAuthority {
    async fn latest_tick(&self) -> Result<String, SourceError> {
        Ok(bgs_http::TickAuthority::latest_tick(self).await?)
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The authority still reports the tick we already hold.
    Unchanged(TickId),
    /// A new tick was observed and announced.
    Changed { tick: TickId, report: FanoutReport },
    /// The authority could not be read, or answered with nothing usable.
    Failed(String),
}

/// Polls a [`TickSource`] and feeds the [`EpochTracker`].
pub struct EpochPoller {
    source: Arc<dyn TickSource>,
    tracker: Arc<EpochTracker>,
    notifier: Arc<Notifier>,
    interval: Duration,
}

impl EpochPoller {
    pub fn new(source: Arc<dyn TickSource>, tracker: Arc<EpochTracker>, notifier: Arc<Notifier>) -> Self {
        Self {
            source,
            tracker,
            notifier,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Read the authority once before any traffic, without notifying.
    /// On failure the tracker stays unset and the first later observation
    /// from any source wins.
    pub async fn bootstrap(&self) -> Option<TickId> {
        match self.source.latest_tick().await {
            Ok(tick) => {
                self.tracker.observe(&tick);
                tracing::info!(target: "bgs::poller", tick = %tick, "initial galaxy tick");
            }
            Err(e) => {
                tracing::warn!(target: "bgs::poller", error = %e, "could not read initial galaxy tick");
            }
        }
        self.tracker.current()
    }

    /// Poll once and fan out if the tick changed.
    pub async fn poll_once(&self) -> PollOutcome {
        let raw = match self.source.latest_tick().await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(target: "bgs::poller", error = %e, "tick poll failed");
                return PollOutcome::Failed(e.to_string());
            }
        };

        let Some(tick) = TickId::new(raw) else {
            tracing::warn!(target: "bgs::poller", "tick authority returned an empty tick");
            return PollOutcome::Failed("empty tick".to_string());
        };

        if !self.tracker.observe(tick.as_str()) {
            tracing::debug!(target: "bgs::poller", tick = %tick, "tick unchanged");
            return PollOutcome::Unchanged(tick);
        }

        let report = self.notifier.tick_changed(&tick).await;
        PollOutcome::Changed { tick, report }
    }

    /// Poll forever. The first poll happens one interval after start.
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(target: "bgs::poller", interval_secs = self.interval.as_secs(), "tick poller started");
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Run the poller on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
