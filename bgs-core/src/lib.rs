//! Background-simulation (BGS) telemetry pipeline.
//!
//! This crate provides:
//! - A feed consumer that turns the compressed EDDN stream into durable
//!   facts and latest-known region snapshots, with bounded retention
//! - Galaxy tick detection from two sources (the tick authority and tick
//!   ids embedded in uploaded telemetry), reconciled in one tracker
//! - A once-per-change notification fan-out to tenant webhooks
//! - A per-tick conflict reduction over stored telemetry, filled from a
//!   line-delimited JSON inbox
//!
//! # Quick Start
//!
//! ```ignore
//! use bgs_core::{Database, EpochTracker, StreamConsumer, ZmqFeed};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = Arc::new(EpochTracker::new());
//!     let mut feed = ZmqFeed::connect("tcp://eddn.edcd.io:9500").await?;
//!
//!     let mut consumer = StreamConsumer::new(Database::open("db/bgs_data_eddn.db")?)
//!         .with_tracker(tracker);
//!     consumer.run(&mut feed).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conflict;
pub mod consumer;
pub mod epoch;
pub mod fact;
pub mod feed;
pub mod inbox;
pub mod ingest;
pub mod notify;
pub mod poller;
pub mod region;
pub mod store;
pub mod testing;

// Primary public API
pub use config::{Config, ConfigError, TenantConfig};
pub use conflict::{ConflictReducer, ConflictView, RecentConflicts, RegionConflict, TickConflicts};
pub use consumer::{MaintenancePolicy, Outcome, StreamConsumer};
pub use epoch::{EpochState, EpochTracker};
pub use fact::{Fact, FactId, FactKind, RegionReport, TickId};
pub use feed::{DecodeError, Envelope, FeedError, FeedSource, ZmqFeed};
pub use inbox::{InboxError, JsonLinesSource, TelemetrySource};
pub use ingest::{IngestError, IngestReport, TelemetryIngestor};
pub use notify::{FanoutReport, NotificationSink, Notifier, SinkError, Target};
pub use poller::{EpochPoller, PollOutcome, SourceError, TickSource};
pub use region::{PopulationFilter, RegionFilter, RegionSnapshot};
pub use store::{Database, FactStore, RegionStore, StoreError};
