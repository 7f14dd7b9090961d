//! BGS tick watcher daemon.
//!
//! Listens to the EDDN relay, keeps the latest snapshot of every region it
//! hears about, and announces galaxy tick changes to tenant webhooks.
//!
//! ```bash
//! RUST_LOG=info cargo run -p bgs-daemon
//! ```

mod report;

use bgs_core::config::{load_tenants, targets_from_tenants};
use bgs_core::{
    Config, ConflictReducer, Database, EpochPoller, EpochTracker, FactStore, JsonLinesSource,
    Notifier, StreamConsumer, TelemetryIngestor, ZmqFeed,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONNECT_RETRY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!(target: "bgs::daemon", error = %e, "invalid configuration, using defaults");
            Config::default()
        }
    };

    if let Some(command) = report::parse_command(&args) {
        return report::run(&config, &command);
    }

    run_daemon(config).await
}

async fn run_daemon(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let feed_db = Database::open(&config.feed_database)?;
    let telemetry = FactStore::new(Database::open(&config.telemetry_database)?);
    let tracker = Arc::new(EpochTracker::new());

    let tenants = match load_tenants(&config.tenants_path) {
        Ok(tenants) => tenants,
        Err(e) => {
            warn!(target: "bgs::daemon", error = %e, "no tenants loaded, notifications disabled");
            Vec::new()
        }
    };
    let notifier = Arc::new(
        Notifier::new(targets_from_tenants(&tenants))
            .with_conflicts(ConflictReducer::new(telemetry.clone())),
    );
    info!(target: "bgs::daemon", targets = notifier.targets().len(), "notification targets ready");

    let poller = match config.tick_authority_url.as_deref() {
        Some(url) => match bgs_http::TickAuthority::new(url) {
            Ok(authority) => {
                let poller = EpochPoller::new(Arc::new(authority), tracker.clone(), notifier.clone())
                    .with_interval(config.poll_interval);
                poller.bootstrap().await;
                Some(poller.spawn())
            }
            Err(e) => {
                warn!(target: "bgs::daemon", error = %e, "tick authority unusable, poller disabled");
                None
            }
        },
        None => {
            warn!(target: "bgs::daemon", "TICK_AUTHORITY_URL is empty, poller disabled");
            None
        }
    };

    let inbox = config.telemetry_inbox.clone().map(|path| {
        let ingestor = TelemetryIngestor::new(telemetry, tracker.clone()).with_notifier(notifier.clone());
        tokio::spawn(read_inbox(path, ingestor))
    });

    let mut consumer = StreamConsumer::new(feed_db).with_tracker(tracker);
    let endpoint = config.feed_endpoint.clone();

    let consume = async move {
        loop {
            match ZmqFeed::connect(&endpoint).await {
                Ok(mut feed) => {
                    info!(target: "bgs::daemon", endpoint = %feed.endpoint(), "connected to feed");
                    consumer.run(&mut feed).await;
                }
                Err(e) => {
                    warn!(target: "bgs::daemon", endpoint = %endpoint, error = %e, "feed connection failed");
                }
            }
            tokio::time::sleep(CONNECT_RETRY).await;
        }
    };

    tokio::select! {
        _ = consume => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!(target: "bgs::daemon", "shutting down");
        }
    }

    for task in [poller, inbox].into_iter().flatten() {
        task.abort();
    }
    Ok(())
}

async fn read_inbox(path: PathBuf, ingestor: TelemetryIngestor) {
    if path.as_os_str() == "-" {
        ingestor.run(&mut JsonLinesSource::stdin()).await;
        return;
    }
    match JsonLinesSource::open(&path).await {
        Ok(mut source) => ingestor.run(&mut source).await,
        Err(e) => {
            warn!(target: "bgs::daemon", path = %path.display(), error = %e, "telemetry inbox unreadable");
        }
    }
}

fn print_help() {
    println!("bgsd - EDDN listener and galaxy tick watcher");
    println!();
    println!("USAGE:");
    println!("  bgsd [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help                Show this help message");
    println!("  --region <NAME>           Print the stored snapshot of a region and exit");
    println!("  --conflicts <FACTION>     Print current and previous tick conflicts and exit");
    println!();
    println!("ENVIRONMENT:");
    println!("  BGS_FEED_DATABASE         Feed database (default: db/bgs_data_eddn.db)");
    println!("  BGS_TELEMETRY_DATABASE    Telemetry database (default: db/bgs_data.db)");
    println!("  EDDN_ENDPOINT             Relay endpoint (default: tcp://eddn.edcd.io:9500)");
    println!("  TICK_AUTHORITY_URL        Tick authority, empty disables polling");
    println!("  TICK_POLL_SECS            Poll interval in seconds (default: 300)");
    println!("  BGS_TENANTS               Tenant file (default: tenant.json)");
    println!("  BGS_TELEMETRY_INBOX       Line-delimited telemetry batches, - for stdin");
    println!("  RUST_LOG                  Log filter, e.g. info or bgs::epoch=debug");
    println!();
    println!("EXAMPLES:");
    println!("  bgsd                                  # Run the daemon");
    println!("  BGS_TELEMETRY_INBOX=- bgsd < uploads.jsonl");
    println!("  bgsd --region Sol");
    println!("  bgsd --conflicts \"East India Company\"");
}
