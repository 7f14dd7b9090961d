//! Telemetry inbox: batches of journal events read as line-delimited JSON.
//!
//! Each non-blank line is either one event object or an array of events
//! forming one batch. The daemon reads the inbox from a file or stdin and
//! hands every batch to the [`TelemetryIngestor`].

use crate::ingest::TelemetryIngestor;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// Errors from reading the inbox.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The line is consumed; reading may continue.
    #[error("line {line} is not JSON: {source}")]
    Json {
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// A source of telemetry batches.
#[async_trait]
pub trait TelemetrySource: Send {
    /// The next batch, or `None` once the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, InboxError>;
}

/// Reads batches from line-delimited JSON.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, InboxError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TelemetrySource for JsonLinesSource<R> {
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>, InboxError> {
        while let Some(text) = self.lines.next_line().await? {
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&text).map_err(|source| InboxError::Json {
                line: self.line,
                source,
            })?;
            return Ok(Some(match value {
                Value::Array(events) => events,
                event => vec![event],
            }));
        }
        Ok(None)
    }
}

impl TelemetryIngestor {
    /// Ingest every batch from `source` until it is exhausted. Rejected
    /// batches and unreadable lines are logged and skipped.
    pub async fn run(&self, source: &mut impl TelemetrySource) {
        tracing::info!(target: "bgs::ingest", "telemetry inbox open");

        loop {
            match source.next_batch().await {
                Ok(Some(batch)) => match self.ingest(&batch).await {
                    Ok(report) => {
                        tracing::debug!(target: "bgs::ingest", appended = report.appended, changed = report.tick_changed, "batch ingested");
                    }
                    Err(e) => tracing::warn!(target: "bgs::ingest", error = %e, "telemetry batch rejected"),
                },
                Ok(None) => {
                    tracing::info!(target: "bgs::ingest", "telemetry inbox exhausted");
                    return;
                }
                Err(e @ InboxError::Json { .. }) => {
                    tracing::warn!(target: "bgs::ingest", error = %e, "skipping unreadable telemetry line");
                }
                Err(e) => {
                    tracing::error!(target: "bgs::ingest", error = %e, "telemetry inbox failed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochTracker;
    use crate::fact::TickId;
    use crate::store::{Database, FactStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lines_become_batches() {
        let input: &[u8] = b"{\"event\":\"Docked\"}\n\n[{\"a\":1},{\"b\":2}]\nnot json\n";
        let mut source = JsonLinesSource::new(input);

        assert_eq!(source.next_batch().await.unwrap().unwrap().len(), 1);
        assert_eq!(source.next_batch().await.unwrap().unwrap().len(), 2);
        assert!(matches!(
            source.next_batch().await,
            Err(InboxError::Json { line: 4, .. })
        ));
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_ingests_and_observes() {
        let facts = FactStore::new(Database::open_in_memory().unwrap());
        let tracker = Arc::new(EpochTracker::new());
        let ingestor = TelemetryIngestor::new(facts.clone(), tracker.clone());

        let input = concat!(
            r#"[{"event":"FSDJump","timestamp":"2024-01-01T00:00:00Z","tickid":"T5","cmdr":"A","StarSystem":"Sol"}]"#,
            "\n",
            "garbage\n",
            r#"{"event":"Docked","timestamp":"2024-01-01T00:00:00Z"}"#,
            "\n",
            r#"{"event":"Docked","timestamp":"2024-01-01T00:01:00Z","tickid":"T5"}"#,
            "\n",
        );
        let mut source = JsonLinesSource::new(input.as_bytes());
        ingestor.run(&mut source).await;

        assert_eq!(tracker.current(), TickId::new("T5"));
        // The batch missing `tickid` is rejected whole.
        assert_eq!(facts.count().unwrap(), 2);
    }
}
