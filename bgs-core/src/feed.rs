//! The inbound EDDN feed: transport and envelope decoding.
//!
//! Every feed message is a zlib-compressed JSON envelope:
//!
//! ```json
//! { "$schemaRef": "...", "header": { "gatewayTimestamp": "..." }, "message": { "event": "FSDJump", ... } }
//! ```

use crate::fact::{parse_time, Fact, FactId, FactKind, RegionReport, TickId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use thiserror::Error;
use zeromq::{Socket, SocketRecv, SubSocket};

/// Public EDDN relay.
pub const DEFAULT_FEED_ENDPOINT: &str = "tcp://eddn.edcd.io:9500";

/// Errors from decoding a single feed message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has no message object")]
    MissingMessage,

    #[error("message has no event name")]
    MissingEvent,

    #[error("unreadable region report: {0}")]
    Report(serde_json::Error),
}

/// Errors from the feed transport.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),

    #[error("feed closed")]
    Closed,
}

/// A source of raw feed frames.
#[async_trait]
pub trait FeedSource: Send {
    /// Wait for the next raw (still compressed) message.
    async fn next_frame(&mut self) -> Result<Vec<u8>, FeedError>;
}

/// ZeroMQ SUB socket subscribed to every topic of a relay.
pub struct ZmqFeed {
    socket: SubSocket,
    endpoint: String,
}

impl ZmqFeed {
    /// Connect and subscribe to the relay at `endpoint`.
    pub async fn connect(endpoint: &str) -> Result<Self, FeedError> {
        let mut socket = SubSocket::new();
        socket
            .connect(endpoint)
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        socket
            .subscribe("")
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl FeedSource for ZmqFeed {
    async fn next_frame(&mut self) -> Result<Vec<u8>, FeedError> {
        let message = self
            .socket
            .recv()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        message
            .into_vec()
            .into_iter()
            .next()
            .map(|frame| frame.to_vec())
            .ok_or_else(|| FeedError::Transport("empty message".to_string()))
    }
}

/// Inflate a zlib-compressed frame.
pub fn inflate(frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(frame.len() * 4);
    ZlibDecoder::new(frame).read_to_end(&mut out)?;
    Ok(out)
}

/// A decoded feed envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub schema_ref: String,
    pub gateway_timestamp: Option<DateTime<Utc>>,
    /// The whole envelope as received.
    pub payload: Value,
}

impl Envelope {
    /// Inflate and parse a raw frame.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let json = inflate(frame)?;
        Self::from_slice(&json)
    }

    /// Parse an uncompressed envelope.
    pub fn from_slice(json: &[u8]) -> Result<Self, DecodeError> {
        Self::from_value(serde_json::from_slice(json)?)
    }

    pub fn from_value(payload: Value) -> Result<Self, DecodeError> {
        if !payload.get("message").is_some_and(Value::is_object) {
            return Err(DecodeError::MissingMessage);
        }

        let schema_ref = payload
            .get("$schemaRef")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let gateway_timestamp = payload
            .pointer("/header/gatewayTimestamp")
            .and_then(Value::as_str)
            .and_then(parse_time);

        Ok(Self {
            schema_ref,
            gateway_timestamp,
            payload,
        })
    }

    /// The inner journal message.
    pub fn message(&self) -> &Value {
        &self.payload["message"]
    }

    /// The journal `event` name.
    pub fn event(&self) -> Option<&str> {
        self.message().get("event").and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<FactKind> {
        self.event().map(FactKind::from_event)
    }

    /// Build a fact from this envelope, decoding the region report for
    /// region-bearing kinds.
    pub fn into_fact(self, tick: Option<TickId>, received_at: DateTime<Utc>) -> Result<Fact, DecodeError> {
        let kind = self.kind().ok_or(DecodeError::MissingEvent)?;

        let report = if kind.is_region_bearing() {
            Some(RegionReport::deserialize(self.message()).map_err(DecodeError::Report)?)
        } else {
            None
        };

        Ok(Fact {
            id: FactId::new(),
            kind,
            schema_ref: Some(self.schema_ref),
            gateway_timestamp: self.gateway_timestamp,
            tick_id: tick,
            tick_time: None,
            timestamp: received_at,
            actor: None,
            region: report.as_ref().and_then(|r| r.region.clone()),
            region_address: report.as_ref().and_then(|r| r.address),
            report,
            payload: self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{compress, eddn_envelope};
    use serde_json::json;

    #[test]
    fn test_decode_compressed_envelope() {
        let envelope = eddn_envelope("FSDJump", json!({ "StarSystem": "Sol" }));
        let decoded = Envelope::decode(&compress(&envelope)).unwrap();

        assert_eq!(decoded.event(), Some("FSDJump"));
        assert_eq!(decoded.kind(), Some(FactKind::FsdJump));
        assert!(decoded.schema_ref.contains("journal"));
        assert!(decoded.gateway_timestamp.is_some());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode(b"definitely not zlib"),
            Err(DecodeError::Decompress(_))
        ));
        assert!(matches!(
            Envelope::decode(&compress_raw(b"{ not json")),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Envelope::decode(&compress(&json!({ "header": {} }))),
            Err(DecodeError::MissingMessage)
        ));
    }

    #[test]
    fn test_into_fact_keeps_payload_and_report() {
        let envelope = eddn_envelope(
            "Location",
            json!({ "StarSystem": "Lave", "SystemAddress": 42, "Factions": [] }),
        );
        let received = Utc::now();
        let tick = TickId::new("T1");
        let fact = Envelope::from_value(envelope.clone())
            .unwrap()
            .into_fact(tick.clone(), received)
            .unwrap();

        assert_eq!(fact.kind, FactKind::Location);
        assert_eq!(fact.region.as_deref(), Some("Lave"));
        assert_eq!(fact.region_address, Some(42));
        assert_eq!(fact.tick_id, tick);
        assert_eq!(fact.timestamp, received);
        assert_eq!(fact.payload, envelope);
        assert!(fact.report.is_some());
    }

    #[test]
    fn test_into_fact_reports_bad_shapes() {
        let envelope = eddn_envelope("FSDJump", json!({ "StarSystem": "Sol", "Factions": "oops" }));
        let err = Envelope::from_value(envelope)
            .unwrap()
            .into_fact(None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DecodeError::Report(_)));
    }

    fn compress_raw(bytes: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }
}
