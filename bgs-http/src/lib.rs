//! Minimal HTTP client for the BGS tick pipeline.
//!
//! This crate provides two small clients:
//! - [`TickAuthority`] reads the canonical galaxy tick (`lastGalaxyTick`)
//! - [`Webhook`] posts plain text messages to a chat webhook

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Tick endpoint used by the community tick tracker.
pub const DEFAULT_TICK_URL: &str = "http://tick.infomancer.uk/galtick.json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur when talking to the tick authority or a webhook.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

// ============================================================================
// Tick authority
// ============================================================================

/// Client for the external tick authority.
#[derive(Clone)]
pub struct TickAuthority {
    client: reqwest::Client,
    url: String,
}

impl TickAuthority {
    /// Create a client for the given tick URL.
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        Self::with_timeout(url, REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("tick authority URL is empty".to_string()));
        }
        Ok(Self {
            client: build_client(timeout)?,
            url,
        })
    }

    /// The URL this client polls.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the identifier of the most recent galaxy tick.
    pub async fn latest_tick(&self) -> Result<String, Error> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_tick_body(&body)
    }
}

#[derive(Debug, Deserialize)]
struct TickBody {
    #[serde(rename = "lastGalaxyTick", default)]
    last_galaxy_tick: Option<serde_json::Value>,
}

/// Extract `lastGalaxyTick` from a tick authority response body.
///
/// The identifier is opaque: strings are taken as-is, any other JSON scalar
/// is rendered to its textual form.
pub fn parse_tick_body(body: &str) -> Result<String, Error> {
    let parsed: TickBody =
        serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;

    let tick = match parsed.last_galaxy_tick {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    if tick.trim().is_empty() {
        return Err(Error::Parse("no lastGalaxyTick in response".to_string()));
    }
    Ok(tick)
}

// ============================================================================
// Webhooks
// ============================================================================

/// A chat webhook that accepts `{"content": "..."}` posts.
#[derive(Clone)]
pub struct Webhook {
    client: reqwest::Client,
    url: String,
}

/// Body posted to a webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookMessage {
    pub content: String,
}

impl WebhookMessage {
    /// Create a message with the given text.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Webhook {
    /// Create a webhook client for the given URL.
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("webhook URL is empty".to_string()));
        }
        Ok(Self {
            client: build_client(REQUEST_TIMEOUT)?,
            url,
        })
    }

    /// Post a text message. One attempt, no retry.
    pub async fn post(&self, content: &str) -> Result<(), Error> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookMessage::new(content))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if is_delivered(status) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Webhooks answer 204 by default and 200 when asked to wait for the message.
fn is_delivered(status: StatusCode) -> bool {
    status == StatusCode::NO_CONTENT || status == StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tick_string() {
        let tick = parse_tick_body(r#"{"lastGalaxyTick":"2024-01-01T12:00:00Z"}"#).unwrap();
        assert_eq!(tick, "2024-01-01T12:00:00Z");
    }

    #[test]
    fn test_parse_tick_non_string() {
        let tick = parse_tick_body(r#"{"lastGalaxyTick":1704110400}"#).unwrap();
        assert_eq!(tick, "1704110400");
    }

    #[test]
    fn test_parse_tick_missing() {
        assert!(matches!(parse_tick_body("{}"), Err(Error::Parse(_))));
        assert!(matches!(
            parse_tick_body(r#"{"lastGalaxyTick":""}"#),
            Err(Error::Parse(_))
        ));
        assert!(matches!(parse_tick_body("not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_empty_urls_rejected() {
        assert!(matches!(TickAuthority::new("  "), Err(Error::Config(_))));
        assert!(matches!(Webhook::new(""), Err(Error::Config(_))));
    }

    #[test]
    fn test_authority_keeps_url() {
        let authority = TickAuthority::new(DEFAULT_TICK_URL).unwrap();
        assert_eq!(authority.url(), DEFAULT_TICK_URL);
    }

    #[test]
    fn test_delivered_statuses() {
        assert!(is_delivered(StatusCode::NO_CONTENT));
        assert!(is_delivered(StatusCode::OK));
        assert!(!is_delivered(StatusCode::CREATED));
        assert!(!is_delivered(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_webhook_message_body() {
        let json = serde_json::to_value(WebhookMessage::new("hello")).unwrap();
        assert_eq!(json, serde_json::json!({ "content": "hello" }));
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_network_error() {
        let authority =
            TickAuthority::with_timeout("http://127.0.0.1:9/galtick.json", Duration::from_secs(2))
                .unwrap();
        let err = authority.latest_tick().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
