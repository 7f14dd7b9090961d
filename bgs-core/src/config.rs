//! Daemon configuration: environment variables and the tenant file.

use crate::feed::DEFAULT_FEED_ENDPOINT;
use crate::notify::Target;
use crate::poller::DEFAULT_POLL_INTERVAL;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tenant file: {0}")]
    Tenants(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Runtime settings for the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Feed facts and region snapshots.
    pub feed_database: PathBuf,
    /// Telemetry facts uploaded by commanders.
    pub telemetry_database: PathBuf,
    pub feed_endpoint: String,
    /// `None` disables the tick poller.
    pub tick_authority_url: Option<String>,
    pub poll_interval: Duration,
    pub tenants_path: PathBuf,
    /// Line-delimited telemetry batches. `-` reads stdin; `None` disables
    /// telemetry ingestion.
    pub telemetry_inbox: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_database: PathBuf::from("db/bgs_data_eddn.db"),
            telemetry_database: PathBuf::from("db/bgs_data.db"),
            feed_endpoint: DEFAULT_FEED_ENDPOINT.to_string(),
            tick_authority_url: Some(bgs_http::DEFAULT_TICK_URL.to_string()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            tenants_path: PathBuf::from("tenant.json"),
            telemetry_inbox: None,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`. Unset variables keep their
    /// defaults. An empty `TICK_AUTHORITY_URL` disables polling.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup("BGS_FEED_DATABASE") {
            config.feed_database = PathBuf::from(path);
        }
        if let Some(path) = lookup("BGS_TELEMETRY_DATABASE") {
            config.telemetry_database = PathBuf::from(path);
        }
        if let Some(endpoint) = lookup("EDDN_ENDPOINT") {
            config.feed_endpoint = endpoint;
        }
        if let Some(url) = lookup("TICK_AUTHORITY_URL") {
            let url = url.trim().to_string();
            config.tick_authority_url = (!url.is_empty()).then_some(url);
        }
        if let Some(secs) = lookup("TICK_POLL_SECS") {
            config.poll_interval = match secs.trim().parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "TICK_POLL_SECS",
                        value: secs,
                    })
                }
            };
        }
        if let Some(path) = lookup("BGS_TENANTS") {
            config.tenants_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("BGS_TELEMETRY_INBOX") {
            let path = path.trim();
            config.telemetry_inbox = (!path.is_empty()).then(|| PathBuf::from(path));
        }

        Ok(config)
    }
}

/// One tenant from `tenant.json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Faction whose conflicts are reported after each tick.
    #[serde(default)]
    pub faction_name: Option<String>,

    #[serde(default)]
    pub discord_webhooks: WebhookUrls,
}

impl TenantConfig {
    /// Name used in logs.
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.api_key.as_deref())
            .unwrap_or("<unnamed>")
    }
}

/// Webhook URLs by purpose.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WebhookUrls {
    /// Channel for tick announcements and conflict reports.
    #[serde(default)]
    pub bgs: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TenantFile {
    Many(Vec<TenantConfig>),
    One(TenantConfig),
}

/// Parse a tenant file holding either one tenant object or a list.
pub fn parse_tenants(json: &str) -> Result<Vec<TenantConfig>, ConfigError> {
    Ok(match serde_json::from_str(json)? {
        TenantFile::Many(tenants) => tenants,
        TenantFile::One(tenant) => vec![tenant],
    })
}

pub fn load_tenants(path: impl AsRef<Path>) -> Result<Vec<TenantConfig>, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_tenants(&json)
}

/// Build webhook targets. Tenants without a usable `bgs` webhook are
/// skipped with a warning.
pub fn targets_from_tenants(tenants: &[TenantConfig]) -> Vec<Target> {
    let mut targets = Vec::new();

    for tenant in tenants {
        let Some(url) = tenant.discord_webhooks.bgs.as_deref().filter(|u| !u.trim().is_empty()) else {
            tracing::warn!(target: "bgs::config", tenant = tenant.label(), "tenant has no bgs webhook, skipping");
            continue;
        };

        match bgs_http::Webhook::new(url) {
            Ok(webhook) => {
                let mut target = Target::new(tenant.label(), Arc::new(webhook));
                if let Some(faction) = tenant.faction_name.as_deref().filter(|f| !f.is_empty()) {
                    target = target.with_faction(faction);
                }
                targets.push(target);
            }
            Err(e) => {
                tracing::warn!(target: "bgs::config", tenant = tenant.label(), error = %e, "invalid webhook, skipping");
            }
        }
    }

    targets
}
