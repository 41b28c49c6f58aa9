//! Push channel and session configuration.

use std::time::Duration;

use inbox_core::DatastoreConfig;
use url::Url;
use uuid::Uuid;

use crate::backoff::{Backoff, DEFAULT_JITTER, DEFAULT_SCHEDULE};
use crate::heartbeat::{DEFAULT_MAX_OUTSTANDING_PINGS, DEFAULT_PING_INTERVAL};
use crate::protocol::PROTOCOL_VERSION;
use crate::transaction::DEFAULT_RETENTION;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid socket url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("User id must not be empty")]
    MissingUserId,
}

/// Push socket configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base `ws://` or `wss://` endpoint
    pub url: String,
    /// Channel subscribed to on every open
    pub user_id: String,
    /// Bearer token sent as the `auth` query parameter
    pub auth: Option<String>,
    /// Identifies this client instance across reconnects
    pub connection_id: String,
    pub protocol_version: String,
    pub retry_intervals: Vec<Duration>,
    /// Multiplicative jitter applied to each retry interval, `[0, 1]`
    pub jitter: f64,
    pub ping_interval: Duration,
    pub max_outstanding_pings: u32,
    /// Completed transactions kept for latency stats
    pub transaction_retention: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            user_id: String::new(),
            auth: None,
            connection_id: Uuid::new_v4().to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            retry_intervals: DEFAULT_SCHEDULE.to_vec(),
            jitter: DEFAULT_JITTER,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_outstanding_pings: DEFAULT_MAX_OUTSTANDING_PINGS,
            transaction_retention: DEFAULT_RETENTION,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Short, deterministic retry timings for tests.
    pub fn for_testing(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            retry_intervals: vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
            ],
            jitter: 0.0,
            ..Self::new(url, user_id)
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_intervals.clone(), self.jitter)
    }

    /// Endpoint with the `auth`, `cid`, `iwpv` and `userId` query parameters.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        if self.user_id.is_empty() {
            return Err(ConfigError::MissingUserId);
        }
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        {
            let mut query = url.query_pairs_mut();
            if let Some(auth) = &self.auth {
                query.append_pair("auth", auth);
            }
            query
                .append_pair("cid", &self.connection_id)
                .append_pair("iwpv", &self.protocol_version)
                .append_pair("userId", &self.user_id);
        }
        Ok(url)
    }
}

/// Everything needed to sign a user in.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection: ConnectionConfig,
    pub datastore: DatastoreConfig,
}

impl SessionConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            datastore: DatastoreConfig::default(),
        }
    }
}
