//! Configuration for the sync agent.

use crate::error::{SyncError, SyncResult};
use rand::Rng;
use std::time::Duration;
use url::Url;

/// Configuration for a device's sync agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the sync server, e.g. `http://localhost:3000`.
    pub server_url: String,
    /// Device id, stable across restarts.
    pub device_id: String,
    /// Live channel reconnect behaviour.
    pub reconnect: ReconnectPolicy,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
}

impl AgentConfig {
    /// Creates a new agent configuration.
    pub fn new(server_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            device_id: device_id.into(),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the server URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// WebSocket URL of a workspace's live channel.
    ///
    /// `http` maps to `ws` and `https` to `wss`. The workspace id and the
    /// device id are percent-encoded.
    pub fn live_url(&self, workspace_id: &str) -> SyncResult<Url> {
        let mut url = Url::parse(self.base_url())
            .map_err(|e| SyncError::transport_fatal(format!("invalid server url: {e}")))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SyncError::transport_fatal(format!(
                    "unsupported server url scheme {other}"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| SyncError::transport_fatal(format!("cannot switch to {scheme}")))?;
        url.path_segments_mut()
            .map_err(|()| SyncError::transport_fatal("server url cannot carry a path"))?
            .pop_if_empty()
            .extend(["ws", workspace_id]);
        url.query_pairs_mut().append_pair("deviceId", &self.device_id);
        Ok(url)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000", "")
    }
}

/// Delay schedule between live channel reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl ReconnectPolicy {
    /// Creates a policy with the given initial delay.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
            add_jitter: true,
        }
    }

    /// Constant delay, no growth and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Delay before reconnect attempt `attempt` (0-indexed, counted since
    /// the last successful connect).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
