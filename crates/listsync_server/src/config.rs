//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Directory holding workspace documents; `None` keeps them in memory.
    pub data_dir: Option<PathBuf>,
    /// Upper bound on a single notification delivery.
    pub notify_timeout: Duration,
    /// Title of fallback notifications.
    pub notification_title: String,
    /// Icon reference sent with fallback notifications.
    pub notification_icon: String,
    /// Maximum lists (and, separately, items) accepted in one sync.
    pub max_batch: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            data_dir: None,
            notify_timeout: Duration::from_secs(5),
            notification_title: "Lists updated".into(),
            notification_icon: "/pwa-192x192.png".into(),
            max_batch: 10_000,
        }
    }

    /// Persists workspaces under `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the per-delivery notification timeout.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Sets the notification title.
    pub fn with_notification_title(mut self, title: impl Into<String>) -> Self {
        self.notification_title = title.into();
        self
    }

    /// Sets the notification icon reference.
    pub fn with_notification_icon(mut self, icon: impl Into<String>) -> Self {
        self.notification_icon = icon.into();
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 3000)))
    }
}
