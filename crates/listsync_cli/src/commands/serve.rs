//! Serve command implementation.

use listsync_server::{http, ServerConfig, SyncServer};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Options for the serve command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to bind to.
    pub host: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Directory holding workspace documents.
    pub data_dir: Option<PathBuf>,
    /// Per-delivery notification timeout.
    pub notify_timeout_ms: u64,
    /// Maximum records per sync.
    pub max_batch: usize,
}

impl ServeOptions {
    /// Builds the server configuration.
    pub fn config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(SocketAddr::new(self.host, self.port))
            .with_notify_timeout(Duration::from_millis(self.notify_timeout_ms))
            .with_max_batch(self.max_batch);
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir.clone());
        }
        config
    }
}

/// Runs the serve command until Ctrl-C.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = options.config();
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async move {
        let server = Arc::new(SyncServer::open(config)?);
        info!(addr = %server.config().bind_addr, "starting listsync server");

        http::serve(server, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        })
        .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
