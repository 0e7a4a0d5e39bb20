//! Relay server: connects upstream, accepts browsers and feeds the hub.
//!
//! Owns the hub handle and the WebSocket accept queue. Runs until the hub
//! exits on its own (upstream lost) or the caller's shutdown future fires.

use crate::config::RelayConfig;
use crate::transport::{irc, websocket};
use ircrelay_core::{spawn_hub, HubExit, RelayError, RelayResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// The relay server instance.
pub struct RelayServer {
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Connect to the IRC server, start the hub and accept WebSocket clients
    /// until `shutdown` resolves or the hub stops.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> RelayResult<HubExit> {
        let (reader, writer) = irc::connect(&self.config.upstream).await?;
        let (hub, mut hub_task) = spawn_hub(reader, writer, self.config.hub.clone());

        let (ws_addr, mut ws_rx) = match websocket::start_listener(self.config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                hub.shutdown().await;
                let _ = hub_task.await;
                return Err(e);
            }
        };
        info!(addr = %ws_addr, "accepting browser clients");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                Some(client) = ws_rx.recv() => {
                    let remote = client.remote_addr();
                    if let Err(e) = hub.register(Arc::new(client)).await {
                        warn!(remote = %remote, error = %e, "could not hand client to hub");
                    }
                }
                exit = &mut hub_task => {
                    return exit.map_err(|e| RelayError::Other(format!("hub task failed: {e}")));
                }
                _ = &mut shutdown => {
                    info!(clients = hub.client_count(), "shutdown requested");
                    hub.shutdown().await;
                    break;
                }
            }
        }

        hub_task
            .await
            .map_err(|e| RelayError::Other(format!("hub task failed: {e}")))
    }
}
