//! Server-side heartbeat broadcast.
//!
//! One `tokio::time::interval` at `heartbeat_ms`, started when the first
//! connection is accepted and aborted on `Service::close`. Starting on
//! first connection rather than first broadcast-capable endpoint means
//! no client ever receives a non-initialized heartbeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

use super::registry::Registry;

pub struct HeartbeatTask {
    abort: AbortHandle,
}

impl HeartbeatTask {
    pub fn spawn(registry: Arc<Registry>, heartbeat_ms: u64) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(heartbeat_ms));
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                registry.broadcast_heartbeat(heartbeat_ms);
            }
        });
        HeartbeatTask {
            abort: handle.abort_handle(),
        }
    }
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.abort.abort();
    }
}
