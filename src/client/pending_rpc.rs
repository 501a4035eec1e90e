//! Per-connection pending-RPC map: `id` comes from an
//! `AtomicU64` counter; completion races back through a `oneshot` channel
//! so responses can complete out of submission order (testable property
//! 10).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::frame::Frame;

pub struct PendingRpc {
    next_id: AtomicU64,
    inflight: DashMap<u64, oneshot::Sender<Frame>>,
}

impl PendingRpc {
    pub fn new() -> Self {
        PendingRpc {
            next_id: AtomicU64::new(1),
            inflight: DashMap::new(),
        }
    }

    pub fn register(&self) -> (u64, oneshot::Receiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inflight.insert(id, tx);
        (id, rx)
    }

    /// Route an `rpc:res` frame to its caller. A miss means the caller
    /// already gave up (timeout) or the id is stale; both are silently
    /// dropped.
    pub fn complete(&self, id: u64, frame: Frame) {
        if let Some((_, tx)) = self.inflight.remove(&id) {
            let _ = tx.send(frame);
        }
    }

    pub fn cancel(&self, id: u64) {
        self.inflight.remove(&id);
    }

    /// Drop every sender, so every awaiting receiver errors immediately.
    /// Called when the transport is lost.
    pub fn cancel_all(&self) {
        self.inflight.clear();
    }
}

impl Default for PendingRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn complete_delivers_matching_response() {
        let pending = PendingRpc::new();
        let (id, rx) = pending.register();
        pending.complete(
            id,
            Frame::RpcRes {
                id,
                endpoint: "echo".into(),
                err: None,
                res: Some(json!("HELLO")),
            },
        );
        let frame = rx.await.unwrap();
        match frame {
            Frame::RpcRes { res, .. } => assert_eq!(res, Some(json!("HELLO"))),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_all_errors_every_receiver() {
        let pending = PendingRpc::new();
        let (_id1, rx1) = pending.register();
        let (_id2, rx2) = pending.register();
        pending.cancel_all();
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }
}
