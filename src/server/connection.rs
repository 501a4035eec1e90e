//! Per-connection frame loop. One `tokio::task` per client connection:
//! inbound frames and outbound frames destined for this connection
//! interleave on a single `select!`, so ordering guarantees stay
//! per-connection, not global.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::descriptor::{Descriptor, EndpointKind};
use crate::error::MeshError;
use crate::frame::Frame;
use crate::transport::Transport;

use super::dispatch::{self, HandlerRegistry};
use super::registry::Registry;
use super::ConnectionId;

/// Drive one connection until the transport closes or a protocol
/// violation tears it down. Returns once the connection is fully
/// unregistered from `registry`.
pub async fn run(
    mut transport: Box<dyn Transport>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerRegistry>,
    descriptor: Arc<Descriptor>,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let id = registry.add_connection(outbound_tx);
    tracing::debug!(connection = id, "connection accepted");

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if transport.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    Ok(Some(frame)) => {
                        if let Err(e) = handle_inbound(&registry, &handlers, &descriptor, id, frame).await {
                            tracing::warn!(connection = id, error = %e, "protocol violation, closing connection");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(connection = id, error = %e, "transport error, closing connection");
                        break;
                    }
                }
            }
        }
    }

    registry.remove_connection(id);
    let _ = transport.close().await;
    tracing::debug!(connection = id, "connection closed");
}

async fn handle_inbound(
    registry: &Arc<Registry>,
    handlers: &Arc<HandlerRegistry>,
    descriptor: &Arc<Descriptor>,
    id: ConnectionId,
    frame: Frame,
) -> Result<(), MeshError> {
    match frame {
        Frame::Sub { endpoint } => {
            let kind = &descriptor
                .find(&endpoint)
                .ok_or_else(|| MeshError::UnknownEndpoint {
                    endpoint: endpoint.clone(),
                })?
                .kind;
            match kind {
                EndpointKind::PubSub { .. } => registry.pubsub_subscribe(&endpoint, id),
                EndpointKind::PushPull { .. } => registry.push_pull_subscribe(&endpoint, id),
                EndpointKind::SharedObject { .. } => registry.shared_object_subscribe(&endpoint, id),
                EndpointKind::Rpc { .. } => Err(MeshError::Protocol {
                    reason: format!("'{endpoint}' is an RPC endpoint, not subscribable"),
                }),
            }
        }
        Frame::Unsub { endpoint } => registry.unsubscribe(&endpoint, id),
        Frame::RpcReq { id: req_id, endpoint, input } => {
            let registry = registry.clone();
            let handlers = handlers.clone();
            tokio::spawn(async move {
                let response = dispatch::handle_rpc_request(&registry, &handlers, req_id, endpoint, input).await;
                let _ = registry.send_to(id, response);
            });
            Ok(())
        }
        // These types only ever flow server-to-client; a client sending
        // one is a protocol violation.
        Frame::RpcRes { .. }
        | Frame::Message { .. }
        | Frame::Init { .. }
        | Frame::Update { .. }
        | Frame::Heartbeat { .. } => Err(MeshError::Protocol {
            reason: "received a server-to-client frame type from a client".into(),
        }),
    }
}
