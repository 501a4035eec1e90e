//! `Service`: the server-side facade.
//!
//! `Service::bind` validates the descriptor, fails fast if any RPC
//! endpoint lacks a registered handler, then spawns the accept loop and
//! the heartbeat task. Everything else — `send`, `push`, the
//! `SharedObjectHandle` — is a thin wrapper over `Registry` plus the
//! auto-notify coalescing task.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;

use crate::config::ServiceOptions;
use crate::descriptor::{Descriptor, EndpointKind};
use crate::error::{MeshError, MeshResult};
use crate::frame::Frame;
use crate::path::{Path, PathSegment};
use crate::transport::ws::WebSocketTransport;
use crate::transport::Transport;

use super::connection;
use super::dispatch::HandlerRegistry;
use super::heartbeat::HeartbeatTask;
use super::registry::{EndpointState, Registry};

/// A bound, running server. Dropping this does not tear anything down —
/// call [`Service::close`] for that; the accept loop and heartbeat task
/// otherwise run for the process lifetime.
pub struct Service {
    registry: Arc<Registry>,
    descriptor: Arc<Descriptor>,
    options: ServiceOptions,
    local_addr: std::net::SocketAddr,
    accept_task: AbortHandle,
    heartbeat: std::sync::Mutex<Option<HeartbeatTask>>,
}

impl Service {
    /// Bind `descriptor.transport.server` and start serving. Fails fast
    /// (`MeshError::MissingHandler`) if any `Rpc` endpoint has no handler
    /// registered — a server never accepts a connection it cannot
    /// correctly serve.
    pub async fn bind(
        descriptor: Descriptor,
        handlers: HandlerRegistry,
        initials: DashMap<String, Value>,
        options: ServiceOptions,
    ) -> MeshResult<Arc<Service>> {
        descriptor.validate()?;
        for ep in &descriptor.endpoints {
            if matches!(ep.kind, EndpointKind::Rpc { .. }) && !handlers.contains(&ep.name) {
                return Err(MeshError::MissingHandler {
                    endpoint: ep.name.clone(),
                });
            }
        }

        let registry = Arc::new(Registry::new(&descriptor, &initials)?);
        let descriptor = Arc::new(descriptor);
        let handlers = Arc::new(handlers);
        let listener = TcpListener::bind(&descriptor.transport.server).await?;
        let local_addr = listener.local_addr()?;

        let accept_registry = registry.clone();
        let accept_descriptor = descriptor.clone();
        let heartbeat_ms = options.heartbeat_ms;
        let heartbeat_slot: Arc<std::sync::Mutex<Option<HeartbeatTask>>> =
            Arc::new(std::sync::Mutex::new(None));
        let accept_heartbeat_slot = heartbeat_slot.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        tracing::warn!(error = %e, peer = %peer, "websocket handshake failed");
                        continue;
                    }
                };
                {
                    let mut slot = accept_heartbeat_slot.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(HeartbeatTask::spawn(accept_registry.clone(), heartbeat_ms));
                    }
                }
                let transport: Box<dyn Transport> = Box::new(WebSocketTransport::new(ws));
                tokio::spawn(connection::run(
                    transport,
                    accept_registry.clone(),
                    handlers.clone(),
                    accept_descriptor.clone(),
                ));
            }
        })
        .abort_handle();

        let initial_heartbeat = heartbeat_slot.lock().unwrap().take();
        Ok(Arc::new(Service {
            registry,
            descriptor,
            options,
            local_addr,
            accept_task,
            heartbeat: std::sync::Mutex::new(initial_heartbeat),
        }))
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The actual bound address, useful when `descriptor.transport.server`
    /// asked for an ephemeral port (`":0"`).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// PubSub `send`.
    pub fn send(&self, endpoint: &str, message: Value) -> MeshResult<()> {
        self.registry.pubsub_send(endpoint, message)
    }

    /// PushPull `push`. Returns `false` if the message was queued
    /// because no worker is currently connected.
    pub fn push(&self, endpoint: &str, message: Value) -> MeshResult<bool> {
        if let Some(cap) = self.options.push_queue_cap {
            if let Ok(entry) = self.registry.get(endpoint) {
                if let EndpointState::PushPull(state) = entry.value() {
                    if state.queue.lock().unwrap().len() >= cap {
                        return Err(MeshError::QueueFull {
                            endpoint: endpoint.to_string(),
                            cap,
                        });
                    }
                }
            }
        }
        self.registry.push_pull_push(endpoint, message)
    }

    /// A typed handle on a SharedObject endpoint.
    pub fn shared_object(&self, endpoint: &str) -> MeshResult<SharedObjectHandle> {
        if !self.registry.has_endpoint(endpoint) {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        }
        Ok(SharedObjectHandle {
            registry: self.registry.clone(),
            endpoint: endpoint.to_string(),
        })
    }

    /// Abort the accept loop and heartbeat task. In-flight connections
    /// finish their current frame but receive no further heartbeats.
    pub fn close(&self) {
        self.accept_task.abort();
        self.heartbeat.lock().unwrap().take();
    }
}

/// Handle for mutating and notifying a SharedObject endpoint from
/// outside the connection loop.
pub struct SharedObjectHandle {
    registry: Arc<Registry>,
    endpoint: String,
}

impl SharedObjectHandle {
    fn with_state<R>(
        &self,
        f: impl FnOnce(&super::registry::SharedObjectState) -> MeshResult<R>,
    ) -> MeshResult<R> {
        let entry = self.registry.get(&self.endpoint)?;
        match entry.value() {
            EndpointState::SharedObject(state) => f(state),
            _ => Err(MeshError::UnknownEndpoint {
                endpoint: self.endpoint.clone(),
            }),
        }
    }

    pub fn data(&self) -> MeshResult<Value> {
        self.with_state(|state| Ok(state.engine.lock().unwrap().data().clone()))
    }

    pub fn set(&self, path: &[PathSegment], value: Value) -> MeshResult<()> {
        self.with_state(|state| {
            state.engine.lock().unwrap().doc_mut().set(path, value);
            Ok(())
        })?;
        self.schedule_auto_notify()
    }

    pub fn delete(&self, path: &[PathSegment]) -> MeshResult<()> {
        self.with_state(|state| {
            state.engine.lock().unwrap().doc_mut().delete(path);
            Ok(())
        })?;
        self.schedule_auto_notify()
    }

    pub fn mutate(&self, path: &[PathSegment], f: impl FnOnce(&mut Value)) -> MeshResult<()> {
        self.with_state(|state| {
            state.engine.lock().unwrap().doc_mut().mutate(path, f);
            Ok(())
        })?;
        self.schedule_auto_notify()
    }

    /// Manual notify: diff the whole document (or just `hint`) and
    /// broadcast immediately, regardless of `auto_notify`.
    pub fn notify_hint(&self, hint: Option<Path>) -> MeshResult<()> {
        let warn = self.with_state(|state| {
            let mut engine = state.engine.lock().unwrap();
            Ok(engine.note_manual_notify())
        })?;
        if warn {
            tracing::warn!(endpoint = %self.endpoint, "manual notify() called on an auto_notify endpoint");
        }
        let paths = vec![hint.unwrap_or_default()];
        self.run_notify(paths)
    }

    pub fn notify(&self) -> MeshResult<()> {
        self.notify_hint(None)
    }

    fn schedule_auto_notify(&self) -> MeshResult<()> {
        let should_spawn = self.with_state(|state| {
            if !state.engine.lock().unwrap().auto_notify {
                return Ok(false);
            }
            Ok(!state.auto_notify_pending.swap(true, Ordering::AcqRel))
        })?;
        if !should_spawn {
            return Ok(());
        }
        let registry = self.registry.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let handle = SharedObjectHandle { registry, endpoint };
            let paths = match handle.with_state(|state| Ok(state.engine.lock().unwrap().take_dirty()))
            {
                Ok(p) => p,
                Err(_) => return,
            };
            let _ = handle.with_state(|state| {
                state.auto_notify_pending.store(false, Ordering::Release);
                Ok(())
            });
            if let Err(e) = handle.run_notify(paths) {
                tracing::warn!(endpoint = %handle.endpoint, error = %e, "auto-notify failed");
            }
        });
        Ok(())
    }

    /// Version bump and broadcast must happen under one continuous hold
    /// of the engine lock — otherwise a `shared_object_subscribe`
    /// running between them reads the post-bump version into its `init`
    /// and then also receives the broadcast `update`, which looks like
    /// a spurious gap on the client.
    fn run_notify(&self, paths: Vec<Path>) -> MeshResult<()> {
        self.with_state(|state| {
            let mut engine = state.engine.lock().unwrap();
            let Some(outcome) = engine.notify(paths)? else {
                return Ok(());
            };
            let frame = Frame::Update {
                endpoint: self.endpoint.clone(),
                diffs: outcome.diffs,
                v: outcome.version,
                now: outcome.now,
            };
            for id in state.subscribers.iter() {
                let _ = self.registry.send_to(*id, frame.clone());
            }
            Ok(())
        })
    }
}
