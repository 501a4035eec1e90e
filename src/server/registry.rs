//! Server endpoint registry.
//!
//! One `EndpointState` per descriptor entry, plus the live connection
//! table used to route broadcasts. `DashMap`/`DashSet` give lock-free
//! fan-out over subscriber sets. Per-endpoint critical sections are
//! plain `std::sync::Mutex`: every guard is dropped before the next
//! `.await`, so there's no reason to pay for an async mutex here.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::descriptor::{Descriptor, EndpointKind};
use crate::error::{MeshError, MeshResult};
use crate::frame::Frame;
use crate::schema::CompiledSchema;

use super::shared_object::SharedObjectEndpoint;
use super::ConnectionId;

pub struct RpcState {
    pub request_schema: Arc<CompiledSchema>,
    pub reply_schema: Arc<CompiledSchema>,
}

pub struct PubSubState {
    pub message_schema: CompiledSchema,
    pub subscribers: DashSet<ConnectionId>,
}

pub struct PushPullState {
    pub message_schema: CompiledSchema,
    pub subscribers: Mutex<Vec<ConnectionId>>,
    pub next: AtomicUsize,
    pub queue: Mutex<VecDeque<Value>>,
}

pub struct SharedObjectState {
    pub engine: Mutex<SharedObjectEndpoint>,
    pub subscribers: DashSet<ConnectionId>,
    pub auto_notify_pending: AtomicBool,
}

pub enum EndpointState {
    Rpc(RpcState),
    PubSub(PubSubState),
    PushPull(PushPullState),
    SharedObject(SharedObjectState),
}

pub struct Registry {
    endpoints: DashMap<String, EndpointState>,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Frame>>,
    next_connection_id: AtomicU64,
}

impl Registry {
    pub fn new(descriptor: &Descriptor, initials: &DashMap<String, Value>) -> MeshResult<Self> {
        let endpoints = DashMap::new();
        for ep in &descriptor.endpoints {
            let state = match &ep.kind {
                EndpointKind::Rpc {
                    request_schema,
                    reply_schema,
                } => EndpointState::Rpc(RpcState {
                    request_schema: Arc::new(CompiledSchema::compile(request_schema)?),
                    reply_schema: Arc::new(CompiledSchema::compile(reply_schema)?),
                }),
                EndpointKind::PubSub { message_schema } => EndpointState::PubSub(PubSubState {
                    message_schema: CompiledSchema::compile(message_schema)?,
                    subscribers: DashSet::new(),
                }),
                EndpointKind::PushPull { message_schema } => {
                    EndpointState::PushPull(PushPullState {
                        message_schema: CompiledSchema::compile(message_schema)?,
                        subscribers: Mutex::new(Vec::new()),
                        next: AtomicUsize::new(0),
                        queue: Mutex::new(VecDeque::new()),
                    })
                }
                EndpointKind::SharedObject {
                    object_schema,
                    auto_notify,
                } => {
                    let schema = CompiledSchema::compile(object_schema)?;
                    let initial = initials.get(&ep.name).map(|v| v.clone()).ok_or_else(|| {
                        MeshError::Internal(format!(
                            "no initial value supplied for SharedObject '{}'",
                            ep.name
                        ))
                    })?;
                    EndpointState::SharedObject(SharedObjectState {
                        engine: Mutex::new(SharedObjectEndpoint::new(
                            initial, schema, *auto_notify,
                        )?),
                        subscribers: DashSet::new(),
                        auto_notify_pending: AtomicBool::new(false),
                    })
                }
            };
            endpoints.insert(ep.name.clone(), state);
        }
        Ok(Registry {
            endpoints,
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub fn get(
        &self,
        name: &str,
    ) -> MeshResult<dashmap::mapref::one::Ref<'_, String, EndpointState>> {
        self.endpoints
            .get(name)
            .ok_or_else(|| MeshError::UnknownEndpoint {
                endpoint: name.to_string(),
            })
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Clone the request/reply schema `Arc`s out so a caller can validate
    /// across an `.await` point without holding this map's shard lock.
    pub fn rpc_schemas(&self, name: &str) -> MeshResult<(Arc<CompiledSchema>, Arc<CompiledSchema>)> {
        let entry = self.get(name)?;
        match entry.value() {
            EndpointState::Rpc(state) => {
                Ok((state.request_schema.clone(), state.reply_schema.clone()))
            }
            _ => Err(MeshError::UnknownEndpoint {
                endpoint: name.to_string(),
            }),
        }
    }

    pub fn add_connection(&self, sender: mpsc::UnboundedSender<Frame>) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, sender);
        id
    }

    pub fn remove_connection(&self, id: ConnectionId) {
        self.connections.remove(&id);
        for entry in self.endpoints.iter() {
            match entry.value() {
                EndpointState::PubSub(state) => {
                    state.subscribers.remove(&id);
                }
                EndpointState::PushPull(state) => {
                    state.subscribers.lock().unwrap().retain(|c| *c != id);
                }
                EndpointState::SharedObject(state) => {
                    state.subscribers.remove(&id);
                }
                EndpointState::Rpc(_) => {}
            }
        }
    }

    pub fn send_to(&self, id: ConnectionId, frame: Frame) -> MeshResult<()> {
        let sender = self
            .connections
            .get(&id)
            .ok_or_else(|| MeshError::ConnectionFailed {
                reason: format!("connection {id} is gone"),
            })?;
        sender
            .send(frame)
            .map_err(|_| MeshError::ConnectionFailed {
                reason: format!("connection {id} is gone"),
            })
    }

    pub fn broadcast_heartbeat(&self, frequency_ms: u64) {
        for entry in self.connections.iter() {
            let _ = entry.value().send(Frame::Heartbeat { frequency_ms });
        }
    }

    pub fn has_connections(&self) -> bool {
        !self.connections.is_empty()
    }

    /// PubSub `send`: fire-and-forget to every current subscriber.
    pub fn pubsub_send(&self, endpoint: &str, message: Value) -> MeshResult<()> {
        let entry = self.get(endpoint)?;
        let EndpointState::PubSub(state) = entry.value() else {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        state.message_schema.validate(&message)?;
        let serialized = state.message_schema.serialize_dates(&message);
        let frame = Frame::Message {
            endpoint: endpoint.to_string(),
            message: serialized,
        };
        for id in state.subscribers.iter() {
            let _ = self.send_to(*id, frame.clone());
        }
        Ok(())
    }

    /// PushPull `push`: round-robin among subscribers, queueing if
    /// none are connected.
    pub fn push_pull_push(&self, endpoint: &str, message: Value) -> MeshResult<bool> {
        let entry = self.get(endpoint)?;
        let EndpointState::PushPull(state) = entry.value() else {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        state.message_schema.validate(&message)?;
        let serialized = state.message_schema.serialize_dates(&message);

        let subs = state.subscribers.lock().unwrap();
        if subs.is_empty() {
            drop(subs);
            state.queue.lock().unwrap().push_back(serialized);
            return Ok(false);
        }
        let idx = state.next.fetch_add(1, Ordering::Relaxed) % subs.len();
        let target = subs[idx];
        drop(subs);
        self.send_to(
            target,
            Frame::Message {
                endpoint: endpoint.to_string(),
                message: serialized,
            },
        )?;
        Ok(true)
    }

    /// Add `id` as a worker for a PushPull endpoint, draining any queued
    /// backlog to it before it joins normal round-robin.
    pub fn push_pull_subscribe(&self, endpoint: &str, id: ConnectionId) -> MeshResult<()> {
        let entry = self.get(endpoint)?;
        let EndpointState::PushPull(state) = entry.value() else {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        let mut backlog = Vec::new();
        {
            let mut queue = state.queue.lock().unwrap();
            backlog.extend(queue.drain(..));
        }
        for message in backlog {
            self.send_to(
                id,
                Frame::Message {
                    endpoint: endpoint.to_string(),
                    message,
                },
            )?;
        }
        state.subscribers.lock().unwrap().push(id);
        Ok(())
    }

    pub fn pubsub_subscribe(&self, endpoint: &str, id: ConnectionId) -> MeshResult<()> {
        let entry = self.get(endpoint)?;
        let EndpointState::PubSub(state) = entry.value() else {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        state.subscribers.insert(id);
        Ok(())
    }

    pub fn unsubscribe(&self, endpoint: &str, id: ConnectionId) -> MeshResult<()> {
        let entry = self.get(endpoint)?;
        match entry.value() {
            EndpointState::PubSub(state) => {
                state.subscribers.remove(&id);
            }
            EndpointState::PushPull(state) => {
                state.subscribers.lock().unwrap().retain(|c| *c != id);
            }
            EndpointState::SharedObject(state) => {
                state.subscribers.remove(&id);
            }
            EndpointState::Rpc(_) => {}
        }
        Ok(())
    }

    /// Init-before-add: send `init` on `id` and add it to the
    /// broadcast set atomically with respect to `notify`, by holding the
    /// endpoint's engine lock across both steps.
    pub fn shared_object_subscribe(&self, endpoint: &str, id: ConnectionId) -> MeshResult<()> {
        let entry = self.get(endpoint)?;
        let EndpointState::SharedObject(state) = entry.value() else {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        let engine = state.engine.lock().unwrap();
        let init = Frame::Init {
            endpoint: endpoint.to_string(),
            data: engine.data().clone(),
            v: engine.version(),
        };
        self.send_to(id, init)?;
        state.subscribers.insert(id);
        Ok(())
    }
}
