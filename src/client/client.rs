//! `Client`: the client-side facade. One supervisor task owns reconnect;
//! one connection task at a time owns the transport and the `select!`
//! frame loop, same shape as `server::connection::run`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::ClientOptions;
use crate::descriptor::{Descriptor, EndpointKind};
use crate::error::{MeshError, MeshResult};
use crate::frame::Frame;
use crate::schema::CompiledSchema;
use crate::transport::ws::WebSocketTransport;
use crate::transport::Transport;

use super::heartbeat::Watchdog;
use super::pending_rpc::PendingRpc;
use super::reconnect::Backoff;
use super::shared_object::{Replica, ReplicaState, UpdateOutcome};

/// How often `run_connection` polls the watchdog for expiry. Independent
/// of `frequency_ms` (unknown until the first heartbeat arrives).
const WATCHDOG_POLL_MS: u64 = 200;

enum EndpointSchemas {
    Rpc {
        request: Arc<CompiledSchema>,
        reply: Arc<CompiledSchema>,
    },
    PubSub {
        message: Arc<CompiledSchema>,
    },
    PushPull {
        message: Arc<CompiledSchema>,
    },
    SharedObject {
        object: Arc<CompiledSchema>,
    },
}

type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct ClientInner {
    descriptor: Descriptor,
    schemas: HashMap<String, EndpointSchemas>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending: PendingRpc,
    subscriptions: DashSet<String>,
    message_handlers: DashMap<String, MessageHandler>,
    replicas: DashMap<String, Mutex<Replica>>,
    watchdog: Mutex<Watchdog>,
    closed: AtomicBool,
    options: ClientOptions,
}

impl ClientInner {
    fn schema_for(&self, endpoint: &str) -> MeshResult<&EndpointSchemas> {
        self.schemas
            .get(endpoint)
            .ok_or_else(|| MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            })
    }

    fn send_frame(&self, frame: Frame) -> MeshResult<()> {
        let guard = self.outbound.lock().unwrap();
        let sender = guard.as_ref().ok_or_else(|| MeshError::ConnectionFailed {
            reason: "not connected".into(),
        })?;
        sender
            .send(frame)
            .map_err(|_| MeshError::ConnectionFailed {
                reason: "connection is gone".into(),
            })
    }
}

/// A running client connection with automatic reconnect. `Drop` does not
/// close it — call [`Client::close`] explicitly.
pub struct Client {
    inner: Arc<ClientInner>,
    supervisor: AbortHandle,
}

/// A handle onto one subscribed SharedObject replica.
pub struct SharedObjectReplica {
    inner: Arc<ClientInner>,
    endpoint: String,
}

impl SharedObjectReplica {
    pub fn data(&self) -> MeshResult<Value> {
        let slot = self
            .inner
            .replicas
            .get(&self.endpoint)
            .ok_or_else(|| MeshError::UnknownEndpoint {
                endpoint: self.endpoint.clone(),
            })?;
        let result = slot
            .lock()
            .unwrap()
            .data()
            .map(|v| v.clone())
            .map_err(|_| MeshError::NotReady {
                endpoint: self.endpoint.clone(),
            });
        result
    }

    pub fn is_ready(&self) -> bool {
        self.inner
            .replicas
            .get(&self.endpoint)
            .map(|slot| slot.lock().unwrap().is_ready())
            .unwrap_or(false)
    }
}

fn compile_schemas(descriptor: &Descriptor) -> MeshResult<HashMap<String, EndpointSchemas>> {
    let mut out = HashMap::new();
    for ep in &descriptor.endpoints {
        let schemas = match &ep.kind {
            EndpointKind::Rpc {
                request_schema,
                reply_schema,
            } => EndpointSchemas::Rpc {
                request: Arc::new(CompiledSchema::compile(request_schema)?),
                reply: Arc::new(CompiledSchema::compile(reply_schema)?),
            },
            EndpointKind::PubSub { message_schema } => EndpointSchemas::PubSub {
                message: Arc::new(CompiledSchema::compile(message_schema)?),
            },
            EndpointKind::PushPull { message_schema } => EndpointSchemas::PushPull {
                message: Arc::new(CompiledSchema::compile(message_schema)?),
            },
            EndpointKind::SharedObject { object_schema, .. } => EndpointSchemas::SharedObject {
                object: Arc::new(CompiledSchema::compile(object_schema)?),
            },
        };
        out.insert(ep.name.clone(), schemas);
    }
    Ok(out)
}

impl Client {
    /// Dial `descriptor.transport.client` and start the reconnect
    /// supervisor. Returns once the first connection attempt is
    /// underway; it need not have succeeded yet (subsequent calls queue
    /// behind reconnect like any transport loss).
    pub async fn connect(descriptor: Descriptor, options: ClientOptions) -> MeshResult<Arc<Client>> {
        descriptor.validate()?;
        let schemas = compile_schemas(&descriptor)?;
        let inner = Arc::new(ClientInner {
            descriptor,
            schemas,
            outbound: Mutex::new(None),
            pending: PendingRpc::new(),
            subscriptions: DashSet::new(),
            message_handlers: DashMap::new(),
            replicas: DashMap::new(),
            watchdog: Mutex::new(Watchdog::new()),
            closed: AtomicBool::new(false),
            options: options.clone(),
        });

        let supervisor_inner = inner.clone();
        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(
                options.reconnect_min_ms,
                options.reconnect_max_ms,
                options.reconnect_jitter,
            );
            loop {
                if supervisor_inner.closed.load(Ordering::Acquire) {
                    return;
                }
                let addr = supervisor_inner.descriptor.transport.client.clone();
                match WebSocketTransport::connect(&addr).await {
                    Ok(transport) => {
                        backoff.reset();
                        run_connection(supervisor_inner.clone(), Box::new(transport)).await;
                        if supervisor_inner.closed.load(Ordering::Acquire) {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "connect failed, backing off");
                    }
                }
                tokio::time::sleep(backoff.next_delay()).await;
            }
        });

        Ok(Arc::new(Client {
            inner,
            supervisor: handle.abort_handle(),
        }))
    }

    /// RPC: validate `input` against the request schema,
    /// send, await the matching `rpc:res`, validate and date-parse the
    /// reply.
    pub async fn call(&self, endpoint: &str, input: Value) -> MeshResult<Value> {
        let EndpointSchemas::Rpc { request, reply } = self.inner.schema_for(endpoint)? else {
            return Err(MeshError::UnknownEndpoint {
                endpoint: endpoint.to_string(),
            });
        };
        request.validate(&input)?;
        let wire_input = request.serialize_dates(&input);

        let (id, rx) = self.inner.pending.register();
        self.inner.send_frame(Frame::RpcReq {
            id,
            endpoint: endpoint.to_string(),
            input: wire_input,
        })?;

        let response = match self.inner.options.rpc_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), rx)
                .await
                .map_err(|_| {
                    self.inner.pending.cancel(id);
                    MeshError::Timeout { timeout_ms: ms }
                })?
                .map_err(|_| MeshError::Cancelled)?,
            None => rx.await.map_err(|_| MeshError::Cancelled)?,
        };

        match response {
            Frame::RpcRes { err: Some(err), .. } => Err(MeshError::Handler {
                endpoint: err.endpoint,
                message: err.message,
                code: err.code,
            }),
            Frame::RpcRes { res: Some(res), .. } => reply.validate_and_parse_dates(res),
            _ => Err(MeshError::Protocol {
                reason: "malformed rpc:res".into(),
            }),
        }
    }

    /// Subscribe to a PubSub or PushPull endpoint; `on_message` runs
    /// inline on the client's event-loop task for each delivered message
    /// (keep it fast — it never suspends the frame loop by design, so it
    /// must not block).
    pub fn subscribe_messages(
        &self,
        endpoint: &str,
        on_message: impl Fn(Value) + Send + Sync + 'static,
    ) -> MeshResult<()> {
        match self.inner.schema_for(endpoint)? {
            EndpointSchemas::PubSub { .. } | EndpointSchemas::PushPull { .. } => {}
            _ => {
                return Err(MeshError::UnknownEndpoint {
                    endpoint: endpoint.to_string(),
                })
            }
        }
        self.inner
            .message_handlers
            .insert(endpoint.to_string(), Arc::new(on_message));
        self.inner.subscriptions.insert(endpoint.to_string());
        self.inner.send_frame(Frame::Sub {
            endpoint: endpoint.to_string(),
        })
    }

    /// Subscribe to a SharedObject endpoint and return a handle onto its
    /// replica. Returns once `sub` is sent, not once `init`
    /// arrives — poll [`SharedObjectReplica::is_ready`] or await on
    /// [`Client::await_ready`].
    pub fn subscribe_shared_object(&self, endpoint: &str) -> MeshResult<SharedObjectReplica> {
        match self.inner.schema_for(endpoint)? {
            EndpointSchemas::SharedObject { .. } => {}
            _ => {
                return Err(MeshError::UnknownEndpoint {
                    endpoint: endpoint.to_string(),
                })
            }
        }
        self.inner
            .replicas
            .entry(endpoint.to_string())
            .or_insert_with(|| Mutex::new(Replica::new()));
        self.inner
            .replicas
            .get(endpoint)
            .unwrap()
            .lock()
            .unwrap()
            .on_subscribe();
        self.inner.subscriptions.insert(endpoint.to_string());
        self.inner.send_frame(Frame::Sub {
            endpoint: endpoint.to_string(),
        })?;
        Ok(SharedObjectReplica {
            inner: self.inner.clone(),
            endpoint: endpoint.to_string(),
        })
    }

    /// Poll until the replica for `endpoint` becomes ready or
    /// `init_timeout_ms` elapses with no `init` frame received.
    pub async fn await_ready(&self, endpoint: &str) -> MeshResult<()> {
        let deadline = Duration::from_millis(self.inner.options.init_timeout_ms);
        let inner = self.inner.clone();
        let endpoint = endpoint.to_string();
        let poll = async move {
            loop {
                let ready = inner
                    .replicas
                    .get(&endpoint)
                    .map(|slot| slot.lock().unwrap().is_ready())
                    .unwrap_or(false);
                if ready {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| MeshError::Timeout {
                timeout_ms: self.inner.options.init_timeout_ms,
            })
    }

    pub fn unsubscribe(&self, endpoint: &str) -> MeshResult<()> {
        self.inner.subscriptions.remove(endpoint);
        self.inner.message_handlers.remove(endpoint);
        if let Some(slot) = self.inner.replicas.get(endpoint) {
            slot.lock().unwrap().on_unsubscribe();
        }
        self.inner.send_frame(Frame::Unsub {
            endpoint: endpoint.to_string(),
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.inner.descriptor
    }

    /// Cancel all pending RPCs, stop the reconnect supervisor, close the
    /// transport.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.pending.cancel_all();
        self.supervisor.abort();
        *self.inner.outbound.lock().unwrap() = None;
    }
}

async fn run_connection(inner: Arc<ClientInner>, mut transport: Box<dyn Transport>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    *inner.outbound.lock().unwrap() = Some(tx.clone());

    for entry in inner.subscriptions.iter() {
        let endpoint = entry.key().clone();
        if let Some(slot) = inner.replicas.get(&endpoint) {
            slot.lock().unwrap().on_subscribe();
        }
        let _ = tx.send(Frame::Sub { endpoint });
    }

    let mut watchdog_ticker = tokio::time::interval(Duration::from_millis(WATCHDOG_POLL_MS));
    watchdog_ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            outbound = rx.recv() => {
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
                        inner.watchdog.lock().unwrap().note_message();
                        if handle_inbound(&inner, frame) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "transport error");
                        break;
                    }
                }
            }
            _ = watchdog_ticker.tick() => {
                if inner.watchdog.lock().unwrap().is_expired() {
                    tracing::warn!("heartbeat watchdog expired, reconnecting");
                    break;
                }
            }
        }
    }

    *inner.outbound.lock().unwrap() = None;
    inner.pending.cancel_all();
    for entry in inner.replicas.iter() {
        entry.value().lock().unwrap().on_disconnected();
    }
    let _ = transport.close().await;
}

/// Applies one inbound frame; returns `true` if the connection must be
/// torn down (forcing the supervisor to redial and replay `sub`).
fn handle_inbound(inner: &Arc<ClientInner>, frame: Frame) -> bool {
    match frame {
        Frame::RpcRes { id, .. } => inner.pending.complete(id, frame),
        Frame::Message { endpoint, message } => {
            let parsed = match inner.schema_for(&endpoint) {
                Ok(EndpointSchemas::PubSub { message: schema })
                | Ok(EndpointSchemas::PushPull { message: schema }) => {
                    schema.validate_and_parse_dates(message)
                }
                _ => Ok(message),
            };
            match parsed {
                Ok(value) => {
                    if let Some(handler) = inner.message_handlers.get(&endpoint) {
                        handler(value);
                    }
                }
                Err(e) => tracing::warn!(endpoint = %endpoint, error = %e, "dropping malformed message"),
            }
        }
        Frame::Init { endpoint, data, v } => {
            let parsed = match inner.schema_for(&endpoint) {
                Ok(EndpointSchemas::SharedObject { object }) => object.validate_and_parse_dates(data),
                _ => Ok(data),
            };
            match parsed {
                Ok(value) => {
                    if let Some(slot) = inner.replicas.get(&endpoint) {
                        slot.lock().unwrap().on_init(value, v);
                    }
                }
                Err(e) => tracing::warn!(endpoint = %endpoint, error = %e, "dropping malformed init"),
            }
        }
        Frame::Update { endpoint, diffs, v, .. } => {
            if let Some(slot) = inner.replicas.get(&endpoint) {
                let mut replica = slot.lock().unwrap();
                match replica.state() {
                    ReplicaState::AwaitingInit => replica.queue_update(v, diffs),
                    ReplicaState::Ready => {
                        if let UpdateOutcome::Gapped = replica.on_update(v, diffs) {
                            drop(replica);
                            tracing::warn!(endpoint = %endpoint, version = v, "version gap, reconnecting");
                            return true;
                        }
                    }
                    ReplicaState::Idle => {}
                }
            }
        }
        Frame::Heartbeat { frequency_ms } => {
            inner.watchdog.lock().unwrap().note_heartbeat(frequency_ms);
        }
        Frame::Sub { .. } | Frame::Unsub { .. } | Frame::RpcReq { .. } => {
            tracing::warn!("received a client-to-server frame type from the server");
        }
    }
    false
}
