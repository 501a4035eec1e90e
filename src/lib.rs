//! Meshline - a multi-pattern messaging library
//!
//! Meshline gives two sides of a connection four message-exchange
//! patterns over one multiplexed, schema-validated transport:
//!
//! - **RPC** - request/response with a JSON Schema on both sides.
//! - **PubSub** - fan-out broadcast to every current subscriber.
//! - **PushPull** - round-robin work distribution with server-side
//!   queueing when no worker is connected.
//! - **SharedObject** - a server-owned document replicated to
//!   subscribers as an initial snapshot plus a versioned diff stream.
//!
//! # Quick start
//!
//! ```no_run
//! use meshline::descriptor::{Descriptor, EndpointDescriptor, EndpointKind, TransportConfig};
//! use meshline::server::dispatch::HandlerRegistry;
//! use meshline::server::Service;
//! use meshline::config::ServiceOptions;
//! use dashmap::DashMap;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = Descriptor {
//!     transport: TransportConfig {
//!         server: "127.0.0.1:9000".into(),
//!         client: "127.0.0.1:9000".into(),
//!     },
//!     endpoints: vec![EndpointDescriptor {
//!         name: "echo".into(),
//!         kind: EndpointKind::Rpc {
//!             request_schema: json!({"type": "object"}),
//!             reply_schema: json!({"type": "object"}),
//!         },
//!     }],
//! };
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register("echo", Box::new(|input| Box::pin(async move { Ok(input) })));
//!
//! let service = Service::bind(descriptor, handlers, DashMap::new(), ServiceOptions::default()).await?;
//! # service.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod frame;
pub mod path;
pub mod schema;
pub mod track;
pub mod transport;

pub mod client;
pub mod server;

pub use client::Client;
pub use descriptor::{Descriptor, EndpointDescriptor, EndpointKind, TransportConfig};
pub use error::{ErrorCode, MeshError, MeshResult};
pub use frame::Frame;
pub use path::{Path, PathSegment};
pub use server::Service;
