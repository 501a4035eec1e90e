//! Server half: endpoint registry, SharedObject engine, handler
//! dispatch, heartbeat, per-connection frame loop, and the `Service`
//! facade that ties them together.

pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod registry;
pub mod service;
pub mod shared_object;

/// Opaque per-connection identity, assigned by `Registry::add_connection`.
pub type ConnectionId = u64;

pub use service::Service;
