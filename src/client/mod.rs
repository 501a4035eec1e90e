//! Client-side components: reconnect supervisor, heartbeat watchdog,
//! pending-RPC correlation, SharedObject replica state machine, and the
//! `Client` facade that ties them together.

pub mod client;
pub mod heartbeat;
pub mod pending_rpc;
pub mod reconnect;
pub mod shared_object;

pub use client::{Client, SharedObjectReplica};
pub use shared_object::ReplicaState;
