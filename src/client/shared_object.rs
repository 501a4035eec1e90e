//! Client-side SharedObject replica state machine.
//!
//! `Replica` is the five-state machine folded to four (`Gapped`
//! transitions straight back to `AwaitingInit`, so it is never an
//! observable resting state). Driven entirely by the owning `Client`'s
//! single event-loop task; `.data()` is the idiomatic substitute for
//! "accessing `data` while non-ready raises" — `Err(MeshError::NotReady)`
//! instead of a panic.

use std::collections::VecDeque;

use serde_json::Value;

use crate::diff::{self, DiffNode};
use crate::error::{MeshError, MeshResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    Idle,
    AwaitingInit,
    Ready,
}

/// Outcome of feeding one `update` frame into a `Ready` replica, telling
/// the caller whether to keep going or to tear the transport down.
pub enum UpdateOutcome {
    Applied,
    Gapped,
}

pub struct Replica {
    state: ReplicaState,
    data: Value,
    installed_version: u64,
    pre_init_queue: VecDeque<(u64, Vec<DiffNode>)>,
}

impl Replica {
    pub fn new() -> Self {
        Replica {
            state: ReplicaState::Idle,
            data: Value::Null,
            installed_version: 0,
            pre_init_queue: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ReplicaState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReplicaState::Ready
    }

    pub fn data(&self) -> MeshResult<&Value> {
        if self.is_ready() {
            Ok(&self.data)
        } else {
            Err(MeshError::NotReady {
                endpoint: String::new(),
            })
        }
    }

    /// `subscribe()`: Idle -> AwaitingInit, also re-entered on reconnect
    /// from any prior state.
    pub fn on_subscribe(&mut self) {
        self.state = ReplicaState::AwaitingInit;
        self.pre_init_queue.clear();
    }

    /// `unsubscribe()`: reset to Idle.
    pub fn on_unsubscribe(&mut self) {
        self.state = ReplicaState::Idle;
        self.data = Value::Null;
        self.installed_version = 0;
        self.pre_init_queue.clear();
    }

    /// Queue an `update` received while `AwaitingInit`; applied or
    /// discarded once `init` arrives.
    pub fn queue_update(&mut self, v: u64, diffs: Vec<DiffNode>) {
        if self.state == ReplicaState::AwaitingInit {
            self.pre_init_queue.push_back((v, diffs));
        }
    }

    /// `init(data, v0)`: install, discard queued updates with `v <= v0`,
    /// apply the rest in order, become `Ready`.
    pub fn on_init(&mut self, data: Value, v0: u64) {
        self.data = data;
        self.installed_version = v0;
        let queued = std::mem::take(&mut self.pre_init_queue);
        for (v, diffs) in queued {
            if v <= v0 {
                continue;
            }
            self.data = diff::apply(&self.data, &diffs);
            self.installed_version = v;
        }
        self.state = ReplicaState::Ready;
    }

    /// `update(v, diffs)` while `Ready`. `Gapped` means the caller must
    /// tear the transport down; the replica itself returns to
    /// `AwaitingInit` immediately (reconnect will drive a fresh `init`).
    pub fn on_update(&mut self, v: u64, diffs: Vec<DiffNode>) -> UpdateOutcome {
        if v == self.installed_version + 1 {
            self.data = diff::apply(&self.data, &diffs);
            self.installed_version = v;
            UpdateOutcome::Applied
        } else {
            self.state = ReplicaState::AwaitingInit;
            self.pre_init_queue.clear();
            UpdateOutcome::Gapped
        }
    }

    /// Transport lost: flush and, if still subscribed, prepare for
    /// reconnect's `sub` replay.
    pub fn on_disconnected(&mut self) {
        if self.state != ReplicaState::Idle {
            self.state = ReplicaState::AwaitingInit;
        }
        self.data = Value::Null;
        self.pre_init_queue.clear();
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}
