//! Ambient configuration for `Service` and `Client`.
//!
//! Builder-with-validation: accumulate optional fields, `build()` fills
//! defaults and rejects nonsensical combinations.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Server-side tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Heartbeat broadcast interval.
    pub heartbeat_ms: u64,

    /// PushPull queue cap. `None` = unbounded, since no backpressure
    /// limit is ever forced on a caller by default.
    pub push_queue_cap: Option<usize>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            heartbeat_ms: 5000,
            push_queue_cap: None,
        }
    }
}

impl ServiceOptions {
    pub fn builder() -> ServiceOptionsBuilder {
        ServiceOptionsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ServiceOptionsBuilder {
    heartbeat_ms: Option<u64>,
    push_queue_cap: Option<Option<usize>>,
}

impl ServiceOptionsBuilder {
    pub fn heartbeat_ms(mut self, ms: u64) -> Self {
        self.heartbeat_ms = Some(ms);
        self
    }

    pub fn push_queue_cap(mut self, cap: Option<usize>) -> Self {
        self.push_queue_cap = Some(cap);
        self
    }

    pub fn build(self) -> Result<ServiceOptions> {
        let opts = ServiceOptions {
            heartbeat_ms: self.heartbeat_ms.unwrap_or(5000),
            push_queue_cap: self.push_queue_cap.unwrap_or(None),
        };
        if opts.heartbeat_ms == 0 {
            return Err(anyhow!("heartbeat_ms cannot be 0"));
        }
        if opts.push_queue_cap == Some(0) {
            return Err(anyhow!("push_queue_cap cannot be 0"));
        }
        Ok(opts)
    }
}

/// Client-side tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Window to wait for a SharedObject `init` after `sub`.
    pub init_timeout_ms: u64,

    /// Reconnect backoff floor.
    pub reconnect_min_ms: u64,

    /// Reconnect backoff ceiling.
    pub reconnect_max_ms: u64,

    /// Jitter fraction applied to each backoff delay, e.g. `0.2` = ±20%.
    pub reconnect_jitter: f64,

    /// RPC call timeout. `None` = wait indefinitely.
    pub rpc_timeout_ms: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            init_timeout_ms: 5000,
            reconnect_min_ms: 1000,
            reconnect_max_ms: 30_000,
            reconnect_jitter: 0.2,
            rpc_timeout_ms: None,
        }
    }
}

impl ClientOptions {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ClientOptionsBuilder {
    init_timeout_ms: Option<u64>,
    reconnect_min_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    reconnect_jitter: Option<f64>,
    rpc_timeout_ms: Option<Option<u64>>,
}

impl ClientOptionsBuilder {
    pub fn init_timeout_ms(mut self, ms: u64) -> Self {
        self.init_timeout_ms = Some(ms);
        self
    }

    pub fn reconnect_min_ms(mut self, ms: u64) -> Self {
        self.reconnect_min_ms = Some(ms);
        self
    }

    pub fn reconnect_max_ms(mut self, ms: u64) -> Self {
        self.reconnect_max_ms = Some(ms);
        self
    }

    pub fn reconnect_jitter(mut self, fraction: f64) -> Self {
        self.reconnect_jitter = Some(fraction);
        self
    }

    pub fn rpc_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.rpc_timeout_ms = Some(ms);
        self
    }

    pub fn build(self) -> Result<ClientOptions> {
        let defaults = ClientOptions::default();
        let opts = ClientOptions {
            init_timeout_ms: self.init_timeout_ms.unwrap_or(defaults.init_timeout_ms),
            reconnect_min_ms: self.reconnect_min_ms.unwrap_or(defaults.reconnect_min_ms),
            reconnect_max_ms: self.reconnect_max_ms.unwrap_or(defaults.reconnect_max_ms),
            reconnect_jitter: self.reconnect_jitter.unwrap_or(defaults.reconnect_jitter),
            rpc_timeout_ms: self.rpc_timeout_ms.unwrap_or(defaults.rpc_timeout_ms),
        };
        if opts.init_timeout_ms == 0 {
            return Err(anyhow!("init_timeout_ms cannot be 0"));
        }
        if opts.reconnect_min_ms == 0 || opts.reconnect_min_ms > opts.reconnect_max_ms {
            return Err(anyhow!(
                "reconnect_min_ms must be nonzero and <= reconnect_max_ms"
            ));
        }
        if !(0.0..1.0).contains(&opts.reconnect_jitter) {
            return Err(anyhow!("reconnect_jitter must be in [0.0, 1.0)"));
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_defaults_are_valid() {
        assert!(ServiceOptions::builder().build().is_ok());
    }

    #[test]
    fn zero_heartbeat_rejected() {
        assert!(ServiceOptions::builder().heartbeat_ms(0).build().is_err());
    }

    #[test]
    fn zero_queue_cap_rejected() {
        assert!(ServiceOptions::builder()
            .push_queue_cap(Some(0))
            .build()
            .is_err());
    }

    #[test]
    fn client_defaults_are_valid() {
        assert!(ClientOptions::builder().build().is_ok());
    }

    #[test]
    fn backoff_floor_above_ceiling_rejected() {
        assert!(ClientOptions::builder()
            .reconnect_min_ms(60_000)
            .reconnect_max_ms(30_000)
            .build()
            .is_err());
    }

    #[test]
    fn jitter_out_of_range_rejected() {
        assert!(ClientOptions::builder().reconnect_jitter(1.5).build().is_err());
    }
}
