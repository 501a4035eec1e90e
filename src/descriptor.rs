//! Descriptor data model.
//!
//! A `Descriptor` is the transport address plus the full set of endpoints
//! a `Service` serves. `validate()` enforces the two static rules: no
//! duplicate names, and user-defined endpoints may not start with `_`
//! (that prefix is reserved for the implementation and for plugins
//! layered on top, per "Endpoint name reservations").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{MeshError, MeshResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EndpointKind {
    Rpc {
        request_schema: Value,
        reply_schema: Value,
    },
    PubSub {
        message_schema: Value,
    },
    PushPull {
        message_schema: Value,
    },
    SharedObject {
        object_schema: Value,
        auto_notify: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: String,
    pub kind: EndpointKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub server: String,
    pub client: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub transport: TransportConfig,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl Descriptor {
    /// Reject duplicate endpoint names and user-defined `_`-prefixed
    /// names (that namespace belongs to the implementation and plugins).
    pub fn validate(&self) -> MeshResult<()> {
        let mut seen = std::collections::HashSet::new();
        for ep in &self.endpoints {
            if !seen.insert(ep.name.as_str()) {
                return Err(MeshError::InvalidDescriptor {
                    name: ep.name.clone(),
                    reason: "duplicate endpoint name".into(),
                });
            }
            if ep.name.starts_with('_') {
                return Err(MeshError::InvalidDescriptor {
                    name: ep.name.clone(),
                    reason: "names beginning with '_' are reserved".into(),
                });
            }
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Canonical identity hash exposed by the server's reserved
    /// `_descriptor` RPC endpoint. Computed
    /// over a stable JSON serialization so two descriptors with endpoints
    /// listed in a different order still hash identically.
    pub fn hash(&self) -> String {
        let mut endpoints = self.endpoints.clone();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        let canonical = serde_json::json!({
            "transport": { "server": self.transport.server, "client": self.transport.client },
            "endpoints": endpoints,
        });
        let bytes = serde_json::to_vec(&canonical).expect("descriptor is always serializable");
        let digest = Sha256::digest(&bytes);
        format!("{digest:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport() -> TransportConfig {
        TransportConfig {
            server: "127.0.0.1:9000".into(),
            client: "127.0.0.1:9000".into(),
        }
    }

    fn pubsub(name: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            name: name.into(),
            kind: EndpointKind::PubSub {
                message_schema: json!({"type": "object"}),
            },
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let d = Descriptor {
            transport: transport(),
            endpoints: vec![pubsub("chat"), pubsub("chat")],
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_underscore_prefixed_user_names() {
        let d = Descriptor {
            transport: transport(),
            endpoints: vec![pubsub("_custom")],
        };
        assert!(d.validate().is_err());
    }

    #[test]
    fn accepts_disjoint_names() {
        let d = Descriptor {
            transport: transport(),
            endpoints: vec![pubsub("a"), pubsub("b")],
        };
        assert!(d.validate().is_ok());
    }

    #[test]
    fn hash_is_order_independent() {
        let d1 = Descriptor {
            transport: transport(),
            endpoints: vec![pubsub("a"), pubsub("b")],
        };
        let d2 = Descriptor {
            transport: transport(),
            endpoints: vec![pubsub("b"), pubsub("a")],
        };
        assert_eq!(d1.hash(), d2.hash());
    }

    #[test]
    fn hash_changes_with_schema() {
        let mut d = Descriptor {
            transport: transport(),
            endpoints: vec![pubsub("a")],
        };
        let h1 = d.hash();
        d.endpoints[0].kind = EndpointKind::PubSub {
            message_schema: json!({"type": "string"}),
        };
        assert_ne!(h1, d.hash());
    }
}
