//! The wire frame format and codec.
//!
//! `Frame` is the wire shape, one JSON object tagged by `type`. Encoding
//! and decoding go through ordinary `serde_json`; there is no recovery
//! path for a malformed frame (`decode` returns `MeshError::Protocol` and
//! the caller tears the connection down — the "crash-fast parse" rule).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::DiffNode;
use crate::error::{MeshError, MeshResult};

/// One handler- or user-visible RPC error, framed in `rpc:res.err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "sub")]
    Sub { endpoint: String },

    #[serde(rename = "unsub")]
    Unsub { endpoint: String },

    #[serde(rename = "rpc:req")]
    RpcReq {
        id: u64,
        endpoint: String,
        input: Value,
    },

    #[serde(rename = "rpc:res")]
    RpcRes {
        id: u64,
        endpoint: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        err: Option<RpcErrorPayload>,
        #[serde(skip_serializing_if = "Option::is_none")]
        res: Option<Value>,
    },

    #[serde(rename = "message")]
    Message { endpoint: String, message: Value },

    #[serde(rename = "init")]
    Init {
        endpoint: String,
        data: Value,
        v: u64,
    },

    #[serde(rename = "update")]
    Update {
        endpoint: String,
        diffs: Vec<DiffNode>,
        v: u64,
        now: i64,
    },

    #[serde(rename = "heartbeat")]
    Heartbeat { #[serde(rename = "frequencyMs")] frequency_ms: u64 },
}

impl Frame {
    pub fn encode(&self) -> MeshResult<String> {
        serde_json::to_string(self).map_err(MeshError::Json)
    }

    /// Parse one wire frame. A malformed document or an unrecognized
    /// `type` both surface as `MeshError::Protocol`, never panic.
    pub fn decode(text: &str) -> MeshResult<Frame> {
        serde_json::from_str(text).map_err(|e| MeshError::Protocol {
            reason: format!("malformed frame: {e}"),
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Frame::Sub { endpoint }
            | Frame::Unsub { endpoint }
            | Frame::RpcReq { endpoint, .. }
            | Frame::RpcRes { endpoint, .. }
            | Frame::Message { endpoint, .. }
            | Frame::Init { endpoint, .. }
            | Frame::Update { endpoint, .. } => Some(endpoint),
            Frame::Heartbeat { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sub_round_trips() {
        let f = Frame::Sub {
            endpoint: "counter".into(),
        };
        let text = f.encode().unwrap();
        assert_eq!(text, r#"{"type":"sub","endpoint":"counter"}"#);
        let back = Frame::decode(&text).unwrap();
        assert_eq!(back.endpoint(), Some("counter"));
    }

    #[test]
    fn rpc_req_carries_id_and_input() {
        let f = Frame::RpcReq {
            id: 7,
            endpoint: "echo".into(),
            input: json!({"text": "hi"}),
        };
        let text = f.encode().unwrap();
        match Frame::decode(&text).unwrap() {
            Frame::RpcReq { id, endpoint, input } => {
                assert_eq!(id, 7);
                assert_eq!(endpoint, "echo");
                assert_eq!(input, json!({"text": "hi"}));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn rpc_res_omits_null_fields_on_success() {
        let f = Frame::RpcRes {
            id: 1,
            endpoint: "echo".into(),
            err: None,
            res: Some(json!({"text": "hi"})),
        };
        let text = f.encode().unwrap();
        assert!(!text.contains("\"err\""));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = Frame::decode("{not json").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Protocol);
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let err = Frame::decode(r#"{"type":"bogus"}"#).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Protocol);
    }

    #[test]
    fn heartbeat_has_no_endpoint() {
        let f = Frame::Heartbeat { frequency_ms: 5000 };
        assert_eq!(f.endpoint(), None);
    }
}
