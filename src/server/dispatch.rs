//! RPC handler dispatch.
//!
//! `HandlerRegistry` maps an RPC endpoint name to a boxed async handler.
//! `Service::new` checks every RPC endpoint in the descriptor has one
//! registered before binding any socket (`MeshError::MissingHandler`).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::frame::{Frame, RpcErrorPayload};

use super::registry::Registry;

/// What a handler returns on failure; distinct from `MeshError` because
/// handler errors are user-domain (framed into `rpc:res.err`), not
/// protocol-level.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    pub code: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BoxedHandler =
    Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: impl Into<String>, handler: BoxedHandler) {
        self.handlers.insert(endpoint.into(), handler);
    }

    pub fn get(&self, endpoint: &str) -> Option<&BoxedHandler> {
        self.handlers.get(endpoint)
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.handlers.contains_key(endpoint)
    }
}

fn rpc_error(id: u64, endpoint: &str, name: &str, message: impl Into<String>, code: Option<&str>) -> Frame {
    Frame::RpcRes {
        id,
        endpoint: endpoint.to_string(),
        err: Some(RpcErrorPayload {
            name: name.to_string(),
            message: message.into(),
            code: code.map(str::to_string),
            endpoint: endpoint.to_string(),
        }),
        res: None,
    }
}

/// Operation on inbound `rpc:req`: locate handler, validate
/// input with date parsing, invoke, validate and serialize the reply.
/// Never panics — every failure path becomes an `rpc:res` with `err` set.
pub async fn handle_rpc_request(
    registry: &Registry,
    handlers: &HandlerRegistry,
    id: u64,
    endpoint: String,
    input: Value,
) -> Frame {
    let (request_schema, reply_schema) = match registry.rpc_schemas(&endpoint) {
        Ok(schemas) => schemas,
        Err(_) => {
            return rpc_error(
                id,
                &endpoint,
                "UnknownEndpoint",
                "unknown endpoint",
                Some("UNKNOWN_ENDPOINT"),
            )
        }
    };

    let parsed = match request_schema.validate_and_parse_dates(input) {
        Ok(v) => v,
        Err(e) => {
            return rpc_error(
                id,
                &endpoint,
                "ValidationFailed",
                e.to_string(),
                Some("VALIDATION_FAILED"),
            )
        }
    };

    let Some(handler) = handlers.get(&endpoint) else {
        return rpc_error(
            id,
            &endpoint,
            "MissingHandler",
            "no handler registered for this endpoint",
            Some("MISSING_HANDLER"),
        );
    };

    match handler(parsed).await {
        Ok(result) => match reply_schema.validate(&result) {
            Ok(()) => Frame::RpcRes {
                id,
                endpoint: endpoint.clone(),
                err: None,
                res: Some(reply_schema.serialize_dates(&result)),
            },
            Err(e) => rpc_error(
                id,
                &endpoint,
                "ValidationFailed",
                e.to_string(),
                Some("VALIDATION_FAILED"),
            ),
        },
        Err(e) => rpc_error(id, &endpoint, "HandlerError", e.message, e.code.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_handler_runs() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "echo",
            Box::new(|input: Value| Box::pin(async move { Ok(input) })),
        );
        let handler = registry.get("echo").unwrap();
        let out = handler(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, json!({"text": "hi"}));
    }

    #[test]
    fn missing_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nope").is_none());
    }
}
