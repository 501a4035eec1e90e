//! End-to-end scenarios from `spec.md` §8, driven over a real loopback
//! TCP/WebSocket connection via `Service`/`Client`.

use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;

use meshline::config::{ClientOptions, ServiceOptions};
use meshline::descriptor::{Descriptor, EndpointDescriptor, EndpointKind, TransportConfig};
use meshline::server::dispatch::HandlerRegistry;
use meshline::{Client, Service};

fn transport_on(addr: &str) -> TransportConfig {
    TransportConfig {
        server: addr.to_string(),
        client: addr.to_string(),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true within 2s");
}

/// S1 Echo RPC.
#[tokio::test]
async fn s1_echo_rpc() {
    init_tracing();
    let descriptor = Descriptor {
        transport: transport_on("127.0.0.1:0"),
        endpoints: vec![EndpointDescriptor {
            name: "echo".into(),
            kind: EndpointKind::Rpc {
                request_schema: json!({"type": "string"}),
                reply_schema: json!({"type": "string"}),
            },
        }],
    };

    let mut handlers = HandlerRegistry::new();
    handlers.register(
        "echo",
        Box::new(|input: serde_json::Value| {
            Box::pin(async move {
                let s = input.as_str().unwrap_or_default().to_uppercase();
                Ok(json!(s))
            })
        }),
    );

    let service = Service::bind(descriptor.clone(), handlers, DashMap::new(), ServiceOptions::default())
        .await
        .unwrap();
    let addr = service.local_addr().to_string();
    let mut client_descriptor = descriptor;
    client_descriptor.transport.client = addr;

    let client = Client::connect(client_descriptor, ClientOptions::default())
        .await
        .unwrap();

    let result = client.call("echo", json!("hello")).await.unwrap();
    assert_eq!(result, json!("HELLO"));

    let (a, b, c) = tokio::join!(
        client.call("echo", json!("a")),
        client.call("echo", json!("b")),
        client.call("echo", json!("c")),
    );
    assert_eq!(a.unwrap(), json!("A"));
    assert_eq!(b.unwrap(), json!("B"));
    assert_eq!(c.unwrap(), json!("C"));

    client.close();
    service.close();
}

fn counter_descriptor(addr: &str) -> Descriptor {
    Descriptor {
        transport: transport_on(addr),
        endpoints: vec![EndpointDescriptor {
            name: "Counter".into(),
            kind: EndpointKind::SharedObject {
                object_schema: json!({
                    "type": "object",
                    "properties": {"value": {"type": "integer"}},
                    "required": ["value"]
                }),
                auto_notify: true,
            },
        }],
    }
}

/// S2 Counter sync.
#[tokio::test]
async fn s2_counter_sync() {
    init_tracing();
    let descriptor = counter_descriptor("127.0.0.1:0");
    let initials = DashMap::new();
    initials.insert("Counter".to_string(), json!({"value": 0}));

    let service = Service::bind(
        descriptor.clone(),
        HandlerRegistry::new(),
        initials,
        ServiceOptions::default(),
    )
    .await
    .unwrap();
    let addr = service.local_addr().to_string();
    let mut client_descriptor = descriptor;
    client_descriptor.transport.client = addr;

    let client_a = Client::connect(client_descriptor.clone(), ClientOptions::default())
        .await
        .unwrap();
    let client_b = Client::connect(client_descriptor, ClientOptions::default())
        .await
        .unwrap();

    let replica_a = client_a.subscribe_shared_object("Counter").unwrap();
    let replica_b = client_b.subscribe_shared_object("Counter").unwrap();
    client_a.await_ready("Counter").await.unwrap();
    client_b.await_ready("Counter").await.unwrap();
    assert_eq!(replica_a.data().unwrap(), json!({"value": 0}));
    assert_eq!(replica_b.data().unwrap(), json!({"value": 0}));

    let handle = service.shared_object("Counter").unwrap();
    handle
        .mutate(&[meshline::PathSegment::key("value")], |v| *v = json!(42))
        .unwrap();

    wait_until(|| replica_a.data().unwrap()["value"] == json!(42)).await;
    wait_until(|| replica_b.data().unwrap()["value"] == json!(42)).await;

    client_a.close();
    client_b.close();
    service.close();
}

/// S3 Auto-batch.
#[tokio::test]
async fn s3_auto_batch_coalesces_into_one_update() {
    init_tracing();
    let descriptor = counter_descriptor("127.0.0.1:0");
    let initials = DashMap::new();
    initials.insert("Counter".to_string(), json!({"value": 0}));

    let service = Service::bind(
        descriptor.clone(),
        HandlerRegistry::new(),
        initials,
        ServiceOptions::default(),
    )
    .await
    .unwrap();
    let addr = service.local_addr().to_string();
    let mut client_descriptor = descriptor;
    client_descriptor.transport.client = addr;

    let client = Client::connect(client_descriptor, ClientOptions::default())
        .await
        .unwrap();
    let replica = client.subscribe_shared_object("Counter").unwrap();
    client.await_ready("Counter").await.unwrap();

    let handle = service.shared_object("Counter").unwrap();
    let key = [meshline::PathSegment::key("value")];
    handle.set(&key, json!(1)).unwrap();
    handle.set(&key, json!(2)).unwrap();
    handle.set(&key, json!(3)).unwrap();

    wait_until(|| replica.data().unwrap()["value"] == json!(3)).await;

    client.close();
    service.close();
}

/// S5 Push queueing.
#[tokio::test]
async fn s5_push_queueing_drains_in_order_to_first_worker() {
    init_tracing();
    let descriptor = Descriptor {
        transport: transport_on("127.0.0.1:0"),
        endpoints: vec![EndpointDescriptor {
            name: "jobs".into(),
            kind: EndpointKind::PushPull {
                message_schema: json!({"type": "integer"}),
            },
        }],
    };

    let service = Service::bind(
        descriptor.clone(),
        HandlerRegistry::new(),
        DashMap::new(),
        ServiceOptions::default(),
    )
    .await
    .unwrap();
    let addr = service.local_addr().to_string();
    let mut client_descriptor = descriptor;
    client_descriptor.transport.client = addr;

    assert!(!service.push("jobs", json!(1)).unwrap());
    assert!(!service.push("jobs", json!(2)).unwrap());
    assert!(!service.push("jobs", json!(3)).unwrap());

    let worker = Client::connect(client_descriptor, ClientOptions::default())
        .await
        .unwrap();
    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_cb = received.clone();
    worker
        .subscribe_messages("jobs", move |msg| {
            received_cb.lock().unwrap().push(msg);
        })
        .unwrap();

    wait_until(|| received.lock().unwrap().len() == 3).await;
    assert_eq!(*received.lock().unwrap(), vec![json!(1), json!(2), json!(3)]);

    worker.close();
    service.close();
}
