//! Behavior of a pair of framed endpoints wired back-to-back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use lspx::endpoint::{Endpoint, Handler};
use lspx::protocol::RpcError;

/// Test peer: echoes request params, records notifications, and can be
/// told to fail or stall.
struct TestServer {
    notifications: mpsc::UnboundedSender<(String, Option<Value>)>,
}

impl TestServer {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Option<Value>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { notifications: tx }), rx)
    }
}

#[async_trait]
impl Handler for TestServer {
    async fn handle_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        match method {
            "echo" => Ok(params.unwrap_or(Value::Null)),
            "fail" => Err(RpcError::internal("told to fail")),
            "stall" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
            "nap" => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!("late"))
            }
            _ => Ok(Value::Null),
        }
    }

    async fn handle_notification(&self, method: &str, params: Option<Value>) {
        let _ = self.notifications.send((method.to_string(), params));
    }
}

struct NullHandler;

#[async_trait]
impl Handler for NullHandler {
    async fn handle_request(&self, _: &str, _: Option<Value>) -> Result<Value, RpcError> {
        Ok(Value::Null)
    }

    async fn handle_notification(&self, _: &str, _: Option<Value>) {}
}

fn endpoint_pair() -> (Arc<Endpoint>, Arc<Endpoint>) {
    let (left, right) = tokio::io::duplex(4096);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        Endpoint::new("left", left_read, left_write),
        Endpoint::new("right", right_read, right_write),
    )
}

#[tokio::test]
async fn call_round_trips_params_through_the_wire() {
    let (client, server) = endpoint_pair();
    let (handler, _notifications) = TestServer::new();
    server.clone().serve(handler);
    client.clone().serve(Arc::new(NullHandler));

    let params = json!({"textDocument": {"uri": "file:///x.rs"}, "position": {"line": 0}});
    let result = timeout(
        Duration::from_secs(5),
        client.call("echo", Some(params.clone())),
    )
    .await
    .expect("timed out")
    .expect("call failed");
    assert_eq!(result, params);
}

#[tokio::test]
async fn error_responses_reach_the_caller() {
    let (client, server) = endpoint_pair();
    let (handler, _notifications) = TestServer::new();
    server.clone().serve(handler);
    client.clone().serve(Arc::new(NullHandler));

    let error = timeout(Duration::from_secs(5), client.call("fail", None))
        .await
        .expect("timed out")
        .expect_err("expected an error");
    assert_eq!(error.code, lspx::protocol::INTERNAL_ERROR);
    assert_eq!(error.message, "told to fail");
}

#[tokio::test]
async fn notifications_reach_the_peer_handler() {
    let (client, server) = endpoint_pair();
    let (handler, mut notifications) = TestServer::new();
    server.clone().serve(handler);
    client.clone().serve(Arc::new(NullHandler));

    client
        .notify("textDocument/didOpen", Some(json!({"uri": "file:///x.rs"})))
        .await
        .expect("notify failed");

    let (method, params) = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert_eq!(method, "textDocument/didOpen");
    assert_eq!(params, Some(json!({"uri": "file:///x.rs"})));
}

#[tokio::test]
async fn responses_correlate_out_of_order() {
    let (client, server) = endpoint_pair();
    let (handler, _notifications) = TestServer::new();
    server.clone().serve(handler);
    client.clone().serve(Arc::new(NullHandler));

    // The first call replies late; the second must not be blocked by it.
    let slow = client.call("nap", None);
    let fast = client.call("echo", Some(json!("fast")));
    let (slow, fast) = timeout(Duration::from_secs(5), async {
        tokio::join!(slow, fast)
    })
    .await
    .expect("timed out");
    assert_eq!(slow.expect("slow call failed"), json!("late"));
    assert_eq!(fast.expect("fast call failed"), json!("fast"));
}

#[tokio::test]
async fn peer_close_fails_pending_calls_and_signals_disconnect() {
    let (client, server) = endpoint_pair();
    let (handler, _notifications) = TestServer::new();
    server.clone().serve(handler);
    client.clone().serve(Arc::new(NullHandler));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.call("stall", None).await }
    });
    // Give the request time to go out before tearing the peer down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.close().await;

    let outcome = timeout(Duration::from_secs(5), pending)
        .await
        .expect("timed out")
        .expect("task panicked");
    assert!(outcome.is_err());

    timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("disconnect was not signaled");
}

#[tokio::test]
async fn calls_after_close_fail_immediately() {
    let (client, server) = endpoint_pair();
    let (handler, _notifications) = TestServer::new();
    server.clone().serve(handler);
    client.clone().serve(Arc::new(NullHandler));

    client.close().await;
    assert!(client.call("echo", None).await.is_err());
    assert!(client.notify("noop", None).await.is_err());
}
