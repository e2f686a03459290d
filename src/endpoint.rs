//! Framed JSON-RPC endpoint.
//!
//! One `Endpoint` wraps one bidirectional byte stream: a reader task that
//! decodes framed messages and dispatches them, and a writer task fed by a
//! channel so outbound frames are serialized regardless of how many tasks
//! are calling. Responses to outbound calls are matched to waiters through
//! the pending-call table; everything inbound with a method goes to the
//! `Handler`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::{Message, RpcError};
use crate::transport;

/// Receives the peer's requests and notifications.
///
/// For requests, the returned value (or error) is sent back to the peer
/// under the request's original ID.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle_request(&self, method: &str, params: Option<Value>)
        -> Result<Value, RpcError>;

    async fn handle_notification(&self, method: &str, params: Option<Value>);
}

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Endpoint {
    /// Peer label for log lines ("client", or a backend name).
    peer: String,
    outbound: mpsc::Sender<Vec<u8>>,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, RpcError>>>>,
    next_id: AtomicI64,
    shutdown: watch::Sender<bool>,
    reader: std::sync::Mutex<Option<Reader>>,
    writer: std::sync::Mutex<Option<Writer>>,
    outbound_rx: std::sync::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    pub fn new(
        peer: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::channel(32);
        let (shutdown, _) = watch::channel(false);
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);

        Arc::new(Self {
            peer: peer.into(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            shutdown,
            reader: std::sync::Mutex::new(Some(BufReader::new(reader))),
            writer: std::sync::Mutex::new(Some(Box::new(writer))),
            outbound_rx: std::sync::Mutex::new(Some(outbound_rx)),
            reader_task: std::sync::Mutex::new(None),
        })
    }

    /// Start the reader and writer tasks. Must be called exactly once.
    pub fn serve(self: Arc<Self>, handler: Arc<dyn Handler>) {
        let writer = self.writer.lock().unwrap().take();
        let outbound_rx = self.outbound_rx.lock().unwrap().take();
        let reader = self.reader.lock().unwrap().take();
        let (Some(mut writer), Some(mut outbound_rx), Some(mut reader)) =
            (writer, outbound_rx, reader)
        else {
            log::error!("{}: endpoint already served", self.peer);
            return;
        };

        let endpoint = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    body = outbound_rx.recv() => match body {
                        Some(body) => {
                            if let Err(e) =
                                transport::write_message(&mut writer, &body).await
                            {
                                log::error!("{}: write failed: {}", endpoint.peer, e);
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            let _ = writer.shutdown().await;
            endpoint.disconnect().await;
        });

        let endpoint = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match transport::read_message(&mut reader).await {
                    Ok(Some(body)) => {
                        let message: Message = match serde_json::from_slice(&body) {
                            Ok(message) => message,
                            Err(e) => {
                                log::error!("{}: undecodable message: {}", endpoint.peer, e);
                                break;
                            }
                        };
                        endpoint.clone().dispatch(message, &handler).await;
                    }
                    Ok(None) => {
                        log::info!("{}: connection closed", endpoint.peer);
                        break;
                    }
                    Err(e) => {
                        log::error!("{}: read failed: {}", endpoint.peer, e);
                        break;
                    }
                }
            }
            endpoint.disconnect().await;
        });
        *self.reader_task.lock().unwrap() = Some(task);
    }

    /// Send a request and suspend until the matching response arrives or
    /// the connection goes away.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return Err(RpcError::disconnected());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, waiter_tx);

        if let Err(e) = self.send(&Message::request(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        tokio::select! {
            outcome = waiter_rx => outcome.unwrap_or_else(|_| Err(RpcError::disconnected())),
            _ = shutdown_rx.changed() => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::disconnected())
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.send(&Message::notification(method, params)).await
    }

    /// Close both directions and fail all pending calls.
    pub async fn close(&self) {
        let task = self.reader_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
        }
        self.disconnect().await;
    }

    /// Suspend until the connection has terminated, for any reason.
    pub async fn closed(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn send(&self, message: &Message) -> Result<(), RpcError> {
        if *self.shutdown.borrow() {
            return Err(RpcError::disconnected());
        }
        let body = serde_json::to_vec(message)
            .map_err(|e| RpcError::internal(format!("encode failed: {}", e)))?;
        self.outbound
            .send(body)
            .await
            .map_err(|_| RpcError::disconnected())
    }

    async fn dispatch(self: Arc<Self>, message: Message, handler: &Arc<dyn Handler>) {
        if message.is_response() {
            self.settle(message).await;
            return;
        }
        let Some(method) = message.method else {
            log::warn!("{}: dropping message with neither method nor id", self.peer);
            return;
        };
        match message.id {
            // Requests run in their own task so a slow reply cannot stall
            // response demultiplexing on this connection.
            Some(id) => {
                let endpoint = self.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let reply = match handler.handle_request(&method, message.params).await {
                        Ok(result) => Message::response(id, result),
                        Err(error) => Message::error_response(id, error),
                    };
                    if let Err(e) = endpoint.send(&reply).await {
                        log::error!("{}: reply to {} failed: {}", endpoint.peer, method, e);
                    }
                });
            }
            // Notifications are handled inline to keep their order.
            None => handler.handle_notification(&method, message.params).await,
        }
    }

    async fn settle(&self, message: Message) {
        let Some(id) = message.id.as_ref().and_then(Value::as_i64) else {
            log::warn!("{}: dropping response with non-numeric id", self.peer);
            return;
        };
        let waiter = self.pending.lock().await.remove(&id);
        match waiter {
            Some(waiter) => {
                let outcome = match message.error {
                    Some(error) => Err(error),
                    None => Ok(message.result.unwrap_or(Value::Null)),
                };
                let _ = waiter.send(outcome);
            }
            None => log::warn!("{}: dropping response with unknown id {}", self.peer, id),
        }
    }

    async fn disconnect(&self) {
        let _ = self.shutdown.send(true);
        let mut pending = self.pending.lock().await;
        for (_, waiter) in pending.drain() {
            let _ = waiter.send(Err(RpcError::disconnected()));
        }
    }
}
