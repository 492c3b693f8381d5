//! One open WebSocket to the node, multiplexing JSON-RPC requests.
//!
//! ```text
//!   request() ──► Correlator::register(id) ──► outbound mpsc ──► writer task ──► ws sink
//!                                                                              │
//!   ws stream ──► reader task ── reply with id ──► Correlator::resolve ──► caller
//!                             └─ push (no id) ──► broadcast ──► subscribe_pushes()
//! ```
//!
//! When the reader stops (the node closed the socket, a read failed, or
//! [`RpcSocket::close`] was called) every pending request fails with a
//! transport error and the socket reports closed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use nw_domain::config::NodeConfig;
use nw_protocol::{IdGenerator, RequestId, RpcCall, RpcResponse};

use crate::correlator::Correlator;
use crate::error::RpcError;

const OUTBOUND_CAPACITY: usize = 64;
const PUSH_CAPACITY: usize = 256;

/// Timeouts and limits for one socket.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_pending: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::from(&NodeConfig::default())
    }
}

impl From<&NodeConfig> for SocketOptions {
    fn from(config: &NodeConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_pending: config.max_pending,
        }
    }
}

pub struct RpcSocket {
    url: String,
    outbound: mpsc::Sender<String>,
    correlator: Arc<Correlator>,
    ids: IdGenerator,
    pushes: broadcast::Sender<RpcResponse>,
    /// Asks both tasks to stop.
    shutdown: CancellationToken,
    /// Fires once the reader has stopped and pending requests were failed.
    closed: CancellationToken,
    request_timeout: Duration,
}

impl std::fmt::Debug for RpcSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSocket")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RpcSocket {
    /// Open the socket and start its reader and writer tasks.
    pub async fn connect(url: &str, options: &SocketOptions) -> Result<Self, RpcError> {
        tracing::debug!(url, "opening node socket");
        let (ws, _response) =
            tokio::time::timeout(options.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    RpcError::Transport(format!(
                        "connect to {url} timed out after {:?}",
                        options.connect_timeout
                    ))
                })?
                .map_err(|e| RpcError::Transport(format!("connect to {url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let correlator = Arc::new(Correlator::new(options.max_pending));
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let (push_tx, _) = broadcast::channel(PUSH_CAPACITY);
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        // Writer task: drains the outbound queue into the sink.
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    msg = outbound_rx.recv() => match msg {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                tracing::debug!(error = %e, "node socket write failed");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            // A dead writer means the socket is unusable; wake the reader.
            writer_shutdown.cancel();
        });

        // Reader task: routes replies and pushes.
        let reader_correlator = correlator.clone();
        let reader_pushes = push_tx.clone();
        let reader_shutdown = shutdown.clone();
        let reader_closed = closed.clone();
        let reader_url = url.to_string();
        tokio::spawn(async move {
            let reason = loop {
                let msg = tokio::select! {
                    biased;
                    _ = reader_shutdown.cancelled() => break "socket closed".to_string(),
                    msg = stream.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&text, &reader_correlator, &reader_pushes);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch(text, &reader_correlator, &reader_pushes),
                        Err(_) => tracing::debug!(len = bytes.len(), "ignoring non-UTF-8 frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        break "connection closed by node".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read failed: {e}"),
                }
            };
            tracing::debug!(url = %reader_url, reason = %reason, "node socket reader stopped");
            reader_shutdown.cancel();
            reader_correlator.fail_all(RpcError::Transport(reason));
            reader_closed.cancel();
        });

        tracing::info!(url, "node socket open");
        Ok(Self {
            url: url.to_string(),
            outbound: outbound_tx,
            correlator,
            ids: IdGenerator::new(),
            pushes: push_tx,
            shutdown,
            closed,
            request_timeout: options.request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one call and wait for its reply.
    ///
    /// Resolves with the `result` value, a [`RpcError::Node`] for an error
    /// reply, or a terminal failure (transport, timeout, cancellation).
    /// Once `cancel` fires the call resolves with [`RpcError::Cancelled`]
    /// and a reply arriving afterwards is dropped.
    pub async fn request(
        &self,
        call: RpcCall,
        cancel: &CancellationToken,
    ) -> Result<Value, RpcError> {
        let id = self.ids.next_id();
        let reply = self.correlator.register(id.clone())?;
        let _guard = PendingGuard {
            correlator: &self.correlator,
            id: id.clone(),
        };

        let method = call.method.clone();
        let json = serde_json::to_string(&call.into_request(id.clone()))
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        tracing::debug!(%id, method = %method, "sending request");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            sent = self.outbound.send(json) => {
                sent.map_err(|_| RpcError::Transport("socket writer stopped".into()))?
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            r = tokio::time::timeout(self.request_timeout, reply) => match r {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(RpcError::Transport("socket dropped the request".into())),
                Err(_) => Err(RpcError::Timeout(self.request_timeout)),
            },
        };

        match &outcome {
            Ok(_) => tracing::debug!(%id, method = %method, "reply received"),
            Err(e) => tracing::debug!(%id, method = %method, error = %e, "request failed"),
        }

        outcome?.into_result().map_err(|e| RpcError::Node {
            code: e.code,
            message: e.message,
        })
    }

    /// Out-of-band messages (those without an `id`).
    pub fn subscribe_pushes(&self) -> broadcast::Receiver<RpcResponse> {
        self.pushes.subscribe()
    }

    /// Number of requests waiting for a reply.
    pub fn pending(&self) -> usize {
        self.correlator.len()
    }

    /// Close the socket.  Pending requests fail with a transport error.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the socket is fully closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Token that fires when the socket is fully closed, usable without
    /// holding on to the socket itself.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Drop for RpcSocket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Removes the waiter when a request stops waiting for any reason other
/// than its reply (cancel, timeout, or the future being dropped).
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.deregister(&self.id);
    }
}

fn dispatch(text: &str, correlator: &Correlator, pushes: &broadcast::Sender<RpcResponse>) {
    let response: RpcResponse = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable node message");
            return;
        }
    };
    if response.is_push() {
        // No subscribers is fine.
        let _ = pushes.send(response);
    } else {
        correlator.resolve(response);
    }
}
