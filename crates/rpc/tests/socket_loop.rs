//! Integration test: boots an in-process WebSocket server that plays the
//! node side of JSON-RPC, and drives the real socket, connection and
//! executors against it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nw_protocol::{RequestId, RpcCall, RpcRequest, RpcResponse, RuntimeVersion};
use nw_rpc::{
    bind_lifecycle, execute, spawn_reconnector, AppState, ConnectionState, HealthChecker,
    HealthSignal, JsonMapper, ReconnectBackoff, RpcError, RpcExecutor, RpcSocket,
    SharedSocketExecutor, SingleShotExecutor, SocketConnection, SocketOptions, StateTransition,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

// ── Mini node: in-process WS server ─────────────────────────────────────

/// How the node answers one request.
enum Reply {
    Now(Value),
    Error(i64, &'static str),
    /// Reply after a delay, letting later requests overtake this one.
    Later(Duration, Value),
    /// Send an id-less push, then the reply.
    WithPush(Value, Value),
    Never,
    /// Drop the TCP connection without a close frame.
    Hangup,
}

#[derive(Debug)]
enum NodeEvent {
    Request(RpcRequest),
    Closed,
}

struct MiniNode {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl MiniNode {
    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn next_event(&mut self) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timeout waiting for node event")
            .expect("node event channel closed")
    }

    async fn expect_request(&mut self) -> RpcRequest {
        match self.next_event().await {
            NodeEvent::Request(req) => req,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    async fn expect_closed(&mut self) {
        match self.next_event().await {
            NodeEvent::Closed => {}
            other => panic!("expected the socket to close, got {other:?}"),
        }
    }
}

async fn start_node<F>(behavior: F) -> MiniNode
where
    F: Fn(&RpcRequest) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let behavior = Arc::new(behavior);

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let events = events_tx.clone();
            let behavior = behavior.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (late_tx, mut late_rx) = mpsc::unbounded_channel::<String>();
                loop {
                    tokio::select! {
                        Some(text) = late_rx.recv() => {
                            if ws.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        msg = ws.next() => {
                            let text = match msg {
                                Some(Ok(Message::Text(text))) => text,
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => continue,
                            };
                            let req: RpcRequest = serde_json::from_str(&text).unwrap();
                            let _ = events.send(NodeEvent::Request(req.clone()));
                            let id = req.id.clone();
                            let out = match behavior(&req) {
                                Reply::Now(v) => vec![RpcResponse::success(id, v)],
                                Reply::Error(code, msg) => vec![RpcResponse::failure(id, code, msg)],
                                Reply::WithPush(push, v) => {
                                    let push = serde_json::to_string(&push).unwrap();
                                    if ws.send(Message::Text(push)).await.is_err() {
                                        break;
                                    }
                                    vec![RpcResponse::success(id, v)]
                                }
                                Reply::Later(delay, v) => {
                                    let late = late_tx.clone();
                                    let json = serde_json::to_string(&RpcResponse::success(id, v)).unwrap();
                                    tokio::spawn(async move {
                                        tokio::time::sleep(delay).await;
                                        let _ = late.send(json);
                                    });
                                    vec![]
                                }
                                Reply::Never => vec![],
                                Reply::Hangup => break,
                            };
                            for resp in out {
                                let json = serde_json::to_string(&resp).unwrap();
                                if ws.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
                drop(ws);
                let _ = events.send(NodeEvent::Closed);
            });
        }
    });

    MiniNode {
        addr,
        accepted,
        events: events_rx,
    }
}

fn options() -> SocketOptions {
    SocketOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        max_pending: 16,
    }
}

async fn next_transition(rx: &mut broadcast::Receiver<StateTransition>) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for a state transition")
        .unwrap()
        .to
}

async fn connected(conn: &Arc<SocketConnection>, url: &str) {
    let mut rx = conn.subscribe();
    conn.start(url);
    loop {
        if matches!(conn.state(), ConnectionState::Connected(_)) {
            return;
        }
        next_transition(&mut rx).await;
    }
}

// ── Single-shot mode ────────────────────────────────────────────────────

#[tokio::test]
async fn single_shot_maps_the_result_and_closes_its_socket() {
    let mut node = start_node(|req| match req.method.as_str() {
        "state_getRuntimeVersion" => Reply::Now(json!({ "specVersion": 57, "transactionVersion": 4 })),
        _ => Reply::Error(-32601, "Method not found"),
    })
    .await;

    let exec = SingleShotExecutor::new(node.url(), options());
    let version: RuntimeVersion = execute(
        &exec,
        RpcCall::bare(nw_protocol::STATE_GET_RUNTIME_VERSION),
        &JsonMapper::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(version.spec_version, 57);

    let req = node.expect_request().await;
    assert_eq!(req.jsonrpc, "2.0");
    assert_eq!(req.method, "state_getRuntimeVersion");
    node.expect_closed().await;
}

#[tokio::test]
async fn single_shot_cancel_yields_cancelled_and_disconnects() {
    let mut node = start_node(|_| Reply::Never).await;
    let exec = Arc::new(SingleShotExecutor::new(node.url(), options()));
    let cancel = CancellationToken::new();

    let call = {
        let exec = exec.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { exec.call_raw(RpcCall::bare("chain_getBlock"), &cancel).await })
    };

    node.expect_request().await;
    cancel.cancel();

    let outcome = call.await.unwrap();
    assert!(matches!(outcome, Err(RpcError::Cancelled)), "{outcome:?}");
    node.expect_closed().await;
}

#[tokio::test]
async fn node_errors_and_decode_failures_are_distinct() {
    let node = start_node(|req| match req.method.as_str() {
        "known" => Reply::Now(json!("not a number")),
        _ => Reply::Error(-32601, "Method not found"),
    })
    .await;
    let exec = SingleShotExecutor::new(node.url(), options());
    let cancel = CancellationToken::new();

    let err = exec
        .call_raw(RpcCall::bare("unknown"), &cancel)
        .await
        .unwrap_err();
    assert!(
        matches!(&err, RpcError::Node { code: -32601, message } if message == "Method not found"),
        "{err:?}"
    );
    assert!(!err.is_transport());

    let decoded: Result<u32, RpcError> =
        execute(&exec, RpcCall::bare("known"), &JsonMapper::new(), &cancel).await;
    assert!(matches!(decoded, Err(RpcError::Decode(_))), "{decoded:?}");
}

#[tokio::test]
async fn unreachable_node_is_a_transport_error() {
    let addr = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let exec = SingleShotExecutor::new(format!("ws://{addr}"), options());
    let err = exec
        .call_raw(RpcCall::bare("system_health"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)), "{err:?}");
}

// ── Socket ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_timeout_clears_the_pending_entry() {
    let node = start_node(|_| Reply::Never).await;
    let socket = RpcSocket::connect(
        &node.url(),
        &SocketOptions {
            request_timeout: Duration::from_millis(100),
            ..options()
        },
    )
    .await
    .unwrap();

    let err = socket
        .request(RpcCall::bare("slow"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)), "{err:?}");
    assert_eq!(socket.pending(), 0);
}

#[tokio::test]
async fn pushes_without_id_go_to_subscribers() {
    let node = start_node(|_| {
        Reply::WithPush(
            json!({ "jsonrpc": "2.0", "method": "chain_newHead", "params": { "subscription": "s1" } }),
            json!("s1"),
        )
    })
    .await;
    let socket = RpcSocket::connect(&node.url(), &options()).await.unwrap();
    let mut pushes = socket.subscribe_pushes();

    let result = socket
        .request(RpcCall::bare("chain_subscribeNewHeads"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, json!("s1"));

    let push = tokio::time::timeout(Duration::from_secs(5), pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(push.method.as_deref(), Some("chain_newHead"));
    assert!(push.id.is_none());
}

// ── Shared mode ─────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_replies_are_correlated_by_id() {
    let node = start_node(|req| match req.method.as_str() {
        "slow" => Reply::Later(Duration::from_millis(300), json!("slow result")),
        _ => Reply::Now(json!("fast result")),
    })
    .await;
    let conn = SocketConnection::new(options());
    connected(&conn, &node.url()).await;
    let exec = SharedSocketExecutor::new(conn.clone());
    let cancel = CancellationToken::new();

    let (slow, fast) = tokio::join!(
        exec.call_raw(RpcCall::bare("slow"), &cancel),
        exec.call_raw(RpcCall::bare("fast"), &cancel),
    );
    assert_eq!(slow.unwrap(), json!("slow result"));
    assert_eq!(fast.unwrap(), json!("fast result"));
    assert_eq!(node.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shared_cancel_deregisters_and_ignores_the_late_reply() {
    let mut node = start_node(|req| match req.method.as_str() {
        "slow" => Reply::Later(Duration::from_millis(200), json!("late")),
        _ => Reply::Now(json!("pong")),
    })
    .await;
    let conn = SocketConnection::new(options());
    connected(&conn, &node.url()).await;
    let socket = conn.socket().unwrap();
    let exec = Arc::new(SharedSocketExecutor::new(conn.clone()));
    let cancel = CancellationToken::new();

    let call = {
        let exec = exec.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { exec.call_raw(RpcCall::bare("slow"), &cancel).await })
    };
    node.expect_request().await;
    assert_eq!(socket.pending(), 1);

    cancel.cancel();
    let outcome = call.await.unwrap();
    assert!(matches!(outcome, Err(RpcError::Cancelled)), "{outcome:?}");
    assert_eq!(socket.pending(), 0);

    // The node still answers the abandoned request; nobody is waiting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(socket.pending(), 0);
    assert!(matches!(conn.state(), ConnectionState::Connected(_)));

    let next = exec
        .call_raw(RpcCall::bare("ping"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(next, json!("pong"));
    assert!(Arc::ptr_eq(&socket, &conn.socket().unwrap()));
}

#[tokio::test]
async fn cancelled_call_is_never_sent() {
    let mut node = start_node(|_| Reply::Now(json!("pong"))).await;
    let socket = RpcSocket::connect(&node.url(), &options()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = socket
        .request(RpcCall::bare("dropped"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Cancelled), "{err:?}");
    assert_eq!(socket.pending(), 0);

    let value = socket
        .request(RpcCall::bare("ping"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value, json!("pong"));
    assert_eq!(node.expect_request().await.method, "ping");
}

#[tokio::test]
async fn transport_failure_fails_every_pending_request() {
    let mut node = start_node(|req| match req.method.as_str() {
        "hangup" => Reply::Hangup,
        _ => Reply::Never,
    })
    .await;
    let conn = SocketConnection::new(options());
    connected(&conn, &node.url()).await;
    let mut transitions = conn.subscribe();
    let exec = Arc::new(SharedSocketExecutor::new(conn.clone()));
    let cancel = CancellationToken::new();

    let waiting = {
        let exec = exec.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { exec.call_raw(RpcCall::bare("wait"), &cancel).await })
    };
    node.expect_request().await;

    let hangup = exec.call_raw(RpcCall::bare("hangup"), &cancel).await;
    assert!(matches!(hangup, Err(RpcError::Transport(_))), "{hangup:?}");
    let waited = waiting.await.unwrap();
    assert!(matches!(waited, Err(RpcError::Transport(_))), "{waited:?}");

    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Disconnected);
    assert!(conn.socket().is_none());
}

#[tokio::test]
async fn start_is_idempotent_and_stop_closes_the_socket() {
    let mut node = start_node(|_| Reply::Now(json!(null))).await;
    let conn = SocketConnection::new(options());
    let mut transitions = conn.subscribe();
    let url = node.url();

    conn.start(&url);
    conn.start(&url);
    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Connecting(url.clone()));
    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Connected(url.clone()));
    conn.start(&url);

    conn.stop();
    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Stopped);
    node.expect_closed().await;
    assert_eq!(node.accepted.load(Ordering::SeqCst), 1);
    assert!(transitions.try_recv().is_err());

    let err = SharedSocketExecutor::new(conn.clone())
        .call_raw(RpcCall::bare("x"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NotConnected));
}

#[tokio::test]
async fn starting_with_another_url_replaces_the_socket() {
    let mut first = start_node(|_| Reply::Now(json!(1))).await;
    let second = start_node(|_| Reply::Now(json!(2))).await;
    let conn = SocketConnection::new(options());
    connected(&conn, &first.url()).await;

    let mut transitions = conn.subscribe();
    conn.start(&second.url());
    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Disconnected);
    assert_eq!(
        next_transition(&mut transitions).await,
        ConnectionState::Connecting(second.url())
    );
    assert_eq!(
        next_transition(&mut transitions).await,
        ConnectionState::Connected(second.url())
    );
    first.expect_closed().await;

    let value = SharedSocketExecutor::new(conn.clone())
        .call_raw(RpcCall::bare("which"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(value, json!(2));
}

// ── Policies ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_signal_fires_once_per_flip() {
    let node = start_node(|_| Reply::Now(json!(null))).await;
    let conn = SocketConnection::new(options());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        move |signal: HealthSignal| seen.lock().push(signal)
    };
    let checker = HealthChecker::spawn(&conn, Arc::new(sink));
    assert_eq!(checker.current(), HealthSignal::Unhealthy);

    connected(&conn, &node.url()).await;
    conn.start(&node.url());
    conn.stop();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while seen.lock().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        *seen.lock(),
        vec![HealthSignal::Healthy, HealthSignal::Unhealthy]
    );
    assert_eq!(checker.current(), HealthSignal::Unhealthy);
}

#[tokio::test]
async fn reconnector_restores_a_dropped_socket() {
    let node = start_node(|req| match req.method.as_str() {
        "hangup" => Reply::Hangup,
        _ => Reply::Now(json!("ok")),
    })
    .await;
    let conn = SocketConnection::new(options());
    let shutdown = CancellationToken::new();
    let backoff = ReconnectBackoff {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        backoff_factor: 2.0,
        max_attempts: 0,
    };
    let task = spawn_reconnector(conn.clone(), backoff, shutdown.clone());
    connected(&conn, &node.url()).await;

    let mut transitions = conn.subscribe();
    let exec = SharedSocketExecutor::new(conn.clone());
    let cancel = CancellationToken::new();
    assert!(exec.call_raw(RpcCall::bare("hangup"), &cancel).await.is_err());

    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Disconnected);
    assert_eq!(
        next_transition(&mut transitions).await,
        ConnectionState::Connecting(node.url())
    );
    assert_eq!(
        next_transition(&mut transitions).await,
        ConnectionState::Connected(node.url())
    );
    assert_eq!(exec.call_raw(RpcCall::bare("ping"), &cancel).await.unwrap(), json!("ok"));
    assert_eq!(node.accepted.load(Ordering::SeqCst), 2);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn reconnector_leaves_a_stopped_connection_alone() {
    let node = start_node(|_| Reply::Now(json!(null))).await;
    let conn = SocketConnection::new(options());
    let shutdown = CancellationToken::new();
    let backoff = ReconnectBackoff {
        initial_delay: Duration::from_millis(10),
        ..Default::default()
    };
    let _task = spawn_reconnector(conn.clone(), backoff, shutdown.clone());

    connected(&conn, &node.url()).await;
    conn.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conn.state(), ConnectionState::Stopped);
    assert_eq!(node.accepted.load(Ordering::SeqCst), 1);
    shutdown.cancel();
}

#[tokio::test]
async fn lifecycle_binding_ignores_repeated_states() {
    let node = start_node(|_| Reply::Now(json!(null))).await;
    let conn = SocketConnection::new(options());
    let mut transitions = conn.subscribe();
    let (app_tx, app_rx) = watch::channel(AppState::Foreground);
    let binding = bind_lifecycle(conn.clone(), node.url(), app_rx);

    assert!(matches!(next_transition(&mut transitions).await, ConnectionState::Connecting(_)));
    assert!(matches!(next_transition(&mut transitions).await, ConnectionState::Connected(_)));

    app_tx.send_replace(AppState::Foreground);
    app_tx.send_replace(AppState::Background);
    assert_eq!(next_transition(&mut transitions).await, ConnectionState::Stopped);
    app_tx.send_replace(AppState::Background);

    app_tx.send_replace(AppState::Foreground);
    assert!(matches!(next_transition(&mut transitions).await, ConnectionState::Connecting(_)));
    assert!(matches!(next_transition(&mut transitions).await, ConnectionState::Connected(_)));

    drop(app_tx);
    binding.await.unwrap();
    assert!(transitions.try_recv().is_err());
    assert_eq!(node.accepted.load(Ordering::SeqCst), 2);
}

#[test]
fn request_ids_serialize_as_numbers() {
    let req = RpcCall::bare("x").into_request(RequestId::Number(3));
    assert_eq!(serde_json::to_value(&req).unwrap()["id"], json!(3));
}
