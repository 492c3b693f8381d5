//! Long-lived socket with an observable lifecycle.
//!
//! ```text
//!             start(url)                 socket open
//! Disconnected ─────────► Connecting(url) ──────────► Connected(url)
//!      ▲                       │                            │
//!      └── connect failed ─────┘                            │
//!      └────────────────── socket dropped ──────────────────┘
//!
//! any state ── stop() ──► Stopped
//! ```
//!
//! Every change is applied under one lock and published in order on a
//! broadcast channel, so observers see transitions in the order they were
//! applied.  Repeating the current state publishes nothing.
//!
//! Each `start` opens a new generation.  Work belonging to an older
//! generation (a connect that finishes after `stop`, a socket that closes
//! after being replaced) can no longer change the state, which makes
//! `Stopped` final until the next explicit `start`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::socket::{RpcSocket, SocketOptions};

const TRANSITION_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting(String),
    Connected(String),
    Stopped,
}

impl ConnectionState {
    /// Connecting or connected.
    pub fn is_started(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting(_) | ConnectionState::Connected(_)
        )
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ConnectionState::Connecting(url) | ConnectionState::Connected(url) => Some(url),
            _ => None,
        }
    }
}

/// One applied state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub generation: u64,
}

pub struct SocketConnection {
    options: SocketOptions,
    inner: Mutex<Inner>,
    transitions: broadcast::Sender<StateTransition>,
    current: watch::Sender<ConnectionState>,
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    socket: Option<Arc<RpcSocket>>,
}

impl SocketConnection {
    pub fn new(options: SocketOptions) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (current, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            options,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                generation: 0,
                socket: None,
            }),
            transitions,
            current,
        })
    }

    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Begin connecting to `url`.
    ///
    /// A no-op when already connecting or connected to the same url.  A
    /// different url tears the current socket down first.
    pub fn start(self: &Arc<Self>, url: &str) {
        let generation = {
            let mut inner = self.inner.lock();
            let current = inner.state.url().map(str::to_owned);
            match current {
                Some(current) if current == url => {
                    tracing::debug!(url, "connection already started");
                    return;
                }
                Some(current) => {
                    tracing::info!(from = %current, to = url, "switching node url");
                    self.teardown(&mut inner, ConnectionState::Disconnected);
                }
                None => {}
            }
            inner.generation += 1;
            self.apply(&mut inner, ConnectionState::Connecting(url.to_string()));
            inner.generation
        };

        tokio::spawn(drive(
            Arc::downgrade(self),
            url.to_string(),
            self.options.clone(),
            generation,
        ));
    }

    /// Close the socket and enter `Stopped`.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        self.teardown(&mut inner, ConnectionState::Stopped);
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().state.is_started()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    /// Ordered feed of every applied transition.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Latest state, for callers that only care about "now".
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.current.subscribe()
    }

    /// The open socket, when connected.
    pub fn socket(&self) -> Option<Arc<RpcSocket>> {
        self.inner.lock().socket.clone()
    }

    /// Wait for the pending connect to finish.
    ///
    /// Fails with [`RpcError::NotConnected`] when the connection is (or
    /// becomes) disconnected or stopped, and with [`RpcError::Cancelled`]
    /// when `cancel` fires first.
    pub async fn wait_connected(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<RpcSocket>, RpcError> {
        let mut state = self.current.subscribe();
        loop {
            let now = state.borrow_and_update().clone();
            match now {
                ConnectionState::Connected(_) => {
                    if let Some(socket) = self.socket() {
                        return Ok(socket);
                    }
                }
                ConnectionState::Connecting(_) => {}
                ConnectionState::Disconnected | ConnectionState::Stopped => {
                    return Err(RpcError::NotConnected);
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RpcError::Cancelled),
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(RpcError::NotConnected);
                    }
                }
            }
        }
    }

    /// Bump the generation, close the socket and move to `to`.
    fn teardown(&self, inner: &mut Inner, to: ConnectionState) {
        inner.generation += 1;
        if let Some(socket) = inner.socket.take() {
            socket.close();
        }
        self.apply(inner, to);
    }

    fn apply(&self, inner: &mut Inner, to: ConnectionState) {
        if inner.state == to {
            return;
        }
        let from = std::mem::replace(&mut inner.state, to.clone());
        tracing::info!(from = ?from, to = ?to, generation = inner.generation, "connection state");
        // No subscribers is fine.
        let _ = self.transitions.send(StateTransition {
            from,
            to: to.clone(),
            generation: inner.generation,
        });
        self.current.send_replace(to);
    }
}

/// Connect, publish `Connected`, then wait for the socket to close.
async fn drive(
    connection: Weak<SocketConnection>,
    url: String,
    options: SocketOptions,
    generation: u64,
) {
    let outcome = RpcSocket::connect(&url, &options).await;

    let Some(this) = connection.upgrade() else {
        return;
    };
    let closed = {
        let mut inner = this.inner.lock();
        let current = inner.generation == generation;
        match outcome {
            Ok(socket) if current => {
                let closed = socket.closed_token();
                inner.socket = Some(Arc::new(socket));
                this.apply(&mut inner, ConnectionState::Connected(url.clone()));
                closed
            }
            Ok(socket) => {
                tracing::debug!(url = %url, "discarding socket from a superseded start");
                socket.close();
                return;
            }
            Err(e) => {
                if current {
                    tracing::warn!(url = %url, error = %e, "node connect failed");
                    this.apply(&mut inner, ConnectionState::Disconnected);
                }
                return;
            }
        }
    };
    drop(this);

    closed.cancelled().await;

    let Some(this) = connection.upgrade() else {
        return;
    };
    let mut inner = this.inner.lock();
    if inner.generation == generation {
        tracing::warn!(url = %url, "node socket dropped");
        inner.socket = None;
        this.apply(&mut inner, ConnectionState::Disconnected);
    }
}
