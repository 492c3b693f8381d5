//! Two ways to run a call: over a throwaway socket, or over the shared
//! long-lived one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use nw_protocol::RpcCall;

use crate::connection::SocketConnection;
use crate::error::RpcError;
use crate::mapper::ResponseMapper;
use crate::socket::{RpcSocket, SocketOptions};

/// Runs one call and yields its raw `result`.
#[async_trait]
pub trait RpcExecutor: Send + Sync {
    async fn call_raw(&self, call: RpcCall, cancel: &CancellationToken) -> Result<Value, RpcError>;
}

/// Run `call` on `executor` and decode the result with `mapper`.
pub async fn execute<E, T, M>(
    executor: &E,
    call: RpcCall,
    mapper: &M,
    cancel: &CancellationToken,
) -> Result<T, RpcError>
where
    E: RpcExecutor + ?Sized,
    M: ResponseMapper<T> + ?Sized,
{
    let raw = executor.call_raw(call, cancel).await?;
    mapper.map(raw).map_err(RpcError::Decode)
}

/// Opens a fresh socket per call and closes it afterwards, whatever the
/// outcome.  Cancelling the call disconnects that socket.
pub struct SingleShotExecutor {
    url: String,
    options: SocketOptions,
}

impl SingleShotExecutor {
    pub fn new(url: impl Into<String>, options: SocketOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }
}

#[async_trait]
impl RpcExecutor for SingleShotExecutor {
    async fn call_raw(&self, call: RpcCall, cancel: &CancellationToken) -> Result<Value, RpcError> {
        let socket = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            s = RpcSocket::connect(&self.url, &self.options) => s?,
        };
        let method = call.method.clone();
        let result = socket.request(call, cancel).await;
        socket.close();
        tracing::debug!(method = %method, ok = result.is_ok(), "single-shot call done");
        result
    }
}

/// Sends every call over the socket owned by a [`SocketConnection`],
/// waiting up to `connect_timeout` for a pending connect.
pub struct SharedSocketExecutor {
    connection: Arc<SocketConnection>,
    connect_timeout: Duration,
}

impl SharedSocketExecutor {
    pub fn new(connection: Arc<SocketConnection>) -> Self {
        let connect_timeout = connection.options().connect_timeout;
        Self {
            connection,
            connect_timeout,
        }
    }
}

#[async_trait]
impl RpcExecutor for SharedSocketExecutor {
    async fn call_raw(&self, call: RpcCall, cancel: &CancellationToken) -> Result<Value, RpcError> {
        let socket = tokio::time::timeout(
            self.connect_timeout,
            self.connection.wait_connected(cancel),
        )
        .await
        .map_err(|_| RpcError::NotConnected)??;
        socket.request(call, cancel).await
    }
}
