use std::time::Duration;

use nw_protocol::RequestId;

use crate::mapper::MapperError;

/// Failure of one RPC call.
///
/// Transport failures (the socket could not be opened, or went away while
/// the call was in flight) are kept apart from [`RpcError::Node`] (the node
/// answered with an error object) and [`RpcError::Decode`] (the node
/// answered, but the payload did not fit the expected type).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("decode: {0}")]
    Decode(#[from] MapperError),

    #[error("encoding request: {0}")]
    Encode(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error("too many pending requests (limit {0})")]
    TooManyPending(usize),

    #[error("request id {0} is already waiting for a reply")]
    DuplicateId(RequestId),
}

impl RpcError {
    /// True for failures caused by the socket rather than by the node or
    /// by decoding.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::NotConnected | RpcError::Timeout(_)
        )
    }
}
