/// Errors that terminate an SSE session.
///
/// Every variant is terminal for the session that produced it: the listener
/// sees `on_error` (or `on_response_error` for [`SseError::Status`]) followed
/// by `on_closed`, and nothing after that.
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// Could not reach the endpoint or the request itself failed.
    #[error("transport: {0}")]
    Transport(String),

    /// The server answered, but not with a 2xx status.
    #[error("unexpected response status {status}")]
    Status { status: u16 },

    /// Reading the stream body failed mid-flight.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An `event:` field carried a value that is not a known event type.
    #[error("unknown event type {0:?}")]
    UnknownEventType(String),

    #[error("timeout waiting for the stream to open")]
    Timeout,
}
