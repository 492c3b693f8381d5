//! Event, request and listener types shared by the reader and the session.

use std::str::FromStr;

use tokio::sync::mpsc;

use crate::error::SseError;

/// Type of a server-sent event, taken from the `event:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Event,
    Signal,
}

impl FromStr for EventKind {
    type Err = SseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(EventKind::Event),
            "signal" => Ok(EventKind::Signal),
            other => Err(SseError::UnknownEventType(other.to_string())),
        }
    }
}

/// One dispatched event.  `data` holds the `data:` line bodies joined with
/// `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: String,
    pub kind: Option<EventKind>,
    pub data: String,
}

/// Parameters of one streaming request.
#[derive(Debug, Clone)]
pub struct SseRequest {
    pub url: String,
    /// Sent as the `Last-Event-ID` header when present.
    pub last_event_id: Option<String>,
    /// Extra query parameters (the per-device token goes here).
    pub query: Vec<(String, String)>,
}

impl SseRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_event_id: None,
            query: Vec::new(),
        }
    }

    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// What `on_open` gets to see of the HTTP response.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: u16,
    pub content_type: Option<String>,
}

/// Callbacks for one session.
///
/// The session drives these from a single task, so calls never overlap.
/// The terminal sequence is always an optional `on_error` or
/// `on_response_error` followed by exactly one `on_closed`.
pub trait SseListener: Send + Sync + 'static {
    fn on_open(&self, _response: &ResponseInfo) {}

    fn on_message(&self, id: &str, kind: Option<EventKind>, data: &str);

    /// The connection failed or broke mid-stream.
    fn on_error(&self, _error: &SseError) {}

    /// The server answered with a non-2xx status.
    fn on_response_error(&self, _error: &SseError) {}

    fn on_closed(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel-backed listener
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owned form of a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Open { status: u16 },
    Message(SseEvent),
    Error(String),
    ResponseError { status: Option<u16>, message: String },
    Closed,
}

/// A listener that forwards every callback into an unbounded channel, for
/// callers that prefer to `recv().await` rather than implement
/// [`SseListener`].
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        // The receiver going away just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl SseListener for ChannelListener {
    fn on_open(&self, response: &ResponseInfo) {
        self.forward(SessionEvent::Open {
            status: response.status,
        });
    }

    fn on_message(&self, id: &str, kind: Option<EventKind>, data: &str) {
        self.forward(SessionEvent::Message(SseEvent {
            id: id.to_string(),
            kind,
            data: data.to_string(),
        }));
    }

    fn on_error(&self, error: &SseError) {
        self.forward(SessionEvent::Error(error.to_string()));
    }

    fn on_response_error(&self, error: &SseError) {
        let status = match error {
            SseError::Status { status } => Some(*status),
            _ => None,
        };
        self.forward(SessionEvent::ResponseError {
            status,
            message: error.to_string(),
        });
    }

    fn on_closed(&self) {
        self.forward(SessionEvent::Closed);
    }
}
