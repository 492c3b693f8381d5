//! One streaming HTTP response driven to completion by a spawned task.
//!
//! ```text
//! SseClient::new_session(request, listener)
//!   └─ tokio::spawn(run_session) ── GET (Accept: text/event-stream)
//!        ├── non-2xx  ─► on_response_error ─► on_closed
//!        ├── send err ─► on_error          ─► on_closed
//!        └── 2xx      ─► on_open ─► LineReader pump ─► on_message*
//!                                    ├── EOF / close() ─► on_closed
//!                                    └── read error    ─► on_error ─► on_closed
//! ```
//!
//! The session never reconnects on its own.  Callers that want a resumable
//! feed watch for `on_closed` and open a new session with
//! [`SseHandle::last_event_id`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use nw_domain::config::NotificationsConfig;

use crate::error::SseError;
use crate::reader::LineReader;
use crate::types::{ResponseInfo, SseListener, SseRequest};

/// Opens SSE sessions.  Cheap to clone the inner HTTP client, so one
/// instance can serve any number of sessions.
pub struct SseClient {
    http: reqwest::Client,
    connect_timeout: Duration,
    next_session: AtomicU64,
}

impl SseClient {
    /// Build a client from the `[notifications]` config section.
    pub fn new(config: &NotificationsConfig) -> Result<Self, SseError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| SseError::Transport(e.to_string()))?;
        Ok(Self::with_client(
            http,
            Duration::from_millis(config.connect_timeout_ms),
        ))
    }

    pub fn with_client(http: reqwest::Client, connect_timeout: Duration) -> Self {
        Self {
            http,
            connect_timeout,
            next_session: AtomicU64::new(1),
        }
    }

    /// Open a session.  Returns immediately; all listener callbacks are
    /// delivered from a background task.
    pub fn new_session(&self, request: SseRequest, listener: Arc<dyn SseListener>) -> SseHandle {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let last_event_id = Arc::new(Mutex::new(request.last_event_id.clone()));

        let task = tokio::spawn(run_session(
            id,
            self.http.clone(),
            self.connect_timeout,
            request,
            listener,
            cancel.clone(),
            last_event_id.clone(),
        ));

        SseHandle {
            id,
            cancel,
            last_event_id,
            task: Some(task),
        }
    }

    /// Close a session.  Same as [`SseHandle::close`].
    pub fn close(&self, handle: &SseHandle) {
        handle.close();
    }
}

/// Handle to a running session.  Dropping the handle closes the session.
pub struct SseHandle {
    id: u64,
    cancel: CancellationToken,
    last_event_id: Arc<Mutex<Option<String>>>,
    task: Option<JoinHandle<()>>,
}

impl SseHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cooperative cancellation.  The read loop stops before its
    /// next blocking read and the listener receives `on_closed`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// True once the session task has delivered `on_closed`.
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Id of the most recent event that carried one, or the id the session
    /// was opened with.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }

    /// Wait until the session has finished (after `on_closed`).
    pub async fn closed(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(session = self.id, error = %e, "SSE session task failed");
            }
        }
    }
}

impl Drop for SseHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_session(
    id: u64,
    http: reqwest::Client,
    connect_timeout: Duration,
    request: SseRequest,
    listener: Arc<dyn SseListener>,
    cancel: CancellationToken,
    last_event_id: Arc<Mutex<Option<String>>>,
) {
    drive_session(
        id,
        &http,
        connect_timeout,
        &request,
        listener.as_ref(),
        &cancel,
        &last_event_id,
    )
    .await;
    tracing::debug!(session = id, "SSE session closed");
    listener.on_closed();
}

async fn drive_session(
    id: u64,
    http: &reqwest::Client,
    connect_timeout: Duration,
    request: &SseRequest,
    listener: &dyn SseListener,
    cancel: &CancellationToken,
    last_event_id: &Mutex<Option<String>>,
) {
    let mut builder = http
        .get(&request.url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(last_id) = &request.last_event_id {
        builder = builder.header("Last-Event-ID", last_id.as_str());
    }

    tracing::info!(session = id, url = %request.url, "opening SSE session");

    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(session = id, "SSE session closed before the response arrived");
            return;
        }
        r = tokio::time::timeout(connect_timeout, builder.send()) => r,
    };

    let response = match sent {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let err = SseError::Transport(e.to_string());
            tracing::warn!(session = id, error = %err, "SSE request failed");
            listener.on_error(&err);
            return;
        }
        Err(_) => {
            let err = SseError::Timeout;
            tracing::warn!(session = id, error = %err, "SSE request timed out");
            listener.on_error(&err);
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let err = SseError::Status {
            status: status.as_u16(),
        };
        tracing::warn!(session = id, status = status.as_u16(), "SSE endpoint rejected the request");
        listener.on_response_error(&err);
        return;
    }

    let info = ResponseInfo {
        status: status.as_u16(),
        content_type: response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };
    listener.on_open(&info);

    let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
    let mut reader = LineReader::new(StreamReader::new(body));

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = reader.read_line() => r,
        };
        match next {
            Ok(Some(event)) => {
                if !event.id.is_empty() {
                    *last_event_id.lock() = Some(event.id.clone());
                }
                listener.on_message(&event.id, event.kind, &event.data);
            }
            Ok(None) => {
                if reader.is_exhausted() {
                    tracing::debug!(session = id, "SSE stream ended");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(session = id, error = %e, "SSE stream failed");
                listener.on_error(&e);
                break;
            }
        }
    }
}
