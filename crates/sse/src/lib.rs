//! `nw-sse`: Server-Sent-Events client for the notification stream.
//!
//! This crate provides:
//! - [`LineReader`]: an incremental `text/event-stream` parser over any
//!   buffered async byte source.
//! - [`SseClient`] / [`SseHandle`]: a session that owns one streaming HTTP
//!   response, pumps it through the reader and reports to an
//!   [`SseListener`] until closed or failed.
//! - [`token`]: the persisted per-device token sent with every request.
//!
//! # Usage
//!
//! ```rust,ignore
//! use nw_sse::{ChannelListener, SseClient, SseRequest};
//!
//! let client = SseClient::new(&config.notifications)?;
//! let token = nw_sse::token::load_or_create(&config.notifications.token_file).await?;
//! let (listener, mut events) = ChannelListener::new();
//! let handle = client.new_session(
//!     SseRequest::new(&config.notifications.endpoint).query("token", token),
//!     Arc::new(listener),
//! );
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

pub mod error;
pub mod reader;
pub mod session;
pub mod token;
pub mod types;

pub use error::SseError;
pub use reader::LineReader;
pub use session::{SseClient, SseHandle};
pub use types::{
    ChannelListener, EventKind, ResponseInfo, SessionEvent, SseEvent, SseListener, SseRequest,
};
