//! `nodewire listen`: follow the notification stream, resuming from the
//! last seen event id whenever the session closes.

use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use nw_domain::config::Config;
use nw_rpc::ReconnectBackoff;
use nw_sse::{ChannelListener, EventKind, SessionEvent, SseClient, SseRequest};

use crate::cli::node::ctrl_c_token;

pub async fn run(config: &Config, last_event_id: Option<String>) -> anyhow::Result<()> {
    let notifications = &config.notifications;
    let token = nw_sse::token::load_or_create(&notifications.token_file)
        .await
        .context("loading device token")?;
    let client = SseClient::new(notifications).context("building notification client")?;
    let backoff = ReconnectBackoff::from(&config.node.reconnect);
    let cancel = ctrl_c_token();

    let mut resume = last_event_id;
    let mut attempt: u32 = 0;
    loop {
        let mut request = SseRequest::new(&notifications.endpoint)
            .query(&notifications.token_param, &token);
        if let Some(id) = &resume {
            request = request.last_event_id(id);
        }

        let (listener, mut events) = ChannelListener::new();
        let handle = client.new_session(request, Arc::new(listener));
        let opened = pump(&mut events, &cancel).await;
        if let Some(id) = handle.last_event_id() {
            resume = Some(id);
        }
        handle.close();
        handle.closed().await;

        if cancel.is_cancelled() {
            return Ok(());
        }
        attempt = if opened { 0 } else { attempt + 1 };
        if backoff.should_give_up(attempt) {
            anyhow::bail!("notification stream unavailable after {attempt} attempts");
        }
        let delay = backoff.delay_for_attempt(attempt);
        tracing::info!(delay_ms = delay.as_millis() as u64, resume = ?resume, "reopening notification stream");
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Print events until the session reports `Closed`.  Returns whether the
/// stream was opened at all.
async fn pump(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    cancel: &CancellationToken,
) -> bool {
    let mut opened = false;
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return opened,
            e = events.recv() => e,
        };
        match event {
            Some(SessionEvent::Open { status }) => {
                opened = true;
                tracing::info!(status, "notification stream open");
            }
            Some(SessionEvent::Message(event)) => {
                let line = json!({
                    "id": event.id,
                    "type": event.kind.map(kind_name),
                    "data": event.data,
                });
                println!("{line}");
            }
            Some(SessionEvent::Error(message)) => {
                tracing::warn!(error = %message, "notification stream failed");
            }
            Some(SessionEvent::ResponseError { status, message }) => {
                tracing::warn!(status = ?status, error = %message, "notification endpoint refused");
            }
            Some(SessionEvent::Closed) | None => return opened,
        }
    }
}

fn kind_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Event => "event",
        EventKind::Signal => "signal",
    }
}
