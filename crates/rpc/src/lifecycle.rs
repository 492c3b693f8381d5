//! Ties the connection to the host application's foreground/background
//! state: foreground starts the socket, background stops it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::SocketConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

/// Follow `states` until its sender is dropped.  Consecutive duplicate
/// states are ignored, so the connection never sees a redundant
/// start/stop pair.
pub fn bind_lifecycle(
    connection: Arc<SocketConnection>,
    url: String,
    mut states: watch::Receiver<AppState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut applied: Option<AppState> = None;
        loop {
            let state = *states.borrow_and_update();
            if applied != Some(state) {
                tracing::debug!(state = ?state, "app lifecycle changed");
                match state {
                    AppState::Foreground => connection.start(&url),
                    AppState::Background => connection.stop(),
                }
                applied = Some(state);
            }
            if states.changed().await.is_err() {
                break;
            }
        }
    })
}
