//! Healthy/unhealthy signal derived from the connection state.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionState, SocketConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    Healthy,
    Unhealthy,
}

impl From<&ConnectionState> for HealthSignal {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Connected(_) => HealthSignal::Healthy,
            _ => HealthSignal::Unhealthy,
        }
    }
}

/// Receives health changes.  Called only when the signal actually flips.
pub trait HealthSink: Send + Sync {
    fn on_health(&self, signal: HealthSignal);
}

impl<F> HealthSink for F
where
    F: Fn(HealthSignal) + Send + Sync,
{
    fn on_health(&self, signal: HealthSignal) {
        self(signal)
    }
}

/// Follows a connection's transitions and reports health flips.
pub struct HealthChecker {
    signal: watch::Receiver<HealthSignal>,
    task: JoinHandle<()>,
}

impl HealthChecker {
    pub fn spawn(connection: &SocketConnection, sink: Arc<dyn HealthSink>) -> Self {
        // Subscribe before sampling so no transition falls in between.
        let mut transitions = connection.subscribe();
        let initial = HealthSignal::from(&connection.state());
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            loop {
                let to = match transitions.recv().await {
                    Ok(t) => t.to,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "health checker lagged behind state changes");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let signal = HealthSignal::from(&to);
                let flipped = tx.send_if_modified(|current| {
                    if *current == signal {
                        false
                    } else {
                        *current = signal;
                        true
                    }
                });
                if flipped {
                    tracing::info!(signal = ?signal, "node health changed");
                    sink.on_health(signal);
                }
            }
        });

        Self { signal: rx, task }
    }

    pub fn current(&self) -> HealthSignal {
        *self.signal.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthSignal> {
        self.signal.clone()
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_is_healthy() {
        assert_eq!(
            HealthSignal::from(&ConnectionState::Connected("u".into())),
            HealthSignal::Healthy
        );
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting("u".into()),
            ConnectionState::Stopped,
        ] {
            assert_eq!(HealthSignal::from(&state), HealthSignal::Unhealthy);
        }
    }
}
