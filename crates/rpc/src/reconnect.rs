//! Automatic reconnection of a [`SocketConnection`] after the socket drops.

use std::sync::Arc;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use nw_domain::config::ReconnectConfig;

use crate::connection::{ConnectionState, SocketConnection};

/// How long the reconnector waits after the socket to the node drops.
///
/// The wait before retry `n` is `initial_delay * backoff_factor^n`, held
/// at `max_delay`, plus up to a quarter of that drawn from the OS random
/// source.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Retries after which the reconnector stops.  `0` keeps going.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectBackoff {
    /// Wait before retry `attempt` (0-indexed), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            Duration::ZERO
        } else if secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Wait before retry `attempt`, jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.jittered(attempt, unit_random())
    }

    /// `base_delay` stretched by `fraction` (in `0.0..1.0`) of a quarter.
    fn jittered(&self, attempt: u32, fraction: f64) -> Duration {
        let base = self.base_delay(attempt);
        base + base.mul_f64(0.25 * fraction.clamp(0.0, 1.0))
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

fn unit_random() -> f64 {
    f64::from(OsRng.next_u32()) / (f64::from(u32::MAX) + 1.0)
}

/// Watch `connection` and call `start` again whenever a started socket
/// falls back to `Disconnected`.  An explicit `stop` is never undone.
///
/// The attempt counter resets on every successful connect.  The task ends
/// when `shutdown` fires or the back-off gives up.
pub fn spawn_reconnector(
    connection: Arc<SocketConnection>,
    backoff: ReconnectBackoff,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut transitions = connection.subscribe();
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            let transition = tokio::select! {
                _ = shutdown.cancelled() => break,
                t = transitions.recv() => t,
            };
            let transition = match transition {
                Ok(t) => t,
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "reconnector lagged behind state changes");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let url = match (&transition.from, &transition.to) {
                (_, ConnectionState::Connected(_)) => {
                    attempt = 0;
                    continue;
                }
                (
                    ConnectionState::Connecting(url) | ConnectionState::Connected(url),
                    ConnectionState::Disconnected,
                ) => url.clone(),
                _ => continue,
            };

            if backoff.should_give_up(attempt) {
                tracing::error!(url = %url, attempts = attempt, "max reconnect attempts exhausted");
                break;
            }

            let delay = backoff.delay_for_attempt(attempt);
            tracing::info!(
                url = %url,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
            attempt += 1;

            // Somebody else may have stopped or restarted it meanwhile.
            if connection.state() == ConnectionState::Disconnected {
                connection.start(&url);
            }
        }
    })
}
