//! `nodewire watch`: keep the shared socket up and report its state.
//!
//! On unix, `SIGUSR1` sends the connection to the background (socket
//! closed) and `SIGUSR2` brings it back to the foreground.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use nw_domain::config::Config;
use nw_rpc::{
    bind_lifecycle, spawn_reconnector, AppState, HealthChecker, HealthSignal, ReconnectBackoff,
    SocketConnection, SocketOptions,
};

pub async fn run(config: &Config) -> anyhow::Result<()> {
    let url = config.node.ws_url.clone();
    tracing::info!(url = %url, "watching node connection");

    let connection = SocketConnection::new(SocketOptions::from(&config.node));
    let shutdown = CancellationToken::new();

    let reconnector = spawn_reconnector(
        connection.clone(),
        ReconnectBackoff::from(&config.node.reconnect),
        shutdown.clone(),
    );
    let health = HealthChecker::spawn(
        &connection,
        Arc::new(|signal: HealthSignal| match signal {
            HealthSignal::Healthy => tracing::info!("node healthy"),
            HealthSignal::Unhealthy => tracing::warn!("node unhealthy"),
        }),
    );

    let (app_state, app_state_rx) = watch::channel(AppState::Foreground);
    let lifecycle = bind_lifecycle(connection.clone(), url, app_state_rx);
    let transitions = tokio::spawn(log_transitions(connection.clone(), shutdown.clone()));

    wait_for_shutdown(app_state).await?;

    shutdown.cancel();
    connection.stop();
    lifecycle.abort();
    let _ = reconnector.await;
    let _ = transitions.await;
    tracing::info!(health = ?health.current(), "watch stopped");
    Ok(())
}

async fn log_transitions(connection: Arc<SocketConnection>, shutdown: CancellationToken) {
    let mut rx = connection.subscribe();
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            t = rx.recv() => t,
        };
        match next {
            Ok(t) => tracing::info!(
                from = ?t.from,
                to = ?t.to,
                generation = t.generation,
                "connection state changed"
            ),
            Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "state log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for SIGINT or SIGTERM.  Lifecycle signals are forwarded to
/// `app_state` meanwhile.
#[cfg(unix)]
async fn wait_for_shutdown(app_state: watch::Sender<AppState>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut background = signal(SignalKind::user_defined1())?;
    let mut foreground = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                return Ok(());
            }
            _ = background.recv() => {
                let _ = app_state.send(AppState::Background);
            }
            _ = foreground.recv() => {
                let _ = app_state.send(AppState::Foreground);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_app_state: watch::Sender<AppState>) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl-C, shutting down");
    Ok(())
}
