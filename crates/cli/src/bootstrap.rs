//! Builds the long-lived clients from a [`Config`].

use std::sync::Arc;

use anyhow::Context;

use nw_domain::config::Config;
use nw_rpc::{RpcExecutor, SharedSocketExecutor, SocketConnection, SocketOptions};
use nw_runtime::{BundledDefaults, FileCacheStore, NodeSchemaSource, RuntimeCache};

/// The shared node socket, already started, and an executor running calls
/// on it.
pub struct NodeLink {
    pub connection: Arc<SocketConnection>,
    pub executor: Arc<SharedSocketExecutor>,
}

impl NodeLink {
    pub fn start(config: &Config) -> Self {
        let connection = SocketConnection::new(SocketOptions::from(&config.node));
        connection.start(&config.node.ws_url);
        let executor = Arc::new(SharedSocketExecutor::new(connection.clone()));
        Self {
            connection,
            executor,
        }
    }

    pub fn stop(&self) {
        self.connection.stop();
    }
}

/// Schema cache backed by `runtime.cache_dir`, falling back to the
/// documents in `runtime.bundled_dir`.
pub async fn build_runtime_cache(
    config: &Config,
    executor: Arc<dyn RpcExecutor>,
) -> anyhow::Result<RuntimeCache> {
    let runtime = &config.runtime;
    let bundled = BundledDefaults::load_dir(&runtime.bundled_dir)
        .await
        .with_context(|| format!("loading bundled documents from {}", runtime.bundled_dir.display()))?;
    let remote = NodeSchemaSource::new(executor, runtime).context("building schema source")?;
    let store = FileCacheStore::new(runtime.cache_dir.clone());

    tracing::debug!(
        cache_dir = %runtime.cache_dir.display(),
        network = %runtime.network,
        app_build = runtime.app_build,
        "runtime cache configured"
    );
    Ok(RuntimeCache::new(
        Arc::new(store),
        bundled,
        Arc::new(remote),
        runtime,
    ))
}
