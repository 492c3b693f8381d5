//! Runtime schema cache commands.

use std::sync::Arc;

use anyhow::Context;

use nw_domain::config::Config;
use nw_runtime::{RuntimeCache, SchemaSnapshot};

use crate::bootstrap::{build_runtime_cache, NodeLink};
use crate::cli::node::ctrl_c_token;

/// Open the shared socket, build the cache and run one `start`.
async fn started(config: &Config) -> anyhow::Result<(NodeLink, RuntimeCache, Arc<SchemaSnapshot>)> {
    let link = NodeLink::start(config);
    let cache = build_runtime_cache(config, link.executor.clone()).await?;
    let snapshot = cache
        .start(&ctrl_c_token())
        .await
        .context("loading runtime schema")?;
    Ok((link, cache, snapshot))
}

/// `nodewire sync`
pub async fn sync(config: &Config) -> anyhow::Result<()> {
    let (link, cache, snapshot) = started(config).await?;
    link.stop();

    println!(
        "runtime schema {}: metadata v{}, {} modules, {} types",
        if cache.is_initialized() { "up to date" } else { "loaded (version check failed)" },
        snapshot.metadata().version,
        snapshot.metadata().modules.len(),
        snapshot.registry().len(),
    );
    println!(
        "spec version: {}",
        snapshot
            .spec_version()
            .map_or_else(|| "unknown".to_string(), |v| v.to_string())
    );
    println!("source: {}", if snapshot.from_net() { "node" } else { "local cache" });
    println!("address prefix: {}", snapshot.address_prefix());
    if !snapshot.unknown_types().is_empty() {
        println!("unknown types ({}):", snapshot.unknown_types().len());
        for name in snapshot.unknown_types() {
            println!("  {name}");
        }
    }
    Ok(())
}

/// `nodewire reset-runtime`
pub async fn reset(config: &Config) -> anyhow::Result<()> {
    let link = NodeLink::start(config);
    let cache = build_runtime_cache(config, link.executor.clone()).await?;
    link.stop();
    cache
        .reset_runtime_version()
        .await
        .context("clearing runtime version marker")?;
    println!("runtime version marker cleared; the next sync refetches the schema");
    Ok(())
}

/// `nodewire decode <type> <hex>`
pub async fn decode(config: &Config, type_name: &str, hex_input: &str) -> anyhow::Result<()> {
    let digits = hex_input.trim();
    let bytes = hex::decode(digits.strip_prefix("0x").unwrap_or(digits)).context("input is not hex")?;

    let (link, _cache, snapshot) = started(config).await?;
    link.stop();

    let value = snapshot
        .decode(type_name, &bytes)
        .with_context(|| format!("decoding {type_name}"))?;
    println!("{}", serde_json::to_string_pretty(&value.to_json())?);
    Ok(())
}

/// `nodewire constant <module> <name>`
pub async fn constant(config: &Config, module: &str, name: &str) -> anyhow::Result<()> {
    let (link, _cache, snapshot) = started(config).await?;
    link.stop();

    let value = snapshot
        .decode_constant(module, name)
        .with_context(|| format!("decoding {module}.{name}"))?;
    println!("{}", serde_json::to_string_pretty(&value.to_json())?);
    Ok(())
}
