//! One-shot node calls, each on a socket of its own.

use anyhow::Context;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use nw_domain::config::Config;
use nw_protocol::{RpcCall, RuntimeVersion, STATE_GET_RUNTIME_VERSION};
use nw_rpc::{execute, JsonMapper, SingleShotExecutor, SocketOptions};

fn executor(config: &Config, url: Option<String>) -> SingleShotExecutor {
    let url = url.unwrap_or_else(|| config.node.ws_url.clone());
    SingleShotExecutor::new(url, SocketOptions::from(&config.node))
}

/// `nodewire runtime-version`
pub async fn runtime_version(config: &Config, url: Option<String>) -> anyhow::Result<()> {
    let cancel = ctrl_c_token();
    let version: RuntimeVersion = execute(
        &executor(config, url),
        RpcCall::bare(STATE_GET_RUNTIME_VERSION),
        &JsonMapper::new(),
        &cancel,
    )
    .await
    .context("state_getRuntimeVersion")?;
    println!(
        "{} {} (spec {}, impl {}, tx {})",
        version.spec_name,
        version.impl_name,
        version.spec_version,
        version.impl_version,
        version.transaction_version
    );
    Ok(())
}

/// `nodewire call <method> --params '[...]'`
pub async fn call(config: &Config, method: String, params: &str, url: Option<String>) -> anyhow::Result<()> {
    let params = parse_params(params)?;
    let cancel = ctrl_c_token();
    let result: Value = execute(
        &executor(config, url),
        RpcCall::new(method.clone(), params),
        &JsonMapper::new(),
        &cancel,
    )
    .await
    .with_context(|| format!("calling {method}"))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub fn parse_params(raw: &str) -> anyhow::Result<Vec<Value>> {
    match serde_json::from_str(raw).context("--params must be JSON")? {
        Value::Array(items) => Ok(items),
        other => anyhow::bail!("--params must be a JSON array, got {other}"),
    }
}

/// Cancelled on the first Ctrl-C.
pub(crate) fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_must_be_an_array() {
        assert_eq!(parse_params(r#"[1, "0xab"]"#).unwrap(), vec![json!(1), json!("0xab")]);
        assert!(parse_params("{}").is_err());
        assert!(parse_params("not json").is_err());
    }
}
