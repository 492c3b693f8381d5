pub mod config;
pub mod listen;
pub mod node;
pub mod runtime;
pub mod watch;

use std::path::Path;

use clap::{Parser, Subcommand};

use nw_domain::config::Config;

/// nodewire: connectivity to a chain node and its notification stream.
#[derive(Debug, Parser)]
#[command(name = "nodewire", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print version information.
    Version,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Ask the node for its runtime version.
    RuntimeVersion {
        /// Node WebSocket URL (defaults to `node.ws_url`).
        #[arg(long)]
        url: Option<String>,
    },
    /// Send one JSON-RPC call over a fresh socket and print the result.
    Call {
        /// Method name, e.g. `system_chain`.
        method: String,
        /// Positional parameters as a JSON array.
        #[arg(long, default_value = "[]")]
        params: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// Bring the local runtime schema cache up to date with the node.
    Sync,
    /// Forget the applied runtime version so the next sync refetches.
    ResetRuntime,
    /// Decode hex-encoded bytes as the given type.
    Decode {
        /// Type name, e.g. `AccountInfo` or `Vec<u32>`.
        type_name: String,
        /// `0x`-prefixed or bare hex.
        hex: String,
    },
    /// Decode a constant from the runtime metadata.
    Constant { module: String, name: String },
    /// Keep the node socket open, reconnecting on drops, and log its state.
    Watch,
    /// Follow the notification stream and print each event as JSON.
    Listen {
        /// Resume after this event id.
        #[arg(long)]
        last_event_id: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any problems.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `NW_CONFIG` (or
/// `nodewire.toml`).  Returns the parsed [`Config`] and the path used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("NW_CONFIG").unwrap_or_else(|_| "nodewire.toml".into());
    let config = load_config_from(Path::new(&config_path))?;
    Ok((config, config_path))
}

/// A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_parses_method_and_params() {
        let cli = Cli::try_parse_from([
            "nodewire",
            "call",
            "state_getStorage",
            "--params",
            r#"["0xabc"]"#,
        ])
        .unwrap();
        match cli.command {
            Command::Call { method, params, url } => {
                assert_eq!(method, "state_getStorage");
                assert_eq!(params, r#"["0xabc"]"#);
                assert!(url.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn listen_accepts_a_resume_id() {
        let cli = Cli::try_parse_from(["nodewire", "listen", "--last-event-id", "41"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Listen { last_event_id: Some(ref id) } if id == "41"
        ));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.node.ws_url, Config::default().node.ws_url);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodewire.toml");
        std::fs::write(
            &path,
            "[node]\nws_url = \"wss://rpc.example.org\"\n\n[runtime]\napp_build = 12\n",
        )
        .unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.node.ws_url, "wss://rpc.example.org");
        assert_eq!(config.runtime.app_build, 12);
        assert_eq!(config.node.max_pending, 1024);
    }

    #[test]
    fn malformed_config_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[node\n").unwrap();
        let err = load_config_from(&path).unwrap_err().to_string();
        assert!(err.contains("broken.toml"), "{err}");
    }
}
