use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node RPC connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the JSON-RPC socket to the chain node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// WebSocket endpoint of the node (e.g. `wss://rpc.example.org`).
    #[serde(default = "d_ws_url")]
    pub ws_url: String,
    /// How long to wait for the socket handshake to complete.
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    /// How long a single request may wait for its correlated response.
    #[serde(default = "d_30000")]
    pub request_timeout_ms: u64,
    /// Upper bound on in-flight requests per socket.
    #[serde(default = "d_1024")]
    pub max_pending: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ws_url: d_ws_url(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            max_pending: 1024,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Back-off used by the reconnection collaborator after a transport drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_1000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_60000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub backoff_factor: f64,
    /// `0` means unlimited attempts.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            max_attempts: 0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ws_url() -> String {
    "ws://127.0.0.1:9944".into()
}
fn d_1000() -> u64 {
    1_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_60000() -> u64 {
    60_000
}
fn d_1024() -> usize {
    1024
}
fn d_factor() -> f64 {
    2.0
}
