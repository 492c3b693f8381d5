use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Push notifications (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Streaming endpoint serving `text/event-stream`.
    #[serde(default = "d_endpoint")]
    pub endpoint: String,
    /// Name of the query parameter carrying the per-device token.
    #[serde(default = "d_token_param")]
    pub token_param: String,
    /// File the per-device token is persisted in after first use.
    #[serde(default = "d_token_file")]
    pub token_file: PathBuf,
    /// Timeout for establishing the stream (headers received).
    #[serde(default = "d_15000")]
    pub connect_timeout_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            endpoint: d_endpoint(),
            token_param: d_token_param(),
            token_file: d_token_file(),
            connect_timeout_ms: 15_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_endpoint() -> String {
    "http://127.0.0.1:8080/events".into()
}
fn d_token_param() -> String {
    "token".into()
}
fn d_token_file() -> PathBuf {
    PathBuf::from("./data/device_token")
}
fn d_15000() -> u64 {
    15_000
}
