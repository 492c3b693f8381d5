mod node;
mod notifications;
mod observability;
mod runtime;

pub use node::*;
pub use notifications::*;
pub use observability::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Sanity checks that serde defaults cannot express.  Returns one
    /// message per problem found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !(self.node.ws_url.starts_with("ws://") || self.node.ws_url.starts_with("wss://")) {
            problems.push(format!(
                "node.ws_url must use ws:// or wss:// (got {:?})",
                self.node.ws_url
            ));
        }
        if self.node.max_pending == 0 {
            problems.push("node.max_pending must be greater than zero".into());
        }
        if self.node.reconnect.backoff_factor < 1.0 {
            problems.push("node.reconnect.backoff_factor must be >= 1.0".into());
        }
        if self.runtime.network.trim().is_empty() || self.runtime.network.contains('/') {
            problems.push(format!(
                "runtime.network must be a single path segment (got {:?})",
                self.runtime.network
            ));
        }
        if self.notifications.token_param.trim().is_empty() {
            problems.push("notifications.token_param must not be empty".into());
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            problems.push("observability.sample_rate must be within 0.0..=1.0".into());
        }
        problems
    }
}
