use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// [observability]
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trace export for the long-running commands (`watch`, `listen`).
///
/// Logs always go to stdout as JSON.  With an `otlp_endpoint` the same
/// spans (socket transitions, reconnect attempts, SSE sessions, schema
/// refreshes) are also shipped to an OTLP/gRPC collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Collector address, e.g. `http://localhost:4317`.  Unset or blank
    /// disables export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Reported as `service.name`.
    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces kept, decided once per trace id.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl ObservabilityConfig {
    /// The collector to export to, if any.
    pub fn export_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_service_name() -> String {
    "nodewire".into()
}

fn d_sample_rate() -> f64 {
    1.0
}
