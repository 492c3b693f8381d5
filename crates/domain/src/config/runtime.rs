use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime schema cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Address prefix used when the metadata carries no usable
/// `System.SS58Prefix` constant.
pub const DEFAULT_ADDRESS_PREFIX: u8 = 69;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding the cached metadata, type dictionaries and markers.
    #[serde(default = "d_cache_dir")]
    pub cache_dir: PathBuf,
    /// Directory holding the documents shipped with the application build.
    /// Used whenever the cache is empty or was written by another build.
    #[serde(default = "d_bundled_dir")]
    pub bundled_dir: PathBuf,
    /// Base URL the type dictionaries are fetched from.  The base document
    /// lives at `{types_base_url}/default.json`, the network one at
    /// `{types_base_url}/{network}.json`.
    #[serde(default = "d_types_base_url")]
    pub types_base_url: String,
    /// Network identifier used as the path segment of the network document.
    #[serde(default = "d_network")]
    pub network: String,
    /// Build number of the running application.  A cache written by a
    /// different build is discarded in favour of the bundled documents.
    #[serde(default = "d_app_build")]
    pub app_build: u32,
    #[serde(default = "d_prefix")]
    pub default_address_prefix: u8,
    /// Timeout for the HTTPS type-dictionary downloads.
    #[serde(default = "d_20000")]
    pub fetch_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_dir: d_cache_dir(),
            bundled_dir: d_bundled_dir(),
            types_base_url: d_types_base_url(),
            network: d_network(),
            app_build: d_app_build(),
            default_address_prefix: DEFAULT_ADDRESS_PREFIX,
            fetch_timeout_ms: 20_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_cache_dir() -> PathBuf {
    PathBuf::from("./data/runtime")
}
fn d_bundled_dir() -> PathBuf {
    PathBuf::from("./assets/runtime")
}
fn d_types_base_url() -> String {
    "https://raw.githubusercontent.com/nodewire/type-definitions/master".into()
}
fn d_network() -> String {
    "sora".into()
}
fn d_app_build() -> u32 {
    1
}
fn d_prefix() -> u8 {
    DEFAULT_ADDRESS_PREFIX
}
fn d_20000() -> u64 {
    20_000
}
