use nw_rpc::RpcError;

use crate::metadata::MetadataError;
use crate::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("cache I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("version markers: {0}")]
    Markers(#[from] serde_json::Error),

    #[error("runtime metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("type dictionary: {0}")]
    Registry(#[from] RegistryError),

    #[error("node: {0}")]
    Rpc(#[from] RpcError),

    #[error("fetching {url}: {message}")]
    Http { url: String, message: String },

    #[error("bundled document {0} is missing or empty")]
    MissingBundled(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("cancelled")]
    Cancelled,
}

impl RuntimeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RuntimeError::Cancelled | RuntimeError::Rpc(RpcError::Cancelled)
        )
    }
}
