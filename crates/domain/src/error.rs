/// Shared error type for configuration and local I/O.  Protocol failures
/// live in each crate's own error enum so that transport and decode
/// failures stay distinguishable.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
