//! Per-device token sent as a query parameter on the notification stream.
//!
//! Generated once from the OS random source and persisted so the server can
//! recognise the device across restarts.

use std::path::Path;

use rand_core::{OsRng, RngCore};

use nw_domain::error::{Error, Result};

/// Number of random bytes in a freshly generated token.
pub const TOKEN_BYTES: usize = 32;

/// Load the token stored at `path`, generating and persisting a new one when
/// the file is missing, empty or not valid hex.
pub async fn load_or_create(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let token = raw.trim();
            if is_valid_token(token) {
                return Ok(token.to_string());
            }
            tracing::warn!(path = %path.display(), "stored device token is malformed, regenerating");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(e)),
    }

    let token = generate();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }
    tokio::fs::write(path, &token).await?;
    tracing::info!(path = %path.display(), "generated new device token");
    Ok(token)
}

/// A fresh hex-encoded token.
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.len() % 2 == 0 && hex::decode(token).is_ok()
}
