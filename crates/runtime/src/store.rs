//! Where schema documents live between runs.
//!
//! The cache directory holds the last applied documents plus a small
//! `markers.json` recording which runtime version and which application
//! build wrote them.  The bundled directory ships with the build and is
//! never written.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

pub const METADATA_FILE: &str = "runtime_metadata.hex";
pub const BASE_TYPES_FILE: &str = "types_default.json";
pub const NETWORK_TYPES_FILE: &str = "types_network.json";
pub const MARKERS_FILE: &str = "markers.json";

/// The three documents a snapshot is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocuments {
    /// Hex runtime metadata as returned by `state_getMetadata`.
    pub metadata: String,
    pub base_types: String,
    pub network_types: String,
}

/// What the cache directory held.  A missing or empty file is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredDocuments {
    pub metadata: Option<String>,
    pub base_types: Option<String>,
    pub network_types: Option<String>,
}

impl StoredDocuments {
    /// Fill every absent document from `bundled`, file by file.
    pub fn or_bundled(self, bundled: &SchemaDocuments) -> SchemaDocuments {
        let pick = |stored: Option<String>, fallback: &String, file: &str| {
            stored.unwrap_or_else(|| {
                tracing::debug!(file, "cached document absent, using bundled copy");
                fallback.clone()
            })
        };
        SchemaDocuments {
            metadata: pick(self.metadata, &bundled.metadata, METADATA_FILE),
            base_types: pick(self.base_types, &bundled.base_types, BASE_TYPES_FILE),
            network_types: pick(self.network_types, &bundled.network_types, NETWORK_TYPES_FILE),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.base_types.is_none() && self.network_types.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarkers {
    /// Spec version the cached documents were fetched for.
    #[serde(default)]
    pub last_applied_spec_version: Option<u32>,
    /// Build of the application that wrote the cache.
    #[serde(default)]
    pub last_app_build: Option<u32>,
}

/// Persistence for the schema cache.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn load_documents(&self) -> Result<StoredDocuments, RuntimeError>;

    async fn save_documents(&self, documents: &SchemaDocuments) -> Result<(), RuntimeError>;

    /// Missing markers load as the default (nothing applied yet).
    async fn load_markers(&self) -> Result<VersionMarkers, RuntimeError>;

    async fn save_markers(&self, markers: &VersionMarkers) -> Result<(), RuntimeError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FileCacheStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cache directory on the local filesystem.  Each file is replaced
/// atomically, so a crash mid-write leaves the previous copy intact.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SchemaStore for FileCacheStore {
    async fn load_documents(&self) -> Result<StoredDocuments, RuntimeError> {
        Ok(StoredDocuments {
            metadata: read_optional(&self.dir.join(METADATA_FILE)).await?,
            base_types: read_optional(&self.dir.join(BASE_TYPES_FILE)).await?,
            network_types: read_optional(&self.dir.join(NETWORK_TYPES_FILE)).await?,
        })
    }

    async fn save_documents(&self, documents: &SchemaDocuments) -> Result<(), RuntimeError> {
        write_atomic(&self.dir.join(METADATA_FILE), &documents.metadata).await?;
        write_atomic(&self.dir.join(BASE_TYPES_FILE), &documents.base_types).await?;
        write_atomic(&self.dir.join(NETWORK_TYPES_FILE), &documents.network_types).await?;
        tracing::debug!(dir = %self.dir.display(), "schema documents saved");
        Ok(())
    }

    async fn load_markers(&self) -> Result<VersionMarkers, RuntimeError> {
        let path = self.dir.join(MARKERS_FILE);
        let Some(raw) = read_optional(&path).await? else {
            return Ok(VersionMarkers::default());
        };
        match serde_json::from_str(&raw) {
            Ok(markers) => Ok(markers),
            Err(e) => {
                // Unreadable markers look like a foreign build: the bundled
                // documents take over and the file is rewritten.
                tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt version markers");
                Ok(VersionMarkers::default())
            }
        }
    }

    async fn save_markers(&self, markers: &VersionMarkers) -> Result<(), RuntimeError> {
        let json = serde_json::to_string_pretty(markers)?;
        write_atomic(&self.dir.join(MARKERS_FILE), &json).await
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, RuntimeError> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) if s.trim().is_empty() => Ok(None),
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), RuntimeError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bundled defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Documents shipped with the application build.
#[derive(Debug, Clone)]
pub struct BundledDefaults {
    documents: SchemaDocuments,
}

impl BundledDefaults {
    pub fn new(documents: SchemaDocuments) -> Self {
        Self { documents }
    }

    /// Load the three documents from `dir` (same file names as the cache).
    /// Every one of them must be present and non-empty.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let dir = dir.as_ref();
        let required = |file: &'static str| async move {
            read_optional(&dir.join(file))
                .await?
                .ok_or_else(|| RuntimeError::MissingBundled(file.to_string()))
        };
        let documents = SchemaDocuments {
            metadata: required(METADATA_FILE).await?,
            base_types: required(BASE_TYPES_FILE).await?,
            network_types: required(NETWORK_TYPES_FILE).await?,
        };
        tracing::debug!(dir = %dir.display(), "bundled runtime documents loaded");
        Ok(Self { documents })
    }

    pub fn documents(&self) -> &SchemaDocuments {
        &self.documents
    }
}
