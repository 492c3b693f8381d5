//! Runtime schema cache.
//!
//! ```text
//! start(cancel)
//!   ├─ Ready ───────────────────────────────────────► current snapshot
//!   └─ Uninitialized ─► Loading
//!        1. markers: build differs ─► bundled documents, spec marker cleared
//!                    build matches ─► cached documents (bundled per missing file)
//!        2. build snapshot off the async runtime; cached documents that
//!           do not parse are replaced by bundled ones, spec marker cleared
//!        3. persist documents + markers (failures only warn), publish
//!           (steps 1-3 skipped when an earlier start already published)
//!        4. node version <= stored ─► Ready
//!           node version >  stored ─► fetch, build, publish, persist ─► Ready
//!           any failure            ─► diagnostic, Uninitialized, snapshot kept
//! ```
//!
//! Concurrent `start` calls queue on one guard; only the first does any work.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use nw_domain::config::RuntimeConfig;

use crate::error::RuntimeError;
use crate::remote::RemoteSchemaSource;
use crate::snapshot::{SchemaSnapshot, SnapshotCell};
use crate::store::{BundledDefaults, SchemaDocuments, SchemaStore, VersionMarkers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Loading,
    Ready,
}

/// Receives the non-fatal problems `start` swallows.
pub trait DiagnosticsSink: Send + Sync {
    /// The version check or the refresh after it failed.  The cache keeps
    /// serving its previous snapshot.
    fn version_check_failed(&self, error: &RuntimeError);

    /// A freshly built snapshot references types nobody defines.
    fn unknown_types(&self, _names: &BTreeSet<String>) {}
}

/// Logs diagnostics through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn version_check_failed(&self, error: &RuntimeError) {
        tracing::warn!(error = %error, "runtime version check failed, keeping current schema");
    }

    fn unknown_types(&self, names: &BTreeSet<String>) {
        tracing::warn!(count = names.len(), types = ?names, "schema references unknown types");
    }
}

pub struct RuntimeCache {
    store: Arc<dyn SchemaStore>,
    bundled: BundledDefaults,
    remote: Arc<dyn RemoteSchemaSource>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    cell: Arc<SnapshotCell>,
    app_build: u32,
    default_prefix: u8,
    state: Mutex<CacheState>,
    version_checked: AtomicBool,
    load_guard: tokio::sync::Mutex<()>,
}

impl RuntimeCache {
    pub fn new(
        store: Arc<dyn SchemaStore>,
        bundled: BundledDefaults,
        remote: Arc<dyn RemoteSchemaSource>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            store,
            bundled,
            remote,
            diagnostics: Arc::new(TracingDiagnostics),
            cell: Arc::new(SnapshotCell::new()),
            app_build: config.app_build,
            default_prefix: config.default_address_prefix,
            state: Mutex::new(CacheState::Uninitialized),
            version_checked: AtomicBool::new(false),
            load_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Publish snapshots into `cell` instead of a private one.
    pub fn with_cell(mut self, cell: Arc<SnapshotCell>) -> Self {
        self.cell = cell;
        self
    }

    pub fn cell(&self) -> Arc<SnapshotCell> {
        self.cell.clone()
    }

    pub fn state(&self) -> CacheState {
        *self.state.lock()
    }

    pub fn snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        self.cell.load()
    }

    /// True once a version check has completed since the last reset.
    pub fn is_initialized(&self) -> bool {
        self.state() == CacheState::Ready && self.version_checked.load(Ordering::Acquire)
    }

    /// Bring the cache up to date with the node.
    ///
    /// Returns the current snapshot.  A failed version check is reported
    /// to the diagnostics sink and still returns the snapshot loaded from
    /// disk; the cache stays uninitialized so the next call retries the
    /// check without reloading.  Errors are returned only when no snapshot
    /// could be built at all, or when `cancel` fires.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<Arc<SchemaSnapshot>, RuntimeError> {
        if let Some(snapshot) = self.ready_snapshot() {
            return Ok(snapshot);
        }

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
            guard = self.load_guard.lock() => guard,
        };
        if let Some(snapshot) = self.ready_snapshot() {
            return Ok(snapshot);
        }

        let mut loading = LoadingState::enter(self);

        let snapshot = match self.cell.load() {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self.load_local().await?;
                self.cell.store(snapshot.clone());
                snapshot
            }
        };

        match self.check_version(snapshot.clone(), cancel).await {
            Ok(current) => {
                self.version_checked.store(true, Ordering::Release);
                loading.finish(CacheState::Ready);
                Ok(current)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                self.diagnostics.version_check_failed(&e);
                Ok(snapshot)
            }
        }
    }

    /// Forget the applied spec version so the next `start` refetches
    /// unconditionally.
    pub async fn reset_runtime_version(&self) -> Result<(), RuntimeError> {
        let _guard = self.load_guard.lock().await;
        let mut markers = self.store.load_markers().await?;
        markers.last_applied_spec_version = None;
        self.store.save_markers(&markers).await?;
        self.version_checked.store(false, Ordering::Release);
        self.set_state(CacheState::Uninitialized);
        tracing::info!("runtime version marker cleared");
        Ok(())
    }

    fn ready_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        if self.state() == CacheState::Ready {
            self.cell.load()
        } else {
            None
        }
    }

    fn set_state(&self, state: CacheState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "runtime cache state");
            *current = state;
        }
    }

    // ── steps 1-3 ───────────────────────────────────────────────────

    async fn load_local(&self) -> Result<Arc<SchemaSnapshot>, RuntimeError> {
        let mut markers = self.store.load_markers().await?;

        let same_build = markers.last_app_build == Some(self.app_build);
        let documents = if same_build {
            self.store.load_documents().await?.or_bundled(self.bundled.documents())
        } else {
            tracing::info!(
                cached_build = ?markers.last_app_build,
                app_build = self.app_build,
                "cache written by another build, using bundled documents"
            );
            markers.last_applied_spec_version = None;
            self.bundled.documents().clone()
        };
        markers.last_app_build = Some(self.app_build);

        let (documents, snapshot) = match self
            .build(documents.clone(), markers.last_applied_spec_version, false)
            .await
        {
            Ok(snapshot) => (documents, snapshot),
            Err(e) if same_build => {
                tracing::warn!(error = %e, "cached runtime documents are unreadable, using bundled documents");
                markers.last_applied_spec_version = None;
                let bundled = self.bundled.documents().clone();
                let snapshot = self.build(bundled.clone(), None, false).await?;
                (bundled, snapshot)
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.persist(&documents, &markers).await {
            tracing::warn!(error = %e, "failed to persist runtime documents");
        }
        Ok(snapshot)
    }

    // ── step 4 ──────────────────────────────────────────────────────

    async fn check_version(
        &self,
        current: Arc<SchemaSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Arc<SchemaSnapshot>, RuntimeError> {
        let node = self.remote.runtime_version(cancel).await?;
        let mut markers = self.store.load_markers().await?;

        if let Some(applied) = markers.last_applied_spec_version {
            if node.spec_version <= applied {
                tracing::debug!(spec_version = node.spec_version, applied, "runtime is current");
                return Ok(current);
            }
        }

        tracing::info!(
            spec_version = node.spec_version,
            applied = ?markers.last_applied_spec_version,
            "runtime upgraded, refreshing schema"
        );
        let documents = self.remote.fetch_documents(cancel).await?;
        // Built before persisting so documents that do not parse never
        // replace a working cache.
        let fresh = self.build(documents.clone(), Some(node.spec_version), true).await?;
        self.cell.store(fresh.clone());

        markers.last_applied_spec_version = Some(node.spec_version);
        markers.last_app_build = Some(self.app_build);
        if let Err(e) = self.persist(&documents, &markers).await {
            tracing::warn!(error = %e, "failed to persist refreshed runtime documents");
        }
        Ok(fresh)
    }

    async fn persist(&self, documents: &SchemaDocuments, markers: &VersionMarkers) -> Result<(), RuntimeError> {
        self.store.save_documents(documents).await?;
        self.store.save_markers(markers).await
    }

    async fn build(
        &self,
        documents: SchemaDocuments,
        spec_version: Option<u32>,
        from_net: bool,
    ) -> Result<Arc<SchemaSnapshot>, RuntimeError> {
        let default_prefix = self.default_prefix;
        let snapshot = tokio::task::spawn_blocking(move || {
            SchemaSnapshot::build(&documents, spec_version, from_net, default_prefix)
        })
        .await
        .map_err(|e| RuntimeError::Task(e.to_string()))??;

        if !snapshot.unknown_types().is_empty() {
            self.diagnostics.unknown_types(snapshot.unknown_types());
        }
        Ok(Arc::new(snapshot))
    }
}

/// Holds the cache in `Loading` and falls back to `Uninitialized` unless
/// finished, including when the `start` future is dropped.
struct LoadingState<'a> {
    cache: &'a RuntimeCache,
    done: bool,
}

impl<'a> LoadingState<'a> {
    fn enter(cache: &'a RuntimeCache) -> Self {
        cache.set_state(CacheState::Loading);
        Self { cache, done: false }
    }

    fn finish(&mut self, state: CacheState) {
        self.cache.set_state(state);
        self.done = true;
    }
}

impl Drop for LoadingState<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cache.set_state(CacheState::Uninitialized);
        }
    }
}
