//! Runtime schema: decoded metadata plus the type dictionary, cached on
//! disk and refreshed when the node reports a newer runtime.
//!
//! - [`scale`], [`metadata`], [`registry`], [`value`]: decoding.
//! - [`SchemaSnapshot`]: one immutable, shareable schema.
//! - [`RuntimeCache`]: keeps the current snapshot in step with the node.

pub mod cache;
pub mod error;
pub mod metadata;
pub mod registry;
pub mod remote;
pub mod scale;
pub mod snapshot;
pub mod store;
pub mod value;

pub use cache::{CacheState, DiagnosticsSink, RuntimeCache, TracingDiagnostics};
pub use error::RuntimeError;
pub use metadata::RuntimeMetadata;
pub use registry::TypeRegistry;
pub use remote::{NodeSchemaSource, RemoteSchemaSource};
pub use snapshot::{SchemaSnapshot, SnapshotCell};
pub use store::{BundledDefaults, FileCacheStore, SchemaDocuments, SchemaStore, StoredDocuments, VersionMarkers};
pub use value::{DecodeError, Value};
