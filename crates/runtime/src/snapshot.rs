//! Immutable decoded schema, shared as `Arc<SchemaSnapshot>` and swapped
//! wholesale on refresh.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::RuntimeError;
use crate::metadata::{RuntimeMetadata, StorageModifier};
use crate::registry::TypeRegistry;
use crate::store::SchemaDocuments;
use crate::value::{self, DecodeError, Value};

pub const PREFIX_MODULE: &str = "System";
pub const PREFIX_CONSTANT: &str = "SS58Prefix";

#[derive(Debug)]
pub struct SchemaSnapshot {
    registry: TypeRegistry,
    metadata: RuntimeMetadata,
    address_prefix: u8,
    spec_version: Option<u32>,
    from_net: bool,
    unknown_types: BTreeSet<String>,
}

impl SchemaSnapshot {
    /// Parse the three documents.  Names neither the dictionary nor the
    /// built-ins can resolve are collected in [`unknown_types`](Self::unknown_types)
    /// instead of failing the build.
    pub fn build(
        documents: &SchemaDocuments,
        spec_version: Option<u32>,
        from_net: bool,
        default_prefix: u8,
    ) -> Result<Self, RuntimeError> {
        let metadata = RuntimeMetadata::from_hex(&documents.metadata)?;
        let registry =
            TypeRegistry::build(&documents.base_types, &documents.network_types, spec_version)?;

        let mut unknown_types = registry.unresolved(metadata.type_names());
        unknown_types.extend(registry.self_unresolved());

        let address_prefix = derive_address_prefix(&metadata, &registry, default_prefix);
        tracing::debug!(
            modules = metadata.modules.len(),
            types = registry.len(),
            unknown = unknown_types.len(),
            address_prefix,
            from_net,
            "schema snapshot built"
        );

        Ok(Self {
            registry,
            metadata,
            address_prefix,
            spec_version,
            from_net,
            unknown_types,
        })
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn metadata(&self) -> &RuntimeMetadata {
        &self.metadata
    }

    pub fn address_prefix(&self) -> u8 {
        self.address_prefix
    }

    /// Spec version the type dictionary was resolved for.
    pub fn spec_version(&self) -> Option<u32> {
        self.spec_version
    }

    /// True when the documents came straight from the network rather than
    /// the local cache.
    pub fn from_net(&self) -> bool {
        self.from_net
    }

    pub fn unknown_types(&self) -> &BTreeSet<String> {
        &self.unknown_types
    }

    pub fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
        value::decode(&self.registry, type_name, bytes)
    }

    pub fn decode_constant(&self, module: &str, name: &str) -> Result<Value, DecodeError> {
        let constant = self
            .metadata
            .constant(module, name)
            .ok_or_else(|| DecodeError::NotInMetadata {
                item: format!("{module}.{name}"),
            })?;
        self.decode(&constant.ty, &constant.value)
    }

    /// Decode a storage value.  `raw` is `None` when the node returned no
    /// data: `Default` entries then decode their metadata default and
    /// `Optional` ones yield [`Value::Null`].
    pub fn decode_storage(&self, module: &str, item: &str, raw: Option<&[u8]>) -> Result<Value, DecodeError> {
        let entry = self
            .metadata
            .storage_entry(module, item)
            .ok_or_else(|| DecodeError::NotInMetadata {
                item: format!("{module}.{item}"),
            })?;
        let ty = entry.ty.value_type();
        match (raw, entry.modifier) {
            (Some(bytes), _) => self.decode(ty, bytes),
            (None, StorageModifier::Default) => self.decode(ty, &entry.default),
            (None, StorageModifier::Optional) => Ok(Value::Null),
        }
    }
}

/// `System.SS58Prefix` truncated to one byte, or `default` when the
/// constant is missing or does not decode to an unsigned integer.
pub fn derive_address_prefix(metadata: &RuntimeMetadata, registry: &TypeRegistry, default: u8) -> u8 {
    let Some(constant) = metadata.constant(PREFIX_MODULE, PREFIX_CONSTANT) else {
        tracing::debug!(default, "no address prefix constant in metadata, using default");
        return default;
    };
    match value::decode(registry, &constant.ty, &constant.value) {
        Ok(v) => match v.as_u128() {
            Some(n) => n as u8,
            None => {
                tracing::warn!(ty = %constant.ty, default, "address prefix is not an integer, using default");
                default
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, default, "address prefix does not decode, using default");
            default
        }
    }
}

/// Holder of the current snapshot.  Readers clone the `Arc`; refresh swaps
/// in a new one without touching snapshots already handed out.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current.read().clone()
    }

    /// Publish `snapshot`, returning the one it replaced.
    pub fn store(&self, snapshot: Arc<SchemaSnapshot>) -> Option<Arc<SchemaSnapshot>> {
        self.current.write().replace(snapshot)
    }

    pub fn clear(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current.write().take()
    }
}
