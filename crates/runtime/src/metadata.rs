//! Decoder for string-typed runtime metadata (versions 12 and 13).
//!
//! Layout: the magic `meta` (`0x6174656d` little-endian), one version byte,
//! the module list and the extrinsic section.  Every type in these versions
//! is a name to be looked up in the [`TypeRegistry`](crate::registry::TypeRegistry).

use crate::scale::{CodecError, ScaleReader};

pub const METADATA_MAGIC: u32 = 0x6174_656d;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("bad metadata magic {0:#010x}")]
    Magic(u32),

    #[error("unsupported metadata version {0} (supported: 12, 13)")]
    Version(u8),

    #[error("malformed metadata: {0}")]
    Codec(#[from] CodecError),

    #[error("{0} trailing bytes after metadata")]
    Trailing(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeMetadata {
    pub version: u8,
    pub modules: Vec<ModuleMetadata>,
    pub extrinsic: ExtrinsicMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub name: String,
    pub storage: Option<StorageMetadata>,
    pub calls: Option<Vec<CallMetadata>>,
    pub events: Option<Vec<EventMetadata>>,
    pub constants: Vec<ConstantMetadata>,
    pub errors: Vec<ErrorMetadata>,
    pub index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMetadata {
    pub prefix: String,
    pub entries: Vec<StorageEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageModifier {
    Optional,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageHasher {
    Blake2_128,
    Blake2_256,
    Blake2_128Concat,
    Twox128,
    Twox256,
    Twox64Concat,
    Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEntryType {
    Plain(String),
    Map {
        hasher: StorageHasher,
        key: String,
        value: String,
        unused: bool,
    },
    DoubleMap {
        hasher: StorageHasher,
        key1: String,
        key2: String,
        value: String,
        key2_hasher: StorageHasher,
    },
    /// Version 13 only.
    NMap {
        keys: Vec<String>,
        hashers: Vec<StorageHasher>,
        value: String,
    },
}

impl StorageEntryType {
    /// Type name of the stored value.
    pub fn value_type(&self) -> &str {
        match self {
            StorageEntryType::Plain(v) => v,
            StorageEntryType::Map { value, .. }
            | StorageEntryType::DoubleMap { value, .. }
            | StorageEntryType::NMap { value, .. } => value,
        }
    }

    fn key_types(&self) -> Vec<&str> {
        match self {
            StorageEntryType::Plain(_) => Vec::new(),
            StorageEntryType::Map { key, .. } => vec![key],
            StorageEntryType::DoubleMap { key1, key2, .. } => vec![key1, key2],
            StorageEntryType::NMap { keys, .. } => keys.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub name: String,
    pub modifier: StorageModifier,
    pub ty: StorageEntryType,
    pub default: Vec<u8>,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallArgument {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMetadata {
    pub name: String,
    pub arguments: Vec<CallArgument>,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub name: String,
    pub arguments: Vec<String>,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantMetadata {
    pub name: String,
    pub ty: String,
    pub value: Vec<u8>,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMetadata {
    pub name: String,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtrinsicMetadata {
    pub version: u8,
    pub signed_extensions: Vec<String>,
}

impl RuntimeMetadata {
    /// Decode the hex blob returned by `state_getMetadata`.
    pub fn from_hex(blob: &str) -> Result<Self, MetadataError> {
        let digits = blob.trim();
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        Self::decode(&hex::decode(digits)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut r = ScaleReader::new(bytes);
        let magic = r.u32()?;
        if magic != METADATA_MAGIC {
            return Err(MetadataError::Magic(magic));
        }
        let version = r.u8()?;
        if !matches!(version, 12 | 13) {
            return Err(MetadataError::Version(version));
        }

        let modules = r.vec(|r| module(r, version))?;
        let extrinsic = ExtrinsicMetadata {
            version: r.u8()?,
            signed_extensions: r.strings()?,
        };
        if !r.is_empty() {
            return Err(MetadataError::Trailing(r.remaining()));
        }

        Ok(Self {
            version,
            modules,
            extrinsic,
        })
    }

    pub fn module(&self, name: &str) -> Option<&ModuleMetadata> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn constant(&self, module: &str, name: &str) -> Option<&ConstantMetadata> {
        self.module(module)?.constants.iter().find(|c| c.name == name)
    }

    pub fn storage_entry(&self, module: &str, name: &str) -> Option<&StorageEntry> {
        self.module(module)?
            .storage
            .as_ref()?
            .entries
            .iter()
            .find(|e| e.name == name)
    }

    pub fn call(&self, module: &str, name: &str) -> Option<&CallMetadata> {
        self.module(module)?.calls.as_ref()?.iter().find(|c| c.name == name)
    }

    pub fn event(&self, module: &str, name: &str) -> Option<&EventMetadata> {
        self.module(module)?.events.as_ref()?.iter().find(|e| e.name == name)
    }

    /// Every type name the metadata refers to.
    pub fn type_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for module in &self.modules {
            if let Some(storage) = &module.storage {
                for entry in &storage.entries {
                    out.extend(entry.ty.key_types());
                    out.push(entry.ty.value_type());
                }
            }
            for call in module.calls.iter().flatten() {
                out.extend(call.arguments.iter().map(|a| a.ty.as_str()));
            }
            for event in module.events.iter().flatten() {
                out.extend(event.arguments.iter().map(String::as_str));
            }
            out.extend(module.constants.iter().map(|c| c.ty.as_str()));
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

// ── section decoders ────────────────────────────────────────────────

fn module(r: &mut ScaleReader<'_>, version: u8) -> Result<ModuleMetadata, CodecError> {
    Ok(ModuleMetadata {
        name: r.string()?,
        storage: r.option(|r| {
            Ok(StorageMetadata {
                prefix: r.string()?,
                entries: r.vec(|r| storage_entry(r, version))?,
            })
        })?,
        calls: r.option(|r| r.vec(call))?,
        events: r.option(|r| r.vec(event))?,
        constants: r.vec(constant)?,
        errors: r.vec(|r| {
            Ok(ErrorMetadata {
                name: r.string()?,
                docs: r.strings()?,
            })
        })?,
        index: r.u8()?,
    })
}

fn storage_entry(r: &mut ScaleReader<'_>, version: u8) -> Result<StorageEntry, CodecError> {
    let name = r.string()?;
    let modifier = match r.u8()? {
        0 => StorageModifier::Optional,
        1 => StorageModifier::Default,
        tag => {
            return Err(CodecError::BadTag {
                what: "storage modifier",
                tag,
            })
        }
    };
    let ty = match r.u8()? {
        0 => StorageEntryType::Plain(r.string()?),
        1 => StorageEntryType::Map {
            hasher: hasher(r)?,
            key: r.string()?,
            value: r.string()?,
            unused: r.bool()?,
        },
        2 => StorageEntryType::DoubleMap {
            hasher: hasher(r)?,
            key1: r.string()?,
            key2: r.string()?,
            value: r.string()?,
            key2_hasher: hasher(r)?,
        },
        3 if version >= 13 => StorageEntryType::NMap {
            keys: r.strings()?,
            hashers: r.vec(hasher)?,
            value: r.string()?,
        },
        tag => {
            return Err(CodecError::BadTag {
                what: "storage entry type",
                tag,
            })
        }
    };
    Ok(StorageEntry {
        name,
        modifier,
        ty,
        default: r.bytes()?,
        docs: r.strings()?,
    })
}

fn hasher(r: &mut ScaleReader<'_>) -> Result<StorageHasher, CodecError> {
    Ok(match r.u8()? {
        0 => StorageHasher::Blake2_128,
        1 => StorageHasher::Blake2_256,
        2 => StorageHasher::Blake2_128Concat,
        3 => StorageHasher::Twox128,
        4 => StorageHasher::Twox256,
        5 => StorageHasher::Twox64Concat,
        6 => StorageHasher::Identity,
        tag => return Err(CodecError::BadTag { what: "hasher", tag }),
    })
}

fn call(r: &mut ScaleReader<'_>) -> Result<CallMetadata, CodecError> {
    Ok(CallMetadata {
        name: r.string()?,
        arguments: r.vec(|r| {
            Ok(CallArgument {
                name: r.string()?,
                ty: r.string()?,
            })
        })?,
        docs: r.strings()?,
    })
}

fn event(r: &mut ScaleReader<'_>) -> Result<EventMetadata, CodecError> {
    Ok(EventMetadata {
        name: r.string()?,
        arguments: r.strings()?,
        docs: r.strings()?,
    })
}

fn constant(r: &mut ScaleReader<'_>) -> Result<ConstantMetadata, CodecError> {
    Ok(ConstantMetadata {
        name: r.string()?,
        ty: r.string()?,
        value: r.bytes()?,
        docs: r.strings()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleWriter;

    /// System module with one constant, one plain storage item, one call
    /// and one event, followed by an empty Assets module.
    fn sample(version: u8) -> Vec<u8> {
        let mut w = ScaleWriter::new();
        w.u32(METADATA_MAGIC).u8(version).compact(2);

        // System
        w.string("System");
        w.u8(1).string("System").compact(1);
        w.string("Number").u8(1).u8(0).string("T::BlockNumber").bytes(&[0, 0, 0, 0]).strings(&["docs"]);
        w.u8(1).compact(1).string("remark").compact(1).string("remark").string("Vec<u8>").strings(&[]);
        w.u8(1).compact(1).string("ExtrinsicSuccess").strings(&["DispatchInfo"]).strings(&[]);
        w.compact(1).string("SS58Prefix").string("u8").bytes(&[42]).strings(&[]);
        w.compact(1).string("InvalidSpecName").strings(&[]);
        w.u8(0);

        // Assets
        w.string("Assets").u8(0).u8(0).u8(0).compact(0).compact(0).u8(7);

        w.u8(4).strings(&["CheckNonce"]);
        w.into_bytes()
    }

    #[test]
    fn decodes_modules_and_lookups() {
        let md = RuntimeMetadata::decode(&sample(12)).unwrap();
        assert_eq!(md.version, 12);
        assert_eq!(md.modules.len(), 2);
        assert_eq!(md.module("Assets").unwrap().index, 7);

        let c = md.constant("System", "SS58Prefix").unwrap();
        assert_eq!(c.ty, "u8");
        assert_eq!(c.value, vec![42]);

        let entry = md.storage_entry("System", "Number").unwrap();
        assert_eq!(entry.modifier, StorageModifier::Default);
        assert_eq!(entry.ty.value_type(), "T::BlockNumber");
        assert_eq!(md.call("System", "remark").unwrap().arguments[0].ty, "Vec<u8>");
        assert_eq!(md.event("System", "ExtrinsicSuccess").unwrap().arguments, vec!["DispatchInfo"]);
        assert_eq!(md.extrinsic.signed_extensions, vec!["CheckNonce"]);
        assert!(md.constant("Assets", "SS58Prefix").is_none());
    }

    #[test]
    fn hex_blob_with_prefix() {
        let blob = format!("0x{}", hex::encode(sample(13)));
        let md = RuntimeMetadata::from_hex(&blob).unwrap();
        assert_eq!(md.version, 13);
    }

    #[test]
    fn type_names_are_deduplicated() {
        let md = RuntimeMetadata::decode(&sample(12)).unwrap();
        assert_eq!(
            md.type_names(),
            vec!["DispatchInfo", "T::BlockNumber", "Vec<u8>", "u8"]
        );
    }

    #[test]
    fn rejects_bad_magic_version_and_trailing_bytes() {
        let mut bytes = sample(12);
        bytes[0] = 0;
        assert!(matches!(RuntimeMetadata::decode(&bytes), Err(MetadataError::Magic(_))));

        let mut bytes = sample(12);
        bytes[4] = 14;
        assert!(matches!(RuntimeMetadata::decode(&bytes), Err(MetadataError::Version(14))));

        let mut bytes = sample(12);
        bytes.push(0);
        assert!(matches!(RuntimeMetadata::decode(&bytes), Err(MetadataError::Trailing(1))));

        assert!(matches!(RuntimeMetadata::from_hex("0xzz"), Err(MetadataError::Hex(_))));
    }

    #[test]
    fn nmap_requires_v13() {
        let build = |version: u8| {
            let mut w = ScaleWriter::new();
            w.u32(METADATA_MAGIC).u8(version).compact(1);
            w.string("Pool").u8(1).string("Pool").compact(1);
            w.string("Reserves").u8(0).u8(3).strings(&["AssetId", "AssetId"]);
            w.compact(2).u8(5).u8(5).string("Balance").bytes(&[]).strings(&[]);
            w.u8(0).u8(0).compact(0).compact(0).u8(0);
            w.u8(4).strings(&[]);
            w.into_bytes()
        };

        let md = RuntimeMetadata::decode(&build(13)).unwrap();
        assert!(matches!(
            md.storage_entry("Pool", "Reserves").unwrap().ty,
            StorageEntryType::NMap { ref keys, .. } if keys.len() == 2
        ));
        assert!(matches!(
            RuntimeMetadata::decode(&build(12)),
            Err(MetadataError::Codec(CodecError::BadTag { .. }))
        ));
    }
}
