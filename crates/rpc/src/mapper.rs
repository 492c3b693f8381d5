//! Conversion of a raw JSON-RPC `result` into the caller's typed value.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// The node answered, but the payload could not be turned into the
/// expected type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MapperError {
    pub message: String,
}

impl MapperError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Pluggable result decoder used by [`execute`](crate::executor::execute).
///
/// Any `Fn(Value) -> Result<T, MapperError>` closure is a mapper.
pub trait ResponseMapper<T>: Send + Sync {
    fn map(&self, raw: Value) -> Result<T, MapperError>;
}

impl<T, F> ResponseMapper<T> for F
where
    F: Fn(Value) -> Result<T, MapperError> + Send + Sync,
{
    fn map(&self, raw: Value) -> Result<T, MapperError> {
        self(raw)
    }
}

/// Decodes the result with serde.
pub struct JsonMapper<T>(PhantomData<fn() -> T>);

impl<T> JsonMapper<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseMapper<T> for JsonMapper<T> {
    fn map(&self, raw: Value) -> Result<T, MapperError> {
        serde_json::from_value(raw).map_err(|e| MapperError::new(e.to_string()))
    }
}

/// Decodes a `0x`-prefixed hex string result into raw bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexBytesMapper;

impl ResponseMapper<Vec<u8>> for HexBytesMapper {
    fn map(&self, raw: Value) -> Result<Vec<u8>, MapperError> {
        let text = raw
            .as_str()
            .ok_or_else(|| MapperError::new(format!("expected a hex string, got {raw}")))?;
        let digits = text.strip_prefix("0x").unwrap_or(text);
        hex::decode(digits).map_err(|e| MapperError::new(format!("invalid hex: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_mapper_decodes_structs() {
        let v: nw_protocol::RuntimeVersion = JsonMapper::new()
            .map(json!({ "specVersion": 12, "transactionVersion": 3 }))
            .unwrap();
        assert_eq!(v.spec_version, 12);
    }

    #[test]
    fn json_mapper_reports_shape_mismatch() {
        let err = ResponseMapper::<u32>::map(&JsonMapper::new(), json!("nope")).unwrap_err();
        assert!(err.message.contains("invalid type"));
    }

    #[test]
    fn closures_are_mappers() {
        let mapper = |raw: Value| {
            raw.as_u64()
                .map(|n| n * 2)
                .ok_or_else(|| MapperError::new("not a number"))
        };
        assert_eq!(mapper.map(json!(21)).unwrap(), 42);
        assert!(mapper.map(json!(null)).is_err());
    }

    #[test]
    fn hex_mapper_accepts_prefixed_and_bare() {
        assert_eq!(HexBytesMapper.map(json!("0x0102ff")).unwrap(), vec![1, 2, 255]);
        assert_eq!(HexBytesMapper.map(json!("0a")).unwrap(), vec![10]);
        assert!(HexBytesMapper.map(json!("0xzz")).is_err());
        assert!(HexBytesMapper.map(json!(5)).is_err());
    }
}
