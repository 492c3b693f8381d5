//! Dynamic decoding of a named type into a closed [`Value`] tree.

use serde_json::{json, Map, Value as Json};

use crate::registry::{TypeDef, TypeExpr, TypeRegistry};
use crate::scale::{CodecError, ScaleReader};

/// Nesting limit; also stops self-referential aliases.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Uint(u128),
    Int(i128),
    Text(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Tuple(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Variant(String, Box<Value>),
    Set(Vec<String>),
}

impl Value {
    pub fn as_u128(&self) -> Option<u128> {
        match self {
            Value::Uint(n) => Some(*n),
            Value::Int(n) => u128::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Field of a struct value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// JSON rendering.  Integers beyond `u64`/`i64` become strings and
    /// byte strings become `0x` hex.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => json!(b),
            Value::Uint(n) => u64::try_from(*n).map_or_else(|_| json!(n.to_string()), |n| json!(n)),
            Value::Int(n) => i64::try_from(*n).map_or_else(|_| json!(n.to_string()), |n| json!(n)),
            Value::Text(s) => json!(s),
            Value::Bytes(b) => json!(format!("0x{}", hex::encode(b))),
            Value::Seq(items) | Value::Tuple(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Struct(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            Value::Variant(name, inner) => match inner.as_ref() {
                Value::Null => json!(name),
                other => {
                    let mut map = Map::new();
                    map.insert(name.clone(), other.to_json());
                    Json::Object(map)
                }
            },
            Value::Set(flags) => json!(flags),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown type `{type_name}`")]
    UnknownType { type_name: String },

    #[error("invalid type expression `{type_name}`")]
    Expression { type_name: String },

    #[error("decoding `{type_name}`: {source}")]
    Codec {
        type_name: String,
        source: CodecError,
    },

    #[error("`{type_name}` has no variant with index {index}")]
    Variant { type_name: String, index: u8 },

    #[error("`{type_name}` nests deeper than {MAX_DEPTH} levels")]
    TooDeep { type_name: String },

    #[error("{trailing} bytes left over after decoding `{type_name}`")]
    Trailing { type_name: String, trailing: usize },

    #[error("`{item}` is not in the runtime metadata")]
    NotInMetadata { item: String },
}

impl DecodeError {
    /// The type that could not be decoded, or the missing metadata item.
    pub fn type_name(&self) -> &str {
        match self {
            DecodeError::UnknownType { type_name }
            | DecodeError::Expression { type_name }
            | DecodeError::Codec { type_name, .. }
            | DecodeError::Variant { type_name, .. }
            | DecodeError::TooDeep { type_name }
            | DecodeError::Trailing { type_name, .. } => type_name,
            DecodeError::NotInMetadata { item } => item,
        }
    }
}

/// Decode all of `bytes` as `type_name`.
pub fn decode(registry: &TypeRegistry, type_name: &str, bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut reader = ScaleReader::new(bytes);
    let value = decode_from(registry, type_name, &mut reader)?;
    if !reader.is_empty() {
        return Err(DecodeError::Trailing {
            type_name: type_name.to_string(),
            trailing: reader.remaining(),
        });
    }
    Ok(value)
}

/// Decode one `type_name` value from the front of `reader`.
pub fn decode_from(
    registry: &TypeRegistry,
    type_name: &str,
    reader: &mut ScaleReader<'_>,
) -> Result<Value, DecodeError> {
    let expr = TypeExpr::parse(type_name).map_err(|_| DecodeError::Expression {
        type_name: type_name.to_string(),
    })?;
    Decoder { registry, depth: 0 }.expr(&expr, reader)
}

struct Decoder<'r> {
    registry: &'r TypeRegistry,
    depth: usize,
}

impl Decoder<'_> {
    fn expr(&mut self, expr: &TypeExpr, r: &mut ScaleReader<'_>) -> Result<Value, DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep {
                type_name: expr.to_string(),
            });
        }
        let out = self.expr_inner(expr, r);
        self.depth -= 1;
        out
    }

    fn expr_inner(&mut self, expr: &TypeExpr, r: &mut ScaleReader<'_>) -> Result<Value, DecodeError> {
        let codec = |source: CodecError| DecodeError::Codec {
            type_name: expr.to_string(),
            source,
        };
        match expr {
            TypeExpr::Named(name) => self.named(name, r),
            TypeExpr::Vec(inner) if inner.is_u8() => r.bytes().map(Value::Bytes).map_err(codec),
            TypeExpr::Vec(inner) => {
                let len = r.length().map_err(codec)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.expr(inner, r)?);
                }
                Ok(Value::Seq(items))
            }
            TypeExpr::Option(inner) if matches!(inner.as_ref(), TypeExpr::Named(n) if n == "bool") => {
                // Option<bool> packs into a single byte.
                match r.u8().map_err(codec)? {
                    0 => Ok(Value::Null),
                    1 => Ok(Value::Bool(true)),
                    2 => Ok(Value::Bool(false)),
                    tag => Err(codec(CodecError::BadTag {
                        what: "Option<bool>",
                        tag,
                    })),
                }
            }
            TypeExpr::Option(inner) => match r.u8().map_err(codec)? {
                0 => Ok(Value::Null),
                1 => self.expr(inner, r),
                tag => Err(codec(CodecError::BadTag { what: "option", tag })),
            },
            TypeExpr::Compact(_) => r.compact().map(Value::Uint).map_err(codec),
            TypeExpr::Result(ok, err) => match r.u8().map_err(codec)? {
                0 => Ok(Value::Variant("Ok".into(), Box::new(self.expr(ok, r)?))),
                1 => Ok(Value::Variant("Err".into(), Box::new(self.expr(err, r)?))),
                tag => Err(codec(CodecError::BadTag { what: "result", tag })),
            },
            TypeExpr::Tuple(items) if items.is_empty() => Ok(Value::Null),
            TypeExpr::Tuple(items) => items
                .iter()
                .map(|t| self.expr(t, r))
                .collect::<Result<_, _>>()
                .map(Value::Tuple),
            TypeExpr::Array(inner, len) if inner.is_u8() => {
                r.take(*len).map(|b| Value::Bytes(b.to_vec())).map_err(codec)
            }
            TypeExpr::Array(inner, len) => (0..*len)
                .map(|_| self.expr(inner, r))
                .collect::<Result<_, _>>()
                .map(Value::Seq),
            TypeExpr::Map(key, value) => {
                let len = r.length().map_err(codec)?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let k = self.expr(key, r)?;
                    let v = self.expr(value, r)?;
                    entries.push(Value::Tuple(vec![k, v]));
                }
                Ok(Value::Seq(entries))
            }
        }
    }

    fn named(&mut self, name: &str, r: &mut ScaleReader<'_>) -> Result<Value, DecodeError> {
        let codec = |source: CodecError| DecodeError::Codec {
            type_name: name.to_string(),
            source,
        };
        if let Some(result) = primitive(name, r) {
            return result.map_err(codec);
        }
        let registry = self.registry;
        let def = registry.resolve(name).ok_or_else(|| DecodeError::UnknownType {
            type_name: name.to_string(),
        })?;
        match def {
            TypeDef::Alias(expr) => self.expr(expr, r),
            TypeDef::Struct(fields) => fields
                .iter()
                .map(|(field, ty)| Ok((field.clone(), self.expr(ty, r)?)))
                .collect::<Result<_, DecodeError>>()
                .map(Value::Struct),
            TypeDef::Enum(variants) => {
                let index = r.u8().map_err(codec)?;
                let (variant, payload) = variants.get(usize::from(index)).ok_or_else(|| DecodeError::Variant {
                    type_name: name.to_string(),
                    index,
                })?;
                let inner = match payload {
                    Some(ty) => self.expr(ty, r)?,
                    None => Value::Null,
                };
                Ok(Value::Variant(variant.clone(), Box::new(inner)))
            }
            TypeDef::Set { width, flags } => {
                let bits = r.uint(*width).map_err(codec)?;
                Ok(Value::Set(
                    flags
                        .iter()
                        .filter(|(_, bit)| *bit != 0 && bits & bit == *bit)
                        .map(|(flag, _)| flag.clone())
                        .collect(),
                ))
            }
        }
    }
}

/// Decode a built-in type, or `None` when `name` is not one.
fn primitive(name: &str, r: &mut ScaleReader<'_>) -> Option<Result<Value, CodecError>> {
    Some(match name {
        "bool" => r.bool().map(Value::Bool),
        "u8" => r.uint(1).map(Value::Uint),
        "u16" => r.uint(2).map(Value::Uint),
        "u32" => r.uint(4).map(Value::Uint),
        "u64" => r.uint(8).map(Value::Uint),
        "u128" => r.uint(16).map(Value::Uint),
        "i8" => r.int(1).map(Value::Int),
        "i16" => r.int(2).map(Value::Int),
        "i32" => r.int(4).map(Value::Int),
        "i64" => r.int(8).map(Value::Int),
        "i128" => r.int(16).map(Value::Int),
        "Bytes" => r.bytes().map(Value::Bytes),
        "Text" | "String" | "Str" => r.string().map(Value::Text),
        "Null" => Ok(Value::Null),
        "H160" => fixed(r, 20),
        "H256" | "AccountId" | "AccountId32" => fixed(r, 32),
        "H512" => fixed(r, 64),
        _ => return None,
    })
}

fn fixed(r: &mut ScaleReader<'_>, len: usize) -> Result<Value, CodecError> {
    r.take(len).map(|b| Value::Bytes(b.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleWriter;

    fn registry() -> TypeRegistry {
        TypeRegistry::build(
            r#"{
                "types": {
                    "Balance": "u128",
                    "Loop": "Loop",
                    "Transfer": { "type": "struct", "type_mapping": [["to", "AccountId"], ["amount", "Compact<Balance>"]] },
                    "Status": { "type": "enum", "value_list": ["Active", "Frozen"] },
                    "Event": { "type": "enum", "type_mapping": [["Noop", "Null"], ["Paid", "Balance"]] },
                    "Perms": { "type": "set", "value_type": "u8", "value_list": { "Read": 1, "Write": 2, "Exec": 4 } }
                }
            }"#,
            "",
            None,
        )
        .unwrap()
    }

    #[test]
    fn primitives_and_aliases() {
        let r = registry();
        assert_eq!(decode(&r, "u8", &[42]).unwrap(), Value::Uint(42));
        assert_eq!(decode(&r, "i16", &[0xfe, 0xff]).unwrap(), Value::Int(-2));
        assert_eq!(
            decode(&r, "Balance", &7u128.to_le_bytes()).unwrap().as_u128(),
            Some(7)
        );
        assert_eq!(decode(&r, "Vec<u8>", &[8, 1, 2]).unwrap(), Value::Bytes(vec![1, 2]));
        assert_eq!(decode(&r, "Text", &[8, b'h', b'i']).unwrap(), Value::Text("hi".into()));
    }

    #[test]
    fn structs_enums_and_sets() {
        let r = registry();
        let mut w = ScaleWriter::new();
        w.raw(&[9u8; 32]).compact(1_000);
        let v = decode(&r, "Transfer", &w.into_bytes()).unwrap();
        assert_eq!(v.field("amount"), Some(&Value::Uint(1_000)));
        assert_eq!(v.field("to"), Some(&Value::Bytes(vec![9; 32])));

        assert_eq!(
            decode(&r, "Status", &[1]).unwrap(),
            Value::Variant("Frozen".into(), Box::new(Value::Null))
        );
        let mut paid = vec![1u8];
        paid.extend_from_slice(&5u128.to_le_bytes());
        assert_eq!(
            decode(&r, "Event", &paid).unwrap(),
            Value::Variant("Paid".into(), Box::new(Value::Uint(5)))
        );
        assert_eq!(
            decode(&r, "Perms", &[0b101]).unwrap(),
            Value::Set(vec!["Read".into(), "Exec".into()])
        );
    }

    #[test]
    fn containers() {
        let r = registry();
        assert_eq!(decode(&r, "Option<u8>", &[0]).unwrap(), Value::Null);
        assert_eq!(decode(&r, "Option<u8>", &[1, 3]).unwrap(), Value::Uint(3));
        assert_eq!(decode(&r, "Option<bool>", &[2]).unwrap(), Value::Bool(false));
        assert_eq!(
            decode(&r, "(u8, bool)", &[1, 1]).unwrap(),
            Value::Tuple(vec![Value::Uint(1), Value::Bool(true)])
        );
        assert_eq!(
            decode(&r, "Vec<u16>", &[8, 1, 0, 2, 0]).unwrap(),
            Value::Seq(vec![Value::Uint(1), Value::Uint(2)])
        );
        assert_eq!(
            decode(&r, "BTreeMap<u8, u8>", &[4, 1, 2]).unwrap(),
            Value::Seq(vec![Value::Tuple(vec![Value::Uint(1), Value::Uint(2)])])
        );
        assert_eq!(decode(&r, "[u8; 2]", &[1, 2]).unwrap(), Value::Bytes(vec![1, 2]));
        assert_eq!(
            decode(&r, "Result<u8, Status>", &[1, 0]).unwrap(),
            Value::Variant(
                "Err".into(),
                Box::new(Value::Variant("Active".into(), Box::new(Value::Null)))
            )
        );
    }

    #[test]
    fn errors_name_the_offending_type() {
        let r = registry();
        let err = decode(&r, "Vec<Unknown>", &[4, 0]).unwrap_err();
        assert_eq!(err, DecodeError::UnknownType { type_name: "Unknown".into() });

        let err = decode(&r, "Status", &[5]).unwrap_err();
        assert!(matches!(err, DecodeError::Variant { index: 5, .. }));
        assert_eq!(err.type_name(), "Status");

        let err = decode(&r, "u32", &[1, 2]).unwrap_err();
        assert!(matches!(err, DecodeError::Codec { .. }));
        assert_eq!(err.type_name(), "u32");

        let err = decode(&r, "u8", &[1, 2]).unwrap_err();
        assert!(matches!(err, DecodeError::Trailing { trailing: 1, .. }));

        assert!(matches!(
            decode(&r, "Loop", &[0]).unwrap_err(),
            DecodeError::TooDeep { .. }
        ));
        assert!(matches!(
            decode(&r, "Vec<", &[]).unwrap_err(),
            DecodeError::Expression { .. }
        ));
    }

    #[test]
    fn json_rendering() {
        let v = Value::Struct(vec![
            ("big".into(), Value::Uint(u128::MAX)),
            ("small".into(), Value::Uint(3)),
            ("key".into(), Value::Bytes(vec![0xab])),
            ("status".into(), Value::Variant("Active".into(), Box::new(Value::Null))),
            ("paid".into(), Value::Variant("Paid".into(), Box::new(Value::Uint(1)))),
        ]);
        assert_eq!(
            v.to_json(),
            json!({
                "big": u128::MAX.to_string(),
                "small": 3,
                "key": "0xab",
                "status": "Active",
                "paid": { "Paid": 1 }
            })
        );
    }
}
