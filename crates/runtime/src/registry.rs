//! Type dictionary: names to SCALE encoding rules.
//!
//! Documents are JSON objects with a `types` map and an optional
//! `versioning` list of overrides scoped to a range of runtime spec
//! versions:
//!
//! ```json
//! {
//!   "types": {
//!     "Balance": "u128",
//!     "AssetId": "[u8; 32]",
//!     "Transfer": { "type": "struct", "type_mapping": [["to", "AccountId"], ["amount", "Balance"]] },
//!     "Status":   { "type": "enum", "value_list": ["Active", "Frozen"] },
//!     "Event":    { "type": "enum", "type_mapping": [["Noop", "Null"], ["Paid", "Balance"]] },
//!     "Flags":    { "type": "set", "value_type": "u8", "value_list": { "A": 1, "B": 2 } }
//!   },
//!   "versioning": [
//!     { "runtime_range": [1, 32], "types": { "Balance": "u64" } }
//!   ]
//! }
//! ```
//!
//! The base document is applied first, then the network document; inside
//! each, plain `types` come before matching `versioning` entries.  Later
//! definitions replace earlier ones.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde_json::Value as Json;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("type dictionary is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("type dictionary must be a JSON object with a `types` map")]
    Shape,

    #[error("invalid type expression `{0}`")]
    Expression(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Type expressions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parsed form of a type name such as `Vec<(AccountId, Compact<Balance>)>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// A primitive or a registry name, generic arguments included.
    Named(String),
    Vec(Box<TypeExpr>),
    Option(Box<TypeExpr>),
    Compact(Box<TypeExpr>),
    Result(Box<TypeExpr>, Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    Array(Box<TypeExpr>, usize),
    Map(Box<TypeExpr>, Box<TypeExpr>),
}

impl TypeExpr {
    pub fn parse(input: &str) -> Result<Self, RegistryError> {
        let normalized = normalize_type_name(input);
        let mut parser = Parser {
            src: &normalized,
            pos: 0,
        };
        let expr = parser.expr()?;
        if parser.pos != normalized.len() {
            return Err(RegistryError::Expression(input.to_string()));
        }
        Ok(expr)
    }

    pub fn is_u8(&self) -> bool {
        matches!(self, TypeExpr::Named(n) if n == "u8")
    }

    fn walk_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TypeExpr::Named(n) => out.push(n),
            TypeExpr::Vec(t) | TypeExpr::Option(t) | TypeExpr::Compact(t) | TypeExpr::Array(t, _) => {
                t.walk_names(out)
            }
            TypeExpr::Result(a, b) | TypeExpr::Map(a, b) => {
                a.walk_names(out);
                b.walk_names(out);
            }
            TypeExpr::Tuple(items) => items.iter().for_each(|t| t.walk_names(out)),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(n) => f.write_str(n),
            TypeExpr::Vec(t) => write!(f, "Vec<{t}>"),
            TypeExpr::Option(t) => write!(f, "Option<{t}>"),
            TypeExpr::Compact(t) => write!(f, "Compact<{t}>"),
            TypeExpr::Result(a, b) => write!(f, "Result<{a},{b}>"),
            TypeExpr::Array(t, n) => write!(f, "[{t};{n}]"),
            TypeExpr::Map(k, v) => write!(f, "BTreeMap<{k},{v}>"),
            TypeExpr::Tuple(items) => {
                f.write_str("(")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Canonical spelling of a type name: whitespace removed, trait
/// qualifications (`<T as Trait>::`) and `&'static [u8]` rewritten.
pub fn normalize_type_name(name: &str) -> String {
    let stripped = strip_qualified_paths(name);
    let compact: String = stripped.chars().filter(|c| !c.is_whitespace()).collect();
    compact.replace("&'static[u8]", "Bytes")
}

fn strip_qualified_paths(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '<' {
            if let Some(end) = matching_close(&chars, i) {
                let inner: String = chars[i + 1..end].iter().collect();
                let followed_by_path = chars.get(end + 1) == Some(&':') && chars.get(end + 2) == Some(&':');
                if inner.contains(" as ") && followed_by_path {
                    i = end + 3;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn matching_close(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in chars.iter().enumerate().skip(open) {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn eat(&mut self, c: char) -> Result<(), RegistryError> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn error(&self) -> RegistryError {
        RegistryError::Expression(self.src.to_string())
    }

    fn expr(&mut self) -> Result<TypeExpr, RegistryError> {
        match self.peek() {
            Some('(') => {
                self.eat('(')?;
                let mut items = self.list(')')?;
                self.eat(')')?;
                Ok(if items.len() == 1 {
                    items.remove(0)
                } else {
                    TypeExpr::Tuple(items)
                })
            }
            Some('[') => {
                self.eat('[')?;
                let inner = self.expr()?;
                self.eat(';')?;
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let len = self.src[start..self.pos].parse().map_err(|_| self.error())?;
                self.eat(']')?;
                Ok(TypeExpr::Array(Box::new(inner), len))
            }
            Some(_) => self.named(),
            None => Err(self.error()),
        }
    }

    fn list(&mut self, close: char) -> Result<Vec<TypeExpr>, RegistryError> {
        let mut items = Vec::new();
        while self.peek() != Some(close) {
            items.push(self.expr()?);
            if self.peek() == Some(',') {
                self.eat(',')?;
            } else {
                break;
            }
        }
        Ok(items)
    }

    fn named(&mut self) -> Result<TypeExpr, RegistryError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '<' | '>' | '(' | ')' | ',' | ';' | '[' | ']') {
                break;
            }
            self.pos += c.len_utf8();
        }
        let path = &self.src[start..self.pos];
        if path.is_empty() {
            return Err(self.error());
        }
        let ident = path.rsplit("::").next().unwrap_or(path).to_string();

        if self.peek() != Some('<') {
            return Ok(TypeExpr::Named(ident));
        }
        let args_start = self.pos;
        self.eat('<')?;
        let mut args = self.list('>')?;
        self.eat('>')?;

        let one = |args: &mut Vec<TypeExpr>| -> Option<Box<TypeExpr>> {
            (!args.is_empty()).then(|| Box::new(args.remove(0)))
        };
        let expr = match ident.as_str() {
            "Vec" | "BoundedVec" | "WeakBoundedVec" | "BTreeSet" | "VecDeque" => one(&mut args).map(TypeExpr::Vec),
            "Option" => one(&mut args).map(TypeExpr::Option),
            "Compact" => one(&mut args).map(TypeExpr::Compact),
            "Box" | "Rc" | "Arc" => one(&mut args).map(|b| *b),
            "Result" if args.len() == 2 => {
                let err = args.remove(1);
                Some(TypeExpr::Result(Box::new(args.remove(0)), Box::new(err)))
            }
            "BTreeMap" | "HashMap" if args.len() == 2 => {
                let value = args.remove(1);
                Some(TypeExpr::Map(Box::new(args.remove(0)), Box::new(value)))
            }
            _ => Some(TypeExpr::Named(format!("{ident}{}", &self.src[args_start..self.pos]))),
        };
        expr.ok_or_else(|| self.error())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDef {
    Alias(TypeExpr),
    Struct(Vec<(String, TypeExpr)>),
    /// Variants in index order; `None` for a variant without payload.
    Enum(Vec<(String, Option<TypeExpr>)>),
    /// Bit flags over an unsigned integer of `width` bytes.
    Set { width: usize, flags: Vec<(String, u128)> },
}

impl TypeDef {
    fn referenced(&self) -> Vec<&TypeExpr> {
        match self {
            TypeDef::Alias(e) => vec![e],
            TypeDef::Struct(fields) => fields.iter().map(|(_, t)| t).collect(),
            TypeDef::Enum(variants) => variants.iter().filter_map(|(_, t)| t.as_ref()).collect(),
            TypeDef::Set { .. } => Vec::new(),
        }
    }
}

/// Built-in names that need no dictionary entry.
pub fn is_primitive(name: &str) -> bool {
    matches!(
        name,
        "bool"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "u128"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "i128"
            | "Bytes"
            | "Text"
            | "String"
            | "Str"
            | "Null"
            | "H160"
            | "H256"
            | "H512"
            | "AccountId"
            | "AccountId32"
    )
}

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
    /// Entries whose definition could not be understood, with the reason.
    invalid: BTreeMap<String, String>,
}

impl TypeRegistry {
    /// Merge the base and network documents for `spec_version`.  Without a
    /// version every `versioning` entry applies, in document order.
    pub fn build(base: &str, network: &str, spec_version: Option<u32>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for doc in [base, network] {
            registry.apply_document(doc, spec_version)?;
        }
        tracing::debug!(
            types = registry.types.len(),
            invalid = registry.invalid.len(),
            spec_version,
            "type registry built"
        );
        Ok(registry)
    }

    fn apply_document(&mut self, doc: &str, spec_version: Option<u32>) -> Result<(), RegistryError> {
        if doc.trim().is_empty() {
            return Ok(());
        }
        let json: Json = serde_json::from_str(doc)?;
        let root = json.as_object().ok_or(RegistryError::Shape)?;

        if let Some(types) = root.get("types") {
            self.apply_types(types.as_object().ok_or(RegistryError::Shape)?);
        }
        if let Some(versioning) = root.get("versioning").and_then(Json::as_array) {
            for entry in versioning {
                if !range_contains(entry.get("runtime_range"), spec_version) {
                    continue;
                }
                if let Some(types) = entry.get("types").and_then(Json::as_object) {
                    self.apply_types(types);
                }
            }
        }
        Ok(())
    }

    fn apply_types(&mut self, types: &serde_json::Map<String, Json>) {
        for (name, def) in types {
            let name = normalize_type_name(name);
            match parse_definition(def) {
                Ok(def) => {
                    self.invalid.remove(&name);
                    self.types.insert(name, def);
                }
                Err(reason) => {
                    tracing::debug!(name = %name, reason = %reason, "skipping type definition");
                    self.types.remove(&name);
                    self.invalid.insert(name, reason);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Definition for `name`, falling back from `Foo<Bar>` to `Foo`.
    pub fn resolve(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name).or_else(|| {
            let base = name.split('<').next()?;
            (base != name).then(|| self.types.get(base)).flatten()
        })
    }

    /// Names reachable from `type_names` that have no usable definition.
    pub fn unresolved<'a>(&self, type_names: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut roots: Vec<TypeExpr> = Vec::new();
        for raw in type_names {
            match TypeExpr::parse(raw) {
                Ok(expr) => roots.push(expr),
                Err(_) => {
                    out.insert(normalize_type_name(raw));
                }
            }
        }
        for expr in &roots {
            self.collect_unresolved(expr, &mut seen, &mut out);
        }
        out
    }

    /// Every name referenced by the dictionary itself that cannot be
    /// resolved, plus entries whose definition was malformed.
    pub fn self_unresolved(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.invalid.keys().cloned().collect();
        let mut seen = HashSet::new();
        for def in self.types.values() {
            for expr in def.referenced() {
                self.collect_unresolved(expr, &mut seen, &mut out);
            }
        }
        out
    }

    fn collect_unresolved(&self, expr: &TypeExpr, seen: &mut HashSet<String>, out: &mut BTreeSet<String>) {
        let mut names = Vec::new();
        expr.walk_names(&mut names);
        for name in names {
            if is_primitive(name) || !seen.insert(name.to_string()) {
                continue;
            }
            match self.resolve(name) {
                Some(def) => {
                    for inner in def.referenced() {
                        self.collect_unresolved(inner, seen, out);
                    }
                }
                None => {
                    out.insert(name.to_string());
                }
            }
        }
    }
}

fn range_contains(range: Option<&Json>, spec_version: Option<u32>) -> bool {
    let Some(version) = spec_version else {
        return true;
    };
    let Some(bounds) = range.and_then(Json::as_array) else {
        return false;
    };
    let version = u64::from(version);
    let min = bounds.first().and_then(Json::as_u64).unwrap_or(0);
    let max = bounds.get(1).and_then(Json::as_u64).unwrap_or(u64::MAX);
    min <= version && version <= max
}

fn parse_definition(def: &Json) -> Result<TypeDef, String> {
    let expr = |s: &str| TypeExpr::parse(s).map_err(|e| e.to_string());

    if let Some(alias) = def.as_str() {
        return expr(alias).map(TypeDef::Alias);
    }
    let obj = def.as_object().ok_or("definition must be a string or an object")?;
    match obj.get("type").and_then(Json::as_str) {
        Some("struct") => {
            let fields = pairs(obj.get("type_mapping"))?
                .into_iter()
                .map(|(name, ty)| Ok((name, expr(&ty)?)))
                .collect::<Result<_, String>>()?;
            Ok(TypeDef::Struct(fields))
        }
        Some("enum") => {
            if let Some(list) = obj.get("value_list").and_then(Json::as_array) {
                let variants = list
                    .iter()
                    .map(|v| v.as_str().map(|s| (s.to_string(), None)))
                    .collect::<Option<Vec<_>>>()
                    .ok_or("enum value_list must hold strings")?;
                return Ok(TypeDef::Enum(variants));
            }
            let variants = pairs(obj.get("type_mapping"))?
                .into_iter()
                .map(|(name, ty)| {
                    let payload = match normalize_type_name(&ty).as_str() {
                        "Null" | "()" => None,
                        _ => Some(expr(&ty)?),
                    };
                    Ok((name, payload))
                })
                .collect::<Result<_, String>>()?;
            Ok(TypeDef::Enum(variants))
        }
        Some("set") => {
            let width = match obj.get("value_type").and_then(Json::as_str) {
                Some("u8") => 1,
                Some("u16") => 2,
                Some("u32") => 4,
                Some("u64") => 8,
                Some("u128") => 16,
                other => return Err(format!("unsupported set value_type {other:?}")),
            };
            let mut flags: Vec<(String, u128)> = obj
                .get("value_list")
                .and_then(Json::as_object)
                .ok_or("set value_list must be an object")?
                .iter()
                .map(|(name, bit)| {
                    bit.as_u64()
                        .map(|b| (name.clone(), u128::from(b)))
                        .ok_or_else(|| format!("set flag {name} is not an integer"))
                })
                .collect::<Result<_, String>>()?;
            flags.sort_by_key(|(_, bit)| *bit);
            Ok(TypeDef::Set { width, flags })
        }
        other => Err(format!("unsupported definition type {other:?}")),
    }
}

fn pairs(mapping: Option<&Json>) -> Result<Vec<(String, String)>, String> {
    mapping
        .and_then(Json::as_array)
        .ok_or("missing type_mapping")?
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Json::String(name), Json::String(ty)]) => Ok((name.clone(), ty.clone())),
            _ => Err(format!("type_mapping entries must be [name, type] pairs, got {pair}")),
        })
        .collect()
}
