//! Application values and their JSON-safe wire form.
//!
//! Plain JSON scalars and containers map to themselves. Types JSON cannot
//! carry losslessly are wrapped in single-key marker objects:
//!
//! | Value            | Wire form                                  |
//! |------------------|--------------------------------------------|
//! | `Int64(123)`     | `{"$int64": "123"}`                        |
//! | `Bytes(..)`      | `{"$bytes": "<base64>"}`                   |
//! | `Timestamp(ms)`  | `{"$date": ms}`                            |
//! | `Id(table, id)`  | `{"$id": {"table": "...", "id": "..."}}`   |
//!
//! Object keys starting with `$` are reserved for markers, which keeps the
//! mapping bijective.

use crate::error::{Result, SyncLinkError};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

pub const INT64_MARKER: &str = "$int64";
pub const BYTES_MARKER: &str = "$bytes";
pub const DATE_MARKER: &str = "$date";
pub const ID_MARKER: &str = "$id";

/// Default nesting limit for [`encode_value`].
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Opaque reference to a record stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub table: String,
    pub id: String,
}

impl RecordId {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

/// A node that can be referenced from several places in a value graph.
///
/// This is the only way to alias part of a [`Value`], and therefore the
/// only way to build a cycle. Equality is identity.
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Clone the current contents.
    pub fn get(&self) -> Value {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the contents.
    pub fn set(&self, value: Value) {
        match self.0.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.identity())
    }
}

/// An application value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value. Not representable on the wire unless skipped.
    Undefined,
    #[default]
    Null,
    Bool(bool),
    /// Plain JSON number. Must be finite to be encoded.
    Float(f64),
    /// 64-bit integer, carried as a decimal string.
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
    /// Millis since Unix epoch.
    Timestamp(i64),
    Id(RecordId),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Shared(SharedValue),
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up a key of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Float(_) => "number",
            Value::Int64(_) => "int64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "date",
            Value::Id(_) => "id",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Shared(_) => "shared",
        }
    }
}

impl From<JsonValue> for Value {
    /// Plain conversion; marker objects are NOT interpreted. Use
    /// [`decode_value`] for wire payloads.
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::Id(id)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<SharedValue> for Value {
    fn from(shared: SharedValue) -> Self {
        Value::Shared(shared)
    }
}

/// Options for [`encode_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Omit `Undefined` object entries (and encode `Undefined` array items
    /// as `null`) instead of failing.
    pub skip_undefined: bool,
    /// Maximum nesting depth.
    pub max_depth: usize,
    /// Reject values that reach a [`SharedValue`] already on the current path.
    pub detect_cycles: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            skip_undefined: false,
            max_depth: DEFAULT_MAX_DEPTH,
            detect_cycles: true,
        }
    }
}

impl EncodeOptions {
    pub fn with_skip_undefined(mut self, skip: bool) -> Self {
        self.skip_undefined = skip;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_detect_cycles(mut self, detect: bool) -> Self {
        self.detect_cycles = detect;
        self
    }
}

/// Location inside the value being encoded, rendered only on error.
#[derive(Debug, Clone)]
enum PathSegment {
    Key(String),
    Index(usize),
}

struct Encoder<'a> {
    options: &'a EncodeOptions,
    /// Identities of shared nodes on the current recursion path.
    visiting: HashSet<usize>,
    path: Vec<PathSegment>,
}

impl<'a> Encoder<'a> {
    fn new(options: &'a EncodeOptions) -> Self {
        Self {
            options,
            visiting: HashSet::new(),
            path: Vec::new(),
        }
    }

    fn path_string(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.path {
            match segment {
                PathSegment::Key(k) => {
                    out.push('.');
                    out.push_str(k);
                },
                PathSegment::Index(i) => {
                    out.push_str(&format!("[{}]", i));
                },
            }
        }
        out
    }

    fn fail(&self, message: impl Into<String>) -> SyncLinkError {
        SyncLinkError::serialization(message, &self.path_string())
    }

    fn encode(&mut self, value: &Value, depth: usize) -> Result<JsonValue> {
        if depth > self.options.max_depth {
            return Err(self.fail(format!(
                "maximum nesting depth of {} exceeded",
                self.options.max_depth
            )));
        }

        match value {
            Value::Undefined => Err(self.fail("undefined is not a valid wire value")),
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| self.fail(format!("non-finite number {} is not supported", f))),
            Value::Int64(i) => Ok(marker(INT64_MARKER, JsonValue::String(i.to_string()))),
            Value::String(s) => Ok(JsonValue::String(s.clone())),
            Value::Bytes(bytes) => Ok(marker(
                BYTES_MARKER,
                JsonValue::String(general_purpose::STANDARD.encode(bytes)),
            )),
            Value::Timestamp(ms) => Ok(marker(DATE_MARKER, JsonValue::Number((*ms).into()))),
            Value::Id(record) => {
                let mut inner = Map::new();
                inner.insert("table".to_string(), JsonValue::String(record.table.clone()));
                inner.insert("id".to_string(), JsonValue::String(record.id.clone()));
                Ok(marker(ID_MARKER, JsonValue::Object(inner)))
            },
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if matches!(item, Value::Undefined) && self.options.skip_undefined {
                        out.push(JsonValue::Null);
                        continue;
                    }
                    self.path.push(PathSegment::Index(i));
                    let encoded = self.encode(item, depth + 1);
                    self.path.pop();
                    out.push(encoded?);
                }
                Ok(JsonValue::Array(out))
            },
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    if matches!(item, Value::Undefined) && self.options.skip_undefined {
                        continue;
                    }
                    self.path.push(PathSegment::Key(key.clone()));
                    if key.starts_with('$') {
                        let err = self.fail(format!("object key '{}' is reserved", key));
                        self.path.pop();
                        return Err(err);
                    }
                    let encoded = self.encode(item, depth + 1);
                    self.path.pop();
                    out.insert(key.clone(), encoded?);
                }
                Ok(JsonValue::Object(out))
            },
            Value::Shared(shared) => {
                let identity = shared.identity();
                if self.options.detect_cycles && !self.visiting.insert(identity) {
                    return Err(self.fail("cyclic reference detected"));
                }
                let inner = shared.get();
                let encoded = self.encode(&inner, depth + 1);
                if self.options.detect_cycles {
                    self.visiting.remove(&identity);
                }
                encoded
            },
        }
    }
}

fn marker(key: &str, inner: JsonValue) -> JsonValue {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), inner);
    JsonValue::Object(map)
}

/// Convert an application value into its wire form.
///
/// Fails with `SerializationError` on `Undefined` (unless skipped),
/// non-finite numbers, reserved `$` keys, excessive depth and cycles.
pub fn encode_value(value: &Value, options: &EncodeOptions) -> Result<JsonValue> {
    Encoder::new(options).encode(value, 0)
}

/// Convert a wire value back into an application value.
pub fn decode_value(wire: &JsonValue) -> Result<Value> {
    match wire {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Bool(*b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| SyncLinkError::deserialization(format!("unrepresentable number {}", n))),
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Array(items) => items.iter().map(decode_value).collect::<Result<Vec<_>>>().map(Value::Array),
        JsonValue::Object(map) => {
            if map.len() == 1 {
                if let Some((key, inner)) = map.iter().next() {
                    if key.starts_with('$') {
                        return decode_marker(key, inner);
                    }
                }
            }
            let mut out = BTreeMap::new();
            for (key, item) in map {
                if key.starts_with('$') {
                    return Err(SyncLinkError::deserialization(format!(
                        "reserved key '{}' in a multi-key object",
                        key
                    )));
                }
                out.insert(key.clone(), decode_value(item)?);
            }
            Ok(Value::Object(out))
        },
    }
}

fn decode_marker(key: &str, inner: &JsonValue) -> Result<Value> {
    match key {
        INT64_MARKER => {
            let text = inner.as_str().ok_or_else(|| {
                SyncLinkError::deserialization(format!("$int64 expects a string, got {}", json_type(inner)))
            })?;
            text.parse::<i64>().map(Value::Int64).map_err(|e| {
                SyncLinkError::deserialization(format!("invalid $int64 '{}': {}", text, e))
            })
        },
        BYTES_MARKER => {
            let text = inner.as_str().ok_or_else(|| {
                SyncLinkError::deserialization(format!("$bytes expects a string, got {}", json_type(inner)))
            })?;
            general_purpose::STANDARD
                .decode(text)
                .map(Value::Bytes)
                .map_err(|e| SyncLinkError::deserialization(format!("invalid base64 in $bytes: {}", e)))
        },
        DATE_MARKER => {
            let millis = match inner {
                JsonValue::Number(n) => n.as_i64().or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                }),
                _ => None,
            };
            millis.map(Value::Timestamp).ok_or_else(|| {
                SyncLinkError::deserialization(format!(
                    "$date expects integral epoch millis, got {}",
                    inner
                ))
            })
        },
        ID_MARKER => {
            let obj = inner.as_object().filter(|o| o.len() == 2).ok_or_else(|| {
                SyncLinkError::deserialization("$id expects an object with 'table' and 'id'")
            })?;
            match (
                obj.get("table").and_then(JsonValue::as_str),
                obj.get("id").and_then(JsonValue::as_str),
            ) {
                (Some(table), Some(id)) => Ok(Value::Id(RecordId::new(table, id))),
                _ => Err(SyncLinkError::deserialization(
                    "$id expects string 'table' and 'id' fields",
                )),
            }
        },
        other => Err(SyncLinkError::deserialization(format!("unknown marker '{}'", other))),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
