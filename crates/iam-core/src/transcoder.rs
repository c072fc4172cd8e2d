//! Transcoder: lossless conversion between structured values and bytes.
//!
//! Values are a JSON-like tree extended with [`CustomValue`] leaves for
//! scalar types JSON cannot represent directly. Every custom type is encoded
//! through a registered transcoding and written as a two-key envelope
//! `{"__type__": <tag>, "__data__": <encoded>}`; decoding recognises the
//! envelope and dispatches on the tag. A plain map that already has that
//! shape is written inside a `__map__` envelope, so it decodes back to a map.
//! The canonical byte form is UTF-8 JSON.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value as Json};
use uuid::Uuid;

use crate::error::DomainError;

const TYPE_KEY: &str = "__type__";
const DATA_KEY: &str = "__data__";
/// Reserved tag escaping plain maps that look like envelopes.
const MAP_TAG: &str = "__map__";

/// Tag for [`Uuid`] values written as 32 hex digits.
pub const UUID_HEX: &str = "uuid_hex";
/// Tag used by payloads written through the database driver's UUID type.
pub const PG_UUID_HEX: &str = "pguuid_hex";
/// Tag for [`Decimal`] values written in canonical string form.
pub const DECIMAL_STR: &str = "decimal_str";
/// Tag for UTC timestamps written as RFC 3339 / ISO-8601 strings.
pub const DATETIME_ISO: &str = "datetime_iso";

/// A structured value the transcoder can encode.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A finite floating point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// A string-keyed map.
    Map(BTreeMap<String, Value>),
    /// A scalar with no JSON representation of its own.
    Custom(CustomValue),
}

impl Value {
    /// Wraps an arbitrary scalar. Encoding fails unless its type is registered.
    pub fn custom<T>(value: T) -> Self
    where
        T: Any + Send + Sync + PartialEq + fmt::Debug,
    {
        Self::Custom(CustomValue::new(value))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Custom(custom) => custom.type_name(),
        }
    }
}

/// A type-erased scalar carried inside a [`Value`].
#[derive(Clone)]
pub struct CustomValue {
    inner: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    eq: fn(&dyn Any, &dyn Any) -> bool,
    debug: fn(&dyn Any, &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl CustomValue {
    /// Wraps `value`, remembering how to compare and print it.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + PartialEq + fmt::Debug,
    {
        Self {
            inner: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            eq: eq_as::<T>,
            debug: debug_as::<T>,
        }
    }

    /// Returns the wrapped scalar if it is a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// The runtime type of the wrapped scalar.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The Rust name of the wrapped scalar's type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

fn eq_as<T: Any + PartialEq>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn debug_as<T: Any + fmt::Debug>(value: &dyn Any, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(value) => fmt::Debug::fmt(value, f),
        None => f.write_str("<opaque>"),
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && (self.eq)(&*self.inner, &*other.inner)
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug)(&*self.inner, f)
    }
}

type EncodeFn = Box<dyn Fn(&CustomValue) -> Result<Value, DomainError> + Send + Sync>;
type DecodeFn = Box<dyn Fn(Value) -> Result<Value, DomainError> + Send + Sync>;

struct Transcoding {
    name: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Encodes [`Value`] trees to bytes and back using a registry of per-type
/// transcodings.
#[derive(Default)]
pub struct Transcoder {
    types: HashMap<TypeId, Arc<Transcoding>>,
    names: HashMap<String, Arc<Transcoding>>,
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Transcoder").field("names", &names).finish()
    }
}

impl Transcoder {
    /// Creates a transcoder with the built-in registrations for UUIDs,
    /// decimals and UTC timestamps.
    #[must_use]
    pub fn new() -> Self {
        let mut transcoder = Self::empty();
        transcoder.register_builtins();
        transcoder
    }

    /// Creates a transcoder that only understands JSON primitives.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers the transcoding for `T` under `name`.
    ///
    /// Values of type `T` are encoded with the most recent registration for
    /// `T`; payloads are decoded by tag, so every tag ever registered stays
    /// decodable. Registering an existing tag again replaces it. The tag
    /// `__map__` is reserved and never reaches a registered decoder.
    pub fn register<T, E, D>(&mut self, name: &str, encode: E, decode: D)
    where
        T: Any + Send + Sync + PartialEq + fmt::Debug,
        E: Fn(&T) -> Value + Send + Sync + 'static,
        D: Fn(Value) -> Result<T, DomainError> + Send + Sync + 'static,
    {
        let tag = name.to_owned();
        let encode_tag = tag.clone();
        let transcoding = Arc::new(Transcoding {
            name: tag.clone(),
            encode: Box::new(move |custom| match custom.downcast_ref::<T>() {
                Some(value) => Ok(encode(value)),
                None => Err(DomainError::UnsupportedType(format!(
                    "transcoding `{encode_tag}` cannot encode {}",
                    custom.type_name()
                ))),
            }),
            decode: Box::new(move |data| decode(data).map(Value::custom)),
        });
        self.types.insert(TypeId::of::<T>(), Arc::clone(&transcoding));
        self.names.insert(tag, transcoding);
    }

    /// Returns `true` if a transcoding is registered under `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Serializes `value` to its canonical byte form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnsupportedType` if the tree contains a custom
    /// scalar with no registered transcoding, or a non-finite float.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, DomainError> {
        let json = self.to_json(value)?;
        serde_json::to_vec(&json)
            .map_err(|e| DomainError::Transcoding(format!("payload serialization failed: {e}")))
    }

    /// Parses bytes produced by [`Transcoder::encode`] back into a value tree.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` for malformed bytes and
    /// `DomainError::UnsupportedType` for envelopes with an unknown tag.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DomainError> {
        let json: Json = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::Transcoding(format!("payload is not valid JSON: {e}")))?;
        self.from_json(json)
    }

    fn to_json(&self, value: &Value) -> Result<Json, DomainError> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number(Number::from(*i)),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).ok_or_else(|| {
                DomainError::UnsupportedType(format!("non-finite float {f}"))
            })?,
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.to_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => {
                let mut object = Map::new();
                for (key, entry) in entries {
                    object.insert(key.clone(), self.to_json(entry)?);
                }
                if is_envelope(&object) {
                    envelope(MAP_TAG, Json::Object(object))
                } else {
                    Json::Object(object)
                }
            }
            Value::Custom(custom) => {
                let transcoding = self.types.get(&custom.type_id()).ok_or_else(|| {
                    DomainError::UnsupportedType(format!(
                        "object of type {} is not serializable",
                        custom.type_name()
                    ))
                })?;
                let data = (transcoding.encode)(custom)?;
                envelope(&transcoding.name, self.to_json(&data)?)
            }
        })
    }

    fn from_json(&self, json: Json) -> Result<Value, DomainError> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => number_to_value(&n)?,
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.from_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(object) if is_envelope(&object) => self.decode_envelope(object)?,
            Json::Object(object) => self.map_from_json(object)?,
        })
    }

    fn map_from_json(&self, object: Map<String, Json>) -> Result<Value, DomainError> {
        let mut entries = BTreeMap::new();
        for (key, entry) in object {
            entries.insert(key, self.from_json(entry)?);
        }
        Ok(Value::Map(entries))
    }

    fn decode_envelope(&self, mut object: Map<String, Json>) -> Result<Value, DomainError> {
        let Some(Json::String(tag)) = object.remove(TYPE_KEY) else {
            return Err(DomainError::Transcoding("envelope without a type tag".into()));
        };
        let data = object.remove(DATA_KEY).unwrap_or(Json::Null);
        if tag == MAP_TAG {
            return match data {
                Json::Object(escaped) => self.map_from_json(escaped),
                _ => Err(DomainError::Transcoding(format!(
                    "`{MAP_TAG}` envelope must hold an object"
                ))),
            };
        }
        let transcoding = self.names.get(&tag).ok_or_else(|| {
            DomainError::UnsupportedType(format!("no transcoding registered under `{tag}`"))
        })?;
        let data = self.from_json(data)?;
        (transcoding.decode)(data)
    }

    fn register_builtins(&mut self) {
        // Both UUID tags decode; values are written with the later one.
        self.register(PG_UUID_HEX, |id: &Uuid| Value::String(id.simple().to_string()), |data| {
            decode_uuid(data, PG_UUID_HEX)
        });
        self.register(UUID_HEX, |id: &Uuid| Value::String(id.simple().to_string()), |data| {
            decode_uuid(data, UUID_HEX)
        });
        self.register(
            DECIMAL_STR,
            |amount: &Decimal| Value::String(amount.to_string()),
            |data| {
                let text = expect_string(data, DECIMAL_STR)?;
                Decimal::from_str(&text)
                    .map_err(|e| DomainError::Transcoding(format!("invalid decimal `{text}`: {e}")))
            },
        );
        self.register(
            DATETIME_ISO,
            |ts: &DateTime<Utc>| Value::String(ts.to_rfc3339()),
            |data| {
                let text = expect_string(data, DATETIME_ISO)?;
                parse_timestamp(&text)
            },
        );
    }
}

fn envelope(tag: &str, data: Json) -> Json {
    let mut object = Map::new();
    object.insert(TYPE_KEY.to_owned(), Json::String(tag.to_owned()));
    object.insert(DATA_KEY.to_owned(), data);
    Json::Object(object)
}

fn is_envelope(object: &Map<String, Json>) -> bool {
    object.len() == 2
        && matches!(object.get(TYPE_KEY), Some(Json::String(_)))
        && object.contains_key(DATA_KEY)
}

fn number_to_value(n: &Number) -> Result<Value, DomainError> {
    if let Some(i) = n.as_i64() {
        Ok(Value::Int(i))
    } else if let Some(f) = n.as_f64() {
        Ok(Value::Float(f))
    } else {
        Err(DomainError::Transcoding(format!("unrepresentable number {n}")))
    }
}

fn expect_string(data: Value, tag: &str) -> Result<String, DomainError> {
    match data {
        Value::String(text) => Ok(text),
        other => Err(DomainError::Transcoding(format!(
            "`{tag}` expects a string, got {}",
            other.kind()
        ))),
    }
}

fn decode_uuid(data: Value, tag: &str) -> Result<Uuid, DomainError> {
    let text = expect_string(data, tag)?;
    Uuid::parse_str(&text)
        .map_err(|e| DomainError::Transcoding(format!("invalid uuid `{text}`: {e}")))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DomainError::Transcoding(format!("invalid timestamp `{text}`: {e}")))
}

// --- conversions into values ---

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::custom(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::custom(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::custom(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Fields> for Value {
    fn from(fields: Fields) -> Self {
        Self::Map(fields.0)
    }
}

// --- conversions out of values ---

/// Types that can be rebuilt from a decoded [`Value`].
pub trait FromValue: Sized {
    /// Converts `value`, failing if it has the wrong shape.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` on a shape or range mismatch.
    fn from_value(value: Value) -> Result<Self, DomainError>;
}

fn mismatch(expected: &str, got: &Value) -> DomainError {
    DomainError::Transcoding(format!("expected {expected}, got {}", got.kind()))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide).map_err(|_| DomainError::Transcoding(format!("{wide} out of range")))
    }
}

impl FromValue for u32 {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide).map_err(|_| DomainError::Transcoding(format!("{wide} out of range")))
    }
}

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

fn custom_or_parsed<T, P>(value: Value, expected: &str, parse: P) -> Result<T, DomainError>
where
    T: Any + Clone,
    P: FnOnce(&str) -> Result<T, DomainError>,
{
    match value {
        Value::Custom(custom) => custom
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| mismatch(expected, &Value::Custom(custom))),
        Value::String(text) => parse(&text),
        other => Err(mismatch(expected, &other)),
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        custom_or_parsed(value, "uuid", |text| decode_uuid(Value::String(text.to_owned()), "uuid"))
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        custom_or_parsed(value, "timestamp", parse_timestamp)
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        custom_or_parsed(value, "decimal", |text| {
            Decimal::from_str(text)
                .map_err(|e| DomainError::Transcoding(format!("invalid decimal `{text}`: {e}")))
        })
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// The named fields of one encoded record.
///
/// Reading is selective: a record type takes the fields it declares and
/// ignores the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    /// Creates an empty field set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Fields::insert`].
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets `name`, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_owned(), value.into());
    }

    /// Returns the raw value of `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Removes and returns the raw value of `name`.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Removes `name` and converts it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` if the field is missing or has the
    /// wrong shape.
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T, DomainError> {
        let value = self
            .0
            .remove(name)
            .ok_or_else(|| DomainError::Transcoding(format!("missing field `{name}`")))?;
        T::from_value(value).map_err(|e| annotate(name, e))
    }

    /// Removes `name` and converts it, falling back to `T::default()` when
    /// the field is absent.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` if the field has the wrong shape.
    pub fn take_or_default<T: FromValue + Default>(
        &mut self,
        name: &str,
    ) -> Result<T, DomainError> {
        match self.0.remove(name) {
            Some(value) => T::from_value(value).map_err(|e| annotate(name, e)),
            None => Ok(T::default()),
        }
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn annotate(name: &str, err: DomainError) -> DomainError {
    match err {
        DomainError::Transcoding(msg) => DomainError::Transcoding(format!("field `{name}`: {msg}")),
        other => other,
    }
}

impl TryFrom<Value> for Fields {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Map(entries) => Ok(Self(entries)),
            other => Err(mismatch("map", &other)),
        }
    }
}
