use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use uuid::Uuid;

use crate::error::ValueError;

/// A database value, in memory or on the wire.
///
/// The same representation is used on both sides of the converter; the
/// converter narrows rich variants (enums, JSON, durations) to primitive
/// ones when a driver cannot carry them natively.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Duration(TimeDelta),
    Enum(EnumValue),
    Json(serde_json::Value),
}

/// An enum member carrying both representations the converter can persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub ordinal: i32,
    pub name: String,
}

impl EnumValue {
    pub fn new(ordinal: i32, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
        }
    }
}

/// Declared type of a mapped field or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Duration,
    Enum,
    Json,
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Runtime type of the value; `None` for null.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueType::Bool),
            Self::Int16(_) => Some(ValueType::Int16),
            Self::Int32(_) => Some(ValueType::Int32),
            Self::Int64(_) => Some(ValueType::Int64),
            Self::Float32(_) => Some(ValueType::Float32),
            Self::Float64(_) => Some(ValueType::Float64),
            Self::String(_) => Some(ValueType::String),
            Self::Bytes(_) => Some(ValueType::Bytes),
            Self::Uuid(_) => Some(ValueType::Uuid),
            Self::Date(_) => Some(ValueType::Date),
            Self::Time(_) => Some(ValueType::Time),
            Self::DateTime(_) => Some(ValueType::DateTime),
            Self::DateTimeOffset(_) => Some(ValueType::DateTimeOffset),
            Self::Duration(_) => Some(ValueType::Duration),
            Self::Enum(_) => Some(ValueType::Enum),
            Self::Json(_) => Some(ValueType::Json),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Duration(_) => "duration",
            Self::Enum(_) => "enum",
            Self::Json(_) => "json",
        }
    }

    fn unconvertible(&self, to: &'static str) -> ValueError {
        ValueError::Unconvertible {
            from: self.type_name(),
            to,
        }
    }

    pub fn to_bool(&self) -> Result<bool, ValueError> {
        match self {
            Self::Bool(value) => Ok(*value),
            Self::Int16(value) => Ok(*value != 0),
            Self::Int32(value) => Ok(*value != 0),
            Self::Int64(value) => Ok(*value != 0),
            other => Err(other.unconvertible("bool")),
        }
    }

    pub fn to_i16(&self) -> Result<i16, ValueError> {
        match self {
            Self::Int16(value) => Ok(*value),
            Self::Int32(value) => i16::try_from(*value).map_err(|_| self.out_of_range("int16")),
            Self::Int64(value) => i16::try_from(*value).map_err(|_| self.out_of_range("int16")),
            other => Err(other.unconvertible("int16")),
        }
    }

    pub fn to_i32(&self) -> Result<i32, ValueError> {
        match self {
            Self::Int16(value) => Ok(i32::from(*value)),
            Self::Int32(value) => Ok(*value),
            Self::Int64(value) => i32::try_from(*value).map_err(|_| self.out_of_range("int32")),
            Self::Enum(value) => Ok(value.ordinal),
            other => Err(other.unconvertible("int32")),
        }
    }

    pub fn to_i64(&self) -> Result<i64, ValueError> {
        match self {
            Self::Int16(value) => Ok(i64::from(*value)),
            Self::Int32(value) => Ok(i64::from(*value)),
            Self::Int64(value) => Ok(*value),
            other => Err(other.unconvertible("int64")),
        }
    }

    pub fn to_f32(&self) -> Result<f32, ValueError> {
        match self {
            Self::Float32(value) => Ok(*value),
            Self::Float64(value) => Ok(*value as f32),
            Self::Int16(value) => Ok(f32::from(*value)),
            Self::Int32(value) => Ok(*value as f32),
            other => Err(other.unconvertible("float32")),
        }
    }

    pub fn to_f64(&self) -> Result<f64, ValueError> {
        match self {
            Self::Float32(value) => Ok(f64::from(*value)),
            Self::Float64(value) => Ok(*value),
            Self::Int16(value) => Ok(f64::from(*value)),
            Self::Int32(value) => Ok(f64::from(*value)),
            Self::Int64(value) => Ok(*value as f64),
            other => Err(other.unconvertible("float64")),
        }
    }

    pub fn to_string_value(&self) -> Result<String, ValueError> {
        match self {
            Self::String(value) => Ok(value.clone()),
            Self::Enum(value) => Ok(value.name.clone()),
            other => Err(other.unconvertible("string")),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ValueError> {
        match self {
            Self::Bytes(value) => Ok(value.clone()),
            other => Err(other.unconvertible("bytes")),
        }
    }

    pub fn to_uuid(&self) -> Result<Uuid, ValueError> {
        match self {
            Self::Uuid(value) => Ok(*value),
            Self::String(value) => {
                Uuid::parse_str(value).map_err(|_| self.unconvertible("uuid"))
            }
            other => Err(other.unconvertible("uuid")),
        }
    }

    pub fn to_date(&self) -> Result<NaiveDate, ValueError> {
        match self {
            Self::Date(value) => Ok(*value),
            Self::DateTime(value) => Ok(value.date()),
            other => Err(other.unconvertible("date")),
        }
    }

    pub fn to_time(&self) -> Result<NaiveTime, ValueError> {
        match self {
            Self::Time(value) => Ok(*value),
            other => Err(other.unconvertible("time")),
        }
    }

    pub fn to_datetime(&self) -> Result<NaiveDateTime, ValueError> {
        match self {
            Self::DateTime(value) => Ok(*value),
            Self::Date(value) => Ok(value.and_time(NaiveTime::MIN)),
            other => Err(other.unconvertible("datetime")),
        }
    }

    pub fn to_datetime_offset(&self) -> Result<DateTime<FixedOffset>, ValueError> {
        match self {
            Self::DateTimeOffset(value) => Ok(*value),
            // Offset-less timestamps are interpreted as UTC. This is the
            // documented policy, not a guess at server locale.
            Self::DateTime(value) => Ok(value.and_utc().fixed_offset()),
            other => Err(other.unconvertible("datetimeoffset")),
        }
    }

    pub fn to_duration(&self) -> Result<TimeDelta, ValueError> {
        match self {
            Self::Duration(value) => Ok(*value),
            other => Err(other.unconvertible("duration")),
        }
    }

    pub fn to_enum(&self) -> Result<EnumValue, ValueError> {
        match self {
            Self::Enum(value) => Ok(value.clone()),
            other => Err(other.unconvertible("enum")),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ValueError> {
        match self {
            Self::Json(value) => Ok(value.clone()),
            Self::String(value) => {
                serde_json::from_str(value).map_err(|source| ValueError::JsonDecode { source })
            }
            other => Err(other.unconvertible("json")),
        }
    }

    fn out_of_range(&self, target: &'static str) -> ValueError {
        ValueError::OutOfRange {
            value: format!("{self:?}"),
            target,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Self::Int16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        Self::Time(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTimeOffset(value)
    }
}

impl From<TimeDelta> for Value {
    fn from(value: TimeDelta) -> Self {
        Self::Duration(value)
    }
}

impl From<EnumValue> for Value {
    fn from(value: EnumValue) -> Self {
        Self::Enum(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

pub fn float_total_cmp(left: f64, right: f64) -> Ordering {
    left.total_cmp(&right)
}

/// Equality with total ordering on floats, for structural comparisons.
#[must_use]
pub fn value_total_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Float32(left), Value::Float32(right)) => left.total_cmp(right).is_eq(),
        (Value::Float64(left), Value::Float64(right)) => float_total_cmp(*left, *right).is_eq(),
        _ => left == right,
    }
}

/// A hashable wrapper over [`Value`] for primary-key identity maps.
///
/// Floats hash by bit pattern; JSON hashes by canonical string form.
#[derive(Debug, Clone)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        value_total_eq(&self.0, &other.0)
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Null => {}
            Value::Bool(value) => value.hash(state),
            Value::Int16(value) => value.hash(state),
            Value::Int32(value) => value.hash(state),
            Value::Int64(value) => value.hash(state),
            Value::Float32(value) => value.to_bits().hash(state),
            Value::Float64(value) => value.to_bits().hash(state),
            Value::String(value) => value.hash(state),
            Value::Bytes(value) => value.hash(state),
            Value::Uuid(value) => value.hash(state),
            Value::Date(value) => value.hash(state),
            Value::Time(value) => value.hash(state),
            Value::DateTime(value) => value.hash(state),
            Value::DateTimeOffset(value) => value.hash(state),
            Value::Duration(value) => value.hash(state),
            Value::Enum(value) => {
                value.ordinal.hash(state);
                value.name.hash(state);
            }
            Value::Json(value) => value.to_string().hash(state),
        }
    }
}
