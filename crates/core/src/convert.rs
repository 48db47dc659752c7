//! Conversion between in-memory values and wire values.
//!
//! Native temporal and numeric types pass through untouched apart from
//! truncation to the documented 100 ns precision; enums, JSON payloads, and
//! durations narrow to primitives a driver can carry. The canonical string
//! forms live here as well so dialects and drivers format identically.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike,
};
use uuid::Uuid;

use crate::error::ValueError;
use crate::value::{Value, ValueType};

const NANOS_PER_TICK: u32 = 100;

/// Converts an in-memory value to its wire representation for a column of
/// the declared type.
///
/// `string_preferred` selects the name representation for enum values; the
/// ordinal is used otherwise.
pub fn to_wire(
    value: &Value,
    declared: ValueType,
    string_preferred: bool,
) -> Result<Value, ValueError> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match declared {
        ValueType::Bool => Ok(Value::Bool(value.to_bool()?)),
        ValueType::Int16 => Ok(Value::Int16(value.to_i16()?)),
        ValueType::Int32 => Ok(Value::Int32(value.to_i32()?)),
        ValueType::Int64 => Ok(Value::Int64(value.to_i64()?)),
        ValueType::Float32 => Ok(Value::Float32(value.to_f32()?)),
        ValueType::Float64 => Ok(Value::Float64(value.to_f64()?)),
        ValueType::String => Ok(Value::String(value.to_string_value()?)),
        ValueType::Bytes => Ok(Value::Bytes(value.to_bytes()?)),
        ValueType::Uuid => Ok(Value::Uuid(value.to_uuid()?)),
        ValueType::Date => Ok(Value::Date(value.to_date()?)),
        ValueType::Time => Ok(Value::Time(truncate_time(value.to_time()?))),
        ValueType::DateTime => Ok(Value::DateTime(truncate_datetime(value.to_datetime()?))),
        ValueType::DateTimeOffset => Ok(Value::DateTimeOffset(truncate_datetime_offset(
            value.to_datetime_offset()?,
        ))),
        ValueType::Duration => Ok(Value::Duration(value.to_duration()?)),
        ValueType::Enum => {
            let member = value.to_enum()?;
            if string_preferred {
                Ok(Value::String(member.name))
            } else {
                Ok(Value::Int32(member.ordinal))
            }
        }
        ValueType::Json => {
            let json = value.to_json()?;
            let text = serde_json::to_string(&json)
                .map_err(|source| ValueError::JsonEncode { source })?;
            Ok(Value::String(text))
        }
    }
}

/// Converts a wire value back to the in-memory representation of the target
/// type.
///
/// Null-like wire values become [`Value::Null`] for nullable targets and the
/// target type's zero otherwise. Enum targets stay as the raw ordinal or
/// name; the field binding resolves the concrete member.
pub fn from_wire(wire: &Value, target: ValueType, nullable: bool) -> Result<Value, ValueError> {
    if wire.is_null() {
        return Ok(if nullable {
            Value::Null
        } else {
            zero_value(target)
        });
    }

    match target {
        ValueType::Bool => Ok(Value::Bool(wire.to_bool()?)),
        ValueType::Int16 => Ok(Value::Int16(wire.to_i16()?)),
        ValueType::Int32 => Ok(Value::Int32(wire.to_i32()?)),
        ValueType::Int64 => Ok(Value::Int64(wire.to_i64()?)),
        ValueType::Float32 => Ok(Value::Float32(wire.to_f32()?)),
        ValueType::Float64 => Ok(Value::Float64(wire.to_f64()?)),
        ValueType::String => Ok(Value::String(wire.to_string_value()?)),
        ValueType::Bytes => Ok(Value::Bytes(wire.to_bytes()?)),
        ValueType::Uuid => Ok(Value::Uuid(wire.to_uuid()?)),
        ValueType::Date => match wire {
            Value::String(text) => parse_date(text).map(Value::Date),
            other => Ok(Value::Date(other.to_date()?)),
        },
        ValueType::Time => match wire {
            Value::String(text) => parse_time(text).map(Value::Time),
            other => Ok(Value::Time(other.to_time()?)),
        },
        ValueType::DateTime => match wire {
            Value::String(text) => parse_timestamp(text).map(Value::DateTime),
            other => Ok(Value::DateTime(other.to_datetime()?)),
        },
        ValueType::DateTimeOffset => match wire {
            Value::String(text) => parse_timestamp_offset(text).map(Value::DateTimeOffset),
            other => Ok(Value::DateTimeOffset(other.to_datetime_offset()?)),
        },
        ValueType::Duration => match wire {
            Value::String(text) => parse_duration(text).map(Value::Duration),
            other => Ok(Value::Duration(other.to_duration()?)),
        },
        ValueType::Enum => match wire {
            Value::Int16(ordinal) => Ok(Value::Int32(i32::from(*ordinal))),
            Value::Int32(ordinal) => Ok(Value::Int32(*ordinal)),
            Value::Int64(ordinal) => Ok(Value::Int32(
                i32::try_from(*ordinal).map_err(|_| ValueError::OutOfRange {
                    value: ordinal.to_string(),
                    target: "enum ordinal",
                })?,
            )),
            Value::String(name) => Ok(Value::String(name.clone())),
            other => Err(ValueError::Unconvertible {
                from: other.type_name(),
                to: "enum",
            }),
        },
        ValueType::Json => match wire {
            Value::String(text) => serde_json::from_str(text)
                .map(Value::Json)
                .map_err(|source| ValueError::JsonDecode { source }),
            Value::Json(json) => Ok(Value::Json(json.clone())),
            other => Ok(Value::Json(other.to_json()?)),
        },
    }
}

/// Narrows rich variants to primitives a driver can bind directly.
pub fn wire_primitive(value: &Value, string_preferred: bool) -> Result<Value, ValueError> {
    match value {
        Value::Enum(member) => {
            if string_preferred {
                Ok(Value::String(member.name.clone()))
            } else {
                Ok(Value::Int32(member.ordinal))
            }
        }
        Value::Json(json) => serde_json::to_string(json)
            .map(Value::String)
            .map_err(|source| ValueError::JsonEncode { source }),
        Value::Duration(delta) => Ok(Value::String(format_duration(*delta))),
        other => Ok(other.clone()),
    }
}

/// Zero value materialised for a non-nullable target fed a null wire value.
#[must_use]
pub fn zero_value(target: ValueType) -> Value {
    match target {
        ValueType::Bool => Value::Bool(false),
        ValueType::Int16 => Value::Int16(0),
        ValueType::Int32 => Value::Int32(0),
        ValueType::Int64 => Value::Int64(0),
        ValueType::Float32 => Value::Float32(0.0),
        ValueType::Float64 => Value::Float64(0.0),
        ValueType::String => Value::String(String::new()),
        ValueType::Bytes => Value::Bytes(Vec::new()),
        ValueType::Uuid => Value::Uuid(Uuid::nil()),
        ValueType::Date => Value::Date(NaiveDate::default()),
        ValueType::Time => Value::Time(NaiveTime::MIN),
        ValueType::DateTime => Value::DateTime(NaiveDateTime::default()),
        ValueType::DateTimeOffset => {
            Value::DateTimeOffset(NaiveDateTime::default().and_utc().fixed_offset())
        }
        ValueType::Duration => Value::Duration(TimeDelta::zero()),
        ValueType::Enum => Value::Int32(0),
        ValueType::Json => Value::Json(serde_json::Value::Null),
    }
}

/// Truncates to the 100 ns tick the wire format can carry.
#[must_use]
pub fn truncate_datetime(value: NaiveDateTime) -> NaiveDateTime {
    let nanos = value.and_utc().timestamp_subsec_nanos();
    let excess = nanos % NANOS_PER_TICK;
    value - TimeDelta::nanoseconds(i64::from(excess))
}

#[must_use]
pub fn truncate_datetime_offset(value: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let excess = value.timestamp_subsec_nanos() % NANOS_PER_TICK;
    value - TimeDelta::nanoseconds(i64::from(excess))
}

#[must_use]
pub fn truncate_time(value: NaiveTime) -> NaiveTime {
    let excess = value.nanosecond() % NANOS_PER_TICK;
    value - TimeDelta::nanoseconds(i64::from(excess))
}

/// `yyyy-MM-ddTHH:mm:ss.fffffff` — seven fractional digits, 100 ns ticks.
#[must_use]
pub fn format_timestamp(value: NaiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:07}",
        value.year(),
        value.month(),
        value.day(),
        value.hour(),
        value.minute(),
        value.second(),
        value.nanosecond() / NANOS_PER_TICK,
    )
}

/// Timestamp with the offset suffix `±hh:mm`.
#[must_use]
pub fn format_timestamp_offset(value: DateTime<FixedOffset>) -> String {
    let offset_seconds = value.offset().local_minus_utc();
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let magnitude = offset_seconds.unsigned_abs();
    format!(
        "{}{}{:02}:{:02}",
        format_timestamp(value.naive_local()),
        sign,
        magnitude / 3600,
        magnitude % 3600 / 60,
    )
}

/// `yyyy-MM-dd`.
#[must_use]
pub fn format_date(value: NaiveDate) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        value.year(),
        value.month(),
        value.day()
    )
}

/// `HH:mm:ss.fffffff`.
#[must_use]
pub fn format_time(value: NaiveTime) -> String {
    format!(
        "{:02}:{:02}:{:02}.{:07}",
        value.hour(),
        value.minute(),
        value.second(),
        value.nanosecond() / NANOS_PER_TICK,
    )
}

/// `hh:mm:ss` with a `.fff` millisecond suffix only when non-zero.
#[must_use]
pub fn format_duration(value: TimeDelta) -> String {
    let total_millis = value.num_milliseconds();
    let sign = if total_millis < 0 { "-" } else { "" };
    let magnitude = total_millis.unsigned_abs();
    let millis = magnitude % 1000;
    let seconds = magnitude / 1000;
    let base = format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60,
    );
    if millis == 0 {
        base
    } else {
        format!("{base}.{millis:03}")
    }
}

pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, ValueError> {
    let normalized = text.trim().replacen(' ', "T", 1);
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| ValueError::UnrepresentableTimestamp {
            value: text.to_string(),
        })
}

pub fn parse_timestamp_offset(text: &str) -> Result<DateTime<FixedOffset>, ValueError> {
    let normalized = text.trim().replacen(' ', "T", 1);
    if let Ok(value) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Ok(value);
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(value);
    }
    // Fallback for offset-less payloads: interpreted as UTC by policy.
    parse_timestamp(text).map(|naive| naive.and_utc().fixed_offset())
}

pub fn parse_date(text: &str) -> Result<NaiveDate, ValueError> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| {
        ValueError::UnrepresentableTimestamp {
            value: text.to_string(),
        }
    })
}

pub fn parse_time(text: &str) -> Result<NaiveTime, ValueError> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text.trim(), "%H:%M:%S"))
        .map_err(|_| ValueError::UnrepresentableTimestamp {
            value: text.to_string(),
        })
}

pub fn parse_duration(text: &str) -> Result<TimeDelta, ValueError> {
    let trimmed = text.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, trimmed),
    };

    let (clock, millis) = match body.split_once('.') {
        Some((clock, fraction)) => {
            let padded = format!("{fraction:0<3}");
            let parsed = padded
                .get(..3)
                .and_then(|digits| digits.parse::<i64>().ok())
                .ok_or_else(|| invalid_duration(text))?;
            (clock, parsed)
        }
        None => (body, 0),
    };

    let mut parts = clock.split(':');
    let hours = next_duration_part(&mut parts, text)?;
    let minutes = next_duration_part(&mut parts, text)?;
    let seconds = next_duration_part(&mut parts, text)?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return Err(invalid_duration(text));
    }

    let total_millis = ((hours * 3600 + minutes * 60 + seconds) * 1000 + millis) * sign;
    Ok(TimeDelta::milliseconds(total_millis))
}

fn next_duration_part(parts: &mut std::str::Split<'_, char>, text: &str) -> Result<i64, ValueError> {
    parts
        .next()
        .and_then(|part| part.parse::<i64>().ok())
        .ok_or_else(|| invalid_duration(text))
}

fn invalid_duration(text: &str) -> ValueError {
    ValueError::OutOfRange {
        value: text.to_string(),
        target: "duration",
    }
}
