//! Dialect-exact escaping of identifiers, literals, and LIKE patterns.

use crate::dialect::Dialect;
use crate::error::ValueError;
use crate::value::Value;

/// Renders `s` as a single SQL string literal.
///
/// Embedded single quotes are doubled; embedded NUL is rejected. Control
/// characters are escaped to backslash notation only when the dialect
/// requires it.
pub fn sanitize_string(dialect: &dyn Dialect, s: &str) -> Result<String, ValueError> {
    if s.contains('\0') {
        return Err(ValueError::EmbeddedNul);
    }

    let mut body = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '\'' => body.push_str("''"),
            '\u{8}' if dialect.escape_control_chars() => body.push_str("\\b"),
            '\n' if dialect.escape_control_chars() => body.push_str("\\n"),
            '\r' if dialect.escape_control_chars() => body.push_str("\\r"),
            '\t' if dialect.escape_control_chars() => body.push_str("\\t"),
            other => body.push(other),
        }
    }

    Ok(format!("'{body}'"))
}

/// Emits an identifier bare when it is simple and unreserved, quoted
/// otherwise.
pub fn sanitize_identifier(dialect: &dyn Dialect, ident: &str) -> String {
    if is_simple_identifier(ident) && !is_reserved(dialect, ident) {
        ident.to_string()
    } else {
        dialect.quote_ident(ident)
    }
}

/// Renders `s` as a string literal safe on the right-hand side of LIKE:
/// string escaping plus dialect metacharacter escaping.
pub fn sanitize_like_value(dialect: &dyn Dialect, s: &str) -> Result<String, ValueError> {
    let escaped = dialect.escape_like_fragment(s);
    sanitize_string(dialect, &escaped)
}

/// Formats a wire value as a dialect literal, dispatching on its runtime
/// type.
pub fn format_value(dialect: &dyn Dialect, value: &Value) -> Result<String, ValueError> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(value) => Ok(dialect.bool_literal(*value).to_string()),
        Value::Int16(value) => Ok(value.to_string()),
        Value::Int32(value) => Ok(value.to_string()),
        Value::Int64(value) => Ok(value.to_string()),
        Value::Float32(value) => Ok(value.to_string()),
        Value::Float64(value) => Ok(value.to_string()),
        Value::String(value) => sanitize_string(dialect, value),
        Value::Bytes(value) => Ok(dialect.binary_literal(value)),
        Value::Uuid(value) => Ok(dialect.uuid_literal(*value)),
        Value::Date(value) => Ok(dialect.date_literal(*value)),
        Value::Time(value) => Ok(dialect.time_literal(*value)),
        Value::DateTime(value) => Ok(dialect.timestamp_literal(*value)),
        Value::DateTimeOffset(value) => Ok(dialect.timestamp_offset_literal(*value)),
        Value::Duration(value) => Ok(dialect.duration_literal(*value)),
        Value::Enum(value) => Ok(value.ordinal.to_string()),
        Value::Json(value) => {
            let text = serde_json::to_string(value)
                .map_err(|source| ValueError::JsonEncode { source })?;
            sanitize_string(dialect, &text)
        }
    }
}

fn is_simple_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn is_reserved(dialect: &dyn Dialect, ident: &str) -> bool {
    dialect
        .reserved_words()
        .iter()
        .any(|word| word.eq_ignore_ascii_case(ident))
}
