use quarry_core::{
    Error, Value, ValueError, format_value, sanitize_identifier, sanitize_like_value,
    sanitize_string,
};

#[path = "support/fake_dialect.rs"]
mod fake_dialect;

use fake_dialect::FakeDialect;

/// Parses a single-quoted SQL literal back to its logical value.
fn parse_literal(literal: &str) -> String {
    assert!(literal.starts_with('\'') && literal.ends_with('\''));
    literal[1..literal.len() - 1].replace("''", "'")
}

#[test]
fn string_literals_close_over_their_input() {
    let inputs = [
        "plain",
        "O'Hara",
        "''already quoted''",
        "trailing'",
        "'",
        "",
        "percent % underscore _",
    ];
    for input in inputs {
        let literal = sanitize_string(&FakeDialect, input).expect("sanitizes");
        assert_eq!(parse_literal(&literal), input, "for input {input:?}");
    }
}

#[test]
fn embedded_nul_is_rejected() {
    let error = sanitize_string(&FakeDialect, "a\0b").expect_err("must fail");
    assert!(matches!(error, ValueError::EmbeddedNul));
}

#[test]
fn simple_unreserved_identifiers_stay_bare() {
    assert_eq!(sanitize_identifier(&FakeDialect, "age"), "age");
    assert_eq!(sanitize_identifier(&FakeDialect, "_private"), "_private");
    assert_eq!(sanitize_identifier(&FakeDialect, "a1"), "a1");
}

#[test]
fn reserved_or_irregular_identifiers_are_quoted() {
    assert_eq!(sanitize_identifier(&FakeDialect, "select"), "\"select\"");
    assert_eq!(sanitize_identifier(&FakeDialect, "ORDER"), "\"ORDER\"");
    assert_eq!(
        sanitize_identifier(&FakeDialect, "weird name"),
        "\"weird name\""
    );
    assert_eq!(sanitize_identifier(&FakeDialect, "1abc"), "\"1abc\"");
    assert_eq!(
        sanitize_identifier(&FakeDialect, "has\"quote"),
        "\"has\"\"quote\""
    );
}

#[test]
fn like_values_escape_metacharacters_inside_the_literal() {
    let literal = sanitize_like_value(&FakeDialect, "10%_done").expect("sanitizes");
    assert_eq!(literal, "'10\\%\\_done'");
}

#[test]
fn format_value_dispatches_by_runtime_type() {
    assert_eq!(
        format_value(&FakeDialect, &Value::Null).expect("formats"),
        "NULL"
    );
    assert_eq!(
        format_value(&FakeDialect, &Value::Bool(true)).expect("formats"),
        "TRUE"
    );
    assert_eq!(
        format_value(&FakeDialect, &Value::Int64(-7)).expect("formats"),
        "-7"
    );
    assert_eq!(
        format_value(&FakeDialect, &Value::String("it's".to_string())).expect("formats"),
        "'it''s'"
    );
    assert_eq!(
        format_value(&FakeDialect, &Value::Bytes(vec![0x0a, 0xf5])).expect("formats"),
        "X'0af5'"
    );
}

#[test]
fn format_value_rejects_nul_in_strings() {
    let error = format_value(&FakeDialect, &Value::String("a\0".to_string()))
        .expect_err("must fail");
    assert!(matches!(error, ValueError::EmbeddedNul));
    // The same failure surfaces through the crate error as a value error.
    let wrapped: Error = error.into();
    assert!(matches!(wrapped, Error::Value(ValueError::EmbeddedNul)));
}
