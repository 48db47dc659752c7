use chrono::{NaiveDate, TimeDelta};
use quarry_core::{
    EnumValue, Value, ValueType, format_duration, format_timestamp, from_wire, parse_duration,
    parse_timestamp_offset, to_wire, zero_value,
};
use uuid::Uuid;

fn roundtrip(value: Value, declared: ValueType) -> Value {
    let wire = to_wire(&value, declared, false).expect("to_wire succeeds");
    from_wire(&wire, declared, false).expect("from_wire succeeds")
}

#[test]
fn scalars_roundtrip_exactly() {
    assert_eq!(roundtrip(Value::Bool(true), ValueType::Bool), Value::Bool(true));
    assert_eq!(
        roundtrip(Value::Int16(-3), ValueType::Int16),
        Value::Int16(-3)
    );
    assert_eq!(
        roundtrip(Value::Int64(1 << 40), ValueType::Int64),
        Value::Int64(1 << 40)
    );
    assert_eq!(
        roundtrip(Value::Float64(1.25), ValueType::Float64),
        Value::Float64(1.25)
    );
    assert_eq!(
        roundtrip(Value::String("Ann".to_string()), ValueType::String),
        Value::String("Ann".to_string())
    );
    assert_eq!(
        roundtrip(Value::Bytes(vec![0, 1, 255]), ValueType::Bytes),
        Value::Bytes(vec![0, 1, 255])
    );

    let id = Uuid::new_v4();
    assert_eq!(roundtrip(Value::Uuid(id), ValueType::Uuid), Value::Uuid(id));
}

#[test]
fn timestamps_roundtrip_to_one_hundred_nanoseconds() {
    let datetime = NaiveDate::from_ymd_opt(2024, 3, 5)
        .expect("valid date")
        .and_hms_nano_opt(4, 5, 6, 123_456_789)
        .expect("valid time");

    let wire = to_wire(&Value::DateTime(datetime), ValueType::DateTime, false)
        .expect("to_wire succeeds");
    let Value::DateTime(truncated) = wire else {
        panic!("timestamp stays native on the wire");
    };
    // 123_456_789 ns truncates to the 100 ns tick below.
    assert_eq!(truncated.and_utc().timestamp_subsec_nanos(), 123_456_700);

    let back = from_wire(&Value::DateTime(truncated), ValueType::DateTime, false)
        .expect("from_wire succeeds");
    assert_eq!(back, Value::DateTime(truncated));
}

#[test]
fn canonical_timestamp_format_has_seven_fraction_digits() {
    let datetime = NaiveDate::from_ymd_opt(2024, 3, 5)
        .expect("valid date")
        .and_hms_nano_opt(4, 5, 6, 123_456_700)
        .expect("valid time");
    assert_eq!(format_timestamp(datetime), "2024-03-05T04:05:06.1234567");
}

#[test]
fn enums_persist_by_ordinal_or_name() {
    let member = Value::Enum(EnumValue::new(2, "Blue"));

    let ordinal = to_wire(&member, ValueType::Enum, false).expect("to_wire succeeds");
    assert_eq!(ordinal, Value::Int32(2));

    let name = to_wire(&member, ValueType::Enum, true).expect("to_wire succeeds");
    assert_eq!(name, Value::String("Blue".to_string()));

    // Wire accepts either representation coming back.
    assert_eq!(
        from_wire(&Value::Int64(2), ValueType::Enum, false).expect("ordinal accepted"),
        Value::Int32(2)
    );
    assert_eq!(
        from_wire(&Value::String("Blue".to_string()), ValueType::Enum, false)
            .expect("name accepted"),
        Value::String("Blue".to_string())
    );
}

#[test]
fn json_collections_roundtrip_through_strings() {
    let payload = Value::Json(serde_json::json!({"firstName": "Ann", "tags": [1, 2]}));
    let wire = to_wire(&payload, ValueType::Json, false).expect("to_wire succeeds");
    let Value::String(text) = &wire else {
        panic!("JSON serialises to a string on the wire");
    };
    assert!(text.contains("firstName"));

    let back = from_wire(&wire, ValueType::Json, false).expect("from_wire succeeds");
    assert_eq!(back, payload);
}

#[test]
fn null_wire_values_become_zero_for_required_targets() {
    assert_eq!(
        from_wire(&Value::Null, ValueType::Int32, false).expect("zero"),
        Value::Int32(0)
    );
    assert_eq!(
        from_wire(&Value::Null, ValueType::String, false).expect("zero"),
        Value::String(String::new())
    );
    assert_eq!(
        from_wire(&Value::Null, ValueType::Uuid, false).expect("zero"),
        Value::Uuid(Uuid::nil())
    );
    assert_eq!(
        from_wire(&Value::Null, ValueType::Int32, true).expect("absent"),
        Value::Null
    );
    assert_eq!(zero_value(ValueType::Bool), Value::Bool(false));
}

#[test]
fn durations_format_with_optional_millisecond_suffix() {
    assert_eq!(format_duration(TimeDelta::seconds(3723)), "01:02:03");
    assert_eq!(
        format_duration(TimeDelta::seconds(3723) + TimeDelta::milliseconds(500)),
        "01:02:03.500"
    );
    assert_eq!(format_duration(TimeDelta::seconds(-61)), "-00:01:01");

    assert_eq!(
        parse_duration("01:02:03.500").expect("parses"),
        TimeDelta::seconds(3723) + TimeDelta::milliseconds(500)
    );
    assert_eq!(
        parse_duration("-00:01:01").expect("parses"),
        TimeDelta::seconds(-61)
    );
    assert!(parse_duration("1:99:00").is_err());
}

#[test]
fn offsetless_timestamps_are_read_as_utc() {
    let parsed = parse_timestamp_offset("2024-03-05 04:05:06").expect("parses");
    assert_eq!(parsed.offset().local_minus_utc(), 0);
    assert_eq!(parsed.naive_utc().to_string(), "2024-03-05 04:05:06");
}
