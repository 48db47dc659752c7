use quarry_core::{
    ColumnDef, Entity, EntityBuilder, EntityDescriptor, Error, MetadataError, SchemaError, Value,
    ValueType, create_index_sql, create_table_sql, schema_statements,
};

#[path = "support/entities.rs"]
mod entities;
#[path = "support/fake_dialect.rs"]
mod fake_dialect;

use entities::{Book, Person};
use fake_dialect::FakeDialect;

#[test]
fn create_table_is_guarded_and_lists_columns_in_order() {
    let sql = create_table_sql::<Person>(&FakeDialect).expect("renders");

    assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"people\" ("));
    assert!(sql.contains("\"id\" INTEGER GENERATED BY DEFAULT AS IDENTITY NOT NULL"));
    assert!(sql.contains("\"first\" VARCHAR(255) NOT NULL"));
    assert!(sql.contains("\"salary\" DOUBLE PRECISION NOT NULL"));
    assert!(sql.contains("PRIMARY KEY (\"id\")"));

    let id_position = sql.find("\"id\"").expect("id present");
    let salary_position = sql.find("\"salary\"").expect("salary present");
    assert!(id_position < salary_position);
}

#[test]
fn foreign_keys_come_from_to_one_edges() {
    let sql = create_table_sql::<Book>(&FakeDialect).expect("renders");
    assert!(sql.contains("FOREIGN KEY (\"author_id\") REFERENCES \"authors\" (\"id\")"));
}

#[test]
fn per_field_and_composite_indexes_are_guarded() {
    let statements = create_index_sql::<Person>(&FakeDialect).expect("renders");
    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[0],
        "CREATE INDEX IF NOT EXISTS \"ix_people_dept\" ON \"people\" (\"dept\")"
    );
    assert_eq!(
        statements[1],
        "CREATE INDEX IF NOT EXISTS \"ix_people_name\" ON \"people\" (\"last\", \"first\")"
    );
}

#[test]
fn schema_statements_emit_table_then_indexes() {
    let statements = schema_statements::<Person>(&FakeDialect).expect("renders");
    assert_eq!(statements.len(), 3);
    assert!(statements[0].contains("CREATE TABLE"));
    assert!(statements[1].contains("CREATE INDEX"));
}

#[derive(Debug, Default)]
struct BadIndex {
    id: i32,
}

impl Entity for BadIndex {
    fn build_descriptor() -> Result<EntityDescriptor, MetadataError> {
        EntityBuilder::<Self>::new()
            .table("bad_index")
            .column(
                ColumnDef::new("id", ValueType::Int32).primary_key(),
                |entity| Value::Int32(entity.id),
                |entity, value| {
                    entity.id = value.to_i32()?;
                    Ok(())
                },
            )
            .composite_index("ix_missing", &["absent"], false)
            .build()
    }
}

#[test]
fn composite_index_with_unknown_column_is_rejected() {
    let error = create_index_sql::<BadIndex>(&FakeDialect).expect_err("must fail");
    assert!(matches!(
        error,
        Error::Schema(SchemaError::UnknownIndexColumn { column, .. }) if column == "absent"
    ));
}

#[derive(Debug, Default)]
struct WithDefault {
    id: i32,
    active: bool,
}

impl Entity for WithDefault {
    fn build_descriptor() -> Result<EntityDescriptor, MetadataError> {
        EntityBuilder::<Self>::new()
            .table("with_default")
            .column(
                ColumnDef::new("id", ValueType::Int32).primary_key(),
                |entity| Value::Int32(entity.id),
                |entity, value| {
                    entity.id = value.to_i32()?;
                    Ok(())
                },
            )
            .column(
                ColumnDef::new("active", ValueType::Bool).default_literal("TRUE"),
                |entity| Value::Bool(entity.active),
                |entity, value| {
                    entity.active = value.to_bool()?;
                    Ok(())
                },
            )
            .build()
    }
}

#[test]
fn declared_defaults_replace_not_null() {
    let sql = create_table_sql::<WithDefault>(&FakeDialect).expect("renders");
    assert!(sql.contains("\"active\" BOOLEAN DEFAULT TRUE"));
    assert!(!sql.contains("\"active\" BOOLEAN DEFAULT TRUE NOT NULL"));
}
