//! Idempotent DDL generation from entity descriptors: guarded CREATE TABLE
//! with key and foreign-key clauses, and guarded CREATE INDEX statements.

use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::entity::{Entity, EntityDescriptor, RelationshipEdge, descriptor_for};
use crate::error::{Result, SchemaError};
use crate::value::ValueType;

/// Guarded CREATE TABLE for `T`.
pub fn create_table_sql<T: Entity>(dialect: &dyn Dialect) -> Result<String> {
    let descriptor = descriptor_for::<T>()?;
    table_statement(&descriptor, dialect)
}

/// Guarded CREATE INDEX statements for `T`, per-column indexes grouped by
/// name first, then entity-level composite indexes.
pub fn create_index_sql<T: Entity>(dialect: &dyn Dialect) -> Result<Vec<String>> {
    let descriptor = descriptor_for::<T>()?;
    index_statements(&descriptor, dialect)
}

/// Full idempotent DDL for `T`: the table, then its indexes.
pub fn schema_statements<T: Entity>(dialect: &dyn Dialect) -> Result<Vec<String>> {
    let descriptor = descriptor_for::<T>()?;
    let mut statements = vec![table_statement(&descriptor, dialect)?];
    statements.extend(index_statements(&descriptor, dialect)?);
    Ok(statements)
}

pub fn table_statement(descriptor: &EntityDescriptor, dialect: &dyn Dialect) -> Result<String> {
    if descriptor.columns.is_empty() {
        return Err(SchemaError::NoColumns {
            table: descriptor.table.clone(),
        }
        .into());
    }

    let mut definitions = Vec::with_capacity(descriptor.columns.len() + 2);
    for column in &descriptor.columns {
        let mut line = format!(
            "{} {}",
            dialect.quote_ident(&column.name),
            column_type(column, dialect)
        );
        if column.flags.auto_increment {
            line.push(' ');
            line.push_str(dialect.auto_increment_clause());
        }
        match &column.default_literal {
            Some(default) => {
                line.push_str(" DEFAULT ");
                line.push_str(default);
            }
            None => {
                if !column.flags.nullable {
                    line.push_str(" NOT NULL");
                }
            }
        }
        definitions.push(line);
    }

    definitions.push(format!(
        "PRIMARY KEY ({})",
        dialect.quote_ident(&descriptor.primary_key().name)
    ));

    for navigation in &descriptor.navigations {
        let RelationshipEdge::ToOne {
            owner_fk,
            target_column,
        } = &navigation.edge
        else {
            continue;
        };
        let target = navigation.target().map_err(|_| SchemaError::UnknownReference {
            table: descriptor.table.clone(),
            reference: navigation.name.clone(),
        })?;
        let referenced = target_column
            .clone()
            .unwrap_or_else(|| target.primary_key().name.clone());
        definitions.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            dialect.quote_ident(owner_fk),
            dialect.quote_ident(&target.table),
            dialect.quote_ident(&referenced),
        ));
    }

    let create = format!(
        "CREATE TABLE {} ({})",
        dialect.quote_ident(&descriptor.table),
        definitions.join(", ")
    );
    Ok(dialect.guard_create_table(&descriptor.table, &create))
}

pub fn index_statements(
    descriptor: &EntityDescriptor,
    dialect: &dyn Dialect,
) -> Result<Vec<String>> {
    // Per-column annotations grouped by index name, columns ordered by
    // their declared position within the index.
    let mut grouped: IndexMap<String, (bool, Vec<(u32, String)>)> = IndexMap::new();
    for column in &descriptor.columns {
        let Some(spec) = &column.index else { continue };
        let entry = grouped.entry(spec.name.clone()).or_insert((false, Vec::new()));
        entry.0 |= spec.unique;
        entry.1.push((spec.order, column.name.clone()));
    }

    let mut statements = Vec::new();
    for (name, (unique, mut columns)) in grouped {
        columns.sort_by_key(|(order, _)| *order);
        let column_names: Vec<String> = columns.into_iter().map(|(_, name)| name).collect();
        statements.push(index_statement(
            descriptor, dialect, &name, &column_names, unique,
        )?);
    }

    for composite in &descriptor.composite_indexes {
        for column in &composite.columns {
            if descriptor.column(column).is_none() {
                return Err(SchemaError::UnknownIndexColumn {
                    table: descriptor.table.clone(),
                    index: composite.name.clone(),
                    column: column.clone(),
                }
                .into());
            }
        }
        statements.push(index_statement(
            descriptor,
            dialect,
            &composite.name,
            &composite.columns,
            composite.unique,
        )?);
    }

    Ok(statements)
}

fn index_statement(
    descriptor: &EntityDescriptor,
    dialect: &dyn Dialect,
    name: &str,
    columns: &[String],
    unique: bool,
) -> Result<String> {
    let quoted = columns
        .iter()
        .map(|column| dialect.quote_ident(column))
        .collect::<Vec<_>>();
    let create = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        dialect.quote_ident(name),
        dialect.quote_ident(&descriptor.table),
        quoted.join(", ")
    );
    Ok(dialect.guard_create_index(&descriptor.table, name, &create))
}

fn column_type(column: &crate::entity::ColumnDescriptor, dialect: &dyn Dialect) -> String {
    if let Some(explicit) = &column.sql_type {
        return explicit.clone();
    }
    // A string-preferred enum persists as its name.
    if column.value_type == ValueType::Enum && column.flags.string_preferred {
        return dialect.column_type(ValueType::String);
    }
    dialect.column_type(column.value_type)
}
