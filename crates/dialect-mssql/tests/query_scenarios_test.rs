use std::sync::Arc;

use quarry_core::{
    Query, Row, SortDirection, UpdateSet, Value, avg_of, col, count_all, descriptor_for, lit,
    materialize_graph, plan_includes,
};
use quarry_dialect_mssql::MssqlDialect;

#[path = "support/entities.rs"]
mod entities;

use entities::{Book, Person};

#[test]
fn simple_filter_with_ordering_and_take() {
    let query = Query::<Person>::new()
        .filter(col("dept").eq(lit("IT")).and(col("age").gt(lit(30))))
        .order_by("salary", SortDirection::Desc)
        .take(5)
        .to_sql(&MssqlDialect)
        .expect("query renders");

    assert_eq!(
        query.sql,
        "SELECT * FROM [people] WHERE [dept] = @p0 AND [age] > @p1 \
         ORDER BY [salary] DESC OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"
    );
    assert_eq!(
        query.params,
        vec![Value::String("IT".to_string()), Value::Int32(30)]
    );
}

#[test]
fn string_contains_becomes_concatenated_like() {
    let query = Query::<Person>::new()
        .filter(col("first").contains(lit("an")))
        .to_sql(&MssqlDialect)
        .expect("query renders");

    assert_eq!(
        query.sql,
        "SELECT * FROM [people] WHERE [first] LIKE '%' + @p0 + '%'"
    );
    assert_eq!(query.params, vec![Value::String("an".to_string())]);
}

#[test]
fn like_pattern_metacharacters_are_escaped() {
    let query = Query::<Person>::new()
        .filter(col("first").contains(lit("50%")))
        .to_sql(&MssqlDialect)
        .expect("query renders");
    assert_eq!(query.params, vec![Value::String("50[%]".to_string())]);
}

#[test]
fn collection_contains_becomes_an_in_list() {
    let ages = vec![25, 30, 35];
    let query = Query::<Person>::new()
        .filter(col("age").in_values(ages))
        .to_sql(&MssqlDialect)
        .expect("query renders");

    assert_eq!(
        query.sql,
        "SELECT * FROM [people] WHERE [age] IN (@p0,@p1,@p2)"
    );
    assert_eq!(
        query.params,
        vec![Value::Int32(25), Value::Int32(30), Value::Int32(35)]
    );
}

#[test]
fn include_chain_joins_and_aliases_each_hop() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let plan = plan_includes(base, &["Author.Company".to_string()], &MssqlDialect, 5)
        .expect("plan builds");

    assert_eq!(
        plan.join_clauses,
        "LEFT JOIN [authors] t1 ON t0.[author_id] = t1.[id] \
         LEFT JOIN [companies] t2 ON t1.[company_id] = t2.[id]"
    );
    assert!(plan.select_list.starts_with("t0.*, t1.[id] AS [t1_id]"));
    assert!(plan.select_list.contains("t2.[id] AS [t2_id]"));
}

#[test]
fn included_graph_materialises_author_and_company() {
    let base = descriptor_for::<Book>().expect("descriptor builds");
    let plan = plan_includes(base, &["Author.Company".to_string()], &MssqlDialect, 5)
        .expect("plan builds");

    let columns: Arc<[String]> = [
        "id",
        "title",
        "author_id",
        "t1_id",
        "t1_name",
        "t1_company_id",
        "t2_id",
        "t2_name",
    ]
    .iter()
    .map(ToString::to_string)
    .collect();
    let rows = vec![Row::new(
        columns,
        vec![
            Value::Int32(1),
            Value::String("Dune".to_string()),
            Value::Int32(10),
            Value::Int32(10),
            Value::String("Frank".to_string()),
            Value::Int32(100),
            Value::Int32(100),
            Value::String("Chilton".to_string()),
        ],
    )];

    let books: Vec<Book> = materialize_graph(&rows, &plan).expect("materializes");
    let author = books[0].author.as_ref().expect("author attached");
    assert_eq!(author.name, "Frank");
    assert_eq!(
        author.company.as_ref().expect("company attached").name,
        "Chilton"
    );
}

#[test]
fn group_by_with_having_over_aggregates() {
    let query = Query::<Person>::new()
        .group_by("dept")
        .having(
            count_all()
                .gt(lit(2))
                .and(avg_of(col("salary")).gt(lit(60000.0))),
        )
        .expect("having is valid with group keys")
        .to_sql(&MssqlDialect)
        .expect("query renders");

    assert_eq!(
        query.sql,
        "SELECT [dept] FROM [people] GROUP BY [dept] \
         HAVING COUNT(*) > @p0 AND AVG([salary]) > @p1"
    );
    assert_eq!(query.params, vec![Value::Int32(2), Value::Float64(60000.0)]);
}

#[test]
fn update_many_renders_a_set_clause_over_shared_where() {
    let set = UpdateSet::new().set("salary", col("salary").add(lit(1000.0)));
    let query = Query::<Person>::new()
        .filter(col("dept").eq(lit("IT")))
        .update_sql(&MssqlDialect, &set)
        .expect("query renders");

    assert_eq!(
        query.sql,
        "UPDATE [people] SET [salary] = [salary] + @p0 WHERE [dept] = @p1"
    );
    assert_eq!(
        query.params,
        vec![Value::Float64(1000.0), Value::String("IT".to_string())]
    );
}

#[test]
fn delete_renders_over_shared_where() {
    let query = Query::<Person>::new()
        .filter(col("age").gt(lit(90)))
        .delete_sql(&MssqlDialect)
        .expect("query renders");
    assert_eq!(query.sql, "DELETE FROM [people] WHERE [age] > @p0");
}

#[test]
fn string_concat_uses_plus() {
    let query = Query::<Person>::new()
        .filter(col("first").add(col("last")).eq(lit("AnnLee")))
        .to_sql(&MssqlDialect)
        .expect("query renders");
    assert_eq!(
        query.sql,
        "SELECT * FROM [people] WHERE [first] + [last] = @p0"
    );
}

#[test]
fn schema_statements_are_idempotent_t_sql() {
    let table = quarry_core::create_table_sql::<Person>(&MssqlDialect).expect("renders");
    assert!(table.starts_with("IF OBJECT_ID(N'people', N'U') IS NULL BEGIN CREATE TABLE [people]"));
    assert!(table.contains("[id] INT IDENTITY(1,1) NOT NULL"));
    assert!(table.contains("PRIMARY KEY ([id])"));
    assert!(table.ends_with("END"));
}
