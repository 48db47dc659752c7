use std::sync::Arc;

use futures_util::TryStreamExt;
use quarry_core::{Pool, PoolConfig, Query, SortDirection, Value, col, insert, lit};
use tokio_util::sync::CancellationToken;

#[path = "support/entities.rs"]
mod entities;
#[path = "support/fake_dialect.rs"]
mod fake_dialect;
#[path = "support/fake_driver.rs"]
mod fake_driver;

use entities::Person;
use fake_dialect::FakeDialect;
use fake_driver::{FactoryHandle, FakeFactory, row};

fn pool() -> (Pool, Arc<FakeFactory>) {
    let factory = Arc::new(FakeFactory::default());
    let pool = Pool::new(
        Arc::new(FakeDialect),
        Box::new(FactoryHandle(Arc::clone(&factory))),
        PoolConfig::default(),
    );
    (pool, factory)
}

fn person_row(id: i32, first: &str) -> quarry_core::Row {
    row(&[
        ("id", Value::Int32(id)),
        ("first", Value::String(first.to_string())),
        ("last", Value::String("Lee".to_string())),
        ("age", Value::Int32(30)),
        ("dept", Value::String("IT".to_string())),
        ("salary", Value::Float64(50000.0)),
    ])
}

#[tokio::test]
async fn fetch_all_runs_the_rendered_sql_and_materialises() {
    let (mut pool, factory) = pool();
    factory
        .responses
        .enqueue(vec![person_row(1, "Ann"), person_row(2, "Bob")]);
    let cancel = CancellationToken::new();

    let people = Query::<Person>::new()
        .filter(col("dept").eq(lit("IT")))
        .order_by("salary", SortDirection::Desc)
        .fetch_all(&mut pool, &cancel)
        .await
        .expect("fetches");

    assert_eq!(people.len(), 2);
    assert_eq!(people[0].first, "Ann");
    assert_eq!(
        factory.log.entries(),
        vec![
            "SELECT * FROM \"people\" WHERE \"dept\" = $1 ORDER BY \"salary\" DESC".to_string()
        ]
    );
}

#[tokio::test]
async fn fetch_optional_and_fetch_one_share_the_same_query() {
    let (mut pool, factory) = pool();
    factory.responses.enqueue(vec![person_row(1, "Ann")]);
    factory.responses.enqueue(vec![]);
    let cancel = CancellationToken::new();

    let query = Query::<Person>::new();
    let found = query
        .fetch_optional(&mut pool, &cancel)
        .await
        .expect("fetches");
    assert!(found.is_some());

    let missing = query
        .fetch_optional(&mut pool, &cancel)
        .await
        .expect("fetches");
    assert!(missing.is_none());

    factory.responses.enqueue(vec![]);
    let error = query.fetch_one(&mut pool, &cancel).await.expect_err("empty");
    assert!(matches!(
        error,
        quarry_core::Error::Materialize(quarry_core::MaterializeError::NoRows)
    ));
}

#[tokio::test]
async fn fetch_stream_yields_entities_lazily() {
    let (mut pool, factory) = pool();
    factory
        .responses
        .enqueue(vec![person_row(1, "Ann"), person_row(2, "Bob")]);
    let cancel = CancellationToken::new();

    let query = Query::<Person>::new();
    let stream = query
        .fetch_stream(&mut pool, &cancel)
        .await
        .expect("streams");
    let people: Vec<Person> = stream.try_collect().await.expect("collects");
    assert_eq!(people.len(), 2);
}

#[tokio::test]
async fn count_reads_the_scalar_result() {
    let (mut pool, factory) = pool();
    factory
        .responses
        .enqueue(vec![row(&[("count", Value::Int64(3))])]);
    let cancel = CancellationToken::new();

    let count = Query::<Person>::new()
        .count(&mut pool, &cancel)
        .await
        .expect("counts");
    assert_eq!(count, 3);
    assert_eq!(
        factory.log.entries(),
        vec!["SELECT COUNT(*) FROM \"people\"".to_string()]
    );
}

#[tokio::test]
async fn insert_routes_through_the_executor() {
    let (mut pool, factory) = pool();
    let cancel = CancellationToken::new();

    let affected = insert(
        &mut pool,
        &Person {
            id: 0,
            first: "Ann".to_string(),
            last: "Lee".to_string(),
            age: 34,
            dept: "IT".to_string(),
            salary: 70000.0,
        },
        &cancel,
    )
    .await
    .expect("inserts");

    assert_eq!(affected, 1);
    let entries = factory.log.entries();
    assert!(entries[0].starts_with("INSERT INTO \"people\""));
}
