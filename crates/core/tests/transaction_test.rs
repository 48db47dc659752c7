use std::sync::Arc;

use quarry_core::{Error, Executor, Pool, PoolConfig, Transaction, UsageError, insert};
use tokio_util::sync::CancellationToken;

#[path = "support/entities.rs"]
mod entities;
#[path = "support/fake_dialect.rs"]
mod fake_dialect;
#[path = "support/fake_driver.rs"]
mod fake_driver;

use entities::Person;
use fake_dialect::FakeDialect;
use fake_driver::{FactoryHandle, FakeFactory, SharedLog};

fn pool() -> (Pool, SharedLog) {
    let factory = Arc::new(FakeFactory::default());
    let log = factory.log.clone();
    let pool = Pool::new(
        Arc::new(FakeDialect),
        Box::new(FactoryHandle(factory)),
        PoolConfig::default(),
    );
    (pool, log)
}

fn person() -> Person {
    Person {
        id: 1,
        first: "Ann".to_string(),
        last: "Lee".to_string(),
        age: 34,
        dept: "IT".to_string(),
        salary: 70000.0,
    }
}

#[tokio::test]
async fn begin_execute_commit_runs_in_issue_order() {
    let (pool, log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
    insert(&mut tx, &person(), &cancel).await.expect("insert");
    tx.commit(&cancel).await.expect("commit");

    let entries = log.entries();
    assert_eq!(entries[0], "BEGIN TRANSACTION");
    assert!(entries[1].starts_with("INSERT INTO \"people\""));
    assert_eq!(entries[2], "COMMIT");

    // The pinned connection went back to the pool on terminal completion.
    assert_eq!(pool.status().idle, 1);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn terminal_calls_are_exclusive() {
    let (pool, _log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
    tx.commit(&cancel).await.expect("commit");

    let error = tx.rollback(&cancel).await.expect_err("must fail");
    assert!(matches!(
        error,
        Error::Usage(UsageError::TransactionCompleted)
    ));

    let error = tx
        .execute("SELECT 1", &[], &cancel)
        .await
        .expect_err("must fail");
    assert!(matches!(
        error,
        Error::Usage(UsageError::TransactionCompleted)
    ));
}

#[tokio::test]
async fn savepoints_form_a_lifo_stack() {
    let (pool, log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
    tx.create_savepoint("sp1", &cancel).await.expect("sp1");
    tx.create_savepoint("sp2", &cancel).await.expect("sp2");
    assert_eq!(tx.savepoints(), ["sp1", "sp2"]);

    tx.rollback_to_savepoint("sp1", &cancel)
        .await
        .expect("rollback to sp1");
    assert_eq!(tx.savepoints(), ["sp1"]);

    tx.release_savepoint("sp1", &cancel).await.expect("release");
    assert!(tx.savepoints().is_empty());
    tx.rollback(&cancel).await.expect("rollback");

    assert_eq!(
        log.entries(),
        vec![
            "BEGIN TRANSACTION".to_string(),
            "SAVEPOINT sp1".to_string(),
            "SAVEPOINT sp2".to_string(),
            "ROLLBACK TO SAVEPOINT sp1".to_string(),
            "RELEASE SAVEPOINT sp1".to_string(),
            "ROLLBACK".to_string(),
        ]
    );
}

#[tokio::test]
async fn duplicate_savepoint_names_are_rejected() {
    let (pool, _log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
    tx.create_savepoint("sp1", &cancel).await.expect("sp1");
    let error = tx
        .create_savepoint("sp1", &cancel)
        .await
        .expect_err("must fail");
    assert!(matches!(
        error,
        Error::Usage(UsageError::DuplicateSavepoint { name }) if name == "sp1"
    ));
    tx.rollback(&cancel).await.expect("rollback");
}

#[tokio::test]
async fn unknown_savepoint_is_rejected() {
    let (pool, _log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
    let error = tx
        .rollback_to_savepoint("missing", &cancel)
        .await
        .expect_err("must fail");
    assert!(matches!(
        error,
        Error::Usage(UsageError::UnknownSavepoint { .. })
    ));
    tx.rollback(&cancel).await.expect("rollback");
}

#[tokio::test]
async fn savepoint_rollback_keeps_earlier_writes() {
    let (pool, log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
    insert(&mut tx, &person(), &cancel).await.expect("insert a");
    tx.create_savepoint("sp1", &cancel).await.expect("sp1");
    insert(&mut tx, &person(), &cancel).await.expect("insert b");
    tx.rollback_to_savepoint("sp1", &cancel)
        .await
        .expect("rollback to sp1");
    tx.commit(&cancel).await.expect("commit");

    let entries = log.entries();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0], "BEGIN TRANSACTION");
    assert!(entries[1].starts_with("INSERT INTO"));
    assert_eq!(entries[2], "SAVEPOINT sp1");
    assert!(entries[3].starts_with("INSERT INTO"));
    assert_eq!(entries[4], "ROLLBACK TO SAVEPOINT sp1");
    assert_eq!(entries[5], "COMMIT");
}

#[tokio::test]
async fn dropping_an_open_transaction_rolls_back() {
    let (pool, log) = pool();
    let cancel = CancellationToken::new();

    {
        let mut tx = Transaction::begin(&pool, None, &cancel).await.expect("begin");
        insert(&mut tx, &person(), &cancel).await.expect("insert");
    }

    for _ in 0..32 {
        tokio::task::yield_now().await;
    }

    let entries = log.entries();
    assert_eq!(entries.last().map(String::as_str), Some("ROLLBACK"));
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn isolation_level_prefixes_the_begin_statement() {
    let (pool, log) = pool();
    let cancel = CancellationToken::new();

    let mut tx = Transaction::begin(
        &pool,
        Some(quarry_core::IsolationLevel::Serializable),
        &cancel,
    )
    .await
    .expect("begin");
    tx.rollback(&cancel).await.expect("rollback");

    assert_eq!(
        log.entries()[0],
        "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
    );
    assert_eq!(log.entries()[1], "BEGIN TRANSACTION");
}
