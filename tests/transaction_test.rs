//! Integration tests for transaction handles and nested levels.

mod common;

use common::RecordingDriver;
use db_toolkit::DbError;
use db_toolkit::query::ExecutionState;
use std::time::Duration;

#[tokio::test]
async fn test_nested_levels_share_one_client() {
    let driver = RecordingDriver::new();
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    root.begin().execute().await.unwrap();
    root.begin().execute().await.unwrap();
    assert_eq!(tx.depth(), 2);
    root.raw("INSERT INTO t VALUES (1)", vec![]).execute().await.unwrap();
    root.commit().execute().await.unwrap();
    assert_eq!(tx.depth(), 1);
    assert!(!tx.is_closed());
    root.commit().execute().await.unwrap();
    assert!(tx.is_closed());

    assert_eq!(
        driver.statements(),
        vec![
            "BEGIN",
            "SAVEPOINT \"sp_2\"",
            "INSERT INTO t VALUES (1)",
            "RELEASE SAVEPOINT \"sp_2\"",
            "COMMIT",
        ]
    );
    let clients: Vec<u64> = driver.log().iter().map(|(client, _)| *client).collect();
    assert!(clients.iter().all(|client| *client == clients[0]));
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_inner_rollback_keeps_outer_level_open() {
    let driver = RecordingDriver::new();
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    root.begin().execute().await.unwrap();
    root.begin().execute().await.unwrap();
    root.rollback().execute().await.unwrap();
    root.raw("SELECT 1", vec![]).execute().await.unwrap();
    root.rollback().execute().await.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "BEGIN",
            "SAVEPOINT \"sp_2\"",
            "ROLLBACK TO SAVEPOINT \"sp_2\"",
            "SELECT 1",
            "ROLLBACK",
        ]
    );
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_queries_on_unopened_transaction_are_rejected() {
    let driver = RecordingDriver::new();
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    let q = root.raw("SELECT 1", vec![]);
    let err = q.execute().await.unwrap_err();
    assert_eq!(err.code(), "TRANSACTION_NOT_OPEN");
    assert_eq!(q.state(), ExecutionState::Failed);

    assert_eq!(
        root.commit().execute().await.unwrap_err().code(),
        "TRANSACTION_NOT_OPEN"
    );
    assert!(driver.statements().is_empty());
    assert_eq!(driver.acquired(), 0);
}

#[tokio::test]
async fn test_closed_transaction_stays_closed() {
    let driver = RecordingDriver::new();
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    root.begin().execute().await.unwrap();
    root.commit().execute().await.unwrap();

    for err in [
        root.begin().execute().await.unwrap_err(),
        root.raw("SELECT 1", vec![]).execute().await.unwrap_err(),
    ] {
        assert_eq!(err.code(), "TRANSACTION_NOT_OPEN");
    }
    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_client_released_when_commit_fails() {
    let driver = RecordingDriver::new();
    driver.fail_on("COMMIT");
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    root.begin().execute().await.unwrap();
    let err = root.commit().execute().await.unwrap_err();
    assert_eq!(err.code(), "DRIVER_ERROR");
    assert!(tx.is_closed());
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_statements_run_in_the_order_they_started() {
    let driver = RecordingDriver::new();
    driver.delay("slow", Duration::from_millis(50));
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    let begin = root.begin().execute();
    let slow = root.raw("UPDATE slow SET x = 1", vec![]).execute();
    let fast = root.raw("UPDATE fast SET x = 1", vec![]).execute();
    let commit = root.commit().execute();

    // Awaiting the last one drives everything started before it.
    commit.await.unwrap();
    fast.await.unwrap();
    slow.await.unwrap();
    begin.await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "UPDATE slow SET x = 1", "UPDATE fast SET x = 1", "COMMIT"]
    );
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_failed_statement_does_not_close_transaction() {
    let driver = RecordingDriver::new();
    driver.fail_on("broken");
    let db = driver.database();
    let tx = db.transaction();
    let root = db.query().transacting(&tx);

    root.begin().execute().await.unwrap();
    assert!(root.raw("SELECT broken", vec![]).execute().await.is_err());
    root.raw("SELECT 1", vec![]).execute().await.unwrap();
    root.rollback().execute().await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "SELECT broken", "SELECT 1", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_run_in_transaction_reports_rollback_failure() {
    let driver = RecordingDriver::new();
    driver.fail_on("missing_table");
    driver.fail_on("ROLLBACK");
    let db = driver.database();

    let err = db
        .run_in_transaction(|root| async move {
            root.raw("INSERT INTO missing_table VALUES (1)", vec![])
                .execute()
                .await
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ROLLBACK_FAILURE");
    let message = err.to_string();
    assert!(message.contains("scripted failure on 'missing_table'"));
    assert!(message.contains("scripted failure on 'ROLLBACK'"));
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_run_in_transaction_releases_client_when_begin_loses_connection() {
    let driver = RecordingDriver::new();
    driver.fail_with("BEGIN", DbError::connection("socket closed", "Reconnect and retry"));
    let db = driver.database();

    let err = db
        .run_in_transaction(|root| async move { root.raw("SELECT 1", vec![]).execute().await })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "CONNECTION_ERROR");
    assert_eq!(driver.statements(), vec!["BEGIN", "ROLLBACK"]);
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.released(), 1);
}
