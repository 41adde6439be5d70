//! Integration tests for query composition and memoized execution.

mod common;

use common::RecordingDriver;
use db_toolkit::models::SqlValue;
use db_toolkit::query::{Direction, ExecutionState, Op, Transform};
use serde_json::json;

#[tokio::test]
async fn test_shared_base_query_is_not_affected_by_branches() {
    let driver = RecordingDriver::new();
    let db = driver.database();
    let users = db.query().select("users").where_op("age", Op::Ge, 18_i64);

    let by_name = users.order_by("name", Direction::Asc).limit(10);
    let admins = users.where_eq("role", "admin");

    by_name.execute().await.unwrap();
    admins.execute().await.unwrap();
    users.execute().await.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "SELECT * FROM \"users\" WHERE \"age\" >= ? ORDER BY \"name\" ASC LIMIT 10",
            "SELECT * FROM \"users\" WHERE \"age\" >= ? AND \"role\" = ?",
            "SELECT * FROM \"users\" WHERE \"age\" >= ?",
        ]
    );
}

#[tokio::test]
async fn test_concurrent_execute_sends_one_statement() {
    let driver = RecordingDriver::new();
    let q = driver.database().query().raw("UPDATE t SET x = 1", vec![]);

    let (a, b, c) = tokio::join!(q.execute(), q.execute(), q.clone().execute());
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(driver.statements().len(), 1);
    assert_eq!(driver.acquired(), 1);
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_duplicate_executes_again() {
    let driver = RecordingDriver::new();
    let q = driver.database().query().delete_from("t").where_eq("id", 1_i64);
    q.execute().await.unwrap();
    let again = q.duplicate();
    assert_eq!(again.state(), ExecutionState::Unexecuted);
    again.execute().await.unwrap();
    assert_eq!(driver.statements().len(), 2);
}

#[tokio::test]
async fn test_select_rows_and_transforms() {
    let driver = RecordingDriver::new();
    driver.respond(
        "FROM \"users\"",
        vec![json!({"id": 1, "name": "ada"}), json!({"id": 2, "name": "bob"})],
    );
    let names = Transform::new(|rows| {
        Ok(json!(
            rows.as_array()
                .map(|rows| rows.iter().map(|r| r["name"].clone()).collect::<Vec<_>>())
                .unwrap_or_default()
        ))
    });
    let count = Transform::new(|names| Ok(json!(names.as_array().map_or(0, |n| n.len()))));

    let q = driver.database().query().select("users").transform(names.clone());
    assert_eq!(q.execute().await.unwrap(), json!(["ada", "bob"]));

    let counted = q.transform(count.clone());
    assert_eq!(counted.execute().await.unwrap(), json!(2));

    let only_count = counted.untransform(&names);
    assert_eq!(only_count.transforms(), &[count]);
}

#[tokio::test]
async fn test_driver_error_carries_statement_context() {
    let driver = RecordingDriver::new();
    driver.fail_on("INSERT");
    let q = driver
        .database()
        .query()
        .insert_into("users")
        .values([("name", SqlValue::from("ada")), ("age", SqlValue::Int(36))]);

    let err = q.execute().await.unwrap_err();
    assert_eq!(err.code(), "DRIVER_ERROR");
    let message = err.to_string();
    assert!(message.contains("INSERT INTO \"users\" (\"name\", \"age\") VALUES (?, ?)"));
    assert!(message.contains("insert#"));
    assert_eq!(q.state(), ExecutionState::Failed);
    assert_eq!(driver.released(), 1);
}

#[tokio::test]
async fn test_insert_rows_align_columns() {
    let driver = RecordingDriver::new();
    let q = driver
        .database()
        .query()
        .insert_into("t")
        .values([("a", 1_i64), ("b", 2_i64)])
        .values([("b", 4_i64), ("a", 3_i64)]);
    assert_eq!(
        q.kind().rows,
        vec![
            vec![SqlValue::Int(1), SqlValue::Int(2)],
            vec![SqlValue::Int(3), SqlValue::Int(4)],
        ]
    );
    let result = q.execute().await.unwrap();
    assert_eq!(result["rows_affected"], json!(1));

    let bulk = driver
        .database()
        .query()
        .insert_into("t")
        .rows([[("a", 5_i64)], [("a", 6_i64)]]);
    assert_eq!(bulk.kind().rows.len(), 2);
    bulk.execute().await.unwrap();
    assert_eq!(
        driver.statements().last().map(String::as_str),
        Some("INSERT INTO \"t\" (\"a\") VALUES (?), (?)")
    );
}

#[tokio::test]
async fn test_update_and_raw_arguments() {
    let driver = RecordingDriver::new();
    let db = driver.database();
    db.query()
        .update("users")
        .set("name", "ada")
        .where_in("id", [1_i64, 2, 3])
        .where_not_null("email")
        .execute()
        .await
        .unwrap();
    db.query()
        .select("users")
        .where_raw("lower(name) = ?", vec![SqlValue::from("ada")])
        .execute()
        .await
        .unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "UPDATE \"users\" SET \"name\" = ? WHERE \"id\" IN (?, ?, ?) AND \"email\" IS NOT NULL",
            "SELECT * FROM \"users\" WHERE (lower(name) = ?)",
        ]
    );
}

#[tokio::test]
async fn test_raw_argument_mismatch_is_rejected_before_sending() {
    let driver = RecordingDriver::new();
    let db = driver.database();

    let extra = db
        .query()
        .raw("DELETE FROM users WHERE id = ?", vec![SqlValue::Int(1), SqlValue::Int(2)]);
    assert_eq!(extra.execute().await.unwrap_err().code(), "INVALID_INPUT");
    assert_eq!(extra.state(), ExecutionState::Failed);

    let missing = db
        .query()
        .select("users")
        .where_raw("id = ? OR id = ?", vec![SqlValue::Int(1)]);
    assert_eq!(missing.execute().await.unwrap_err().code(), "INVALID_INPUT");

    assert!(driver.statements().is_empty());
    assert_eq!(driver.acquired(), 0);
}
