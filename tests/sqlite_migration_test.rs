//! Integration tests against a real SQLite database file.
//!
//! Tests verify that:
//! - Batches are recorded in the ledger and reverted as a unit
//! - A failing unit leaves neither its schema changes nor ledger rows behind
//! - Nested transaction levels map onto savepoints
//! - SQL file directories migrate and roll back

use db_toolkit::config::DatabaseConfig;
use db_toolkit::migrate::{BodyResult, Migration, MigrationRecord, Migrator, SqlDirectory, StaticSource};
use db_toolkit::Database;
use serde::Deserialize;
use tempfile::TempDir;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    name: String,
}

/// Open a fresh database file inside `dir`.
async fn setup_db(dir: &TempDir) -> Database {
    let db_path = dir.path().join("toolkit.db");
    let conn_url = format!("sqlite:{}", db_path.display());
    let config = DatabaseConfig::parse(&conn_url).unwrap();
    Database::connect(&config).await.unwrap()
}

fn source() -> StaticSource {
    StaticSource::new()
        .with(Migration::change("001_users", |schema| {
            schema
                .create_table("users")
                .increments("id")
                .string("name", 100)
                .unique(["name"]);
            BodyResult::Declarative
        }))
        .with(Migration::up_down(
            "002_seed",
            |_schema, q| {
                q.insert_into("users").values([("name", "ada")]).values([("name", "grace")]);
                BodyResult::Declarative
            },
            |_schema, q| {
                q.delete_from("users").where_in("name", ["ada", "grace"]);
                BodyResult::Declarative
            },
        ))
}

async fn count(db: &Database, table: &str) -> i64 {
    let result = db
        .query()
        .raw(format!("SELECT COUNT(*) AS n FROM {}", table), vec![])
        .execute()
        .await
        .unwrap();
    result["rows"][0]["n"].as_i64().unwrap()
}

#[tokio::test]
async fn test_migrate_status_and_rollback() {
    let dir = TempDir::new().unwrap();
    let db = setup_db(&dir).await;
    let migrator = Migrator::new(db.clone(), source());

    let applied = migrator.migrate().await.unwrap();
    assert_eq!(
        applied,
        vec![
            MigrationRecord::new("001_users", 1),
            MigrationRecord::new("002_seed", 1)
        ]
    );

    let users: Vec<User> = db
        .query()
        .select("users")
        .order_by("name", db_toolkit::query::Direction::Asc)
        .execute_as()
        .await
        .unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].name, "ada");

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied.len(), 2);
    assert!(status.pending.is_empty());

    assert!(migrator.migrate().await.unwrap().is_empty());

    let reverted = migrator.rollback().await.unwrap();
    assert_eq!(
        reverted,
        vec![
            MigrationRecord::new("002_seed", 1),
            MigrationRecord::new("001_users", 1)
        ]
    );
    let err = db.query().select("users").execute().await.unwrap_err();
    assert_eq!(err.code(), "DRIVER_ERROR");
    assert_eq!(count(&db, "migrations").await, 0);

    let status = migrator.status().await.unwrap();
    assert_eq!(status.pending, vec!["001_users", "002_seed"]);
}

#[tokio::test]
async fn test_failing_unit_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let db = setup_db(&dir).await;
    let broken = source().with(Migration::up_only("003_broken", |_schema, q| {
        q.raw("INSERT INTO nowhere VALUES (1)", vec![]);
        BodyResult::Declarative
    }));
    let migrator = Migrator::new(db.clone(), broken);

    let err = migrator.migrate().await.unwrap_err();
    assert_eq!(err.code(), "DRIVER_ERROR");
    assert!(err.to_string().contains("INSERT INTO nowhere"));

    let status = migrator.status().await.unwrap();
    assert!(status.applied.is_empty());
    assert_eq!(status.pending.len(), 3);
    assert!(db.query().select("users").execute().await.is_err());
}

#[tokio::test]
async fn test_nested_levels_use_savepoints() {
    let dir = TempDir::new().unwrap();
    let db = setup_db(&dir).await;
    Migrator::new(db.clone(), source()).migrate().await.unwrap();

    let tx = db.transaction();
    let root = db.query().transacting(&tx);
    root.begin().execute().await.unwrap();
    root.insert_into("users")
        .values([("name", "linus")])
        .execute()
        .await
        .unwrap();
    root.begin().execute().await.unwrap();
    root.insert_into("users")
        .values([("name", "barbara")])
        .execute()
        .await
        .unwrap();
    root.rollback().execute().await.unwrap();
    root.commit().execute().await.unwrap();
    assert!(tx.is_closed());

    let names: Vec<String> = db
        .query()
        .select("users")
        .execute_as::<Vec<User>>()
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert!(names.contains(&"linus".to_string()));
    assert!(!names.contains(&"barbara".to_string()));
}

#[tokio::test]
async fn test_sql_directory_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = setup_db(&dir).await;
    let migrations = dir.path().join("migrations");
    std::fs::create_dir(&migrations).unwrap();
    std::fs::write(
        migrations.join("001_items.up.sql"),
        "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL);\n\
         INSERT INTO items (label) VALUES ('first');",
    )
    .unwrap();
    std::fs::write(migrations.join("001_items.down.sql"), "DROP TABLE items;").unwrap();

    let migrator = Migrator::new(db.clone(), SqlDirectory::new(&migrations));
    let applied = migrator.migrate().await.unwrap();
    assert_eq!(applied, vec![MigrationRecord::new("001_items", 1)]);
    assert_eq!(count(&db, "items").await, 1);

    migrator.rollback().await.unwrap();
    assert!(db.query().select("items").execute().await.is_err());
}

/// Same flow against PostgreSQL when `TEST_POSTGRES_URL` is set.
#[tokio::test]
async fn test_postgres_migrate_and_rollback() {
    let Ok(url) = std::env::var("TEST_POSTGRES_URL") else {
        eprintln!("TEST_POSTGRES_URL not set, skipping");
        return;
    };
    let db = Database::connect(&DatabaseConfig::parse(&url).unwrap())
        .await
        .unwrap();
    let migrator = Migrator::with_config(
        db,
        source(),
        db_toolkit::migrate::MigratorConfig {
            ledger_table: "db_toolkit_test_migrations".to_string(),
        },
    );
    migrator.migrate().await.unwrap();
    let reverted = migrator.rollback().await.unwrap();
    assert_eq!(reverted.len(), 2);
}
