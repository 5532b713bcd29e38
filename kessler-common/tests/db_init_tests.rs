//! Integration tests for database initialization
//!
//! Covers:
//! - Automatic creation of a missing database file and parent directories
//! - Re-opening an existing database without error
//! - Schema version bookkeeping
//! - Table constraints on the envelopes table

use kessler_common::db::init::{init_database, CURRENT_SCHEMA_VERSION};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("registry.db");

    let result = init_database(&db_path, 1000).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("registry.db");

    let pool1 = init_database(&db_path, 1000).await;
    assert!(pool1.is_ok());
    drop(pool1);

    let pool2 = init_database(&db_path, 1000).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_schema_version_recorded_once() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("registry.db");

    let _ = init_database(&db_path, 1000).await.unwrap();
    let pool = init_database(&db_path, 1000).await.unwrap();

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(versions, vec![CURRENT_SCHEMA_VERSION]);
}

#[tokio::test]
async fn test_identifier_must_be_unique_and_non_empty() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("registry.db"), 1000)
        .await
        .unwrap();

    let insert = "INSERT INTO envelopes (identifier, document, created_at, updated_at) \
                  VALUES (?, '{}', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)";

    sqlx::query(insert).bind("X1").execute(&pool).await.unwrap();

    let duplicate = sqlx::query(insert).bind("X1").execute(&pool).await;
    assert!(duplicate.is_err(), "Duplicate identifier should be rejected");

    let empty = sqlx::query(insert).bind("").execute(&pool).await;
    assert!(empty.is_err(), "Empty identifier should be rejected");
}
