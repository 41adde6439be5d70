//! db-toolkit
//!
//! An immutable, chainable query builder over sqlx pools (SQLite, PostgreSQL,
//! MySQL) with nested transactions and a batch-based migration runner.

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use database::Database;
pub use error::{DbError, DbResult};
pub use migrate::{Migration, Migrator};
pub use query::{Query, Schema, Transaction};
