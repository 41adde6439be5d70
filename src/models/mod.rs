//! Data models shared by the query engine, drivers and migrations.
//!
//! This module re-exports all model types used throughout the crate.

pub mod schema;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use schema::{AlterOperation, ColumnDefinition, ColumnType, IndexDefinition, TableDefinition};
pub use statement::{QueryOutput, Statement};
pub use value::SqlValue;
