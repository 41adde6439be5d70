//! Database abstraction layer.
//!
//! This module provides the driver boundary the query engine talks to:
//! - Driver and client traits
//! - sqlx-backed connection pools
//! - Statement phrasing per database
//! - Argument binding and row decoding
//! - Database dispatch macros for reducing code duplication

pub mod dialect;
pub mod driver;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod types;

pub use dialect::{Phraser, SqlPhraser, SqlWriter};
pub use driver::{Client, Connection, Driver};
pub use macros::DatabaseType;
pub use pool::{DbPool, SqlxDriver};
