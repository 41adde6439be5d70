//! Versioned schema migrations.
//!
//! A [`Migrator`] lists units from a [`MigrationSource`], compares them with
//! the ledger table and applies the pending ones as one batch, or reverts the
//! latest batch. See [`Migration`] for the two body styles.

pub(crate) mod capture;
mod ledger;
pub mod migration;
pub mod runner;
pub mod source;

pub use ledger::MigrationRecord;
pub use migration::{BodyResult, ChangeFn, Migration, MigrationBody, StepFn};
pub use runner::{DEFAULT_LEDGER_TABLE, MigrationStatus, Migrator, MigratorConfig};
pub use source::{MigrationSource, SqlDirectory, StaticSource};
