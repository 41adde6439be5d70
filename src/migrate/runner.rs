//! Applies pending migrations and reverts the latest batch.
//!
//! Each `migrate` or `rollback` call runs in one transaction. Units are
//! loaded from the source only when they are about to run. A failure rolls the
//! whole transaction back, ledger writes included.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::migrate::capture::Capture;
use crate::migrate::ledger::{Ledger, MigrationRecord};
use crate::migrate::{BodyResult, Migration, MigrationBody, MigrationSource};
use crate::query::{Query, Root, Schema, SchemaMode};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_LEDGER_TABLE: &str = "migrations";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Table recording applied migrations.
    pub ledger_table: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

/// Applied and pending migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Up,
    Down,
}

pub struct Migrator<S> {
    database: Database,
    source: S,
    config: MigratorConfig,
}

impl<S: MigrationSource> Migrator<S> {
    pub fn new(database: Database, source: S) -> Self {
        Self::with_config(database, source, MigratorConfig::default())
    }

    pub fn with_config(database: Database, source: S, config: MigratorConfig) -> Self {
        Self {
            database,
            source,
            config,
        }
    }

    fn ledger(&self) -> Ledger {
        Ledger::new(&self.config.ledger_table)
    }

    async fn sorted_names(&self) -> DbResult<Vec<String>> {
        let mut names = self.source.names().await?;
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Apply every pending migration as one new batch.
    ///
    /// Returns the applied units in the order they ran.
    pub async fn migrate(&self) -> DbResult<Vec<MigrationRecord>> {
        let ledger = self.ledger();
        let root = self.database.query();
        ledger.ensure(&root).await?;
        let executed = ledger.list(&root).await?;

        let done: HashSet<&str> = executed.iter().map(|r| r.name.as_str()).collect();
        let batch = executed.iter().map(|r| r.batch).max().unwrap_or(0) + 1;
        let pending: Vec<MigrationRecord> = self
            .sorted_names()
            .await?
            .into_iter()
            .filter(|name| !done.contains(name.as_str()))
            .map(|name| MigrationRecord::new(name, batch))
            .collect();

        info!(pending = pending.len(), batch, "Starting migration");
        let applied = self
            .database
            .run_in_transaction(|root| async move {
                for record in &pending {
                    let migration = self.source.load(&record.name).await?;
                    info!(migration = %record.name, batch, "Applying migration");
                    self.run(&migration, &root, Step::Up).await?;
                }
                ledger.insert(&root, &pending).await?;
                Ok(pending)
            })
            .await?;
        info!(applied = applied.len(), batch, "Migration complete");
        Ok(applied)
    }

    /// Revert the most recent batch, latest unit first.
    ///
    /// Returns the reverted units in the order they ran.
    pub async fn rollback(&self) -> DbResult<Vec<MigrationRecord>> {
        let ledger = self.ledger();
        let root = self.database.query();
        ledger.ensure(&root).await?;
        let executed = ledger.list(&root).await?;

        let Some(batch) = executed.iter().map(|r| r.batch).max() else {
            info!("Nothing to roll back");
            return Ok(Vec::new());
        };
        let mut targets: Vec<MigrationRecord> =
            executed.into_iter().filter(|r| r.batch == batch).collect();
        targets.sort_by(|a, b| b.name.cmp(&a.name));

        let known: HashSet<String> = self.sorted_names().await?.into_iter().collect();
        if let Some(missing) = targets.iter().find(|r| !known.contains(&r.name)) {
            return Err(DbError::migration_not_found(&missing.name));
        }

        info!(batch, count = targets.len(), "Starting rollback");
        let reverted = self
            .database
            .run_in_transaction(|root| async move {
                for record in &targets {
                    let migration = self.source.load(&record.name).await?;
                    info!(migration = %record.name, batch, "Reverting migration");
                    self.run(&migration, &root, Step::Down).await?;
                }
                ledger.delete_batch(&root, batch).await?;
                Ok(targets)
            })
            .await?;
        info!(reverted = reverted.len(), batch, "Rollback complete");
        Ok(reverted)
    }

    /// Applied records and the names still pending.
    pub async fn status(&self) -> DbResult<MigrationStatus> {
        let ledger = self.ledger();
        let root = self.database.query();
        ledger.ensure(&root).await?;
        let applied = ledger.list(&root).await?;
        let done: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        let pending = self
            .sorted_names()
            .await?
            .into_iter()
            .filter(|name| !done.contains(name.as_str()))
            .collect();
        Ok(MigrationStatus { applied, pending })
    }

    async fn run(&self, migration: &Migration, root: &Query<Root>, step: Step) -> DbResult<()> {
        let name = migration.name.as_str();
        match (&migration.body, step) {
            (MigrationBody::Change(body), Step::Up) => {
                run_body(name, root, SchemaMode::Reversible, true, |schema, _| body(schema)).await
            }
            (MigrationBody::Change(body), Step::Down) => {
                run_body(name, root, SchemaMode::Reverse, true, |schema, _| body(schema)).await
            }
            (MigrationBody::UpDown { up, .. }, Step::Up) => {
                run_body(name, root, SchemaMode::Plain, false, |schema, q| up(schema, q)).await
            }
            (MigrationBody::UpDown { down: Some(down), .. }, Step::Down) => {
                run_body(name, root, SchemaMode::Plain, false, |schema, q| down(schema, q)).await
            }
            (MigrationBody::UpDown { down: None, .. }, Step::Down) => {
                warn!(migration = %name, "Migration has no down body; skipping");
                Ok(())
            }
        }
    }
}

/// Run one body against a fresh capture and execute what it built.
///
/// `change` bodies must be declarative. In `Reverse` mode the final queries
/// run last-built first.
async fn run_body<F>(
    name: &str,
    root: &Query<Root>,
    mode: SchemaMode,
    change: bool,
    body: F,
) -> DbResult<()>
where
    F: FnOnce(Schema, Query<Root>) -> BodyResult,
{
    let capture = Arc::new(Capture::new(name));
    let observed = root.observe(capture.clone());
    capture.add_root(observed.erase());

    match body(Schema::new(observed.clone(), mode), observed) {
        BodyResult::Imperative(future) => {
            capture.deactivate();
            if change {
                return Err(DbError::body_must_be_serial(name));
            }
            debug!(migration = %name, "Awaiting imperative body");
            future.await
        }
        BodyResult::Declarative => {
            let leaves = capture.finish(mode == SchemaMode::Reverse)?;
            debug!(migration = %name, queries = leaves.len(), "Executing declarative body");
            for leaf in leaves {
                leaf.execute().await?;
            }
            Ok(())
        }
    }
}
