//! The table recording which migrations have run, and in which batch.

use crate::error::DbResult;
use crate::models::SqlValue;
use crate::query::{Direction, Query, Root, Schema, SchemaMode};
use serde::{Deserialize, Serialize};

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub name: String,
    pub batch: i64,
}

impl MigrationRecord {
    pub fn new(name: impl Into<String>, batch: i64) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }
}

pub(crate) struct Ledger {
    table: String,
}

impl Ledger {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Create the table unless it already exists.
    pub(crate) async fn ensure(&self, root: &Query<Root>) -> DbResult<()> {
        Schema::new(root.clone(), SchemaMode::Plain)
            .create_table(&self.table)
            .if_not_exists()
            .increments("id")
            .string("name", 255)
            .integer("batch")
            .execute()
            .await?;
        Ok(())
    }

    /// Every record, in the order it was inserted.
    pub(crate) async fn list(&self, root: &Query<Root>) -> DbResult<Vec<MigrationRecord>> {
        root.select(&self.table)
            .columns(["name", "batch"])
            .order_by("id", Direction::Asc)
            .execute_as()
            .await
    }

    /// Insert all records with one statement; nothing is sent for an empty list.
    pub(crate) async fn insert(&self, root: &Query<Root>, records: &[MigrationRecord]) -> DbResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        root.insert_into(&self.table)
            .rows(records.iter().map(|r| {
                [
                    ("name", SqlValue::from(r.name.as_str())),
                    ("batch", SqlValue::Int(r.batch)),
                ]
            }))
            .execute()
            .await?;
        Ok(())
    }

    pub(crate) async fn delete_batch(&self, root: &Query<Root>, batch: i64) -> DbResult<()> {
        root.delete_from(&self.table)
            .where_eq("batch", batch)
            .execute()
            .await?;
        Ok(())
    }
}
