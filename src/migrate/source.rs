//! Where migration units come from.

use crate::error::{DbError, DbResult};
use crate::migrate::{BodyResult, Migration, MigrationBody, StepFn};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// Lists migration units and loads them on demand.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Names of every available unit, in any order.
    async fn names(&self) -> DbResult<Vec<String>>;

    /// Load one unit. Fails with `MIGRATION_NOT_FOUND` for an unknown name.
    async fn load(&self, name: &str) -> DbResult<Migration>;
}

/// Units registered in code.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    migrations: BTreeMap<String, Migration>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, migration: Migration) -> Self {
        self.add(migration);
        self
    }

    pub fn add(&mut self, migration: Migration) {
        self.migrations.insert(migration.name.clone(), migration);
    }
}

impl FromIterator<Migration> for StaticSource {
    fn from_iter<I: IntoIterator<Item = Migration>>(iter: I) -> Self {
        let mut source = Self::new();
        for migration in iter {
            source.add(migration);
        }
        source
    }
}

#[async_trait]
impl MigrationSource for StaticSource {
    async fn names(&self) -> DbResult<Vec<String>> {
        Ok(self.migrations.keys().cloned().collect())
    }

    async fn load(&self, name: &str) -> DbResult<Migration> {
        self.migrations
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::migration_not_found(name))
    }
}

/// Directory of `<name>.up.sql` files, each with an optional `<name>.down.sql`.
///
/// Each file becomes one raw statement. Several statements in one file are
/// sent together, so drivers must accept them in a single call.
#[derive(Debug, Clone)]
pub struct SqlDirectory {
    dir: PathBuf,
}

impl SqlDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, file: &Path) -> DbResult<Option<String>> {
        match tokio::fs::read_to_string(file).await {
            Ok(sql) => Ok(Some(sql)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DbError::internal(format!(
                "Cannot read {}: {}",
                file.display(),
                e
            ))),
        }
    }
}

/// Body that builds a single raw statement from a file's contents.
fn sql_step(sql: String) -> StepFn {
    Arc::new(move |_schema, query| {
        if !sql.trim().is_empty() {
            let _statement = query.raw(sql.clone(), Vec::new());
        }
        BodyResult::Declarative
    })
}

#[async_trait]
impl MigrationSource for SqlDirectory {
    async fn names(&self) -> DbResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            DbError::internal(format!(
                "Cannot read migrations directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DbError::internal(e.to_string()))?
        {
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|f| f.strip_suffix(UP_SUFFIX)) {
                names.push(name.to_string());
            }
        }
        debug!(dir = %self.dir.display(), count = names.len(), "Listed migration files");
        Ok(names)
    }

    async fn load(&self, name: &str) -> DbResult<Migration> {
        let up = self
            .read(&self.dir.join(format!("{}{}", name, UP_SUFFIX)))
            .await?
            .ok_or_else(|| DbError::migration_not_found(name))?;
        let down = self
            .read(&self.dir.join(format!("{}{}", name, DOWN_SUFFIX)))
            .await?;

        Ok(Migration {
            name: name.to_string(),
            body: MigrationBody::UpDown {
                up: sql_step(up),
                down: down.map(sql_step),
            },
        })
    }
}
