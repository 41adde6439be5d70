//! Migration units and their bodies.
//!
//! A body either only builds queries and returns [`BodyResult::Declarative`],
//! leaving the runner to execute what it built in order, or returns
//! [`BodyResult::Imperative`] with a future that does its own executing.

use crate::error::DbResult;
use crate::query::{Query, Root, Schema};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// What a migration body hands back to the runner.
pub enum BodyResult {
    /// The body only built queries; the runner executes the final ones in order.
    Declarative,
    /// The body's future executes its own queries.
    Imperative(BoxFuture<'static, DbResult<()>>),
}

impl BodyResult {
    pub fn imperative<F>(future: F) -> Self
    where
        F: Future<Output = DbResult<()>> + Send + 'static,
    {
        Self::Imperative(Box::pin(future))
    }
}

impl std::fmt::Debug for BodyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declarative => f.write_str("Declarative"),
            Self::Imperative(_) => f.write_str("Imperative"),
        }
    }
}

/// Reversible body: gets a schema façade only.
pub type ChangeFn = Arc<dyn Fn(Schema) -> BodyResult + Send + Sync>;

/// One direction of an up/down pair: gets a schema façade and a root query
/// bound to the migration's transaction.
pub type StepFn = Arc<dyn Fn(Schema, Query<Root>) -> BodyResult + Send + Sync>;

#[derive(Clone)]
pub enum MigrationBody {
    Change(ChangeFn),
    UpDown { up: StepFn, down: Option<StepFn> },
}

/// A named migration unit.
#[derive(Clone)]
pub struct Migration {
    pub name: String,
    pub body: MigrationBody,
}

impl Migration {
    /// A declarative body the runner can also run in reverse.
    pub fn change<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Schema) -> BodyResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: MigrationBody::Change(Arc::new(body)),
        }
    }

    pub fn up_down<U, D>(name: impl Into<String>, up: U, down: D) -> Self
    where
        U: Fn(Schema, Query<Root>) -> BodyResult + Send + Sync + 'static,
        D: Fn(Schema, Query<Root>) -> BodyResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: MigrationBody::UpDown {
                up: Arc::new(up),
                down: Some(Arc::new(down)),
            },
        }
    }

    /// An up body with nothing to run on rollback.
    pub fn up_only<U>(name: impl Into<String>, up: U) -> Self
    where
        U: Fn(Schema, Query<Root>) -> BodyResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: MigrationBody::UpDown {
                up: Arc::new(up),
                down: None,
            },
        }
    }

    pub fn is_reversible(&self) -> bool {
        match &self.body {
            MigrationBody::Change(_) => true,
            MigrationBody::UpDown { down, .. } => down.is_some(),
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            MigrationBody::Change(_) => "change",
            MigrationBody::UpDown { down: Some(_), .. } => "up/down",
            MigrationBody::UpDown { down: None, .. } => "up",
        };
        f.debug_struct("Migration")
            .field("name", &self.name)
            .field("body", &body)
            .finish()
    }
}
