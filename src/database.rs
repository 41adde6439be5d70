//! Entry point: a driver plus the phraser matching its dialect.

use crate::config::DatabaseConfig;
use crate::db::{DbPool, Driver, Phraser, SqlPhraser, SqlxDriver};
use crate::error::{DbError, DbResult};
use crate::query::observer::Observers;
use crate::query::{Query, QueryContext, Root, Transaction};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

struct DatabaseInner {
    driver: Arc<dyn Driver>,
    phraser: Arc<dyn Phraser>,
}

/// Shared handle to a driver. Clones refer to the same driver and pool.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let phraser = Arc::new(SqlPhraser::new(driver.database_type()));
        Self::with_phraser(driver, phraser)
    }

    pub fn with_phraser(driver: Arc<dyn Driver>, phraser: Arc<dyn Phraser>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner { driver, phraser }),
        }
    }

    /// Open a sqlx pool for `config` and wrap it.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let pool = DbPool::connect(config).await?;
        Ok(Self::new(Arc::new(SqlxDriver::new(pool))))
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    pub fn phraser(&self) -> &Arc<dyn Phraser> {
        &self.inner.phraser
    }

    /// Root of a new query family, bound to no transaction.
    pub fn query(&self) -> Query<Root> {
        Query::with_context(
            QueryContext {
                database: self.clone(),
                transaction: None,
                observers: Observers::default(),
            },
            Root,
        )
    }

    /// A fresh transaction handle. Nothing is sent until a bound `begin` executes.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(uuid::Uuid::new_v4().to_string(), self.clone())
    }

    /// Run `f` inside a new transaction.
    ///
    /// `f` gets a root query bound to the transaction. The transaction commits
    /// when `f` succeeds and rolls back when it fails; a failed rollback is
    /// reported together with the original error.
    pub async fn run_in_transaction<F, Fut, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(Query<Root>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let root = self.query().transacting(&self.transaction());
        if let Err(e) = root.begin().execute().await {
            // A started BEGIN holds a client whatever the failure; roll back to return it.
            let opened = root.transaction().is_some_and(|tx| tx.depth() > 0);
            return Err(if opened {
                rollback_after(&root, e).await
            } else {
                e
            });
        }

        match f(root.clone()).await {
            Ok(value) => {
                root.commit().execute().await?;
                Ok(value)
            }
            Err(e) => Err(rollback_after(&root, e).await),
        }
    }
}

/// Roll back `root`'s transaction after `original` failed, returning the error to report.
pub(crate) async fn rollback_after(root: &Query<Root>, original: DbError) -> DbError {
    let tx_id = root.transaction().map(|tx| tx.id().to_string());
    match root.rollback().execute().await {
        Ok(_) => {
            info!(transaction_id = ?tx_id, error = %original, "Rolled back after failure");
            original
        }
        Err(rollback) => {
            error!(transaction_id = ?tx_id, error = %original, rollback_error = %rollback, "Rollback failed");
            DbError::rollback_failure(&original, &rollback)
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("database_type", &self.inner.driver.database_type())
            .finish()
    }
}
