//! Execution pipeline.
//!
//! The first call to [`Query::execute`] fixes the instance's outcome: later
//! calls (and every clone of the handle) get the same shared future. Starting
//! is synchronous. The query emits its execute notification, validates and
//! applies its transaction depth change, and renders its statement before
//! `execute` returns. The returned future does the rest: resolve a client,
//! send the statement, post-process the raw result. Inside a tokio runtime
//! that future is also spawned, so a started query completes even when no
//! caller awaits it.

use crate::db::{Client, Driver};
use crate::error::{DbError, DbResult};
use crate::models::{QueryOutput, Statement};
use crate::query::observer::{Observers, QueryEvent};
use crate::query::transaction::{ClientFuture, Reservation, Tail, Transaction};
use crate::query::{
    ErasedQuery, Outcome, Query, QueryInfo, QueryInner, QueryKind, RenderContext, Transform,
};
use futures_util::FutureExt;
use futures_util::future;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a query instance is in its single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Unexecuted,
    Pending,
    Fulfilled,
    Failed,
}

impl ExecutionState {
    /// Whether execution has been started.
    pub fn is_started(self) -> bool {
        self != ExecutionState::Unexecuted
    }
}

impl<K: QueryKind> Query<K> {
    /// Execute this instance once and return its shared outcome.
    pub fn execute(&self) -> Outcome {
        self.inner.execute()
    }

    /// Execute and deserialize the final result.
    pub async fn execute_as<T: DeserializeOwned>(&self) -> DbResult<T> {
        let value = self.execute().await?;
        serde_json::from_value(value).map_err(|e| {
            DbError::invalid_input(format!(
                "Cannot deserialize result of {}: {}",
                self.info(),
                e
            ))
        })
    }

    pub fn state(&self) -> ExecutionState {
        self.inner.state()
    }
}

impl<K: QueryKind> IntoFuture for Query<K> {
    type Output = DbResult<JsonValue>;
    type IntoFuture = Outcome;

    fn into_future(self) -> Self::IntoFuture {
        self.execute()
    }
}

impl<K: QueryKind> IntoFuture for &Query<K> {
    type Output = DbResult<JsonValue>;
    type IntoFuture = Outcome;

    fn into_future(self) -> Self::IntoFuture {
        self.execute()
    }
}

impl<K: QueryKind> ErasedQuery for QueryInner<K> {
    fn info(&self) -> QueryInfo {
        QueryInner::info(self)
    }

    fn state(&self) -> ExecutionState {
        match self.outcome.get() {
            None => ExecutionState::Unexecuted,
            Some(outcome) => match outcome.peek() {
                None => ExecutionState::Pending,
                Some(Ok(_)) => ExecutionState::Fulfilled,
                Some(Err(_)) => ExecutionState::Failed,
            },
        }
    }

    fn execute(&self) -> Outcome {
        self.outcome
            .get_or_init(|| {
                let outcome = self.start();
                // Drive it to completion even if every caller drops the future.
                if outcome.peek().is_none() {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(outcome.clone());
                    }
                }
                outcome
            })
            .clone()
    }
}

/// How the statement gets a client.
enum Binding {
    /// Acquire a client for this statement alone.
    Direct,
    /// Use the transaction's client after the previously started bound query.
    Transaction {
        transaction: Transaction,
        client: ClientFuture,
        previous: Option<Tail>,
        release: bool,
    },
}

/// Everything the asynchronous part needs, detached from the query instance.
struct Plan<K> {
    info: QueryInfo,
    kind: K,
    transforms: Vec<Transform>,
    statement: Statement,
    driver: Arc<dyn Driver>,
    observers: Observers,
    binding: Binding,
}

impl<K: QueryKind> QueryInner<K> {
    fn start(&self) -> Outcome {
        let info = self.info();
        self.context.observers.notify(&QueryEvent::Execute(info));

        let started = match &self.context.transaction {
            Some(tx) => tx.enqueue(self.kind.depth_change(), |reservation| {
                self.plan(reservation.depth, self.bind(tx, reservation))
                    .map(|plan| run(plan).boxed().shared())
            }),
            None if self.kind.depth_change() != 0 => Err(DbError::transaction_not_open(format!(
                "{} is not bound to a transaction",
                info
            ))),
            None => self
                .plan(0, Binding::Direct)
                .map(|plan| run(plan).boxed().shared()),
        };

        started.unwrap_or_else(|e| {
            debug!(query_id = info.id, kind = info.kind, error = %e, "Query rejected before sending");
            self.context.observers.notify(&QueryEvent::Error(info, &e));
            let outcome = future::ready(Err(e)).boxed().shared();
            // Settle it now so the instance reads as failed right away.
            let _ = outcome.clone().now_or_never();
            outcome
        })
    }

    fn bind(&self, tx: &Transaction, reservation: Reservation) -> Binding {
        Binding::Transaction {
            transaction: tx.clone(),
            client: reservation.client,
            previous: reservation.previous,
            release: reservation.release,
        }
    }

    fn plan(&self, depth: i64, binding: Binding) -> DbResult<Plan<K>> {
        let database = &self.context.database;
        let statement = self.kind.render(&RenderContext {
            phraser: database.phraser().as_ref(),
            depth,
        })?;
        Ok(Plan {
            info: self.info(),
            kind: self.kind.clone(),
            transforms: self.transforms.clone(),
            statement,
            driver: database.driver().clone(),
            observers: self.context.observers.clone(),
            binding,
        })
    }
}

async fn send(driver: &dyn Driver, client: DbResult<Client>, statement: &Statement) -> DbResult<QueryOutput> {
    driver.execute(&client?, statement).await
}

async fn run<K: QueryKind>(plan: Plan<K>) -> DbResult<JsonValue> {
    let Plan {
        info,
        kind,
        transforms,
        statement,
        driver,
        observers,
        binding,
    } = plan;

    let raw = match binding {
        Binding::Direct => match driver.acquire().await {
            Ok(client) => {
                debug!(query_id = info.id, kind = info.kind, client_id = client.id(), sql = %statement.text, "Executing statement");
                let raw = driver.execute(&client, &statement).await;
                if let Err(e) = driver.release(client).await {
                    warn!(query_id = info.id, error = %e, "Failed to release client");
                }
                raw
            }
            Err(e) => Err(e),
        },
        Binding::Transaction {
            transaction,
            client,
            previous,
            release,
        } => {
            if let Some(previous) = previous {
                previous.await;
            }
            debug!(query_id = info.id, kind = info.kind, transaction_id = %transaction.id(), sql = %statement.text, "Executing statement");
            let raw = send(driver.as_ref(), client.await, &statement).await;
            // The closing statement releases the client whether or not it succeeded.
            if release {
                transaction.release_client().await;
            }
            raw
        }
    };

    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            let e = e.with_statement(&statement.text, &statement.args, info.to_string());
            observers.notify(&QueryEvent::Error(info, &e));
            return Err(e);
        }
    };
    observers.notify(&QueryEvent::RawResult(info, &raw));

    let processed = kind
        .process_result(raw)
        .and_then(|value| transforms.iter().try_fold(value, |value, t| t.apply(value)));
    match processed {
        Ok(value) => {
            observers.notify(&QueryEvent::Result(info, &value));
            Ok(value)
        }
        Err(e) => {
            observers.notify(&QueryEvent::Error(info, &e));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::query::observer::testing::EventLog;
    use crate::testing::NullDriver;
    use serde_json::json;

    fn database() -> (Database, Arc<NullDriver>) {
        let driver = Arc::new(NullDriver::default());
        (Database::new(driver.clone()), driver)
    }

    #[tokio::test]
    async fn test_execute_is_memoized() {
        let (db, driver) = database();
        let q = db.query().raw("SELECT 1", vec![]);
        assert_eq!(q.state(), ExecutionState::Unexecuted);

        let (a, b, c) = tokio::join!(q.execute(), q.clone().execute(), q.execute());
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(driver.statements(), vec!["SELECT 1"]);
        assert_eq!(q.state(), ExecutionState::Fulfilled);
    }

    #[tokio::test]
    async fn test_execute_enters_pending_synchronously() {
        let (db, _driver) = database();
        let q = db.query().select("t");
        let outcome = q.execute();
        assert_eq!(q.state(), ExecutionState::Pending);
        outcome.await.unwrap();
        assert_eq!(q.state(), ExecutionState::Fulfilled);
    }

    #[tokio::test]
    async fn test_dropped_outcome_still_runs() {
        let (db, driver) = database();
        let q = db.query().raw("SELECT 1", vec![]);
        drop(q.execute());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(driver.statements(), vec!["SELECT 1"]);
        assert_eq!(q.state(), ExecutionState::Fulfilled);
    }

    #[tokio::test]
    async fn test_transforms_run_in_order() {
        let (db, _driver) = database();
        let q = db
            .query()
            .select("t")
            .transform(Transform::new(|_| Ok(json!(["a"]))))
            .transform(Transform::new(|mut v| {
                if let Some(list) = v.as_array_mut() {
                    list.push(json!("b"));
                }
                Ok(v)
            }));
        assert_eq!(q.await.unwrap(), json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_notifications_in_order() {
        let (db, _driver) = database();
        let log = Arc::new(EventLog::default());
        let root = db.query().observe(log.clone());
        root.raw("SELECT 1", vec![]).execute().await.unwrap();
        assert_eq!(
            log.entries(),
            vec![
                "spawned root -> raw",
                "execute raw",
                "raw-result raw",
                "result raw"
            ]
        );
    }

    #[tokio::test]
    async fn test_root_cannot_execute() {
        let (db, driver) = database();
        let err = db.query().execute().await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_commit_without_transaction_is_rejected() {
        let (db, driver) = database();
        let q = db.query().commit();
        let outcome = q.execute();
        assert_eq!(q.state(), ExecutionState::Failed);
        assert_eq!(outcome.await.unwrap_err().code(), "TRANSACTION_NOT_OPEN");
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_execute_as_deserializes() {
        #[derive(serde::Deserialize)]
        struct Affected {
            rows_affected: u64,
        }
        let (db, _driver) = database();
        let affected: Affected = db
            .query()
            .delete_from("t")
            .execute_as()
            .await
            .unwrap();
        assert_eq!(affected.rows_affected, 0);
    }
}
