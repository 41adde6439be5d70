//! Transaction handles.
//!
//! A [`Transaction`] is a shared handle (clones refer to the same transaction)
//! holding the open depth and the client every bound query runs on. The
//! client is acquired lazily by the first bound query that executes and
//! released by the query that brings the depth back to zero. After that the
//! handle is closed for good.
//!
//! Bound queries run one after another in the order they started executing:
//! each one waits for the outcome of the query started before it.

use crate::database::Database;
use crate::db::Client;
use crate::error::{DbError, DbResult};
use crate::query::Outcome;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub(crate) type ClientFuture = Shared<BoxFuture<'static, DbResult<Client>>>;

/// Completion of the most recently started bound query.
pub(crate) type Tail = Shared<BoxFuture<'static, ()>>;

struct TxState {
    depth: i64,
    client: Option<ClientFuture>,
    tail: Option<Tail>,
    closed: bool,
}

struct TxInner {
    id: String,
    database: Database,
    state: Mutex<TxState>,
}

/// What a bound query gets when it starts executing.
pub(crate) struct Reservation {
    pub(crate) client: ClientFuture,
    /// Depth after the query's own change.
    pub(crate) depth: i64,
    /// The query closes the transaction and must release its client.
    pub(crate) release: bool,
    /// Outcome of the previously started query, to be awaited first.
    pub(crate) previous: Option<Tail>,
}

#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

impl Transaction {
    pub(crate) fn new(id: String, database: Database) -> Self {
        Self {
            inner: Arc::new(TxInner {
                id,
                database,
                state: Mutex::new(TxState {
                    depth: 0,
                    client: None,
                    tail: None,
                    closed: false,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Number of open levels.
    pub fn depth(&self) -> i64 {
        self.state().depth
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn same_as(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> MutexGuard<'_, TxState> {
        // Plain fields only; a poisoned lock still holds consistent data.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validate a query's depth change and start it against this transaction.
    ///
    /// `start` builds the query's outcome from the reservation. The depth
    /// change is applied only if `start` succeeds, and the whole step happens
    /// under the handle's lock, so depth changes and statement order follow the
    /// order in which bound queries started.
    pub(crate) fn enqueue<F>(&self, change: i64, start: F) -> DbResult<Outcome>
    where
        F: FnOnce(Reservation) -> DbResult<Outcome>,
    {
        let mut state = self.state();
        if state.closed {
            return Err(DbError::transaction_not_open(format!(
                "Transaction {} has already been committed or rolled back",
                self.inner.id
            )));
        }
        if state.depth <= 0 && change <= 0 {
            return Err(DbError::transaction_not_open(format!(
                "Transaction {} has not begun",
                self.inner.id
            )));
        }

        let depth = state.depth + change;
        let client = state
            .client
            .get_or_insert_with(|| self.acquire_client())
            .clone();
        let outcome = start(Reservation {
            client,
            depth,
            release: depth == 0,
            previous: state.tail.clone(),
        })?;

        let opened = state.depth == 0;
        state.depth = depth;
        state.tail = Some(outcome.clone().map(|_| ()).boxed().shared());
        if depth == 0 {
            state.closed = true;
            info!(transaction_id = %self.inner.id, "Transaction closing");
        } else if opened {
            info!(transaction_id = %self.inner.id, "Transaction opening");
        } else {
            debug!(transaction_id = %self.inner.id, depth, "Transaction depth changed");
        }
        Ok(outcome)
    }

    fn acquire_client(&self) -> ClientFuture {
        let driver = self.inner.database.driver().clone();
        let id = self.inner.id.clone();
        async move {
            let client = driver.acquire().await?;
            debug!(transaction_id = %id, client_id = client.id(), "Transaction acquired client");
            Ok(client)
        }
        .boxed()
        .shared()
    }

    /// Return the client to the driver once the depth is back to zero.
    pub(crate) async fn release_client(&self) {
        let pending = {
            let mut state = self.state();
            if state.depth != 0 {
                return;
            }
            // The closing query is the tail; dropping it breaks the handle's
            // reference to the closing query's own future.
            state.tail = None;
            state.client.take()
        };
        let Some(pending) = pending else {
            return;
        };
        // A failed acquisition left nothing to return.
        let Ok(client) = pending.await else {
            return;
        };
        let client_id = client.id();
        match self.inner.database.driver().release(client).await {
            Ok(()) => {
                debug!(transaction_id = %self.inner.id, client_id, "Transaction released client")
            }
            Err(e) => {
                warn!(transaction_id = %self.inner.id, client_id, error = %e, "Failed to release transaction client")
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("depth", &state.depth)
            .field("closed", &state.closed)
            .finish()
    }
}
