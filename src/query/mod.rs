//! Immutable, chainable queries.
//!
//! A [`Query`] is a handle to one query instance. Cloning the handle refers to
//! the same instance, and therefore to the same memoized execution. Every
//! configuration method leaves the receiver untouched and returns a new
//! instance: the receiver's configuration plus the requested change.
//!
//! - [`Query::duplicate`] copies an instance into a new one of the same kind.
//! - [`Query::spawn`] builds a query of another kind that keeps the
//!   receiver's database, transaction binding and observers, but none of its
//!   kind-specific configuration or transforms.

pub mod execution;
pub mod kinds;
pub(crate) mod observer;
pub mod schema;
pub mod transaction;

pub use execution::ExecutionState;
pub use kinds::{
    Begin, Commit, Condition, Delete, Direction, Filterable, Insert, Op, Orderable, Ordering,
    QueryKind, Raw, RenderContext, Rollback, Root, Select, Update,
};
pub use schema::{AlterTable, CreateTable, DropTable, RenameTable, Schema, SchemaMode};
pub use transaction::Transaction;

use crate::database::Database;
use crate::error::DbResult;
use crate::models::SqlValue;
use futures_util::future::{BoxFuture, Shared};
use observer::{Observers, QueryEvent, QueryObserver};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

pub type QueryId = u64;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Memoized execution of one query instance.
pub type Outcome = Shared<BoxFuture<'static, DbResult<JsonValue>>>;

/// Identity of a query instance, cheap to copy into notifications and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryInfo {
    pub id: QueryId,
    pub kind: &'static str,
}

impl std::fmt::Display for QueryInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Post-processing step applied to a query's result.
///
/// Transforms compare by identity: [`Query::untransform`] removes the exact
/// transform that was added, not one that happens to behave the same.
#[derive(Clone)]
pub struct Transform(Arc<dyn Fn(JsonValue) -> DbResult<JsonValue> + Send + Sync>);

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(JsonValue) -> DbResult<JsonValue> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: JsonValue) -> DbResult<JsonValue> {
        (self.0)(value)
    }
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transform")
    }
}

/// Configuration shared between a query and everything spawned from it.
#[derive(Clone)]
pub(crate) struct QueryContext {
    pub(crate) database: Database,
    pub(crate) transaction: Option<Transaction>,
    pub(crate) observers: Observers,
}

/// The parts of a query that a configuration method may change.
pub(crate) struct Draft<K> {
    pub(crate) context: QueryContext,
    pub(crate) transforms: Vec<Transform>,
    pub(crate) kind: K,
}

pub(crate) struct QueryInner<K: QueryKind> {
    pub(crate) id: QueryId,
    pub(crate) context: QueryContext,
    pub(crate) transforms: Vec<Transform>,
    pub(crate) kind: K,
    pub(crate) outcome: OnceLock<Outcome>,
}

impl<K: QueryKind> QueryInner<K> {
    pub(crate) fn info(&self) -> QueryInfo {
        QueryInfo {
            id: self.id,
            kind: K::NAME,
        }
    }
}

/// Handle to an immutable query instance of kind `K`.
pub struct Query<K: QueryKind> {
    pub(crate) inner: Arc<QueryInner<K>>,
}

impl<K: QueryKind> Clone for Query<K> {
    /// Another handle to the same instance; use [`Query::duplicate`] for a copy.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: QueryKind> std::fmt::Debug for Query<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("transforms", &self.inner.transforms.len())
            .field(
                "transaction",
                &self.inner.context.transaction.as_ref().map(|tx| tx.id()),
            )
            .field("state", &self.state())
            .finish()
    }
}

impl<K: QueryKind> Query<K> {
    pub(crate) fn from_draft(draft: Draft<K>) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                id: NEXT_QUERY_ID.fetch_add(1, AtomicOrdering::Relaxed),
                context: draft.context,
                transforms: draft.transforms,
                kind: draft.kind,
                outcome: OnceLock::new(),
            }),
        }
    }

    /// Create a query with a fresh context. Only [`Database`] starts query families.
    pub(crate) fn with_context(context: QueryContext, kind: K) -> Self {
        Self::from_draft(Draft {
            context,
            transforms: Vec::new(),
            kind,
        })
    }

    pub fn id(&self) -> QueryId {
        self.inner.id
    }

    pub fn info(&self) -> QueryInfo {
        self.inner.info()
    }

    pub fn kind(&self) -> &K {
        &self.inner.kind
    }

    pub fn database(&self) -> &Database {
        &self.inner.context.database
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.inner.context.transaction.as_ref()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.inner.transforms
    }

    /// Type-erased handle to this instance.
    pub fn erase(&self) -> QueryRef {
        QueryRef(self.inner.clone())
    }

    /// Copy this query, then apply `mutate` to the copy only.
    pub(crate) fn derive(&self, mutate: impl FnOnce(&mut Draft<K>)) -> Self {
        let mut draft = Draft {
            context: self.inner.context.clone(),
            transforms: self.inner.transforms.clone(),
            kind: self.inner.kind.clone(),
        };
        mutate(&mut draft);
        let child = Self::from_draft(draft);
        self.notify(&QueryEvent::Duplicated {
            parent: self.info(),
            child: &child.erase(),
        });
        child
    }

    /// New instance of the same kind with the same configuration and no outcome.
    pub fn duplicate(&self) -> Self {
        self.derive(|_| {})
    }

    /// New query of kind `T` sharing this query's database, transaction and observers.
    pub fn spawn<T: QueryKind>(&self, kind: T) -> Query<T> {
        self.spawn_in(self.inner.context.clone(), kind)
    }

    fn spawn_in<T: QueryKind>(&self, context: QueryContext, kind: T) -> Query<T> {
        let child = Query::with_context(context, kind);
        self.notify(&QueryEvent::Spawned {
            parent: self.info(),
            child: &child.erase(),
        });
        child
    }

    /// Bind to a transaction handle.
    pub fn transacting(&self, transaction: &Transaction) -> Self {
        let transaction = transaction.clone();
        self.derive(move |draft| draft.context.transaction = Some(transaction))
    }

    /// Append a result transform; transforms run in the order they were added.
    pub fn transform(&self, transform: Transform) -> Self {
        self.derive(move |draft| draft.transforms.push(transform))
    }

    /// Remove a previously added transform, keeping the order of the rest.
    pub fn untransform(&self, transform: &Transform) -> Self {
        self.derive(|draft| draft.transforms.retain(|t| t != transform))
    }

    /// Attach an observer inherited by every query derived from the result.
    pub(crate) fn observe(&self, observer: Arc<dyn QueryObserver>) -> Self {
        self.derive(move |draft| draft.context.observers = draft.context.observers.with(observer))
    }

    pub(crate) fn notify(&self, event: &QueryEvent<'_>) {
        let observers = &self.inner.context.observers;
        if !observers.is_empty() {
            observers.notify(event);
        }
    }

    /// Start a transaction, or a nested level of the bound one.
    pub fn begin(&self) -> Query<Begin> {
        let mut context = self.inner.context.clone();
        if context.transaction.is_none() {
            context.transaction = Some(context.database.transaction());
        }
        self.spawn_in(context, Begin)
    }

    /// Commit the innermost open level of the bound transaction.
    pub fn commit(&self) -> Query<Commit> {
        self.spawn(Commit)
    }

    /// Roll back the innermost open level of the bound transaction.
    pub fn rollback(&self) -> Query<Rollback> {
        self.spawn(Rollback)
    }

    pub fn select(&self, table: impl Into<String>) -> Query<Select> {
        self.spawn(Select::new(table))
    }

    pub fn insert_into(&self, table: impl Into<String>) -> Query<Insert> {
        self.spawn(Insert::new(table))
    }

    pub fn update(&self, table: impl Into<String>) -> Query<Update> {
        self.spawn(Update::new(table))
    }

    pub fn delete_from(&self, table: impl Into<String>) -> Query<Delete> {
        self.spawn(Delete::new(table))
    }

    /// Raw statement; `?` marks positional arguments in any dialect.
    pub fn raw(&self, sql: impl Into<String>, args: Vec<SqlValue>) -> Query<Raw> {
        self.spawn(Raw::new(sql, args))
    }
}

/// Kind-independent operations on a query instance.
pub(crate) trait ErasedQuery: Send + Sync {
    fn info(&self) -> QueryInfo;
    fn state(&self) -> ExecutionState;
    fn execute(&self) -> Outcome;
}

/// Type-erased handle to a query instance of any kind.
#[derive(Clone)]
pub struct QueryRef(Arc<dyn ErasedQuery>);

impl QueryRef {
    pub fn info(&self) -> QueryInfo {
        self.0.info()
    }

    pub fn state(&self) -> ExecutionState {
        self.0.state()
    }

    /// Execute the referenced instance (memoized like [`Query::execute`]).
    pub fn execute(&self) -> Outcome {
        self.0.execute()
    }
}

impl std::fmt::Debug for QueryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QueryRef({})", self.info())
    }
}
