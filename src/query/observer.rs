//! Lifecycle notifications emitted by queries.
//!
//! Observers are attached to a query and inherited by every query duplicated
//! or spawned from it, so one observer sees a whole family of queries.

use crate::error::DbError;
use crate::models::QueryOutput;
use crate::query::{QueryInfo, QueryRef};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Something that happened to a query.
pub(crate) enum QueryEvent<'a> {
    /// `parent` produced a query of a different kind.
    Spawned { parent: QueryInfo, child: &'a QueryRef },
    /// `parent` produced a same-kind copy, possibly with one more piece of configuration.
    Duplicated { parent: QueryInfo, child: &'a QueryRef },
    Execute(QueryInfo),
    RawResult(QueryInfo, &'a QueryOutput),
    Result(QueryInfo, &'a JsonValue),
    Error(QueryInfo, &'a DbError),
}

pub(crate) trait QueryObserver: Send + Sync {
    fn notify(&self, event: &QueryEvent<'_>);
}

/// Ordered, shared list of observers.
#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn QueryObserver>>);

impl Observers {
    pub(crate) fn with(&self, observer: Arc<dyn QueryObserver>) -> Self {
        let mut list = self.0.clone();
        list.push(observer);
        Self(list)
    }

    pub(crate) fn notify(&self, event: &QueryEvent<'_>) {
        for observer in &self.0 {
            observer.notify(event);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
