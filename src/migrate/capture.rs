//! Records the queries a declarative migration body builds.
//!
//! A [`Capture`] observes every query spawned or duplicated from the roots it
//! is given while a body runs. When the body returns, [`Capture::finish`]
//! checks that nothing was executed and that no query was used to build more
//! than one other, then hands back the final query of each chain in the order
//! the chains were started.

use crate::error::{DbError, DbResult};
use crate::query::observer::{QueryEvent, QueryObserver};
use crate::query::{QueryId, QueryRef};
use std::collections::HashMap;
use std::sync::Mutex;

struct Node {
    query: QueryRef,
    /// Index of the first node of this node's chain.
    chain: usize,
    children: usize,
}

#[derive(Default)]
struct CaptureState {
    active: bool,
    roots: Vec<QueryRef>,
    nodes: Vec<Node>,
    index: HashMap<QueryId, usize>,
}

pub(crate) struct Capture {
    migration: String,
    state: Mutex<CaptureState>,
}

impl Capture {
    pub(crate) fn new(migration: impl Into<String>) -> Self {
        Self {
            migration: migration.into(),
            state: Mutex::new(CaptureState {
                active: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a base query; it may build any number of queries.
    pub(crate) fn add_root(&self, root: QueryRef) {
        self.lock().roots.push(root);
    }

    /// Stop recording without checking anything.
    pub(crate) fn deactivate(&self) {
        self.lock().active = false;
    }

    /// Stop recording and return the final queries to execute, in order.
    pub(crate) fn finish(&self, reverse: bool) -> DbResult<Vec<QueryRef>> {
        let state = {
            let mut state = self.lock();
            state.active = false;
            std::mem::take(&mut *state)
        };

        let executed = state
            .roots
            .iter()
            .chain(state.nodes.iter().map(|n| &n.query))
            .any(|q| q.state().is_started());
        if executed {
            return Err(DbError::serial_side_effect(&self.migration));
        }

        if let Some(reused) = state.nodes.iter().find(|n| n.children > 1) {
            return Err(DbError::serial_reuse(&self.migration, reused.children));
        }

        let mut leaves: Vec<(usize, QueryRef)> = state
            .nodes
            .into_iter()
            .filter(|n| n.children == 0)
            .map(|n| (n.chain, n.query))
            .collect();
        leaves.sort_by_key(|(chain, _)| *chain);
        let mut leaves: Vec<QueryRef> = leaves.into_iter().map(|(_, q)| q).collect();
        if reverse {
            leaves.reverse();
        }
        Ok(leaves)
    }

    fn record(&self, parent: QueryId, child: &QueryRef) {
        let mut state = self.lock();
        if !state.active {
            return;
        }
        let is_root = state.roots.iter().any(|r| r.info().id == parent);
        let chain = if is_root {
            state.nodes.len()
        } else {
            let Some(&idx) = state.index.get(&parent) else {
                return;
            };
            state.nodes[idx].children += 1;
            state.nodes[idx].chain
        };
        let idx = state.nodes.len();
        state.index.insert(child.info().id, idx);
        state.nodes.push(Node {
            query: child.clone(),
            chain,
            children: 0,
        });
    }
}

impl QueryObserver for Capture {
    fn notify(&self, event: &QueryEvent<'_>) {
        match event {
            QueryEvent::Spawned { parent, child } | QueryEvent::Duplicated { parent, child } => {
                self.record(parent.id, child)
            }
            _ => {}
        }
    }
}
