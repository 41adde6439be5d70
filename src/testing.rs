//! In-memory driver for unit tests.

use crate::db::{Client, Connection, DatabaseType, Driver};
use crate::error::DbResult;
use crate::models::{QueryOutput, Statement};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Driver that answers every statement with an empty result and records it.
#[derive(Default)]
pub(crate) struct NullDriver {
    log: Arc<Mutex<Vec<String>>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

struct NullConnection {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Connection for NullConnection {
    async fn execute(&mut self, statement: &Statement) -> DbResult<QueryOutput> {
        self.log.lock().unwrap().push(statement.text.clone());
        if statement.returns_rows() {
            Ok(QueryOutput::rows(Vec::new()))
        } else {
            Ok(QueryOutput::write_result(0, None))
        }
    }
}

impl NullDriver {
    /// Statement texts in the order they were sent.
    pub(crate) fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// (acquired, released) client counts.
    pub(crate) fn counts(&self) -> (u64, u64) {
        (
            self.acquired.load(Ordering::SeqCst),
            self.released.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl Driver for NullDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn acquire(&self) -> DbResult<Client> {
        let id = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Client::new(
            id,
            Box::new(NullConnection {
                log: self.log.clone(),
            }),
        ))
    }

    async fn release(&self, client: Client) -> DbResult<()> {
        client.detach().await;
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
