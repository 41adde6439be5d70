//! Driver boundary.
//!
//! A [`Driver`] owns a pool of connections. It hands out [`Client`]s, takes
//! them back, and executes statements through them. A client is a shared
//! handle: clones refer to the same underlying connection, and statements sent
//! through clones of one client run one at a time in the order they were sent.

use crate::db::DatabaseType;
use crate::error::{DbError, DbResult};
use crate::models::{QueryOutput, Statement};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One live database connection.
#[async_trait]
pub trait Connection: Send {
    /// Send a statement and return its unprocessed result.
    async fn execute(&mut self, statement: &Statement) -> DbResult<QueryOutput>;
}

/// Shared handle to a connection checked out of a driver's pool.
#[derive(Clone)]
pub struct Client {
    id: u64,
    connection: Arc<Mutex<Option<Box<dyn Connection>>>>,
}

impl Client {
    /// Wrap a freshly acquired connection.
    pub fn new(id: u64, connection: Box<dyn Connection>) -> Self {
        Self {
            id,
            connection: Arc::new(Mutex::new(Some(connection))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Execute a statement, waiting for statements already queued on this client.
    pub async fn execute(&self, statement: &Statement) -> DbResult<QueryOutput> {
        let mut guard = self.connection.lock().await;
        match guard.as_mut() {
            Some(connection) => connection.execute(statement).await,
            None => Err(DbError::connection(
                format!("Client {} has already been released", self.id),
                "Acquire a new client or begin a new transaction",
            )),
        }
    }

    /// Take the connection out of this handle, leaving every clone released.
    pub async fn detach(&self) -> Option<Box<dyn Connection>> {
        self.connection.lock().await.take()
    }

    /// Whether two handles refer to the same connection.
    pub fn same_as(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.connection, &other.connection)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("id", &self.id).finish()
    }
}

/// Connection pool plus statement execution.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Dialect used to phrase statements for this driver.
    fn database_type(&self) -> DatabaseType;

    /// Check a client out of the pool.
    async fn acquire(&self) -> DbResult<Client>;

    /// Return a client to the pool.
    async fn release(&self, client: Client) -> DbResult<()> {
        drop(client.detach().await);
        Ok(())
    }

    /// Execute a statement through a client.
    async fn execute(&self, client: &Client, statement: &Statement) -> DbResult<QueryOutput> {
        client.execute(statement).await
    }
}
