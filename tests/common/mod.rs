//! Shared test driver.
#![allow(dead_code)]

use async_trait::async_trait;
use db_toolkit::db::{Client, Connection, DatabaseType, Driver};
use db_toolkit::error::{DbError, DbResult};
use db_toolkit::models::{QueryOutput, Statement};
use db_toolkit::Database;
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Script {
    /// (client id, statement text) in the order statements reached the driver.
    log: Vec<(u64, String)>,
    /// Statements containing the fragment fail with the error.
    failures: Vec<(String, DbError)>,
    /// Rows returned for statements containing the fragment.
    rows: Vec<(String, Vec<Map<String, JsonValue>>)>,
    /// Statements containing the fragment wait this long before answering.
    delays: Vec<(String, Duration)>,
}

/// Driver that records every statement and answers from a script.
#[derive(Default)]
pub struct RecordingDriver {
    script: Arc<Mutex<Script>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

struct RecordingConnection {
    client_id: u64,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn execute(&mut self, statement: &Statement) -> DbResult<QueryOutput> {
        let delay = {
            let script = self.script.lock().unwrap();
            script
                .delays
                .iter()
                .find(|(fragment, _)| statement.text.contains(fragment.as_str()))
                .map(|(_, delay)| *delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        script.log.push((self.client_id, statement.text.clone()));
        if let Some((_, error)) = script
            .failures
            .iter()
            .find(|(fragment, _)| statement.text.contains(fragment.as_str()))
        {
            return Err(error.clone());
        }
        if let Some((_, rows)) = script
            .rows
            .iter()
            .find(|(fragment, _)| statement.text.contains(fragment.as_str()))
        {
            return Ok(QueryOutput::rows(rows.clone()));
        }
        if statement.returns_rows() {
            Ok(QueryOutput::rows(Vec::new()))
        } else {
            Ok(QueryOutput::write_result(1, None))
        }
    }
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn database(self: &Arc<Self>) -> Database {
        Database::new(self.clone())
    }

    pub fn fail_on(&self, fragment: &str) {
        self.fail_with(
            fragment,
            DbError::driver(format!("scripted failure on '{}'", fragment), None),
        );
    }

    pub fn fail_with(&self, fragment: &str, error: DbError) {
        self.script
            .lock()
            .unwrap()
            .failures
            .push((fragment.to_string(), error));
    }

    pub fn respond(&self, fragment: &str, rows: Vec<JsonValue>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| row.as_object().cloned())
            .collect();
        self.script.lock().unwrap().rows.push((fragment.to_string(), rows));
    }

    pub fn delay(&self, fragment: &str, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .delays
            .push((fragment.to_string(), delay));
    }

    pub fn log(&self) -> Vec<(u64, String)> {
        self.script.lock().unwrap().log.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.log().into_iter().map(|(_, text)| text).collect()
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn acquire(&self) -> DbResult<Client> {
        let id = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Client::new(
            id,
            Box::new(RecordingConnection {
                client_id: id,
                script: self.script.clone(),
            }),
        ))
    }

    async fn release(&self, client: Client) -> DbResult<()> {
        client.detach().await;
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
