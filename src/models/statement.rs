//! The unit of work handed to a driver and the raw result it returns.

use crate::models::SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Statement text plus its positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    #[serde(default)]
    pub args: Vec<SqlValue>,
}

impl Statement {
    /// Create a statement without arguments.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            args: Vec::new(),
        }
    }

    /// Create a statement with positional arguments.
    pub fn with_args(text: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            text: text.into(),
            args,
        }
    }

    /// Whether the driver should fetch rows rather than only count them.
    pub fn returns_rows(&self) -> bool {
        let head = self
            .text
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        matches!(
            head.as_str(),
            "SELECT" | "WITH" | "PRAGMA" | "SHOW" | "VALUES" | "EXPLAIN"
        ) || self
            .text
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case("RETURNING"))
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Unprocessed result of one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl QueryOutput {
    /// Create a result for write operations.
    pub fn write_result(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
            last_insert_id,
        }
    }

    /// Create a result carrying fetched rows.
    pub fn rows(rows: Vec<serde_json::Map<String, JsonValue>>) -> Self {
        Self {
            rows_affected: rows.len() as u64,
            rows,
            last_insert_id: None,
        }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
