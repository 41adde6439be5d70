//! Error types for the toolkit.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Errors are `Clone` because a query memoizes its outcome and hands the same
//! value to every caller that awaits it.

use crate::models::SqlValue;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    /// A statement failed inside the driver.
    #[error("Driver error: {message} (query: {query}, sql: {sql}, args: {args:?})")]
    Driver {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        sql: String,
        args: Vec<SqlValue>,
        /// Kind and id of the query that issued the statement.
        query: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Transaction not open: {message}")]
    TransactionNotOpen { message: String },

    #[error(
        "Migration '{migration}' executed a query while building it; declarative bodies must only build queries"
    )]
    SerialMigrationSideEffect { migration: String },

    #[error(
        "Migration '{migration}' reused a query to build {descendants} queries; each query may lead to exactly one final query"
    )]
    SerialMigrationReuse {
        migration: String,
        descendants: usize,
    },

    #[error("Migration '{migration}' returned a future from a change body; change bodies must be declarative")]
    MigrationBodyMustBeSerial { migration: String },

    #[error("{original}. Rollback also failed: {rollback}")]
    RollbackFailure { original: String, rollback: String },

    #[error("Irreversible operation: {operation}")]
    IrreversibleMigration { operation: String },

    #[error("Migration not found: {name}")]
    MigrationNotFound { name: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a driver error from a bare message. Statement context is attached
    /// later by the execution pipeline with [`DbError::with_statement`].
    pub fn driver(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state,
            sql: String::new(),
            args: Vec::new(),
            query: String::new(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn transaction_not_open(message: impl Into<String>) -> Self {
        Self::TransactionNotOpen {
            message: message.into(),
        }
    }

    pub fn serial_side_effect(migration: impl Into<String>) -> Self {
        Self::SerialMigrationSideEffect {
            migration: migration.into(),
        }
    }

    pub fn serial_reuse(migration: impl Into<String>, descendants: usize) -> Self {
        Self::SerialMigrationReuse {
            migration: migration.into(),
            descendants,
        }
    }

    pub fn body_must_be_serial(migration: impl Into<String>) -> Self {
        Self::MigrationBodyMustBeSerial {
            migration: migration.into(),
        }
    }

    /// Combine the error that caused a rollback with the error the rollback raised.
    pub fn rollback_failure(original: &DbError, rollback: &DbError) -> Self {
        Self::RollbackFailure {
            original: original.to_string(),
            rollback: rollback.to_string(),
        }
    }

    pub fn irreversible(operation: impl Into<String>) -> Self {
        Self::IrreversibleMigration {
            operation: operation.into(),
        }
    }

    pub fn migration_not_found(name: impl Into<String>) -> Self {
        Self::MigrationNotFound { name: name.into() }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the statement and originating query to a driver error.
    ///
    /// Errors that are not driver errors pass through unchanged.
    pub fn with_statement(self, sql: &str, args: &[SqlValue], query: impl Into<String>) -> Self {
        match self {
            Self::Driver {
                message, sql_state, ..
            } => Self::Driver {
                message,
                sql_state,
                sql: sql.to_string(),
                args: args.to_vec(),
                query: query.into(),
            },
            other => other,
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Driver { .. } => "DRIVER_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::TransactionNotOpen { .. } => "TRANSACTION_NOT_OPEN",
            Self::SerialMigrationSideEffect { .. } => "SERIAL_MIGRATION_SIDE_EFFECT",
            Self::SerialMigrationReuse { .. } => "SERIAL_MIGRATION_REUSE",
            Self::MigrationBodyMustBeSerial { .. } => "MIGRATION_BODY_MUST_BE_SERIAL",
            Self::RollbackFailure { .. } => "ROLLBACK_FAILURE",
            Self::IrreversibleMigration { .. } => "IRREVERSIBLE_MIGRATION",
            Self::MigrationNotFound { .. } => "MIGRATION_NOT_FOUND",
            Self::Timeout { .. } => "TIMEOUT",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::TransactionNotOpen { .. } => {
                Some("Execute begin() on the transaction before using it")
            }
            Self::SerialMigrationReuse { .. } => {
                Some("Build each statement from the schema or query handle directly")
            }
            Self::MigrationBodyMustBeSerial { .. } => {
                Some("Use up/down bodies for migrations that need to await queries")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::driver(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => DbError::driver("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::driver(format!("Failed to decode column {}: {}", index, source), None)
            }
            sqlx::Error::Decode(source) => DbError::driver(format!("Decode error: {}", source), None),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::driver(format!("Unknown database error: {}", err), None),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
