//! Statement phrasing.
//!
//! Queries describe their work with neutral data; a [`Phraser`] turns that
//! into statement text for one database. [`SqlPhraser`] covers the small set
//! of differences between SQLite, PostgreSQL and MySQL the toolkit relies on:
//! identifier quoting, placeholder style, column types and a few DDL forms.

use crate::db::DatabaseType;
use crate::error::{DbError, DbResult};
use crate::models::{
    AlterOperation, ColumnDefinition, ColumnType, IndexDefinition, SqlValue, Statement,
    TableDefinition,
};

/// Turns neutral descriptions into statements.
pub trait Phraser: Send + Sync + std::fmt::Debug {
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier.
    fn quote(&self, ident: &str) -> String;

    /// Placeholder for the argument at `position` (1-based).
    fn placeholder(&self, position: usize) -> String;

    fn column_type(&self, column_type: ColumnType) -> String;

    /// Render a literal for DDL, where arguments cannot be bound.
    fn literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::String(v) => quote_string(v),
            SqlValue::Json(v) => quote_string(&v.to_string()),
            SqlValue::Bytes(v) => {
                let hex: String = v.iter().map(|b| format!("{:02X}", b)).collect();
                format!("X'{}'", hex)
            }
        }
    }

    fn column(&self, column: &ColumnDefinition) -> String {
        let mut sql = format!(
            "{} {}",
            self.quote(&column.name),
            self.column_type(column.column_type)
        );
        if column.is_primary_key() {
            return sql;
        }
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(&self.literal(default));
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
        sql
    }

    fn create_index(&self, table: &str, index: &IndexDefinition) -> String {
        let columns: Vec<String> = index.columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.quote(table),
            columns.join(", ")
        )
    }

    fn drop_index(&self, _table: &str, name: &str) -> String {
        format!("DROP INDEX {}", self.quote(name))
    }

    fn create_table(&self, table: &TableDefinition) -> Statement {
        let columns: Vec<String> = table.columns.iter().map(|c| self.column(c)).collect();
        let mut parts = vec![format!(
            "CREATE TABLE {}{} ({})",
            if table.if_not_exists {
                "IF NOT EXISTS "
            } else {
                ""
            },
            self.quote(&table.name),
            columns.join(", ")
        )];
        parts.extend(
            table
                .indexes
                .iter()
                .map(|index| self.create_index(&table.name, index)),
        );
        Statement::new(parts.join(";\n"))
    }

    fn alter_table(&self, table: &str, operations: &[AlterOperation]) -> Statement {
        let quoted = self.quote(table);
        let parts: Vec<String> = operations
            .iter()
            .map(|op| match op {
                AlterOperation::AddColumn(column) => {
                    format!("ALTER TABLE {} ADD COLUMN {}", quoted, self.column(column))
                }
                AlterOperation::DropColumn { name, .. } => {
                    format!("ALTER TABLE {} DROP COLUMN {}", quoted, self.quote(name))
                }
                AlterOperation::RenameColumn { from, to } => format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    quoted,
                    self.quote(from),
                    self.quote(to)
                ),
                AlterOperation::AddIndex(index) => self.create_index(table, index),
                AlterOperation::DropIndex { name, .. } => self.drop_index(table, name),
            })
            .collect();
        Statement::new(parts.join(";\n"))
    }

    fn drop_table(&self, table: &str, if_exists: bool) -> Statement {
        Statement::new(format!(
            "DROP TABLE {}{}",
            if if_exists { "IF EXISTS " } else { "" },
            self.quote(table)
        ))
    }

    fn rename_table(&self, from: &str, to: &str) -> Statement {
        Statement::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(from),
            self.quote(to)
        ))
    }

    fn begin(&self) -> Statement {
        Statement::new("BEGIN")
    }

    fn commit(&self) -> Statement {
        Statement::new("COMMIT")
    }

    fn rollback(&self) -> Statement {
        Statement::new("ROLLBACK")
    }

    fn savepoint(&self, name: &str) -> Statement {
        Statement::new(format!("SAVEPOINT {}", self.quote(name)))
    }

    fn release_savepoint(&self, name: &str) -> Statement {
        Statement::new(format!("RELEASE SAVEPOINT {}", self.quote(name)))
    }

    fn rollback_to_savepoint(&self, name: &str) -> Statement {
        Statement::new(format!("ROLLBACK TO SAVEPOINT {}", self.quote(name)))
    }
}

fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Phraser for the three supported backends.
#[derive(Debug, Clone, Copy)]
pub struct SqlPhraser {
    db_type: DatabaseType,
}

impl SqlPhraser {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }
}

impl Phraser for SqlPhraser {
    fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    fn quote(&self, ident: &str) -> String {
        match self.db_type {
            DatabaseType::MySql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    fn placeholder(&self, position: usize) -> String {
        match self.db_type {
            DatabaseType::Postgres => format!("${}", position),
            _ => "?".to_string(),
        }
    }

    fn column_type(&self, column_type: ColumnType) -> String {
        use DatabaseType::*;
        let sql = match (column_type, self.db_type) {
            (ColumnType::Increments, SQLite) => "INTEGER PRIMARY KEY AUTOINCREMENT",
            (ColumnType::Increments, Postgres) => "SERIAL PRIMARY KEY",
            (ColumnType::Increments, MySql) => "INT AUTO_INCREMENT PRIMARY KEY",
            (ColumnType::Integer, MySql) => "INT",
            (ColumnType::Integer, _) => "INTEGER",
            (ColumnType::BigInteger, SQLite) => "INTEGER",
            (ColumnType::BigInteger, _) => "BIGINT",
            (ColumnType::Float, SQLite) => "REAL",
            (ColumnType::Float, Postgres) => "DOUBLE PRECISION",
            (ColumnType::Float, MySql) => "DOUBLE",
            (ColumnType::Boolean, MySql) => "TINYINT(1)",
            (ColumnType::Boolean, _) => "BOOLEAN",
            (ColumnType::String(len), _) => return format!("VARCHAR({})", len),
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Binary, Postgres) => "BYTEA",
            (ColumnType::Binary, _) => "BLOB",
            (ColumnType::Json, SQLite) => "TEXT",
            (ColumnType::Json, Postgres) => "JSONB",
            (ColumnType::Json, MySql) => "JSON",
            (ColumnType::Timestamp, _) => "TIMESTAMP",
        };
        sql.to_string()
    }

    fn drop_index(&self, table: &str, name: &str) -> String {
        match self.db_type {
            DatabaseType::MySql => format!("DROP INDEX {} ON {}", self.quote(name), self.quote(table)),
            _ => format!("DROP INDEX {}", self.quote(name)),
        }
    }

    fn rename_table(&self, from: &str, to: &str) -> Statement {
        match self.db_type {
            DatabaseType::MySql => Statement::new(format!(
                "RENAME TABLE {} TO {}",
                self.quote(from),
                self.quote(to)
            )),
            _ => Statement::new(format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote(from),
                self.quote(to)
            )),
        }
    }

    fn begin(&self) -> Statement {
        match self.db_type {
            DatabaseType::MySql => Statement::new("START TRANSACTION"),
            _ => Statement::new("BEGIN"),
        }
    }
}

/// Accumulates statement text and arguments, numbering placeholders as it goes.
#[derive(Debug)]
pub struct SqlWriter<'a> {
    phraser: &'a dyn Phraser,
    text: String,
    args: Vec<SqlValue>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(phraser: &'a dyn Phraser) -> Self {
        Self {
            phraser,
            text: String::new(),
            args: Vec::new(),
        }
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    pub fn push_ident(&mut self, ident: &str) -> &mut Self {
        let quoted = self.phraser.quote(ident);
        self.text.push_str(&quoted);
        self
    }

    /// Append a comma separated list of quoted identifiers.
    pub fn push_idents(&mut self, idents: &[String]) -> &mut Self {
        for (i, ident) in idents.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_ident(ident);
        }
        self
    }

    pub fn push_value(&mut self, value: SqlValue) -> &mut Self {
        self.args.push(value);
        let placeholder = self.phraser.placeholder(self.args.len());
        self.text.push_str(&placeholder);
        self
    }

    /// Append raw SQL whose `?` markers stand for `values`, renumbering them for this phraser.
    ///
    /// SQL without values is appended verbatim. Otherwise the number of markers
    /// must equal the number of values.
    pub fn push_raw(&mut self, sql: &str, values: &[SqlValue]) -> DbResult<&mut Self> {
        if values.is_empty() {
            return Ok(self.push(sql));
        }
        let markers = sql.matches('?').count();
        if markers != values.len() {
            return Err(DbError::invalid_input(format!(
                "Raw SQL '{}' has {} placeholders but {} arguments",
                sql,
                markers,
                values.len()
            )));
        }
        let mut values = values.iter();
        for ch in sql.chars() {
            match (ch, values.len()) {
                ('?', n) if n > 0 => {
                    if let Some(value) = values.next() {
                        self.push_value(value.clone());
                    }
                }
                _ => self.text.push(ch),
            }
        }
        Ok(self)
    }

    pub fn finish(self) -> Statement {
        Statement::with_args(self.text, self.args)
    }
}
