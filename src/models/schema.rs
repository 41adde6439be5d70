//! Neutral table and column descriptions consumed by the schema phraser.

use crate::models::SqlValue;
use serde::{Deserialize, Serialize};

/// Logical column type, phrased per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Auto-increment integer primary key
    Increments,
    Integer,
    BigInteger,
    Float,
    Boolean,
    /// Variable length string with a maximum length
    String(u32),
    Text,
    Binary,
    Json,
    Timestamp,
}

/// A column as it should be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<SqlValue>,
    pub unique: bool,
}

impl ColumnDefinition {
    /// Create a NOT NULL column with no default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default_value: None,
            unique: false,
        }
    }

    /// Allow NULL values in this column.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set a default value.
    pub fn default_value(mut self, value: impl Into<SqlValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Add a unique constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Whether this column is the table's primary key.
    pub fn is_primary_key(&self) -> bool {
        self.column_type == ColumnType::Increments
    }
}

/// Index over one or more columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    /// Create an index named after its table and columns.
    pub fn new(table: &str, columns: Vec<String>, unique: bool) -> Self {
        let suffix = if unique { "unique" } else { "index" };
        Self {
            name: format!("{}_{}_{}", table, columns.join("_"), suffix),
            columns,
            unique,
        }
    }
}

/// Complete description of a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub if_not_exists: bool,
}

impl TableDefinition {
    /// Create an empty table description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One change applied by an ALTER TABLE query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AlterOperation {
    AddColumn(ColumnDefinition),
    /// Carries the dropped column's definition when it is known, so the drop can be undone.
    DropColumn {
        name: String,
        definition: Option<ColumnDefinition>,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    AddIndex(IndexDefinition),
    DropIndex {
        name: String,
        definition: Option<IndexDefinition>,
    },
}

impl AlterOperation {
    /// The operation that undoes this one, if it can be undone.
    pub fn inverse(&self) -> Option<AlterOperation> {
        match self {
            Self::AddColumn(column) => Some(Self::DropColumn {
                name: column.name.clone(),
                definition: Some(column.clone()),
            }),
            Self::DropColumn { definition, .. } => definition.clone().map(Self::AddColumn),
            Self::RenameColumn { from, to } => Some(Self::RenameColumn {
                from: to.clone(),
                to: from.clone(),
            }),
            Self::AddIndex(index) => Some(Self::DropIndex {
                name: index.name.clone(),
                definition: Some(index.clone()),
            }),
            Self::DropIndex { definition, .. } => definition.clone().map(Self::AddIndex),
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::AddColumn(column) => format!("add column {}", column.name),
            Self::DropColumn { name, .. } => format!("drop column {}", name),
            Self::RenameColumn { from, to } => format!("rename column {} to {}", from, to),
            Self::AddIndex(index) => format!("add index {}", index.name),
            Self::DropIndex { name, .. } => format!("drop index {}", name),
        }
    }
}
