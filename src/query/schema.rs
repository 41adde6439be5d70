//! Schema-authoring façade.
//!
//! [`Schema`] builds DDL queries from one root query, so every schema query
//! it creates shares the root's database, transaction and observers. The
//! façade's [`SchemaMode`] decides how those queries render:
//!
//! - `Plain` renders each operation as written.
//! - `Reversible` renders as written but rejects operations that could not
//!   be undone later.
//! - `Reverse` renders the inverse of each operation.

use crate::error::{DbError, DbResult};
use crate::models::{
    AlterOperation, ColumnDefinition, ColumnType, IndexDefinition, Statement, TableDefinition,
};
use crate::query::kinds::{QueryKind, RenderContext};
use crate::query::{Query, Root};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    #[default]
    Plain,
    Reversible,
    Reverse,
}

#[derive(Debug, Clone)]
pub struct Schema {
    root: Query<Root>,
    mode: SchemaMode,
}

impl Schema {
    pub fn new(root: Query<Root>, mode: SchemaMode) -> Self {
        Self { root, mode }
    }

    pub fn mode(&self) -> SchemaMode {
        self.mode
    }

    pub fn create_table(&self, name: impl Into<String>) -> Query<CreateTable> {
        self.root.spawn(CreateTable {
            table: TableDefinition::new(name),
            mode: self.mode,
        })
    }

    pub fn alter_table(&self, name: impl Into<String>) -> Query<AlterTable> {
        self.root.spawn(AlterTable {
            table: name.into(),
            operations: Vec::new(),
            mode: self.mode,
        })
    }

    /// Drop a table. Give it the table's definition with
    /// [`Query::with_definition`] to make the drop reversible.
    pub fn drop_table(&self, name: impl Into<String>) -> Query<DropTable> {
        self.root.spawn(DropTable {
            table: name.into(),
            if_exists: false,
            definition: None,
            mode: self.mode,
        })
    }

    pub fn drop_table_if_exists(&self, name: impl Into<String>) -> Query<DropTable> {
        self.drop_table(name).if_exists()
    }

    pub fn rename_table(&self, from: impl Into<String>, to: impl Into<String>) -> Query<RenameTable> {
        self.root.spawn(RenameTable {
            from: from.into(),
            to: to.into(),
            mode: self.mode,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub table: TableDefinition,
    pub mode: SchemaMode,
}

impl QueryKind for CreateTable {
    const NAME: &'static str = "create-table";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if self.mode == SchemaMode::Reverse {
            return Ok(cx.phraser.drop_table(&self.table.name, false));
        }
        if self.table.columns.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Table '{}' has no columns",
                self.table.name
            )));
        }
        Ok(cx.phraser.create_table(&self.table))
    }
}

impl Query<CreateTable> {
    pub fn column(&self, column: ColumnDefinition) -> Self {
        self.derive(move |draft| draft.kind.table.columns.push(column))
    }

    fn typed(&self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.column(ColumnDefinition::new(name, column_type))
    }

    /// Auto-increment integer primary key.
    pub fn increments(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Increments)
    }

    pub fn integer(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Integer)
    }

    pub fn big_integer(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::BigInteger)
    }

    pub fn float(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Float)
    }

    pub fn boolean(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Boolean)
    }

    pub fn string(&self, name: impl Into<String>, length: u32) -> Self {
        self.typed(name, ColumnType::String(length))
    }

    pub fn text(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Text)
    }

    pub fn binary(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Binary)
    }

    pub fn json(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Json)
    }

    pub fn timestamp(&self, name: impl Into<String>) -> Self {
        self.typed(name, ColumnType::Timestamp)
    }

    pub fn index<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> Self {
        self.with_index(columns, false)
    }

    pub fn unique<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> Self {
        self.with_index(columns, true)
    }

    fn with_index<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>, unique: bool) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        self.derive(move |draft| {
            let table = &mut draft.kind.table;
            let index = IndexDefinition::new(&table.name, columns, unique);
            table.indexes.push(index);
        })
    }

    pub fn if_not_exists(&self) -> Self {
        self.derive(|draft| draft.kind.table.if_not_exists = true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterTable {
    pub table: String,
    pub operations: Vec<AlterOperation>,
    pub mode: SchemaMode,
}

impl AlterTable {
    fn inverted(&self) -> DbResult<Vec<AlterOperation>> {
        self.operations
            .iter()
            .rev()
            .map(|op| {
                op.inverse().ok_or_else(|| {
                    DbError::irreversible(format!("{} on table {}", op.describe(), self.table))
                })
            })
            .collect()
    }
}

impl QueryKind for AlterTable {
    const NAME: &'static str = "alter-table";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if self.operations.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Alter of '{}' has no operations",
                self.table
            )));
        }
        match self.mode {
            SchemaMode::Plain => Ok(cx.phraser.alter_table(&self.table, &self.operations)),
            SchemaMode::Reversible => {
                self.inverted()?;
                Ok(cx.phraser.alter_table(&self.table, &self.operations))
            }
            SchemaMode::Reverse => Ok(cx.phraser.alter_table(&self.table, &self.inverted()?)),
        }
    }
}

impl Query<AlterTable> {
    fn push(&self, op: AlterOperation) -> Self {
        self.derive(move |draft| draft.kind.operations.push(op))
    }

    pub fn add_column(&self, column: ColumnDefinition) -> Self {
        self.push(AlterOperation::AddColumn(column))
    }

    /// Drop a column. Not reversible; see [`Query::drop_column_with`].
    pub fn drop_column(&self, name: impl Into<String>) -> Self {
        self.push(AlterOperation::DropColumn {
            name: name.into(),
            definition: None,
        })
    }

    /// Drop a column whose definition is known, so the drop can be undone.
    pub fn drop_column_with(&self, column: ColumnDefinition) -> Self {
        self.push(AlterOperation::DropColumn {
            name: column.name.clone(),
            definition: Some(column),
        })
    }

    pub fn rename_column(&self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.push(AlterOperation::RenameColumn {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn add_index<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> Self {
        let columns = columns.into_iter().map(Into::into).collect();
        self.push(AlterOperation::AddIndex(IndexDefinition::new(
            &self.kind().table,
            columns,
            false,
        )))
    }

    pub fn add_unique<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> Self {
        let columns = columns.into_iter().map(Into::into).collect();
        self.push(AlterOperation::AddIndex(IndexDefinition::new(
            &self.kind().table,
            columns,
            true,
        )))
    }

    pub fn drop_index(&self, name: impl Into<String>) -> Self {
        self.push(AlterOperation::DropIndex {
            name: name.into(),
            definition: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub table: String,
    pub if_exists: bool,
    /// Definition to recreate the table from when the drop is undone.
    pub definition: Option<TableDefinition>,
    pub mode: SchemaMode,
}

impl DropTable {
    fn restore(&self) -> DbResult<&TableDefinition> {
        self.definition.as_ref().ok_or_else(|| {
            DbError::irreversible(format!(
                "drop table {} without its definition",
                self.table
            ))
        })
    }
}

impl QueryKind for DropTable {
    const NAME: &'static str = "drop-table";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        match self.mode {
            SchemaMode::Plain => Ok(cx.phraser.drop_table(&self.table, self.if_exists)),
            SchemaMode::Reversible => {
                self.restore()?;
                Ok(cx.phraser.drop_table(&self.table, self.if_exists))
            }
            SchemaMode::Reverse => Ok(cx.phraser.create_table(self.restore()?)),
        }
    }
}

impl Query<DropTable> {
    pub fn if_exists(&self) -> Self {
        self.derive(|draft| draft.kind.if_exists = true)
    }

    pub fn with_definition(&self, definition: TableDefinition) -> Self {
        self.derive(move |draft| draft.kind.definition = Some(definition))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenameTable {
    pub from: String,
    pub to: String,
    pub mode: SchemaMode,
}

impl QueryKind for RenameTable {
    const NAME: &'static str = "rename-table";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        match self.mode {
            SchemaMode::Reverse => Ok(cx.phraser.rename_table(&self.to, &self.from)),
            _ => Ok(cx.phraser.rename_table(&self.from, &self.to)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::db::{DatabaseType, SqlPhraser};
    use crate::testing::NullDriver;
    use std::sync::Arc;

    fn schema(mode: SchemaMode) -> Schema {
        let db = Database::new(Arc::new(NullDriver::default()));
        Schema::new(db.query(), mode)
    }

    fn render<K: QueryKind>(q: &Query<K>) -> DbResult<String> {
        let phraser = SqlPhraser::new(DatabaseType::SQLite);
        q.kind()
            .render(&RenderContext {
                phraser: &phraser,
                depth: 0,
            })
            .map(|s| s.text)
    }

    #[test]
    fn test_create_table_forward_and_reverse() {
        let build = |s: &Schema| s.create_table("users").increments("id").string("email", 100).unique(["email"]);
        assert_eq!(
            render(&build(&schema(SchemaMode::Plain))).unwrap(),
            "CREATE TABLE \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"email\" VARCHAR(100) NOT NULL);\nCREATE UNIQUE INDEX \"users_email_unique\" ON \"users\" (\"email\")"
        );
        assert_eq!(
            render(&build(&schema(SchemaMode::Reverse))).unwrap(),
            "DROP TABLE \"users\""
        );
    }

    #[test]
    fn test_alter_reverse_inverts_in_reverse_order() {
        let q = schema(SchemaMode::Reverse)
            .alter_table("users")
            .add_column(ColumnDefinition::new("age", ColumnType::Integer).nullable())
            .rename_column("name", "full_name");
        assert_eq!(
            render(&q).unwrap(),
            "ALTER TABLE \"users\" RENAME COLUMN \"full_name\" TO \"name\";\nALTER TABLE \"users\" DROP COLUMN \"age\""
        );
    }

    #[test]
    fn test_irreversible_operations() {
        let reversible = schema(SchemaMode::Reversible);
        let err = render(&reversible.alter_table("users").drop_column("age")).unwrap_err();
        assert_eq!(err.code(), "IRREVERSIBLE_MIGRATION");
        let err = render(&reversible.drop_table("users")).unwrap_err();
        assert_eq!(err.code(), "IRREVERSIBLE_MIGRATION");

        let plain = schema(SchemaMode::Plain);
        assert_eq!(
            render(&plain.drop_table_if_exists("users")).unwrap(),
            "DROP TABLE IF EXISTS \"users\""
        );
    }

    #[test]
    fn test_drop_with_definition_reverses_to_create() {
        let mut table = TableDefinition::new("tags");
        table.columns.push(ColumnDefinition::new("id", ColumnType::Increments));
        let q = schema(SchemaMode::Reverse)
            .drop_table("tags")
            .with_definition(table);
        assert_eq!(
            render(&q).unwrap(),
            "CREATE TABLE \"tags\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT)"
        );
    }

    #[test]
    fn test_rename_reverse() {
        let q = schema(SchemaMode::Reverse).rename_table("a", "b");
        assert_eq!(render(&q).unwrap(), "ALTER TABLE \"b\" RENAME TO \"a\"");
    }
}
