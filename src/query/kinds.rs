//! Concrete query kinds and the capabilities they opt into.
//!
//! Each kind holds only its own configuration. Shared configuration lives in
//! the query that wraps it. Capabilities are traits a kind implements to
//! unlock the matching chainable methods on `Query<K>`.

use crate::db::{DatabaseType, SqlWriter};
use crate::db::dialect::Phraser;
use crate::error::{DbError, DbResult};
use crate::models::{QueryOutput, SqlValue, Statement};
use crate::query::Query;
use serde_json::{Value as JsonValue, json};

/// Inputs available while rendering a statement.
pub struct RenderContext<'a> {
    pub phraser: &'a dyn Phraser,
    /// Transaction depth after this query's own change; 0 outside a transaction.
    pub depth: i64,
}

/// Behaviour every query kind provides.
pub trait QueryKind: Clone + Send + Sync + std::fmt::Debug + 'static {
    const NAME: &'static str;

    /// Render the statement this query sends.
    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement>;

    /// Turn the driver's raw result into this kind's result value.
    fn process_result(&self, raw: QueryOutput) -> DbResult<JsonValue> {
        Ok(json!({ "rows_affected": raw.rows_affected }))
    }

    /// How the query moves the depth of its transaction.
    fn depth_change(&self) -> i64 {
        0
    }
}

/// Comparison operator for filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
        }
    }
}

/// One filter; filters on a query are joined with AND.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: String,
        op: Op,
        value: SqlValue,
    },
    In {
        column: String,
        values: Vec<SqlValue>,
    },
    Null {
        column: String,
        negated: bool,
    },
    Raw {
        sql: String,
        args: Vec<SqlValue>,
    },
}

fn write_conditions(w: &mut SqlWriter<'_>, conditions: &[Condition]) -> DbResult<()> {
    for (i, condition) in conditions.iter().enumerate() {
        w.push(if i == 0 { " WHERE " } else { " AND " });
        match condition {
            Condition::Compare { column, op, value } => {
                w.push_ident(column)
                    .push(" ")
                    .push(op.as_sql())
                    .push(" ")
                    .push_value(value.clone());
            }
            // An empty IN list matches nothing.
            Condition::In { values, .. } if values.is_empty() => {
                w.push("1 = 0");
            }
            Condition::In { column, values } => {
                w.push_ident(column).push(" IN (");
                for (j, value) in values.iter().enumerate() {
                    if j > 0 {
                        w.push(", ");
                    }
                    w.push_value(value.clone());
                }
                w.push(")");
            }
            Condition::Null { column, negated } => {
                w.push_ident(column)
                    .push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Condition::Raw { sql, args } => {
                w.push("(").push_raw(sql, args)?.push(")");
            }
        }
    }
    Ok(())
}

/// Kinds that accept WHERE filters.
pub trait Filterable: QueryKind {
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

impl<K: Filterable> Query<K> {
    pub fn where_op(&self, column: impl Into<String>, op: Op, value: impl Into<SqlValue>) -> Self {
        let condition = Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        };
        self.derive(move |draft| draft.kind.conditions_mut().push(condition))
    }

    pub fn where_eq(&self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.where_op(column, Op::Eq, value)
    }

    pub fn where_in<V: Into<SqlValue>>(
        &self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let condition = Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        };
        self.derive(move |draft| draft.kind.conditions_mut().push(condition))
    }

    pub fn where_null(&self, column: impl Into<String>) -> Self {
        let condition = Condition::Null {
            column: column.into(),
            negated: false,
        };
        self.derive(move |draft| draft.kind.conditions_mut().push(condition))
    }

    pub fn where_not_null(&self, column: impl Into<String>) -> Self {
        let condition = Condition::Null {
            column: column.into(),
            negated: true,
        };
        self.derive(move |draft| draft.kind.conditions_mut().push(condition))
    }

    /// Raw filter; `?` marks positional arguments.
    pub fn where_raw(&self, sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        let condition = Condition::Raw {
            sql: sql.into(),
            args,
        };
        self.derive(move |draft| draft.kind.conditions_mut().push(condition))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// ORDER BY / LIMIT / OFFSET settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ordering {
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Kinds that accept ordering and paging.
pub trait Orderable: QueryKind {
    fn ordering_mut(&mut self) -> &mut Ordering;
}

impl<K: Orderable> Query<K> {
    pub fn order_by(&self, column: impl Into<String>, direction: Direction) -> Self {
        let column = column.into();
        self.derive(move |draft| draft.kind.ordering_mut().order_by.push((column, direction)))
    }

    pub fn limit(&self, limit: u64) -> Self {
        self.derive(move |draft| draft.kind.ordering_mut().limit = Some(limit))
    }

    pub fn offset(&self, offset: u64) -> Self {
        self.derive(move |draft| draft.kind.ordering_mut().offset = Some(offset))
    }
}

/// Base of a query family. It configures shared state but sends nothing itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Root;

impl QueryKind for Root {
    const NAME: &'static str = "root";

    fn render(&self, _cx: &RenderContext<'_>) -> DbResult<Statement> {
        Err(DbError::invalid_input(
            "A root query has no statement; build a concrete query from it first",
        ))
    }
}

/// Statement text supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Raw {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

impl Raw {
    pub fn new(sql: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

impl QueryKind for Raw {
    const NAME: &'static str = "raw";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        let mut w = SqlWriter::new(cx.phraser);
        w.push_raw(&self.sql, &self.args)?;
        Ok(w.finish())
    }

    fn process_result(&self, raw: QueryOutput) -> DbResult<JsonValue> {
        serde_json::to_value(raw).map_err(|e| DbError::internal(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub conditions: Vec<Condition>,
    pub ordering: Ordering,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            conditions: Vec::new(),
            ordering: Ordering::default(),
        }
    }
}

impl QueryKind for Select {
    const NAME: &'static str = "select";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        let mut w = SqlWriter::new(cx.phraser);
        w.push("SELECT ");
        if self.columns.is_empty() {
            w.push("*");
        } else {
            w.push_idents(&self.columns);
        }
        w.push(" FROM ").push_ident(&self.table);
        write_conditions(&mut w, &self.conditions)?;
        for (i, (column, direction)) in self.ordering.order_by.iter().enumerate() {
            w.push(if i == 0 { " ORDER BY " } else { ", " })
                .push_ident(column)
                .push(match direction {
                    Direction::Asc => " ASC",
                    Direction::Desc => " DESC",
                });
        }
        match (self.ordering.limit, self.ordering.offset) {
            (Some(limit), _) => {
                w.push(&format!(" LIMIT {}", limit));
            }
            // SQLite and MySQL only accept OFFSET after a LIMIT.
            (None, Some(_)) => match cx.phraser.database_type() {
                DatabaseType::SQLite => {
                    w.push(" LIMIT -1");
                }
                DatabaseType::MySql => {
                    w.push(" LIMIT 18446744073709551615");
                }
                DatabaseType::Postgres => {}
            },
            (None, None) => {}
        }
        if let Some(offset) = self.ordering.offset {
            w.push(&format!(" OFFSET {}", offset));
        }
        Ok(w.finish())
    }

    fn process_result(&self, raw: QueryOutput) -> DbResult<JsonValue> {
        Ok(JsonValue::Array(
            raw.rows.into_iter().map(JsonValue::Object).collect(),
        ))
    }
}

impl Filterable for Select {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Orderable for Select {
    fn ordering_mut(&mut self) -> &mut Ordering {
        &mut self.ordering
    }
}

impl Query<Select> {
    /// Restrict the selected columns (default: all).
    pub fn columns<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        self.derive(move |draft| draft.kind.columns.extend(columns))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl Insert {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl QueryKind for Insert {
    const NAME: &'static str = "insert";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if self.rows.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Insert into '{}' has no rows",
                self.table
            )));
        }
        let mut w = SqlWriter::new(cx.phraser);
        w.push("INSERT INTO ")
            .push_ident(&self.table)
            .push(" (")
            .push_idents(&self.columns)
            .push(") VALUES ");
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(DbError::invalid_input(format!(
                    "Row {} of insert into '{}' has {} values for {} columns",
                    i,
                    self.table,
                    row.len(),
                    self.columns.len()
                )));
            }
            w.push(if i == 0 { "(" } else { ", (" });
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    w.push(", ");
                }
                w.push_value(value.clone());
            }
            w.push(")");
        }
        Ok(w.finish())
    }

    fn process_result(&self, raw: QueryOutput) -> DbResult<JsonValue> {
        Ok(json!({
            "rows_affected": raw.rows_affected,
            "last_insert_id": raw.last_insert_id,
        }))
    }
}

impl Insert {
    fn push_row(&mut self, columns: Vec<String>, values: Vec<SqlValue>) {
        if self.columns.is_empty() {
            self.columns = columns;
            self.rows.push(values);
            return;
        }
        // Reorder to the established column list; missing columns become NULL.
        let mut ordered = vec![SqlValue::Null; self.columns.len()];
        for (column, value) in columns.into_iter().zip(values) {
            match self.columns.iter().position(|c| *c == column) {
                Some(idx) => ordered[idx] = value,
                None => {
                    self.columns.push(column);
                    for existing in self.rows.iter_mut() {
                        existing.push(SqlValue::Null);
                    }
                    ordered.push(value);
                }
            }
        }
        self.rows.push(ordered);
    }
}

fn split_row<C, V>(row: impl IntoIterator<Item = (C, V)>) -> (Vec<String>, Vec<SqlValue>)
where
    C: Into<String>,
    V: Into<SqlValue>,
{
    row.into_iter().map(|(c, v)| (c.into(), v.into())).unzip()
}

impl Query<Insert> {
    /// Add one row. The first row fixes the column list; later rows must match it.
    pub fn values<C, V>(&self, row: impl IntoIterator<Item = (C, V)>) -> Self
    where
        C: Into<String>,
        V: Into<SqlValue>,
    {
        let (columns, values) = split_row(row);
        self.derive(move |draft| draft.kind.push_row(columns, values))
    }

    /// Add several rows at once.
    pub fn rows<R, C, V>(&self, rows: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<SqlValue>,
    {
        let rows: Vec<_> = rows.into_iter().map(split_row).collect();
        self.derive(move |draft| {
            for (columns, values) in rows {
                draft.kind.push_row(columns, values);
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, SqlValue)>,
    pub conditions: Vec<Condition>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            conditions: Vec::new(),
        }
    }
}

impl QueryKind for Update {
    const NAME: &'static str = "update";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if self.assignments.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Update of '{}' sets no columns",
                self.table
            )));
        }
        let mut w = SqlWriter::new(cx.phraser);
        w.push("UPDATE ").push_ident(&self.table).push(" SET ");
        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push_ident(column).push(" = ").push_value(value.clone());
        }
        write_conditions(&mut w, &self.conditions)?;
        Ok(w.finish())
    }
}

impl Filterable for Update {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Query<Update> {
    pub fn set(&self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let assignment = (column.into(), value.into());
        self.derive(move |draft| draft.kind.assignments.push(assignment))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub conditions: Vec<Condition>,
}

impl Delete {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
        }
    }
}

impl QueryKind for Delete {
    const NAME: &'static str = "delete";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        let mut w = SqlWriter::new(cx.phraser);
        w.push("DELETE FROM ").push_ident(&self.table);
        write_conditions(&mut w, &self.conditions)?;
        Ok(w.finish())
    }
}

impl Filterable for Delete {
    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

fn savepoint_name(level: i64) -> String {
    format!("sp_{}", level)
}

/// Opens a transaction, or a savepoint when one is already open.
#[derive(Debug, Clone, Copy, Default)]
pub struct Begin;

impl QueryKind for Begin {
    const NAME: &'static str = "begin";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if cx.depth <= 1 {
            return Ok(cx.phraser.begin());
        }
        Ok(cx.phraser.savepoint(&savepoint_name(cx.depth)))
    }

    fn depth_change(&self) -> i64 {
        1
    }
}

/// Closes the innermost open level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Commit;

impl QueryKind for Commit {
    const NAME: &'static str = "commit";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if cx.depth <= 0 {
            return Ok(cx.phraser.commit());
        }
        Ok(cx.phraser.release_savepoint(&savepoint_name(cx.depth + 1)))
    }

    fn depth_change(&self) -> i64 {
        -1
    }
}

/// Undoes the innermost open level.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rollback;

impl QueryKind for Rollback {
    const NAME: &'static str = "rollback";

    fn render(&self, cx: &RenderContext<'_>) -> DbResult<Statement> {
        if cx.depth <= 0 {
            return Ok(cx.phraser.rollback());
        }
        Ok(cx.phraser.rollback_to_savepoint(&savepoint_name(cx.depth + 1)))
    }

    fn depth_change(&self) -> i64 {
        -1
    }
}
