//! Runtime-built table schemas and a scripted connection.
//!
//! `MemoryTable` builds a [`TableSchema`] from a runtime column list,
//! keyed by an opaque table name rather than a concrete type; tests and
//! dynamic callers use it instead of declaring a schema type.
//! `ScriptedConnection` replays canned responses and records every
//! statement it receives.

use activerow_core::{
    ColumnSpec, Connection, DbError, Relation, Result, Row, SchemaRegistry, TableSchema, Value,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

/// A table schema assembled at runtime from a column list.
#[derive(Debug)]
pub struct MemoryTable {
    table_name: String,
    schema_name: Option<String>,
    columns: Vec<ColumnSpec>,
    relations: Vec<Relation>,
    pk_index: usize,
}

impl MemoryTable {
    /// Build a table from its columns.
    ///
    /// Exactly one column must be marked as the primary key.
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self> {
        let table_name = table_name.into();
        let pk_indexes: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let [pk_index] = pk_indexes[..] else {
            return Err(DbError::new(format!(
                "table '{table_name}' must declare exactly one primary key column, found {}",
                pk_indexes.len()
            ))
            .into());
        };
        Ok(Self {
            table_name,
            schema_name: None,
            columns,
            relations: Vec::new(),
            pk_index,
        })
    }

    #[must_use]
    pub fn with_relations(mut self, relations: Vec<Relation>) -> Self {
        self.relations = relations;
        self
    }

    #[must_use]
    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    /// Register this table in the process-wide schema registry and
    /// return the shared handle.
    pub fn register(self) -> Arc<dyn TableSchema> {
        let schema: Arc<dyn TableSchema> = Arc::new(self);
        SchemaRegistry::register(Arc::clone(&schema));
        schema
    }
}

impl TableSchema for MemoryTable {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn relations(&self) -> &[Relation] {
        &self.relations
    }

    fn primary_key(&self) -> &ColumnSpec {
        &self.columns[self.pk_index]
    }
}

/// A canned response for one statement.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Rows for a query or RETURNING statement
    Rows(Vec<Row>),
    /// Affected-row count for a plain statement
    Affected(u64),
    /// A database error
    Error(String),
}

/// A connection that replays scripted responses in order.
///
/// Every statement, including BEGIN/COMMIT/ROLLBACK, is appended to the
/// statement log so tests can assert on exactly what was sent.
#[derive(Debug, Default)]
pub struct ScriptedConnection {
    responses: RefCell<VecDeque<ScriptedResponse>>,
    statements: RefCell<Vec<(String, Vec<Value>)>>,
    tx_open: Cell<bool>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a row-producing response.
    pub fn expect_rows(&self, rows: Vec<Row>) -> &Self {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::Rows(rows));
        self
    }

    /// Queue an affected-count response.
    pub fn expect_affected(&self, count: u64) -> &Self {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::Affected(count));
        self
    }

    /// Queue a database error.
    pub fn expect_error(&self, message: impl Into<String>) -> &Self {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::Error(message.into()));
        self
    }

    /// Every statement sent so far, in order.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.borrow().clone()
    }

    /// SQL texts only, for coarse assertions.
    pub fn statement_sql(&self) -> Vec<String> {
        self.statements
            .borrow()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    fn log(&self, sql: &str, params: &[Value]) {
        self.statements
            .borrow_mut()
            .push((sql.to_string(), params.to_vec()));
    }

    fn next_response(&self, sql: &str) -> Result<ScriptedResponse> {
        match self.responses.borrow_mut().pop_front() {
            Some(ScriptedResponse::Error(message)) => {
                Err(DbError::new(message).with_sql(sql).into())
            }
            Some(response) => Ok(response),
            None => Err(DbError::new("scripted connection ran out of responses")
                .with_sql(sql)
                .into()),
        }
    }
}

impl Connection for ScriptedConnection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.log(sql, params);
        match self.next_response(sql)? {
            ScriptedResponse::Rows(rows) => Ok(rows),
            ScriptedResponse::Affected(_) => Err(DbError::new(
                "scripted response mismatch: expected rows, scripted an affected count",
            )
            .with_sql(sql)
            .into()),
            ScriptedResponse::Error(_) => unreachable!(),
        }
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.log(sql, params);
        match self.next_response(sql)? {
            ScriptedResponse::Affected(count) => Ok(count),
            ScriptedResponse::Rows(rows) => Ok(rows.len() as u64),
            ScriptedResponse::Error(_) => unreachable!(),
        }
    }

    fn begin(&self) -> Result<()> {
        if self.tx_open.get() {
            return Err(activerow_core::connection::transaction_already_open().into());
        }
        self.log("BEGIN", &[]);
        self.tx_open.set(true);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        if !self.tx_open.get() {
            return Err(activerow_core::connection::transaction_not_open().into());
        }
        self.log("COMMIT", &[]);
        self.tx_open.set(false);
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        if !self.tx_open.get() {
            return Err(activerow_core::connection::transaction_not_open().into());
        }
        self.log("ROLLBACK", &[]);
        self.tx_open.set(false);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.tx_open.get()
    }
}
