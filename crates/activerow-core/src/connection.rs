//! Database connection abstraction.

use crate::error::{DbError, Result, TransactionError, TransactionErrorKind};
use crate::identifiers;
use crate::row::Row;
use crate::value::Value;

/// A synchronous database connection.
///
/// Implementations take `&self` and use interior mutability for
/// transaction state; the record layer threads one connection through
/// a whole save or delete.
pub trait Connection {
    /// Run a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a query expected to return at most one row.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut rows = self.query(sql, params)?;
        if rows.len() > 1 {
            return Err(DbError::new(format!(
                "expected at most one row, got {}",
                rows.len()
            ))
            .with_sql(sql)
            .into());
        }
        Ok(rows.pop())
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a statement with a RETURNING clause.
    fn execute_returning(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query(sql, params)
    }

    /// Open a transaction.
    fn begin(&self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    fn rollback(&self) -> Result<()>;

    /// Is a transaction currently open on this connection?
    fn in_transaction(&self) -> bool;

    /// Quote an identifier for this connection's SQL dialect.
    fn quote_ident(&self, name: &str) -> String {
        identifiers::quote_ident(name)
    }
}

/// Build the error for opening a transaction that is already open.
pub fn transaction_already_open() -> TransactionError {
    TransactionError {
        kind: TransactionErrorKind::AlreadyOpen,
        message: "a transaction is already open on this connection".to_string(),
    }
}

/// Build the error for closing a transaction that is not open.
pub fn transaction_not_open() -> TransactionError {
    TransactionError {
        kind: TransactionErrorKind::NotOpen,
        message: "no transaction is open on this connection".to_string(),
    }
}
