//! Core types and traits for ActiveRow.
//!
//! This crate provides the foundational abstractions for the record and
//! query layers:
//!
//! - `ColumnSpec` and the incoming-value pipeline
//! - `RecordValue` set-once value containers
//! - `Relation` declarations between tables
//! - `TableSchema` trait and the process-wide `SchemaRegistry`
//! - `Connection` trait for synchronous database access

pub mod column;
pub mod connection;
pub mod error;
pub mod identifiers;
pub mod record_value;
pub mod relation;
pub mod row;
pub mod schema;
pub mod value;

pub use column::{
    AllowedValues, ColumnBehavior, ColumnSpec, ColumnType, DefaultColumnBehavior, DefaultValue,
    UniqueSpec, ValueUpdate,
};
pub use connection::Connection;
pub use error::{
    ColumnError, ColumnErrorKind, ColumnValidationError, DbError, Error, QueryError,
    QueryErrorKind, QuerySubject, RecordError, RecordErrorKind, Result, TransactionError,
    TransactionErrorKind, ValidationErrors, ValueErrorKind,
};
pub use record_value::{RecordValue, ValueSnapshot};
pub use relation::{JoinKind, Relation, RelationKind};
pub use row::{ColumnInfo, Row};
pub use schema::{SchemaRegistry, TableSchema};
pub use value::Value;
