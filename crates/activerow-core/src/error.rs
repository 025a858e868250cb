//! Error types for ActiveRow operations.

use std::fmt;

/// The primary error type for all ActiveRow operations.
#[derive(Debug)]
pub enum Error {
    /// One or more column values failed validation
    Validation(ValidationErrors),
    /// Column definition or column-level state errors
    Column(ColumnError),
    /// Record-level state errors
    Record(RecordError),
    /// Query/column specification errors
    Query(QueryError),
    /// Database-reported errors
    Db(DbError),
    /// Transaction state errors
    Transaction(TransactionError),
    /// Serialization/deserialization errors
    Serde(String),
}

/// Validation errors grouped per column.
///
/// Surfaced to the caller before any DB write occurs; never partially
/// applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    /// Errors in the order they were recorded.
    pub errors: Vec<ColumnValidationError>,
}

/// A single validation failure for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValidationError {
    /// The column that failed validation
    pub column: String,
    /// The kind of check that failed
    pub kind: ValueErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// The kind of value check that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueErrorKind {
    /// Value is null but the column is not nullable
    CannotBeNull,
    /// Value's type does not fit the column's declared type
    InvalidType,
    /// Value's format is wrong (email, IPv4, JSON text, ...)
    InvalidFormat,
    /// Value is not in the column's allowed set
    NotInAllowedValues,
    /// Custom validation failed
    Custom,
}

impl ValidationErrors {
    /// Create a new empty container.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Check if there are any errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error.
    pub fn add(
        &mut self,
        column: impl Into<String>,
        kind: ValueErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(ColumnValidationError {
            column: column.into(),
            kind,
            message: message.into(),
        });
    }

    /// Add a not-null violation.
    pub fn add_cannot_be_null(&mut self, column: impl Into<String>) {
        self.add(column, ValueErrorKind::CannotBeNull, "value cannot be null");
    }

    /// Add a type-fit violation.
    pub fn add_invalid_type(&mut self, column: impl Into<String>, expected: &str, actual: &str) {
        self.add(
            column,
            ValueErrorKind::InvalidType,
            format!("expected {expected}, got {actual}"),
        );
    }

    /// Add a format violation.
    pub fn add_invalid_format(&mut self, column: impl Into<String>, format: &str) {
        self.add(
            column,
            ValueErrorKind::InvalidFormat,
            format!("value is not a valid {format}"),
        );
    }

    /// Add an allowed-values violation.
    pub fn add_not_allowed(&mut self, column: impl Into<String>) {
        self.add(
            column,
            ValueErrorKind::NotInAllowedValues,
            "value is not in the set of allowed values",
        );
    }

    /// Merge errors from another container.
    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// The kinds recorded, in order.
    pub fn kinds(&self) -> Vec<ValueErrorKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }

    /// Check whether a specific kind was recorded for a column.
    pub fn contains(&self, column: &str, kind: ValueErrorKind) -> bool {
        self.errors
            .iter()
            .any(|e| e.column == column && e.kind == kind)
    }

    /// Convert to Result, returning Ok(()) if no errors.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Column definition or column-level state error.
#[derive(Debug, Clone)]
pub struct ColumnError {
    pub kind: ColumnErrorKind,
    pub column: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnErrorKind {
    /// Client code attempted to write a read-only column
    ReadOnly,
    /// `set_value` called twice on the same container
    ValueAlreadySet,
    /// Payload written before any value was set on a persisted column
    PayloadBeforeValue,
    /// Declared default value failed the column's own validation
    InvalidDefaultValue,
    /// Column name is not valid snake_case
    InvalidName,
    /// Enum column declared without allowed values
    NoAllowedValues,
}

impl ColumnError {
    pub fn read_only(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            message: format!("column '{column}' is read-only and cannot be set by client code"),
            kind: ColumnErrorKind::ReadOnly,
            column,
        }
    }

    pub fn value_already_set(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            message: format!(
                "value container for column '{column}' already holds a value; use a fresh container"
            ),
            kind: ColumnErrorKind::ValueAlreadySet,
            column,
        }
    }

    pub fn payload_before_value(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            message: format!("cannot attach payload to column '{column}' before a value is set"),
            kind: ColumnErrorKind::PayloadBeforeValue,
            column,
        }
    }

    pub fn invalid_default(column: impl Into<String>, detail: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            message: format!(
                "default value for column '{column}' is invalid: {}",
                detail.into()
            ),
            kind: ColumnErrorKind::InvalidDefaultValue,
            column,
        }
    }

    pub fn invalid_name(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            message: format!("column name '{column}' must match ^[a-z_][a-z0-9_]*$"),
            kind: ColumnErrorKind::InvalidName,
            column,
        }
    }

    pub fn no_allowed_values(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            message: format!("enum column '{column}' requires a non-empty set of allowed values"),
            kind: ColumnErrorKind::NoAllowedValues,
            column,
        }
    }
}

/// Record-level state error.
#[derive(Debug, Clone)]
pub struct RecordError {
    pub kind: RecordErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// Mutation attempted on a read-only snapshot record
    ReadOnly,
    /// Client attempted to change a DB-loaded primary key
    PrimaryKeyConflict,
    /// Reload/read found zero matching rows
    NotFound,
    /// `begin()` called on a record that does not exist in the DB
    BeginOnNonexistentRecord,
    /// `begin()` called while already collecting updates
    AlreadyCollecting,
    /// `commit()`/`rollback()` called without `begin()`
    NotCollecting,
    /// DB-sourced update attempted during collecting mode
    DbUpdateDuringCollect,
    /// Saving is disabled for this record
    SavingForbidden,
    /// Operation requires a primary key value
    NoPrimaryKeyValue,
    /// Operation not allowed while trust mode is active
    TrustModeActive,
}

impl RecordError {
    pub fn new(kind: RecordErrorKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Query/column-specification error.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Offending column or relation name
    pub name: String,
    /// Owning table or alias, when known
    pub table: Option<String>,
    /// Which part of the query referenced the name
    pub subject: Option<QuerySubject>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Column name not declared on the owning table
    UnknownColumn,
    /// Relation name not declared on the owning table
    UnknownRelation,
    /// Foreign table not registered in the schema registry
    UnknownTable,
    /// HasMany relation used as a SQL join
    HasManyJoin,
    /// Malformed column specification
    InvalidColumnSpec,
}

/// The query part a name was referenced from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySubject {
    Select,
    Where,
    Having,
    OrderBy,
    GroupBy,
    Join,
    Record,
}

impl QuerySubject {
    pub const fn as_str(&self) -> &'static str {
        match self {
            QuerySubject::Select => "SELECT",
            QuerySubject::Where => "WHERE",
            QuerySubject::Having => "HAVING",
            QuerySubject::OrderBy => "ORDER BY",
            QuerySubject::GroupBy => "GROUP BY",
            QuerySubject::Join => "JOIN",
            QuerySubject::Record => "record",
        }
    }
}

impl QueryError {
    pub fn unknown_column(
        subject: QuerySubject,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        let table = table.into();
        Self {
            message: format!(
                "unknown column '{column}' referenced from {} (table '{table}')",
                subject.as_str()
            ),
            kind: QueryErrorKind::UnknownColumn,
            name: column,
            table: Some(table),
            subject: Some(subject),
        }
    }

    pub fn unknown_relation(table: impl Into<String>, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        let table = table.into();
        Self {
            message: format!("unknown relation '{relation}' on table '{table}'"),
            kind: QueryErrorKind::UnknownRelation,
            name: relation,
            table: Some(table),
            subject: None,
        }
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            message: format!("table '{table}' is not registered in the schema registry"),
            kind: QueryErrorKind::UnknownTable,
            name: table,
            table: None,
            subject: None,
        }
    }

    pub fn has_many_join(relation: impl Into<String>) -> Self {
        let relation = relation.into();
        Self {
            message: format!(
                "relation '{relation}' is HasMany and cannot be joined; fetch it as a separate query"
            ),
            kind: QueryErrorKind::HasManyJoin,
            name: relation,
            table: None,
            subject: None,
        }
    }

    pub fn invalid_column_spec(spec: impl Into<String>, detail: impl Into<String>) -> Self {
        let spec = spec.into();
        Self {
            message: format!("invalid column spec '{spec}': {}", detail.into()),
            kind: QueryErrorKind::InvalidColumnSpec,
            name: spec,
            table: None,
            subject: None,
        }
    }
}

/// Database-reported error.
#[derive(Debug, Clone)]
pub struct DbError {
    pub message: String,
    pub sqlstate: Option<String>,
    pub sql: Option<String>,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
            sql: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

/// Transaction state error.
#[derive(Debug, Clone)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// `begin` while a transaction is already open
    AlreadyOpen,
    /// `commit`/`rollback` without an open transaction
    NotOpen,
}

impl Error {
    /// Is this a validation error?
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Borrow the validation errors, if any.
    pub fn as_validation(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }

    /// The record error kind, if this is a record error.
    pub fn record_kind(&self) -> Option<RecordErrorKind> {
        match self {
            Error::Record(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The query error kind, if this is a query error.
    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The column error kind, if this is a column error.
    pub fn column_kind(&self) -> Option<ColumnErrorKind> {
        match self {
            Error::Column(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {e}"),
            Error::Column(e) => write!(f, "Column error: {}", e.message),
            Error::Record(e) => write!(f, "Record error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Db(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Database error (SQLSTATE {sqlstate}): {}", e.message)
                } else {
                    write!(f, "Database error: {}", e.message)
                }
            }
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {msg}"),
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "column '{}': {}", err.column, err.message)
        } else {
            writeln!(f, "multiple columns failed validation:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.column, err.message)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for ColumnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {sqlstate})", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}
impl std::error::Error for ValidationErrors {}

impl From<ValidationErrors> for Error {
    fn from(err: ValidationErrors) -> Self {
        Error::Validation(err)
    }
}

impl From<ColumnError> for Error {
    fn from(err: ColumnError) -> Self {
        Error::Column(err)
    }
}

impl From<RecordError> for Error {
    fn from(err: RecordError) -> Self {
        Error::Record(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Error::Db(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for ActiveRow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_collects_and_reports() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());
        errors.add_cannot_be_null("age");
        errors.add_invalid_format("email", "email address");
        assert_eq!(errors.errors.len(), 2);
        assert!(errors.contains("age", ValueErrorKind::CannotBeNull));
        assert!(!errors.contains("age", ValueErrorKind::InvalidFormat));
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn error_kind_accessors() {
        let err = Error::from(QueryError::has_many_join("Items"));
        assert_eq!(err.query_kind(), Some(QueryErrorKind::HasManyJoin));
        assert!(err.record_kind().is_none());

        let err = Error::from(RecordError::new(
            RecordErrorKind::NotFound,
            "users",
            "record not found",
        ));
        assert_eq!(err.record_kind(), Some(RecordErrorKind::NotFound));
    }

    #[test]
    fn unknown_column_names_subject_and_table() {
        let err = QueryError::unknown_column(QuerySubject::Where, "users", "nope");
        assert!(err.message.contains("WHERE"));
        assert!(err.message.contains("users"));
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn sqlstate_helpers() {
        let mut db = DbError::new("duplicate key");
        db.sqlstate = Some("23505".to_string());
        assert!(db.is_unique_violation());
        assert!(!db.is_foreign_key_violation());
    }
}
