//! Active-Record-style ORM with a strict column value pipeline and
//! relation-aware query building.
//!
//! Every incoming value passes through its column's pipeline
//! (preprocess, validate, normalize) before it is committed into a
//! set-once container; a [`Record`] orchestrates those containers
//! through save, fetch and delete against a [`Connection`];
//! [`SelectBuilder`] turns dotted relation paths into SQL joins with
//! prefixed aliases that hydrate back into nested records.
//!
//! ```
//! use activerow::{ColumnSpec, MemoryTable, Record, Row, ScriptedConnection, Value};
//!
//! let schema = MemoryTable::new(
//!     "doc_users",
//!     vec![ColumnSpec::id("id")?, ColumnSpec::string("name")?],
//! )?
//! .register();
//!
//! let mut user = Record::new(schema);
//! user.set_value("name", "ada")?;
//!
//! let conn = ScriptedConnection::new();
//! conn.expect_rows(vec![Row::new(
//!     vec!["id".into(), "name".into()],
//!     vec![Value::Int(1), Value::from("ada")],
//! )]);
//! user.save(&conn)?;
//! assert_eq!(user.primary_key_value(), Some(&Value::Int(1)));
//! # Ok::<(), activerow::Error>(())
//! ```

pub use activerow_core::{
    AllowedValues, ColumnBehavior, ColumnError, ColumnErrorKind, ColumnInfo, ColumnSpec,
    ColumnType, ColumnValidationError, Connection, DbError, DefaultColumnBehavior, DefaultValue,
    Error, JoinKind, QueryError, QueryErrorKind, QuerySubject, RecordError, RecordErrorKind,
    RecordValue, Relation, RelationKind, Result, Row, SchemaRegistry, TableSchema,
    TransactionError, TransactionErrorKind, UniqueSpec, ValidationErrors, Value, ValueErrorKind,
    ValueSnapshot, ValueUpdate,
};
pub use activerow_query::{
    ColumnsSpec, Condition, JoinSpec, NullsOrder, OrderBy, OrderDirection, SelectBuilder,
};
pub use activerow_record::{
    MemoryTable, Record, RecordCollection, RecordSnapshot, RecordState, RecordsSource,
    RelatedData, SaveOutcome, ScriptedConnection, ScriptedResponse, SnapshotProps,
};
