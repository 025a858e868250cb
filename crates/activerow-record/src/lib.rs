//! Record orchestration for ActiveRow.
//!
//! - `Record` save/fetch/delete lifecycle over a [`TableSchema`]
//! - `RecordCollection` lazily-materialized result sets with batched
//!   relation loading
//! - `MemoryTable` runtime schemas and `ScriptedConnection` for tests
//!   and dynamic callers
//!
//! [`TableSchema`]: activerow_core::TableSchema

pub mod collection;
pub mod memory;
pub mod record;

pub use collection::{RecordCollection, RecordsSource};
pub use memory::{MemoryTable, ScriptedConnection, ScriptedResponse};
pub use record::{
    Record, RecordSnapshot, RecordState, RelatedData, SaveOutcome, SnapshotProps,
};
