//! Relation-aware SQL SELECT building for ActiveRow.
//!
//! - `Condition` trees for WHERE/HAVING clauses
//! - `JoinSpec` resolved join clauses
//! - `SelectBuilder` turning declared relations into SQL joins

pub mod condition;
pub mod join;
pub mod select;

pub use condition::{Condition, NullsOrder, OrderBy, OrderDirection};
pub use join::JoinSpec;
pub use select::{ColumnsSpec, SelectBuilder};
