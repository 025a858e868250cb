//! Relation definitions between tables.

use crate::value::Value;

/// How two tables relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The local table holds the foreign key
    BelongsTo,
    /// The foreign table holds the foreign key; at most one row
    HasOne,
    /// The foreign table holds the foreign key; any number of rows
    HasMany,
}

/// SQL join type used when a relation is resolved into a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A named relation from one table to another.
///
/// Relation names are conventionally CamelCase so dotted column specs
/// (`Team.name`) are visually distinct from plain column names.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Name used in dotted column specs and relation lookups
    pub name: String,
    pub kind: RelationKind,
    /// Column on the local table participating in the match
    pub local_column: String,
    /// The related table, as registered in the schema registry
    pub foreign_table: String,
    /// Column on the foreign table participating in the match
    pub foreign_column: String,
    /// Join type override; defaults to LEFT when joined
    pub join_kind: Option<JoinKind>,
    /// Extra equality conditions applied to the join or fetch
    pub extra_conditions: Vec<(String, Value)>,
    /// Restrict which foreign columns a wildcard pulls in
    pub columns_to_select: Option<Vec<String>>,
}

impl Relation {
    /// A relation where the local table holds the foreign key.
    pub fn belongs_to(
        name: impl Into<String>,
        local_column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self::new(RelationKind::BelongsTo, name, local_column, foreign_table, foreign_column)
    }

    /// A one-to-at-most-one relation keyed on the foreign table.
    pub fn has_one(
        name: impl Into<String>,
        local_column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self::new(RelationKind::HasOne, name, local_column, foreign_table, foreign_column)
    }

    /// A one-to-many relation keyed on the foreign table.
    pub fn has_many(
        name: impl Into<String>,
        local_column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self::new(RelationKind::HasMany, name, local_column, foreign_table, foreign_column)
    }

    fn new(
        kind: RelationKind,
        name: impl Into<String>,
        local_column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            local_column: local_column.into(),
            foreign_table: foreign_table.into(),
            foreign_column: foreign_column.into(),
            join_kind: None,
            extra_conditions: Vec::new(),
            columns_to_select: None,
        }
    }

    /// Override the join type used when this relation is joined.
    #[must_use]
    pub const fn with_join_kind(mut self, kind: JoinKind) -> Self {
        self.join_kind = Some(kind);
        self
    }

    /// Add an extra equality condition on the foreign table.
    #[must_use]
    pub fn with_condition(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_conditions.push((column.into(), value.into()));
        self
    }

    /// Restrict the foreign columns a wildcard spec pulls in.
    #[must_use]
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns_to_select = Some(columns);
        self
    }

    /// Can this relation be resolved into a SQL join?
    ///
    /// HasMany relations would multiply the local rows, so they are
    /// fetched as separate queries instead.
    pub const fn can_be_joined(&self) -> bool {
        !matches!(self.kind, RelationKind::HasMany)
    }

    /// The join type to use, defaulting to LEFT.
    pub fn effective_join_kind(&self) -> JoinKind {
        self.join_kind.unwrap_or(JoinKind::Left)
    }
}
