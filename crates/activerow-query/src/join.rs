//! Resolved SQL join clauses.

use activerow_core::identifiers::quote_ident;
use activerow_core::{JoinKind, QueryError, Relation, Result, Value};

/// A resolved, SQL-ready description of one join.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Name this join is registered under (the path-qualified alias
    /// for relation-derived joins, so `Team__Org` never collides with
    /// a top-level `Org`)
    pub join_name: String,
    pub kind: JoinKind,
    /// The joined table
    pub table: String,
    /// Alias the joined table is selected under
    pub alias: String,
    /// Alias of the table the ON clause's local side refers to
    pub local_alias: String,
    pub local_column: String,
    pub foreign_column: String,
    /// Extra equality conditions on the joined table
    pub extra_conditions: Vec<(String, Value)>,
    /// Restrict which joined columns a wildcard pulls in
    pub columns_to_select: Option<Vec<String>>,
}

impl JoinSpec {
    /// Build a join from a declared relation.
    ///
    /// HasMany relations would multiply the local rows and are
    /// rejected; they must be fetched as a separate query.
    pub fn from_relation(relation: &Relation, local_alias: &str, alias: &str) -> Result<Self> {
        if !relation.can_be_joined() {
            return Err(QueryError::has_many_join(&relation.name).into());
        }
        Ok(Self {
            join_name: alias.to_string(),
            kind: relation.effective_join_kind(),
            table: relation.foreign_table.clone(),
            alias: alias.to_string(),
            local_alias: local_alias.to_string(),
            local_column: relation.local_column.clone(),
            foreign_column: relation.foreign_column.clone(),
            extra_conditions: relation.extra_conditions.clone(),
            columns_to_select: relation.columns_to_select.clone(),
        })
    }

    /// Render this join, appending parameters for extra conditions.
    pub fn build_sql(&self, params: &mut Vec<Value>) -> String {
        let mut sql = format!(
            "{} {} AS {} ON {}.{} = {}.{}",
            self.kind.as_sql(),
            quote_ident(&self.table),
            quote_ident(&self.alias),
            quote_ident(&self.alias),
            quote_ident(&self.foreign_column),
            quote_ident(&self.local_alias),
            quote_ident(&self.local_column),
        );
        for (column, value) in &self.extra_conditions {
            params.push(value.clone());
            sql.push_str(&format!(
                " AND {}.{} = ${}",
                quote_ident(&self.alias),
                quote_ident(column),
                params.len()
            ));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use activerow_core::QueryErrorKind;

    #[test]
    fn relation_join_sql() {
        let relation = Relation::belongs_to("Team", "team_id", "teams", "id");
        let join = JoinSpec::from_relation(&relation, "users", "Team").unwrap();
        let mut params = Vec::new();
        assert_eq!(
            join.build_sql(&mut params),
            "LEFT JOIN \"teams\" AS \"Team\" ON \"Team\".\"id\" = \"users\".\"team_id\""
        );
        assert!(params.is_empty());
    }

    #[test]
    fn extra_conditions_bind_params() {
        let relation = Relation::belongs_to("Team", "team_id", "teams", "id")
            .with_condition("active", true);
        let join = JoinSpec::from_relation(&relation, "users", "Team").unwrap();
        let mut params = Vec::new();
        let sql = join.build_sql(&mut params);
        assert!(sql.ends_with("AND \"Team\".\"active\" = $1"));
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn has_many_is_rejected() {
        let relation = Relation::has_many("Items", "id", "items", "user_id");
        let err = JoinSpec::from_relation(&relation, "orders", "Items").unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::HasManyJoin));
    }
}
