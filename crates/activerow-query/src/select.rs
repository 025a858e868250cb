//! Relation-aware SELECT builder.
//!
//! The builder holds the query's declarative state (requested columns,
//! conditions, ordering) and derives the SQL joins from declared
//! relations at build time. Auto-derived joins are never cached across
//! mutations; every build resolves them from scratch, so a mutated
//! query can never carry a stale join.

use crate::condition::{Condition, OrderBy};
use crate::join::JoinSpec;
use activerow_core::identifiers::{quote_ident, quote_qualified, sanitize_identifier};
use activerow_core::{
    Connection, JoinKind, QueryError, QuerySubject, RelationKind, Result, Row, SchemaRegistry,
    TableSchema, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

/// One requested column, possibly reaching through relations.
#[derive(Debug, Clone)]
pub enum ColumnsSpec {
    /// A plain column name, or a JSON selector expression
    Name(String),
    /// Every non-heavy persisted column
    Wildcard,
    /// Wildcard minus the named columns
    WildcardExcept(Vec<String>),
    /// Columns of a related table, recursively
    Relation(String, Vec<ColumnsSpec>),
}

impl ColumnsSpec {
    /// Parse a textual column spec.
    ///
    /// Accepted forms: `"name"`, `"*"`, `"Relation.column"`,
    /// `"Relation.Sub.column"`, `"Relation.*"`, and JSON selector
    /// expressions containing `->` which pass through unvalidated.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(QueryError::invalid_column_spec(spec, "empty column spec").into());
        }
        if spec == "*" {
            return Ok(ColumnsSpec::Wildcard);
        }
        if spec.contains("->") {
            return Ok(ColumnsSpec::Name(spec.to_string()));
        }
        match spec.rsplit_once('.') {
            None => Ok(ColumnsSpec::Name(spec.to_string())),
            Some((path, last)) => {
                if path.split('.').any(str::is_empty) || last.is_empty() {
                    return Err(
                        QueryError::invalid_column_spec(spec, "empty path segment").into()
                    );
                }
                let mut current = if last == "*" {
                    ColumnsSpec::Wildcard
                } else {
                    ColumnsSpec::Name(last.to_string())
                };
                for segment in path.split('.').rev() {
                    current = ColumnsSpec::Relation(segment.to_string(), vec![current]);
                }
                Ok(current)
            }
        }
    }
}

/// One item of the SELECT list.
#[derive(Debug, Clone)]
struct SelectItem {
    sql: String,
    /// Output alias; `None` for plain root-table columns
    alias: Option<String>,
    /// Set when the item is a plain column of the root table
    local_column: Option<String>,
    /// JSON selector expressions are excluded from DISTINCT-count
    /// column picking
    is_json_selector: bool,
}

/// A SELECT query against one root table and its declared relations.
#[derive(Clone)]
pub struct SelectBuilder {
    schema: Arc<dyn TableSchema>,
    table_alias: String,
    requested: Vec<ColumnsSpec>,
    explicit_joins: Vec<JoinSpec>,
    conditions: Option<Condition>,
    having: Option<Condition>,
    order_by: Vec<OrderBy>,
    group_by: Vec<String>,
    distinct: bool,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl std::fmt::Debug for SelectBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectBuilder")
            .field("table", &self.schema.table_name())
            .field("alias", &self.table_alias)
            .field("distinct", &self.distinct)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl SelectBuilder {
    /// Start a query against a table, aliased by its own name.
    pub fn new(schema: Arc<dyn TableSchema>) -> Self {
        let table_alias = schema.table_name().to_string();
        Self {
            schema,
            table_alias,
            requested: Vec::new(),
            explicit_joins: Vec::new(),
            conditions: None,
            having: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            distinct: false,
            limit: None,
            offset: None,
        }
    }

    /// Start a query for a registered table name.
    pub fn for_table(table_name: &str) -> Result<Self> {
        let schema =
            SchemaRegistry::get(table_name).ok_or_else(|| QueryError::unknown_table(table_name))?;
        Ok(Self::new(schema))
    }

    /// The root table's schema.
    pub fn schema(&self) -> &Arc<dyn TableSchema> {
        &self.schema
    }

    /// Replace the requested columns with parsed textual specs.
    pub fn columns(&mut self, specs: &[&str]) -> Result<&mut Self> {
        self.requested = specs
            .iter()
            .map(|spec| ColumnsSpec::parse(spec))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Replace the requested columns with structured specs.
    pub fn columns_spec(&mut self, specs: Vec<ColumnsSpec>) -> &mut Self {
        self.requested = specs;
        self
    }

    /// Request every non-heavy column except the named ones.
    pub fn wildcard_except(&mut self, exclusions: &[&str]) -> &mut Self {
        self.requested = vec![ColumnsSpec::WildcardExcept(
            exclusions.iter().map(ToString::to_string).collect(),
        )];
        self
    }

    /// AND a condition onto the WHERE clause.
    pub fn filter(&mut self, condition: Condition) -> &mut Self {
        self.conditions = Some(match self.conditions.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// AND a condition onto the HAVING clause.
    pub fn having(&mut self, condition: Condition) -> &mut Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn order_by(&mut self, order: OrderBy) -> &mut Self {
        self.order_by.push(order);
        self
    }

    pub fn group_by(&mut self, column: impl Into<String>) -> &mut Self {
        self.group_by.push(column.into());
        self
    }

    /// Register an explicit join, bypassing relation resolution.
    pub fn join(&mut self, join: JoinSpec) -> &mut Self {
        self.explicit_joins.push(join);
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Build the SELECT statement and its bound parameters.
    #[tracing::instrument(level = "debug", skip(self), fields(table = %self.schema.table_name()))]
    pub fn build(&self) -> Result<(String, Vec<Value>)> {
        let mut joins = self.explicit_joins.clone();
        let items = self.resolve_select_items(&mut joins)?;
        let symbols = self.resolve_symbols(&mut joins)?;

        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        let rendered: Vec<String> = items
            .iter()
            .map(|item| match &item.alias {
                Some(alias) => format!("{} AS {}", item.sql, quote_ident(alias)),
                None => item.sql.clone(),
            })
            .collect();
        sql.push_str(&rendered.join(", "));
        self.push_from_and_joins(&mut sql, &joins, &mut params);
        self.push_filters(&mut sql, &symbols, &mut params);
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        tracing::debug!(sql = %sql, params = params.len(), "built select");
        Ok((sql, params))
    }

    /// Build the matching COUNT statement.
    ///
    /// With DISTINCT the count targets a single column rather than full
    /// rows: the primary key if it is part of the selected set, else
    /// the first local plain column, else the first selected item.
    pub fn build_count(&self) -> Result<(String, Vec<Value>)> {
        let mut joins = self.explicit_joins.clone();
        let items = self.resolve_select_items(&mut joins)?;
        let symbols = self.resolve_symbols(&mut joins)?;

        let count_expr = if self.distinct {
            let pk = &self.schema.primary_key().name;
            let target = items
                .iter()
                .find(|item| item.local_column.as_deref() == Some(pk))
                .or_else(|| {
                    items
                        .iter()
                        .find(|item| item.local_column.is_some() && !item.is_json_selector)
                })
                .or_else(|| items.first());
            match target {
                Some(item) => format!("COUNT(DISTINCT {})", item.sql),
                None => "COUNT(*)".to_string(),
            }
        } else {
            "COUNT(*)".to_string()
        };

        let mut params = Vec::new();
        let mut sql = format!("SELECT {count_expr}");
        self.push_from_and_joins(&mut sql, &joins, &mut params);
        // Count ignores ordering and pagination.
        let mut counted = self.clone();
        counted.order_by.clear();
        counted.limit = None;
        counted.offset = None;
        counted.push_filters(&mut sql, &symbols, &mut params);
        Ok((sql, params))
    }

    /// Run the query and return the first row, if any.
    pub fn fetch_one(&self, conn: &dyn Connection) -> Result<Option<Row>> {
        let mut limited = self.clone();
        limited.limit = Some(1);
        let (sql, params) = limited.build()?;
        let mut rows = conn.query(&sql, &params)?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    /// Run the query and return all rows.
    pub fn fetch_many(&self, conn: &dyn Connection) -> Result<Vec<Row>> {
        let (sql, params) = self.build()?;
        conn.query(&sql, &params)
    }

    /// Run the matching count query.
    pub fn fetch_count(&self, conn: &dyn Connection) -> Result<u64> {
        let (sql, params) = self.build_count()?;
        let row = conn.query_one(&sql, &params)?;
        let count = row
            .and_then(|r| r.get(0).and_then(Value::as_i64))
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn push_from_and_joins(&self, sql: &mut String, joins: &[JoinSpec], params: &mut Vec<Value>) {
        sql.push_str(&format!(
            " FROM {} AS {}",
            quote_qualified(&self.schema.qualified_name()),
            quote_ident(&self.table_alias)
        ));
        for join in joins {
            sql.push(' ');
            sql.push_str(&join.build_sql(params));
        }
    }

    fn push_filters(
        &self,
        sql: &mut String,
        symbols: &HashMap<String, String>,
        params: &mut Vec<Value>,
    ) {
        let resolve = |token: &str| -> String {
            symbols
                .get(token)
                .cloned()
                .unwrap_or_else(|| quote_ident(token))
        };
        if let Some(conditions) = &self.conditions {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.build_sql(&resolve, params));
        }
        if !self.group_by.is_empty() {
            let rendered: Vec<String> = self.group_by.iter().map(|c| resolve(c)).collect();
            sql.push_str(&format!(" GROUP BY {}", rendered.join(", ")));
        }
        if let Some(having) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&having.build_sql(&resolve, params));
        }
        if !self.order_by.is_empty() {
            let rendered: Vec<String> =
                self.order_by.iter().map(|o| o.build_sql(&resolve)).collect();
            sql.push_str(&format!(" ORDER BY {}", rendered.join(", ")));
        }
    }

    /// Resolve the SELECT list, materializing relation joins on demand.
    fn resolve_select_items(&self, joins: &mut Vec<JoinSpec>) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();
        if self.requested.is_empty() {
            self.add_local_wildcard(&[], &mut items);
            return Ok(items);
        }
        let requested = self.requested.clone();
        self.add_spec_items(joins, &mut Vec::new(), &requested, &mut items)?;
        Ok(items)
    }

    fn add_spec_items(
        &self,
        joins: &mut Vec<JoinSpec>,
        path: &mut Vec<String>,
        specs: &[ColumnsSpec],
        items: &mut Vec<SelectItem>,
    ) -> Result<()> {
        for spec in specs {
            match spec {
                ColumnsSpec::Wildcard => {
                    if path.is_empty() {
                        self.add_local_wildcard(&[], items);
                    } else {
                        self.add_joined_wildcard(joins, path, &[], items)?;
                    }
                }
                ColumnsSpec::WildcardExcept(exclusions) => {
                    if path.is_empty() {
                        self.add_local_wildcard(exclusions, items);
                    } else {
                        self.add_joined_wildcard(joins, path, exclusions, items)?;
                    }
                }
                ColumnsSpec::Name(name) => {
                    if name.contains("->") {
                        let sql = self.resolve_symbol(name, QuerySubject::Select, joins)?;
                        items.push(SelectItem {
                            sql,
                            alias: Some(sanitize_identifier(name)),
                            local_column: None,
                            is_json_selector: true,
                        });
                    } else if path.is_empty() {
                        if self.schema.column(name).is_none() {
                            return Err(QueryError::unknown_column(
                                QuerySubject::Select,
                                self.schema.table_name(),
                                name,
                            )
                            .into());
                        }
                        items.push(self.local_item(name));
                    } else {
                        let (schema, alias) = self.ensure_join_path(joins, path)?;
                        if schema.column(name).is_none() {
                            return Err(QueryError::unknown_column(
                                QuerySubject::Select,
                                schema.table_name(),
                                name,
                            )
                            .into());
                        }
                        items.push(joined_item(&alias, name));
                    }
                }
                ColumnsSpec::Relation(segment, nested) => {
                    path.push(segment.clone());
                    self.add_spec_items(joins, path, nested, items)?;
                    path.pop();
                }
            }
        }
        Ok(())
    }

    fn local_item(&self, name: &str) -> SelectItem {
        SelectItem {
            sql: format!("{}.{}", quote_ident(&self.table_alias), quote_ident(name)),
            alias: None,
            local_column: Some(name.to_string()),
            is_json_selector: false,
        }
    }

    fn add_local_wildcard(&self, exclusions: &[String], items: &mut Vec<SelectItem>) {
        for column in self.schema.columns() {
            if column.exists_in_db && !column.heavy && !exclusions.contains(&column.name) {
                items.push(self.local_item(&column.name));
            }
        }
    }

    fn add_joined_wildcard(
        &self,
        joins: &mut Vec<JoinSpec>,
        path: &[String],
        exclusions: &[String],
        items: &mut Vec<SelectItem>,
    ) -> Result<()> {
        let (schema, alias) = self.ensure_join_path(joins, path)?;
        let restriction = joins
            .iter()
            .find(|j| j.alias == alias)
            .and_then(|j| j.columns_to_select.clone());
        for column in schema.columns() {
            if !column.exists_in_db || column.heavy || exclusions.contains(&column.name) {
                continue;
            }
            if let Some(allowed) = &restriction {
                if !allowed.contains(&column.name) {
                    continue;
                }
            }
            items.push(joined_item(&alias, &column.name));
        }
        Ok(())
    }

    /// Walk a relation path, materializing any missing joins.
    ///
    /// Join aliases mirror the path (`Team`, `Team__Org`) so joined
    /// column aliases hydrate recursively.
    fn ensure_join_path(
        &self,
        joins: &mut Vec<JoinSpec>,
        path: &[String],
    ) -> Result<(Arc<dyn TableSchema>, String)> {
        let mut schema = Arc::clone(&self.schema);
        let mut alias = self.table_alias.clone();
        for segment in path {
            let join_name = if alias == self.table_alias {
                segment.clone()
            } else {
                format!("{alias}__{segment}")
            };
            if let Some(existing) = joins.iter().find(|j| j.join_name == join_name) {
                let table = existing.table.clone();
                alias = existing.alias.clone();
                schema = SchemaRegistry::get(&table)
                    .ok_or_else(|| QueryError::unknown_table(&table))?;
                continue;
            }
            let relation = schema
                .relation(segment)
                .ok_or_else(|| QueryError::unknown_relation(schema.table_name(), segment))?;
            let mut join = JoinSpec::from_relation(relation, &alias, &join_name)?;
            // A BelongsTo over a non-nullable key cannot miss, so the
            // join tightens to INNER unless the relation says otherwise.
            if relation.join_kind.is_none()
                && relation.kind == RelationKind::BelongsTo
                && schema
                    .column(&relation.local_column)
                    .is_some_and(|c| !c.nullable)
            {
                join.kind = JoinKind::Inner;
            }
            let foreign_table = relation.foreign_table.clone();
            schema = SchemaRegistry::get(&foreign_table)
                .ok_or_else(|| QueryError::unknown_table(&foreign_table))?;
            joins.push(join);
            alias = join_name;
        }
        Ok((schema, alias))
    }

    /// Validate and resolve every symbolic column referenced by the
    /// WHERE/HAVING/ORDER BY/GROUP BY clauses, materializing joins for
    /// dotted relation paths.
    fn resolve_symbols(&self, joins: &mut Vec<JoinSpec>) -> Result<HashMap<String, String>> {
        let mut symbols = HashMap::new();
        if let Some(conditions) = &self.conditions {
            for token in conditions.referenced_columns() {
                let sql = self.resolve_symbol(token, QuerySubject::Where, joins)?;
                symbols.insert(token.to_string(), sql);
            }
        }
        if let Some(having) = &self.having {
            for token in having.referenced_columns() {
                let sql = self.resolve_symbol(token, QuerySubject::Having, joins)?;
                symbols.insert(token.to_string(), sql);
            }
        }
        for order in &self.order_by {
            let sql = self.resolve_symbol(&order.column, QuerySubject::OrderBy, joins)?;
            symbols.insert(order.column.clone(), sql);
        }
        for group in &self.group_by {
            let sql = self.resolve_symbol(group, QuerySubject::GroupBy, joins)?;
            symbols.insert(group.clone(), sql);
        }
        Ok(symbols)
    }

    fn resolve_symbol(
        &self,
        token: &str,
        subject: QuerySubject,
        joins: &mut Vec<JoinSpec>,
    ) -> Result<String> {
        if let Some((base, selector)) = token.split_once("->") {
            // JSON selectors pass through; only the base column is checked.
            let sql = self.resolve_plain(base.trim(), subject, joins)?;
            return Ok(format!("{sql}->{selector}"));
        }
        self.resolve_plain(token, subject, joins)
    }

    fn resolve_plain(
        &self,
        token: &str,
        subject: QuerySubject,
        joins: &mut Vec<JoinSpec>,
    ) -> Result<String> {
        match token.rsplit_once('.') {
            None => {
                if self.schema.column(token).is_none() {
                    return Err(QueryError::unknown_column(
                        subject,
                        self.schema.table_name(),
                        token,
                    )
                    .into());
                }
                Ok(format!(
                    "{}.{}",
                    quote_ident(&self.table_alias),
                    quote_ident(token)
                ))
            }
            Some((path, column)) => {
                let segments: Vec<String> = path.split('.').map(ToString::to_string).collect();
                let (schema, alias) = self.ensure_join_path(joins, &segments)?;
                if schema.column(column).is_none() {
                    return Err(
                        QueryError::unknown_column(subject, schema.table_name(), column).into()
                    );
                }
                Ok(format!("{}.{}", quote_ident(&alias), quote_ident(column)))
            }
        }
    }
}

fn joined_item(alias: &str, column: &str) -> SelectItem {
    SelectItem {
        sql: format!("{}.{}", quote_ident(alias), quote_ident(column)),
        alias: Some(format!("{alias}__{column}")),
        local_column: None,
        is_json_selector: false,
    }
}
