//! WHERE/HAVING condition trees and ORDER BY clauses.

use activerow_core::Value;

/// A condition tree for WHERE and HAVING clauses.
///
/// Column names are kept symbolic until build time; the select builder
/// supplies a resolver that validates them and rewrites dotted relation
/// paths into join aliases.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Like(String, String),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    /// Raw SQL fragment with bound parameters, used as-is
    Raw(String, Vec<Value>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    /// Combine with another condition using AND.
    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        match self {
            Condition::And(mut parts) => {
                parts.push(other);
                Condition::And(parts)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Combine with another condition using OR.
    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        match self {
            Condition::Or(mut parts) => {
                parts.push(other);
                Condition::Or(parts)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    /// Every symbolic column name referenced by this tree.
    ///
    /// Raw fragments are opaque and contribute nothing.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Eq(col, _)
            | Condition::Ne(col, _)
            | Condition::Lt(col, _)
            | Condition::Lte(col, _)
            | Condition::Gt(col, _)
            | Condition::Gte(col, _)
            | Condition::Like(col, _)
            | Condition::In(col, _)
            | Condition::NotIn(col, _)
            | Condition::IsNull(col)
            | Condition::IsNotNull(col) => out.push(col),
            Condition::Raw(_, _) => {}
            Condition::And(parts) | Condition::Or(parts) => {
                for part in parts {
                    part.collect_columns(out);
                }
            }
        }
    }

    /// Render this tree as SQL, appending bound parameters.
    ///
    /// `resolve` maps a symbolic column name to its quoted, aliased SQL
    /// form. Placeholders are `$N`, numbered after `params`'s current
    /// length.
    pub fn build_sql(&self, resolve: &dyn Fn(&str) -> String, params: &mut Vec<Value>) -> String {
        match self {
            Condition::Eq(col, value) => {
                if value.is_null() {
                    format!("{} IS NULL", resolve(col))
                } else {
                    binary(resolve(col), "=", value.clone(), params)
                }
            }
            Condition::Ne(col, value) => {
                if value.is_null() {
                    format!("{} IS NOT NULL", resolve(col))
                } else {
                    binary(resolve(col), "<>", value.clone(), params)
                }
            }
            Condition::Lt(col, value) => binary(resolve(col), "<", value.clone(), params),
            Condition::Lte(col, value) => binary(resolve(col), "<=", value.clone(), params),
            Condition::Gt(col, value) => binary(resolve(col), ">", value.clone(), params),
            Condition::Gte(col, value) => binary(resolve(col), ">=", value.clone(), params),
            Condition::Like(col, pattern) => {
                binary(resolve(col), "LIKE", Value::Text(pattern.clone()), params)
            }
            Condition::In(col, values) => in_list(resolve(col), "IN", values, params),
            Condition::NotIn(col, values) => in_list(resolve(col), "NOT IN", values, params),
            Condition::IsNull(col) => format!("{} IS NULL", resolve(col)),
            Condition::IsNotNull(col) => format!("{} IS NOT NULL", resolve(col)),
            Condition::Raw(sql, values) => {
                // Renumber $1.. in the fragment to the current offset.
                let renumbered = renumber_placeholders(sql, params.len());
                params.extend(values.iter().cloned());
                renumbered
            }
            Condition::And(parts) => joined(parts, " AND ", resolve, params),
            Condition::Or(parts) => joined(parts, " OR ", resolve, params),
        }
    }
}

fn binary(lhs: String, op: &str, value: Value, params: &mut Vec<Value>) -> String {
    params.push(value);
    format!("{lhs} {op} ${}", params.len())
}

fn in_list(lhs: String, op: &str, values: &[Value], params: &mut Vec<Value>) -> String {
    if values.is_empty() {
        // An empty IN list matches nothing; NOT IN matches everything.
        return if op == "IN" { "1 = 0".to_string() } else { "1 = 1".to_string() };
    }
    let placeholders: Vec<String> = values
        .iter()
        .map(|value| {
            params.push(value.clone());
            format!("${}", params.len())
        })
        .collect();
    format!("{lhs} {op} ({})", placeholders.join(", "))
}

fn joined(
    parts: &[Condition],
    sep: &str,
    resolve: &dyn Fn(&str) -> String,
    params: &mut Vec<Value>,
) -> String {
    if parts.is_empty() {
        return "1 = 1".to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|part| format!("({})", part.build_sql(resolve, params)))
        .collect();
    rendered.join(sep)
}

fn renumber_placeholders(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_some_and(char::is_ascii_digit) {
            let mut digits = String::new();
            while chars.peek().is_some_and(char::is_ascii_digit) {
                digits.push(chars.next().unwrap_or_default());
            }
            match digits.parse::<usize>() {
                Ok(n) => out.push_str(&format!("${}", n + offset)),
                Err(_) => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// NULLS FIRST/LAST ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
            nulls: None,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
            nulls: None,
        }
    }

    #[must_use]
    pub const fn nulls_first(mut self) -> Self {
        self.nulls = Some(NullsOrder::First);
        self
    }

    #[must_use]
    pub const fn nulls_last(mut self) -> Self {
        self.nulls = Some(NullsOrder::Last);
        self
    }

    /// Render this term, resolving the column name.
    pub fn build_sql(&self, resolve: &dyn Fn(&str) -> String) -> String {
        let mut sql = resolve(&self.column);
        match self.direction {
            OrderDirection::Asc => sql.push_str(" ASC"),
            OrderDirection::Desc => sql.push_str(" DESC"),
        }
        match self.nulls {
            Some(NullsOrder::First) => sql.push_str(" NULLS FIRST"),
            Some(NullsOrder::Last) => sql.push_str(" NULLS LAST"),
            None => {}
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> String {
        format!("\"{name}\"")
    }

    #[test]
    fn binary_conditions_number_placeholders() {
        let cond = Condition::Eq("a".into(), Value::Int(1))
            .and(Condition::Gt("b".into(), Value::Int(2)));
        let mut params = Vec::new();
        let sql = cond.build_sql(&ident, &mut params);
        assert_eq!(sql, "(\"a\" = $1) AND (\"b\" > $2)");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn eq_null_renders_is_null() {
        let mut params = Vec::new();
        let sql = Condition::Eq("a".into(), Value::Null).build_sql(&ident, &mut params);
        assert_eq!(sql, "\"a\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn in_list_and_empty_in() {
        let mut params = Vec::new();
        let sql = Condition::In("a".into(), vec![Value::Int(1), Value::Int(2)])
            .build_sql(&ident, &mut params);
        assert_eq!(sql, "\"a\" IN ($1, $2)");

        let mut params = Vec::new();
        let sql = Condition::In("a".into(), vec![]).build_sql(&ident, &mut params);
        assert_eq!(sql, "1 = 0");
    }

    #[test]
    fn raw_fragments_renumber() {
        let cond = Condition::Eq("a".into(), Value::Int(1)).and(Condition::Raw(
            "length(\"b\") > $1".into(),
            vec![Value::Int(5)],
        ));
        let mut params = Vec::new();
        let sql = cond.build_sql(&ident, &mut params);
        assert_eq!(sql, "(\"a\" = $1) AND (length(\"b\") > $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn referenced_columns_skips_raw() {
        let cond = Condition::Eq("a".into(), Value::Int(1))
            .and(Condition::Raw("true".into(), vec![]))
            .and(Condition::IsNull("b".into()));
        assert_eq!(cond.referenced_columns(), vec!["a", "b"]);
    }

    #[test]
    fn order_by_rendering() {
        assert_eq!(OrderBy::asc("a").build_sql(&ident), "\"a\" ASC");
        assert_eq!(
            OrderBy::desc("a").nulls_last().build_sql(&ident),
            "\"a\" DESC NULLS LAST"
        );
    }
}
