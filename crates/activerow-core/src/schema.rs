//! Table schema declarations and the process-wide schema registry.

use crate::column::ColumnSpec;
use crate::relation::Relation;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// The static description of one table: columns, relations, primary key.
///
/// Implementations are built once and registered; the record and query
/// layers treat them as immutable.
pub trait TableSchema: Send + Sync {
    /// The table name, as used in SQL and in the registry.
    fn table_name(&self) -> &str;

    /// Optional schema qualifier (`schema.table`).
    fn schema_name(&self) -> Option<&str> {
        None
    }

    /// All declared columns, in declaration order.
    fn columns(&self) -> &[ColumnSpec];

    /// All declared relations.
    fn relations(&self) -> &[Relation] {
        &[]
    }

    /// The single primary-key column.
    fn primary_key(&self) -> &ColumnSpec;

    /// Look up a column by name.
    fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// Look up a relation by name.
    fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations().iter().find(|r| r.name == name)
    }

    /// The table name with its schema qualifier, if any.
    fn qualified_name(&self) -> String {
        match self.schema_name() {
            Some(schema) => format!("{schema}.{}", self.table_name()),
            None => self.table_name().to_string(),
        }
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn TableSchema>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn TableSchema>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Process-wide registry of table schemas.
///
/// Populated once at startup and treated as immutable afterwards. The
/// query layer uses it to resolve relation paths into foreign schemas.
pub struct SchemaRegistry;

impl SchemaRegistry {
    /// Register a schema under its table name.
    ///
    /// Registration is first-wins: re-registering the same table name
    /// keeps the original entry, so repeated initialization is safe.
    pub fn register(schema: Arc<dyn TableSchema>) {
        let mut map = registry().write().unwrap_or_else(|e| e.into_inner());
        map.entry(schema.table_name().to_string()).or_insert(schema);
    }

    /// Look up a schema by table name.
    pub fn get(table_name: &str) -> Option<Arc<dyn TableSchema>> {
        let map = registry().read().unwrap_or_else(|e| e.into_inner());
        map.get(table_name).cloned()
    }

    /// Is a table registered?
    pub fn contains(table_name: &str) -> bool {
        let map = registry().read().unwrap_or_else(|e| e.into_inner());
        map.contains_key(table_name)
    }

    /// Remove every registered schema.
    ///
    /// Test-only escape hatch; production code never invalidates the
    /// registry.
    #[doc(hidden)]
    pub fn clear() {
        let mut map = registry().write().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct TestSchema {
        name: String,
        columns: Vec<ColumnSpec>,
    }

    impl TestSchema {
        fn new(name: &str) -> Result<Self> {
            Ok(Self {
                name: name.to_string(),
                columns: vec![ColumnSpec::id("id")?, ColumnSpec::string("name")?],
            })
        }
    }

    impl TableSchema for TestSchema {
        fn table_name(&self) -> &str {
            &self.name
        }

        fn columns(&self) -> &[ColumnSpec] {
            &self.columns
        }

        fn primary_key(&self) -> &ColumnSpec {
            &self.columns[0]
        }
    }

    #[test]
    fn registration_is_first_wins() {
        let first = Arc::new(TestSchema::new("schema_test_table").unwrap());
        SchemaRegistry::register(first);
        let second = Arc::new(TestSchema::new("schema_test_table").unwrap());
        SchemaRegistry::register(second);

        let found = SchemaRegistry::get("schema_test_table").unwrap();
        assert_eq!(found.table_name(), "schema_test_table");
        assert!(SchemaRegistry::contains("schema_test_table"));
        assert!(!SchemaRegistry::contains("schema_test_missing"));
    }

    #[test]
    fn default_lookups() {
        let schema = TestSchema::new("schema_lookup_table").unwrap();
        assert!(schema.column("name").is_some());
        assert!(schema.column("missing").is_none());
        assert!(schema.relation("Anything").is_none());
        assert_eq!(schema.qualified_name(), "schema_lookup_table");
    }
}
