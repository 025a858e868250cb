//! Collections over query results, with batched relation loading.

use activerow::{
    ColumnSpec, Condition, MemoryTable, RecordCollection, RelatedData, Relation, Row,
    SchemaRegistry, ScriptedConnection, SelectBuilder, TableSchema, Value,
};
use std::sync::Arc;

fn customers() -> Arc<dyn TableSchema> {
    if let Some(schema) = SchemaRegistry::get("inj_customers") {
        return schema;
    }
    MemoryTable::new(
        "inj_customers",
        vec![
            ColumnSpec::id("id").unwrap(),
            ColumnSpec::string("name").unwrap(),
        ],
    )
    .unwrap()
    .with_relations(vec![Relation::has_many(
        "Orders",
        "id",
        "inj_orders",
        "customer_id",
    )])
    .register()
}

fn orders() -> Arc<dyn TableSchema> {
    if let Some(schema) = SchemaRegistry::get("inj_orders") {
        return schema;
    }
    MemoryTable::new(
        "inj_orders",
        vec![
            ColumnSpec::id("id").unwrap(),
            ColumnSpec::int("customer_id").unwrap(),
            ColumnSpec::int("total").unwrap(),
        ],
    )
    .unwrap()
    .register()
}

fn customer_row(id: i64, name: &str) -> Row {
    Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(id), Value::from(name)],
    )
}

fn order_row(id: i64, customer_id: i64, total: i64) -> Row {
    Row::new(
        vec!["id".into(), "customer_id".into(), "total".into()],
        vec![Value::Int(id), Value::Int(customer_id), Value::Int(total)],
    )
}

#[test]
fn query_collection_loads_lazily_and_counts_separately() {
    orders();
    let mut query = SelectBuilder::new(customers());
    query.filter(Condition::Like("name".into(), "a%".into()));
    let mut collection = RecordCollection::from_query(query);

    let conn = ScriptedConnection::new();
    // count first; the row fetch must not have happened yet
    conn.expect_rows(vec![Row::new(vec!["count".into()], vec![Value::Int(2)])]);
    assert_eq!(collection.count(&conn).unwrap(), 2);
    assert_eq!(conn.statements().len(), 1);
    assert!(conn.statement_sql()[0].starts_with("SELECT COUNT(*)"));

    conn.expect_rows(vec![customer_row(1, "ada"), customer_row(2, "alan")]);
    assert_eq!(collection.records(&conn).unwrap().len(), 2);
    assert_eq!(conn.statements().len(), 2);
    assert!(conn.statement_sql()[1].contains("WHERE \"inj_customers\".\"name\" LIKE $1"));
}

#[test]
fn inject_replaces_per_record_queries_with_one() {
    orders();
    let mut collection = RecordCollection::from_rows(
        customers(),
        vec![
            customer_row(1, "ada"),
            customer_row(2, "alan"),
            customer_row(3, "grace"),
        ],
    );

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![
        order_row(100, 1, 30),
        order_row(101, 3, 45),
        order_row(102, 1, 5),
    ]);
    collection.inject_related("Orders", &conn).unwrap();

    // one batched query for the whole set
    let statements = conn.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0]
        .0
        .contains("WHERE \"inj_orders\".\"customer_id\" IN ($1, $2, $3)"));
    assert_eq!(
        statements[0].1,
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    );

    let records = collection.records(&conn).unwrap();
    let Some(RelatedData::Many {
        records: ada_orders,
        fetched_from_db,
    }) = records[0].related("Orders")
    else {
        panic!("expected injected orders");
    };
    assert!(*fetched_from_db);
    assert_eq!(ada_orders.len(), 2);

    // a customer with no orders still gets an empty, fetched group
    let Some(RelatedData::Many {
        records: alan_orders,
        ..
    }) = records[1].related("Orders")
    else {
        panic!("expected injected orders");
    };
    assert!(alan_orders.is_empty());
}

#[test]
fn reused_iteration_sees_every_row() {
    let mut collection = RecordCollection::from_rows(
        customers(),
        vec![customer_row(1, "ada"), customer_row(2, "alan")],
    );
    let conn = ScriptedConnection::new();
    let mut ids = Vec::new();
    collection
        .for_each_reused(&conn, |record| {
            ids.push(record.primary_key_value().cloned());
            assert!(record.exists());
            Ok(())
        })
        .unwrap();
    assert_eq!(ids, vec![Some(Value::Int(1)), Some(Value::Int(2))]);
}
