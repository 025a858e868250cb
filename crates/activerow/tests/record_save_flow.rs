//! End-to-end save lifecycle against a scripted connection.

use activerow::{
    ColumnSpec, Condition, Connection, MemoryTable, Record, RecordErrorKind, Relation, Row,
    SaveOutcome, SchemaRegistry, ScriptedConnection, SelectBuilder, TableSchema, Value,
    ValueErrorKind,
};
use std::sync::Arc;

fn authors() -> Arc<dyn TableSchema> {
    if let Some(schema) = SchemaRegistry::get("flow_authors") {
        return schema;
    }
    MemoryTable::new(
        "flow_authors",
        vec![
            ColumnSpec::id("id").unwrap(),
            ColumnSpec::string("name").unwrap(),
            ColumnSpec::email("email").unwrap().nullable(),
        ],
    )
    .unwrap()
    .with_relations(vec![Relation::has_many("Books", "id", "flow_books", "author_id")])
    .register()
}

fn books() -> Arc<dyn TableSchema> {
    if let Some(schema) = SchemaRegistry::get("flow_books") {
        return schema;
    }
    MemoryTable::new(
        "flow_books",
        vec![
            ColumnSpec::id("id").unwrap(),
            ColumnSpec::int("author_id").unwrap(),
            ColumnSpec::string("title").unwrap(),
        ],
    )
    .unwrap()
    .register()
}

fn author_row(id: i64, name: &str) -> Row {
    Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(id), Value::from(name)],
    )
}

#[test]
fn insert_then_update_then_delete() {
    let mut author = Record::new(authors());
    author.set_value("name", "  Ada  ").unwrap();
    // preprocessing trimmed the committed value
    assert_eq!(author.value("name"), Some(&Value::Text("Ada".into())));

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![author_row(1, "Ada")]);
    assert_eq!(author.save(&conn).unwrap(), SaveOutcome::Saved);
    assert!(author.exists());

    author.set_value("email", "ADA@example.org").unwrap();
    conn.expect_rows(vec![Row::new(
        vec!["id".into(), "name".into(), "email".into()],
        vec![Value::Int(1), Value::from("Ada"), Value::from("ada@example.org")],
    )]);
    assert_eq!(author.save(&conn).unwrap(), SaveOutcome::Saved);
    // a clean record has nothing to write
    assert_eq!(author.save(&conn).unwrap(), SaveOutcome::NothingToSave);

    conn.expect_affected(1);
    author.delete(&conn).unwrap();
    assert!(!author.exists());

    let sql = conn.statement_sql();
    let writes: Vec<&String> = sql
        .iter()
        .filter(|s| !matches!(s.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
        .collect();
    assert_eq!(writes.len(), 3);
    assert!(writes[0].starts_with("INSERT INTO \"flow_authors\""));
    assert!(writes[1].starts_with("UPDATE \"flow_authors\" SET \"email\" = $1"));
    assert!(writes[2].starts_with("DELETE FROM \"flow_authors\""));
}

#[test]
fn email_lowercased_before_commit() {
    let mut author = Record::new(authors());
    author.set_value("email", " Ada@Example.ORG ").unwrap();
    assert_eq!(
        author.value("email"),
        Some(&Value::Text("ada@example.org".into()))
    );
    let container = author.record_value("email").unwrap();
    assert_eq!(
        container.raw_value(),
        Some(&Value::Text(" Ada@Example.ORG ".into()))
    );
}

#[test]
fn invalid_email_reports_format_error() {
    let mut author = Record::new(authors());
    let err = author.set_value("email", "not-an-email").unwrap_err();
    let validation = err.as_validation().unwrap();
    assert!(validation.contains("email", ValueErrorKind::InvalidFormat));
    assert_eq!(author.value("email"), None);
}

#[test]
fn collected_updates_commit_in_one_statement() {
    let row = Row::new(
        vec!["id".into(), "name".into(), "email".into()],
        vec![Value::Int(5), Value::from("Ada"), Value::Null],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();

    author.begin().unwrap();
    author.set_value("name", "Grace").unwrap();
    author.set_value("email", "g@example.org").unwrap();

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![Row::new(
        vec!["id".into(), "name".into(), "email".into()],
        vec![Value::Int(5), Value::from("Grace"), Value::from("g@example.org")],
    )]);
    assert_eq!(author.commit(&conn).unwrap(), SaveOutcome::Saved);

    let statements = conn.statements();
    assert_eq!(statements.len(), 3);
    assert_eq!(
        statements[1].0,
        "UPDATE \"flow_authors\" SET \"name\" = $1, \"email\" = $2 WHERE \"id\" = $3 RETURNING *"
    );
}

#[test]
fn rollback_discards_collected_updates() {
    let row = Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(5), Value::from("Ada")],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();

    author.begin().unwrap();
    author.set_value("name", "Grace").unwrap();
    author.rollback().unwrap();
    assert_eq!(author.value("name"), Some(&Value::Text("Ada".into())));

    // nothing dirty remains
    let conn = ScriptedConnection::new();
    assert_eq!(author.save(&conn).unwrap(), SaveOutcome::NothingToSave);
    assert!(conn.statements().is_empty());
}

#[test]
fn stale_update_reports_record_gone() {
    let row = Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(9), Value::from("Ada")],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();
    author.set_value("name", "Grace").unwrap();

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![]);
    assert_eq!(author.save(&conn).unwrap(), SaveOutcome::RecordGone);
    assert!(!author.exists());

    // the record can be re-inserted afterwards
    conn.expect_rows(vec![author_row(10, "Grace")]);
    assert_eq!(author.save(&conn).unwrap(), SaveOutcome::Saved);
    assert_eq!(author.primary_key_value(), Some(&Value::Int(10)));
}

#[test]
fn caller_transaction_is_not_committed_by_save() {
    let row = Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(5), Value::from("Ada")],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();
    author.set_value("name", "Grace").unwrap();

    let conn = ScriptedConnection::new();
    conn.begin().unwrap();
    conn.expect_rows(vec![author_row(5, "Grace")]);
    author.save(&conn).unwrap();
    assert!(conn.in_transaction());
    conn.rollback().unwrap();
}

#[test]
fn has_many_cascade_pushes_foreign_keys() {
    books();
    let row = Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(5), Value::from("Ada")],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();

    let mut book = Record::new(books());
    book.set_value("title", "Notes").unwrap();
    author
        .attach_related(
            "Books",
            activerow::RelatedData::Many {
                records: vec![book],
                fetched_from_db: false,
            },
        )
        .unwrap();

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![Row::new(
        vec!["id".into(), "author_id".into(), "title".into()],
        vec![Value::Int(77), Value::Int(5), Value::from("Notes")],
    )]);
    author.save_with_relations(&conn, &["Books"]).unwrap();

    let sql = conn.statement_sql();
    assert!(sql.iter().any(|s| s.starts_with("INSERT INTO \"flow_books\"")));
    let statements = conn.statements();
    let insert = statements
        .iter()
        .find(|(s, _)| s.starts_with("INSERT"))
        .unwrap();
    // the parent's key travels into the child row
    assert!(insert.1.contains(&Value::Int(5)));
}

#[test]
fn snapshot_survives_serialization() {
    let row = Row::new(
        vec!["id".into(), "name".into(), "email".into()],
        vec![Value::Int(5), Value::from("Ada"), Value::from("a@b.io")],
    );
    let author = Record::from_db_row(authors(), &row).unwrap();
    let json = serde_json::to_string(&author.to_snapshot().unwrap()).unwrap();

    let restored = Record::from_snapshot(authors(), serde_json::from_str(&json).unwrap()).unwrap();
    assert!(restored.exists());
    assert_eq!(restored.value("email"), Some(&Value::Text("a@b.io".into())));
}

#[test]
fn reload_uses_primary_key_lookup() {
    let row = Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(5), Value::from("Ada")],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![Row::new(
        vec!["id".into(), "name".into(), "email".into()],
        vec![Value::Int(5), Value::from("Grace"), Value::Null],
    )]);
    author.reload(&conn).unwrap();
    assert_eq!(author.value("name"), Some(&Value::Text("Grace".into())));
    assert!(conn.statement_sql()[0].contains("WHERE \"flow_authors\".\"id\" = $1"));
}

#[test]
fn reload_of_vanished_record_is_not_found() {
    let row = Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int(5), Value::from("Ada")],
    );
    let mut author = Record::from_db_row(authors(), &row).unwrap();

    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![]);
    let err = author.reload(&conn).unwrap_err();
    assert_eq!(err.record_kind(), Some(RecordErrorKind::NotFound));
}

#[test]
fn fetch_one_through_builder_hydrates_a_record() {
    let conn = ScriptedConnection::new();
    conn.expect_rows(vec![author_row(5, "Ada")]);

    let mut query = SelectBuilder::new(authors());
    query.filter(Condition::Eq("name".into(), Value::from("Ada")));
    let row = query.fetch_one(&conn).unwrap().unwrap();
    let author = Record::from_db_row(authors(), &row).unwrap();
    assert!(author.exists());
    assert!(conn.statement_sql()[0].ends_with("LIMIT 1"));
}
