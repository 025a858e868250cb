//! Collections of records from one table.
//!
//! A collection materializes lazily: rows are fetched on first access,
//! records are built from the cached rows on first access, and the
//! total count is fetched at most once. Related data for the whole set
//! is loaded with a single batched query instead of one query per
//! record.

use crate::record::{Record, RelatedData};
use activerow_core::{
    Connection, QueryError, RelationKind, Result, Row, SchemaRegistry, TableSchema, Value,
};
use activerow_query::{Condition, SelectBuilder};
use std::sync::Arc;

/// Where a collection's rows come from.
#[derive(Debug, Clone)]
pub enum RecordsSource {
    /// Rows supplied up front, no fetching involved
    Rows(Vec<Row>),
    /// A query executed on first access
    Query(SelectBuilder),
}

/// A lazily-materialized set of records from one table.
pub struct RecordCollection {
    schema: Arc<dyn TableSchema>,
    source: RecordsSource,
    rows: Option<Vec<Row>>,
    records: Option<Vec<Record>>,
    total_count: Option<u64>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl std::fmt::Debug for RecordCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCollection")
            .field("table", &self.schema.table_name())
            .field("rows_loaded", &self.rows.is_some())
            .field("records_built", &self.records.is_some())
            .field("total_count", &self.total_count)
            .finish()
    }
}

impl RecordCollection {
    /// A collection backed by a query.
    pub fn from_query(query: SelectBuilder) -> Self {
        Self {
            schema: Arc::clone(query.schema()),
            source: RecordsSource::Query(query),
            rows: None,
            records: None,
            total_count: None,
            offset: None,
            limit: None,
        }
    }

    /// A collection over rows already in hand.
    pub fn from_rows(schema: Arc<dyn TableSchema>, rows: Vec<Row>) -> Self {
        Self {
            schema,
            source: RecordsSource::Rows(rows),
            rows: None,
            records: None,
            total_count: None,
            offset: None,
            limit: None,
        }
    }

    pub fn schema(&self) -> &Arc<dyn TableSchema> {
        &self.schema
    }

    /// Restrict materialization to a page of the result set.
    ///
    /// `count()` still reports the unpaged total. Changing the page
    /// discards already-materialized rows and records.
    pub fn page(&mut self, offset: Option<u64>, limit: Option<u64>) -> &mut Self {
        self.offset = offset;
        self.limit = limit;
        self.rows = None;
        self.records = None;
        self
    }

    /// Total number of matching rows.
    ///
    /// For query-backed collections this issues one COUNT query and
    /// caches the result; paging clauses on the query do not affect it.
    pub fn count(&mut self, conn: &dyn Connection) -> Result<u64> {
        if let Some(count) = self.total_count {
            return Ok(count);
        }
        let count = match &self.source {
            RecordsSource::Rows(rows) => rows.len() as u64,
            RecordsSource::Query(query) => query.fetch_count(conn)?,
        };
        self.total_count = Some(count);
        Ok(count)
    }

    /// The raw rows, fetching them on first access.
    pub fn rows(&mut self, conn: &dyn Connection) -> Result<&[Row]> {
        self.ensure_rows(conn)?;
        Ok(self.rows.as_deref().unwrap_or(&[]))
    }

    /// The records, building one per row through the trust path.
    pub fn records(&mut self, conn: &dyn Connection) -> Result<&mut [Record]> {
        self.ensure_records(conn)?;
        Ok(self.records.as_deref_mut().unwrap_or(&mut []))
    }

    /// Consume the collection, yielding its records.
    pub fn into_records(mut self, conn: &dyn Connection) -> Result<Vec<Record>> {
        self.ensure_records(conn)?;
        Ok(self.records.take().unwrap_or_default())
    }

    /// Visit every row through a single reused record.
    ///
    /// The record is reset and refilled per row, so large result sets
    /// avoid one allocation per record. The visited record must not be
    /// retained across calls.
    pub fn for_each_reused<F>(&mut self, conn: &dyn Connection, mut visit: F) -> Result<()>
    where
        F: FnMut(&Record) -> Result<()>,
    {
        self.ensure_rows(conn)?;
        let rows = self.rows.as_deref().unwrap_or(&[]);
        let mut record = Record::new(Arc::clone(&self.schema));
        for row in rows {
            record.reset_for_reuse();
            record.apply_db_row(row)?;
            visit(&record)?;
        }
        Ok(())
    }

    /// Load one relation for every record with a single batched query.
    ///
    /// Children are fetched with `WHERE fk IN (...)` over the distinct
    /// local key values, then distributed to their parents. HasMany
    /// parents receive a group marked as fetched from the DB; HasOne
    /// and BelongsTo parents receive the single match, if any.
    #[tracing::instrument(level = "debug", skip(self, conn), fields(table = %self.schema.table_name()))]
    pub fn inject_related(&mut self, name: &str, conn: &dyn Connection) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let relation = schema
            .relation(name)
            .ok_or_else(|| QueryError::unknown_relation(schema.table_name(), name))?
            .clone();
        self.ensure_records(conn)?;
        let Some(records) = self.records.as_mut() else {
            return Ok(());
        };

        let mut keys: Vec<Value> = Vec::new();
        for record in records.iter() {
            if let Some(value) = record.value(&relation.local_column) {
                if !keys.contains(value) {
                    keys.push(value.clone());
                }
            }
        }
        if keys.is_empty() {
            return Ok(());
        }

        let mut query = SelectBuilder::for_table(&relation.foreign_table)?;
        if let Some(columns) = &relation.columns_to_select {
            let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
            query.columns(&refs)?;
        }
        let mut condition = Condition::In(relation.foreign_column.clone(), keys);
        for (column, value) in &relation.extra_conditions {
            condition = condition.and(Condition::Eq(column.clone(), value.clone()));
        }
        query.filter(condition);
        let rows = query.fetch_many(conn)?;

        let foreign_schema = SchemaRegistry::get(&relation.foreign_table)
            .ok_or_else(|| QueryError::unknown_table(&relation.foreign_table))?;
        let mut children = Vec::with_capacity(rows.len());
        for row in &rows {
            children.push(Record::from_db_row(Arc::clone(&foreign_schema), row)?);
        }
        tracing::debug!(relation = name, children = children.len(), "batched relation load");

        for record in records.iter_mut() {
            let Some(local) = record.value(&relation.local_column).cloned() else {
                continue;
            };
            match relation.kind {
                RelationKind::HasMany => {
                    let matched: Vec<Record> = children
                        .iter()
                        .filter(|c| c.value(&relation.foreign_column) == Some(&local))
                        .cloned()
                        .collect();
                    record.attach_related(
                        name,
                        RelatedData::Many {
                            records: matched,
                            fetched_from_db: true,
                        },
                    )?;
                }
                RelationKind::HasOne | RelationKind::BelongsTo => {
                    let matched = children
                        .iter()
                        .find(|c| c.value(&relation.foreign_column) == Some(&local));
                    if let Some(child) = matched {
                        record.attach_related(name, RelatedData::One(Box::new(child.clone())))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_rows(&mut self, conn: &dyn Connection) -> Result<()> {
        if self.rows.is_some() {
            return Ok(());
        }
        let rows = match &self.source {
            RecordsSource::Rows(rows) => {
                let skip = usize::try_from(self.offset.unwrap_or(0)).unwrap_or(usize::MAX);
                let take = self
                    .limit
                    .and_then(|l| usize::try_from(l).ok())
                    .unwrap_or(usize::MAX);
                rows.iter().skip(skip).take(take).cloned().collect()
            }
            RecordsSource::Query(query) => {
                if self.offset.is_none() && self.limit.is_none() {
                    query.fetch_many(conn)?
                } else {
                    let mut paged = query.clone();
                    if let Some(offset) = self.offset {
                        paged.offset(offset);
                    }
                    if let Some(limit) = self.limit {
                        paged.limit(limit);
                    }
                    paged.fetch_many(conn)?
                }
            }
        };
        self.rows = Some(rows);
        Ok(())
    }

    fn ensure_records(&mut self, conn: &dyn Connection) -> Result<()> {
        if self.records.is_some() {
            return Ok(());
        }
        self.ensure_rows(conn)?;
        let rows = self.rows.as_deref().unwrap_or(&[]);
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(Record::from_db_row(Arc::clone(&self.schema), row)?);
        }
        self.records = Some(records);
        Ok(())
    }
}
