//! Record state and save/delete orchestration.

use activerow_core::identifiers::{quote_ident, quote_qualified};
use activerow_core::{
    ColumnValidationError, Connection, DbError, Error, QueryError, QuerySubject, RecordError,
    RecordErrorKind, RecordValue, RelationKind, Result, Row, SchemaRegistry, TableSchema,
    ValidationErrors, Value, ValueUpdate,
};
use activerow_query::{Condition, SelectBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Column state of a record.
///
/// Live records hold one [`RecordValue`] per touched column; snapshot
/// records hold a flat read-only map and reject every mutation.
#[derive(Debug, Clone)]
pub enum RecordState {
    Live(HashMap<String, RecordValue>),
    Snapshot(HashMap<String, serde_json::Value>),
}

/// Related data attached to a record under a relation name.
#[derive(Debug, Clone)]
pub enum RelatedData {
    One(Box<Record>),
    Many {
        records: Vec<Record>,
        /// Whether the set was actually fetched from the DB, as
        /// opposed to assembled in memory
        fetched_from_db: bool,
    },
}

/// What a save call accomplished.
///
/// `RecordGone` reports an UPDATE whose row no longer existed; the
/// record has reset itself and the save was a no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    NothingToSave,
    RecordGone,
}

/// Serializable capture of a record, relations excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub props: SnapshotProps,
    pub values: HashMap<String, activerow_core::ValueSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotProps {
    pub exists_in_db: bool,
}

/// One row of one table, with per-column value state and attached
/// related records.
#[derive(Clone)]
pub struct Record {
    schema: Arc<dyn TableSchema>,
    state: RecordState,
    related: HashMap<String, RelatedData>,
    /// Tri-state existence cache; `None` means recompute from the
    /// primary key.
    exists_in_db: Option<bool>,
    collecting: bool,
    /// Pre-mutation containers backed up since `begin()`; `None`
    /// marks a column that had never been touched.
    backup: HashMap<String, Option<RecordValue>>,
    trust_db_data: bool,
    saving_allowed: bool,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.schema.table_name())
            .field("exists_in_db", &self.exists_in_db)
            .field("collecting", &self.collecting)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Record {
    /// A fresh record with no values.
    pub fn new(schema: Arc<dyn TableSchema>) -> Self {
        Self {
            schema,
            state: RecordState::Live(HashMap::new()),
            related: HashMap::new(),
            exists_in_db: None,
            collecting: false,
            backup: HashMap::new(),
            trust_db_data: false,
            saving_allowed: true,
        }
    }

    /// Build a record from a DB row via the trust fast path.
    ///
    /// Joined columns (`Rel__col`) become attached related records.
    pub fn from_db_row(schema: Arc<dyn TableSchema>, row: &Row) -> Result<Self> {
        let mut record = Self::new(schema);
        record.apply_db_row(row)?;
        Ok(record)
    }

    /// A read-only snapshot record; every mutation fails.
    pub fn read_only_snapshot(
        schema: Arc<dyn TableSchema>,
        values: HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut record = Self::new(schema);
        record.state = RecordState::Snapshot(values);
        record.exists_in_db = Some(true);
        record
    }

    pub fn schema(&self) -> &Arc<dyn TableSchema> {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        self.schema.table_name()
    }

    /// The committed value of a column, if one is held.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match &self.state {
            RecordState::Live(values) => values
                .get(name)
                .filter(|c| c.has_value())
                .and_then(RecordValue::value),
            RecordState::Snapshot(_) => None,
        }
    }

    /// The raw value of a snapshot record's column.
    pub fn snapshot_value(&self, name: &str) -> Option<&serde_json::Value> {
        match &self.state {
            RecordState::Snapshot(values) => values.get(name),
            RecordState::Live(_) => None,
        }
    }

    /// The value container for a column, if the column was ever touched.
    pub fn record_value(&self, name: &str) -> Option<&RecordValue> {
        match &self.state {
            RecordState::Live(values) => values.get(name),
            RecordState::Snapshot(_) => None,
        }
    }

    /// Validation errors recorded against a column's last attempted
    /// value.
    pub fn column_errors(&self, name: &str) -> &[ColumnValidationError] {
        self.record_value(name).map_or(&[], RecordValue::errors)
    }

    /// The primary-key value, if set.
    pub fn primary_key_value(&self) -> Option<&Value> {
        self.value(&self.schema.primary_key().name)
    }

    /// Does this record exist in the database?
    pub fn exists(&self) -> bool {
        match self.exists_in_db {
            Some(exists) => exists,
            None => match &self.state {
                RecordState::Live(values) => values
                    .get(&self.schema.primary_key().name)
                    .is_some_and(|c| c.has_value() && c.is_from_db()),
                RecordState::Snapshot(_) => true,
            },
        }
    }

    pub const fn is_collecting(&self) -> bool {
        self.collecting
    }

    /// Disable saving for this record.
    pub fn forbid_saving(&mut self) {
        self.saving_allowed = false;
    }

    /// Re-enable saving.
    pub fn allow_saving(&mut self) {
        self.saving_allowed = true;
    }

    /// Toggle the bulk-read trust mode.
    ///
    /// While active, DB-sourced values skip validation and saving is
    /// rejected.
    pub fn set_trust_db_data(&mut self, trust: bool) {
        self.trust_db_data = trust;
    }

    /// Set a value from client code.
    pub fn set_value(&mut self, name: &str, raw: impl Into<Value>) -> Result<()> {
        self.update_value(name, raw.into(), false)
    }

    /// Run a value through the column pipeline and store the result.
    pub fn update_value(&mut self, name: &str, raw: Value, is_from_db: bool) -> Result<()> {
        let trust = is_from_db && self.trust_db_data;
        self.update_value_inner(name, raw, is_from_db, trust, false)
    }

    /// Apply many values, accumulating validation errors.
    ///
    /// Validation failures from individual columns are merged and
    /// reported together; any other error aborts immediately.
    pub fn update_values(
        &mut self,
        pairs: impl IntoIterator<Item = (String, Value)>,
        is_from_db: bool,
    ) -> Result<()> {
        let mut validation = ValidationErrors::new();
        for (name, value) in pairs {
            match self.update_value(&name, value, is_from_db) {
                Ok(()) => {}
                Err(Error::Validation(errors)) => validation.merge(errors),
                Err(other) => return Err(other),
            }
        }
        validation.into_result().map_err(Error::from)
    }

    fn update_value_inner(
        &mut self,
        name: &str,
        raw: Value,
        is_from_db: bool,
        trust_db: bool,
        reconciling: bool,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        if matches!(self.state, RecordState::Snapshot(_)) {
            return Err(self.record_error(
                RecordErrorKind::ReadOnly,
                "record is a read-only snapshot",
            ));
        }
        let Some(column) = schema.column(name) else {
            return Err(
                QueryError::unknown_column(QuerySubject::Record, schema.table_name(), name).into(),
            );
        };
        if self.collecting && is_from_db && !reconciling {
            return Err(self.record_error(
                RecordErrorKind::DbUpdateDuringCollect,
                "DB-sourced updates are not allowed while collecting updates",
            ));
        }

        let existing = match &self.state {
            RecordState::Live(values) => values.get(name).cloned(),
            RecordState::Snapshot(_) => None,
        };
        if column.primary_key
            && !is_from_db
            && existing.as_ref().is_some_and(RecordValue::is_from_db)
        {
            return Err(self.record_error(
                RecordErrorKind::PrimaryKeyConflict,
                "primary key loaded from the DB cannot be changed by client code",
            ));
        }

        match column.process_incoming(raw, is_from_db, trust_db, existing.as_ref())? {
            ValueUpdate::Unchanged { became_from_db } => {
                if became_from_db {
                    if let RecordState::Live(values) = &mut self.state {
                        if let Some(container) = values.get_mut(name) {
                            container.mark_from_db();
                        }
                    }
                }
                Ok(())
            }
            ValueUpdate::New(container) => {
                let errors = container.errors().to_vec();
                let committed = container.has_value();
                let pk_replaced = column.primary_key
                    && existing.as_ref().is_some_and(RecordValue::is_from_db)
                    && container.value() != existing.as_ref().and_then(RecordValue::value);

                if self.collecting && !self.backup.contains_key(name) {
                    self.backup.insert(name.to_string(), existing);
                }
                if let RecordState::Live(values) = &mut self.state {
                    values.insert(name.to_string(), container);
                }
                if !errors.is_empty() {
                    return Err(Error::Validation(ValidationErrors { errors }));
                }
                if pk_replaced {
                    self.apply_primary_key_wipe();
                } else if is_from_db && committed {
                    self.invalidate_related_for_column(name);
                }
                if column.primary_key && !reconciling {
                    self.exists_in_db = None;
                }
                Ok(())
            }
        }
    }

    /// Drop the primary-key value.
    ///
    /// This is the accepted path for detaching a record from its DB
    /// row; related caches are wiped and every other value loses its
    /// DB origin.
    pub fn unset_primary_key(&mut self) -> Result<()> {
        if matches!(self.state, RecordState::Snapshot(_)) {
            return Err(self.record_error(
                RecordErrorKind::ReadOnly,
                "record is a read-only snapshot",
            ));
        }
        let pk = self.schema.primary_key().name.clone();
        if let RecordState::Live(values) = &mut self.state {
            values.remove(&pk);
        }
        self.apply_primary_key_wipe();
        Ok(())
    }

    fn apply_primary_key_wipe(&mut self) {
        let pk = self.schema.primary_key().name.clone();
        self.related.clear();
        if let RecordState::Live(values) = &mut self.state {
            for (name, container) in values.iter_mut() {
                if *name != pk {
                    container.mark_not_from_db();
                }
            }
        }
        self.exists_in_db = None;
    }

    /// Evict cached related data whose foreign-key match no longer
    /// holds after a DB-sourced change to `column`.
    fn invalidate_related_for_column(&mut self, column: &str) {
        let schema = Arc::clone(&self.schema);
        for relation in schema.relations() {
            if relation.local_column != column {
                continue;
            }
            let local = self.value(&relation.local_column).cloned();
            let keep = match self.related.get(&relation.name) {
                None => continue,
                Some(RelatedData::Many {
                    fetched_from_db: false,
                    ..
                }) => false,
                Some(RelatedData::One(record)) => {
                    local.is_some() && record.value(&relation.foreign_column) == local.as_ref()
                }
                Some(RelatedData::Many { records, .. }) => {
                    local.is_some()
                        && records
                            .iter()
                            .all(|r| r.value(&relation.foreign_column) == local.as_ref())
                }
            };
            if !keep {
                tracing::trace!(
                    relation = %relation.name,
                    column,
                    "evicting stale related data"
                );
                self.related.remove(&relation.name);
            }
        }
    }

    /// Feed a DB row through the trust path.
    ///
    /// Plain columns are applied directly; `Rel__col` groups become
    /// attached related records, recursively. Columns the schema does
    /// not declare (aggregates and the like) are ignored.
    pub fn apply_db_row(&mut self, row: &Row) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let mut relation_names: Vec<String> = Vec::new();
        for (name, value) in row.iter() {
            if let Some((prefix, _)) = name.split_once("__") {
                if schema.relation(prefix).is_some() {
                    if !relation_names.iter().any(|n| n == prefix) {
                        relation_names.push(prefix.to_string());
                    }
                    continue;
                }
            }
            if schema.column(name).is_some() {
                self.update_value_inner(name, value.clone(), true, true, true)?;
            }
        }
        self.exists_in_db = Some(true);

        for relation_name in relation_names {
            let Some(relation) = schema.relation(&relation_name) else {
                continue;
            };
            let sub = row.subset_by_prefix(&relation_name);
            // A LEFT JOIN miss arrives as an all-null group.
            if sub.iter().all(|(_, value)| value.is_null()) {
                continue;
            }
            let foreign = SchemaRegistry::get(&relation.foreign_table)
                .ok_or_else(|| QueryError::unknown_table(&relation.foreign_table))?;
            let mut related = Record::new(foreign);
            related.apply_db_row(&sub)?;
            self.related
                .insert(relation_name, RelatedData::One(Box::new(related)));
        }
        Ok(())
    }

    /// Attach related data under a declared relation name.
    pub fn attach_related(&mut self, name: &str, data: RelatedData) -> Result<()> {
        if self.schema.relation(name).is_none() {
            return Err(QueryError::unknown_relation(self.schema.table_name(), name).into());
        }
        self.related.insert(name.to_string(), data);
        Ok(())
    }

    pub fn related(&self, name: &str) -> Option<&RelatedData> {
        self.related.get(name)
    }

    /// Enter collecting mode, buffering pre-mutation containers.
    pub fn begin(&mut self) -> Result<()> {
        if matches!(self.state, RecordState::Snapshot(_)) {
            return Err(self.record_error(
                RecordErrorKind::ReadOnly,
                "record is a read-only snapshot",
            ));
        }
        if self.collecting {
            return Err(self.record_error(
                RecordErrorKind::AlreadyCollecting,
                "record is already collecting updates",
            ));
        }
        if !self.exists() {
            return Err(self.record_error(
                RecordErrorKind::BeginOnNonexistentRecord,
                "cannot collect updates on a record that does not exist in the DB",
            ));
        }
        self.collecting = true;
        self.backup.clear();
        Ok(())
    }

    /// Restore every column touched since `begin()`.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.collecting {
            return Err(self.record_error(
                RecordErrorKind::NotCollecting,
                "rollback called without begin",
            ));
        }
        let backup = std::mem::take(&mut self.backup);
        if let RecordState::Live(values) = &mut self.state {
            for (name, previous) in backup {
                match previous {
                    Some(container) => {
                        values.insert(name, container);
                    }
                    None => {
                        values.remove(&name);
                    }
                }
            }
        }
        self.collecting = false;
        Ok(())
    }

    /// Persist the columns touched since `begin()`.
    pub fn commit(&mut self, conn: &dyn Connection) -> Result<SaveOutcome> {
        self.commit_with_relations(conn, &[], false)
    }

    /// Persist touched columns, then cascade saves into the named
    /// relations. With `drop_unlisted_related`, attached related data
    /// outside the list is evicted from the cache first.
    pub fn commit_with_relations(
        &mut self,
        conn: &dyn Connection,
        relations: &[&str],
        drop_unlisted_related: bool,
    ) -> Result<SaveOutcome> {
        if !self.collecting {
            return Err(self.record_error(
                RecordErrorKind::NotCollecting,
                "commit called without begin",
            ));
        }
        let schema = Arc::clone(&self.schema);
        let mut columns: Vec<String> = self
            .backup
            .keys()
            .filter(|name| schema.column(name).is_some_and(|c| c.is_writable()))
            .cloned()
            .collect();
        columns.sort();
        self.collecting = false;
        self.backup.clear();
        let outcome = self.save_to_db(&columns, conn)?;
        if drop_unlisted_related {
            self.related
                .retain(|name, _| relations.contains(&name.as_str()));
        }
        self.save_relations(relations, conn)?;
        Ok(outcome)
    }

    /// Persist every dirty, writable, persisted column.
    pub fn save(&mut self, conn: &dyn Connection) -> Result<SaveOutcome> {
        self.save_with_relations(conn, &[])
    }

    /// Persist dirty columns, then cascade into the named relations.
    pub fn save_with_relations(
        &mut self,
        conn: &dyn Connection,
        relations: &[&str],
    ) -> Result<SaveOutcome> {
        let schema = Arc::clone(&self.schema);
        let mut columns: Vec<String> = match &self.state {
            RecordState::Live(values) => values
                .iter()
                .filter(|(name, container)| {
                    container.has_value()
                        && !container.is_from_db()
                        && schema.column(name).is_some_and(|c| c.is_writable())
                })
                .map(|(name, _)| name.clone())
                .collect(),
            RecordState::Snapshot(_) => {
                return Err(self.record_error(
                    RecordErrorKind::ReadOnly,
                    "record is a read-only snapshot",
                ));
            }
        };
        columns.sort();
        let outcome = self.save_to_db(&columns, conn)?;
        self.save_relations(relations, conn)?;
        Ok(outcome)
    }

    /// Write the named columns to the DB.
    #[tracing::instrument(level = "debug", skip(self, conn), fields(table = %self.schema.table_name()))]
    pub fn save_to_db(&mut self, columns: &[String], conn: &dyn Connection) -> Result<SaveOutcome> {
        if !self.saving_allowed {
            return Err(self.record_error(
                RecordErrorKind::SavingForbidden,
                "saving is forbidden for this record",
            ));
        }
        if matches!(self.state, RecordState::Snapshot(_)) {
            return Err(self.record_error(
                RecordErrorKind::ReadOnly,
                "record is a read-only snapshot",
            ));
        }
        if self.trust_db_data {
            return Err(self.record_error(
                RecordErrorKind::TrustModeActive,
                "cannot save while trust mode is active",
            ));
        }

        let schema = Arc::clone(&self.schema);
        for name in columns {
            match schema.column(name) {
                None => {
                    return Err(QueryError::unknown_column(
                        QuerySubject::Record,
                        schema.table_name(),
                        name,
                    )
                    .into());
                }
                Some(column) if !column.is_writable() => {
                    return Err(activerow_core::ColumnError::read_only(name).into());
                }
                Some(_) => {}
            }
        }

        let is_insert = !self.exists();
        if columns.is_empty() {
            self.run_saving_extenders(&[], is_insert, conn)?;
            return Ok(SaveOutcome::NothingToSave);
        }
        let writes = self.collect_writes(columns, is_insert)?;
        if writes.is_empty() {
            self.run_saving_extenders(&[], is_insert, conn)?;
            return Ok(SaveOutcome::NothingToSave);
        }
        if is_insert {
            self.validate_before_insert(&writes)?;
        }

        let owns_tx = !conn.in_transaction();
        if owns_tx {
            conn.begin()?;
        }
        let outcome = match self.perform_data_save(&writes, is_insert, conn) {
            Ok(outcome) => {
                if owns_tx {
                    if let Err(err) = conn.commit() {
                        let _ = conn.rollback();
                        return Err(err);
                    }
                }
                outcome
            }
            Err(err) => {
                if owns_tx {
                    let _ = conn.rollback();
                }
                return Err(err);
            }
        };
        if outcome == SaveOutcome::RecordGone {
            tracing::debug!(table = %schema.table_name(), "update matched no row, record is gone");
            self.reset_after_stale_update();
            return Ok(SaveOutcome::RecordGone);
        }

        let written: Vec<String> = writes.iter().map(|(name, _)| name.clone()).collect();
        self.run_saving_extenders(&written, is_insert, conn)?;
        if self.collecting && !self.backup.is_empty() {
            // Extenders buffered further changes; flush them.
            self.commit(conn)?;
        }
        self.exists_in_db = Some(true);
        tracing::debug!(table = %schema.table_name(), columns = written.len(), is_insert, "record saved");
        Ok(SaveOutcome::Saved)
    }

    /// Collect the values to write, in schema declaration order.
    ///
    /// A requested column contributes its value only when it is
    /// persisted, not the primary key, holds a value not already
    /// DB-sourced, or (on insert) resolves a client-side default.
    /// Auto-updating columns contribute their forced value whenever
    /// anything else writes; they never produce a write on their own,
    /// so a clean record stays clean.
    fn collect_writes(&self, columns: &[String], is_insert: bool) -> Result<Vec<(String, Value)>> {
        let requested: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let mut writes = Vec::new();
        let mut has_data_write = false;
        for column in self.schema.columns() {
            if !column.exists_in_db || column.primary_key {
                continue;
            }
            if column.auto_updating {
                writes.push((
                    column.name.clone(),
                    column.behavior().auto_update_value(column),
                ));
                continue;
            }
            if !requested.contains(column.name.as_str()) {
                continue;
            }
            let current = match &self.state {
                RecordState::Live(values) => values.get(&column.name),
                RecordState::Snapshot(_) => None,
            };
            match current {
                Some(container) if container.has_value() && !container.is_from_db() => {
                    if let Some(value) = container.value() {
                        writes.push((column.name.clone(), value.clone()));
                        has_data_write = true;
                    }
                }
                Some(container) if container.has_value() => {}
                _ => {
                    if is_insert {
                        if let Some(default) = column.resolve_default()? {
                            writes.push((column.name.clone(), default));
                            has_data_write = true;
                        }
                    }
                }
            }
        }
        if !has_data_write {
            writes.clear();
        }
        Ok(writes)
    }

    /// Non-nullable persisted columns must be covered by a value or a
    /// default before the first INSERT.
    fn validate_before_insert(&self, writes: &[(String, Value)]) -> Result<()> {
        let written: HashSet<&str> = writes.iter().map(|(name, _)| name.as_str()).collect();
        let mut errors = ValidationErrors::new();
        for column in self.schema.columns() {
            if !column.exists_in_db
                || column.primary_key
                || column.nullable
                || column.has_default()
                || written.contains(column.name.as_str())
            {
                continue;
            }
            let has_value = match &self.state {
                RecordState::Live(values) => {
                    values.get(&column.name).is_some_and(RecordValue::has_value)
                }
                RecordState::Snapshot(_) => false,
            };
            if !has_value {
                errors.add_cannot_be_null(&column.name);
            }
        }
        errors.into_result().map_err(Error::from)
    }

    /// Issue the INSERT or UPDATE and reconcile the RETURNING row.
    fn perform_data_save(
        &mut self,
        writes: &[(String, Value)],
        is_insert: bool,
        conn: &dyn Connection,
    ) -> Result<SaveOutcome> {
        let schema = Arc::clone(&self.schema);
        let table = quote_qualified(&schema.qualified_name());
        let pk = schema.primary_key();
        let mut params = Vec::new();

        let sql = if is_insert {
            let mut all_writes: Vec<(String, Value)> = Vec::with_capacity(writes.len() + 1);
            // An unvalued primary key defers to the DB default.
            let pk_value = self.value(&pk.name).cloned().unwrap_or(Value::Default);
            all_writes.push((pk.name.clone(), pk_value));
            all_writes.extend(writes.iter().cloned());

            let cols: Vec<String> = all_writes.iter().map(|(n, _)| quote_ident(n)).collect();
            let exprs: Vec<String> = all_writes
                .iter()
                .map(|(_, value)| render_write_expr(value, &mut params))
                .collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
                cols.join(", "),
                exprs.join(", ")
            )
        } else {
            let sets: Vec<String> = writes
                .iter()
                .map(|(name, value)| {
                    format!("{} = {}", quote_ident(name), render_write_expr(value, &mut params))
                })
                .collect();
            let pk_value = self.value(&pk.name).cloned().ok_or_else(|| {
                self.record_error(
                    RecordErrorKind::NoPrimaryKeyValue,
                    "cannot update a record without a primary key value",
                )
            })?;
            params.push(pk_value);
            format!(
                "UPDATE {table} SET {} WHERE {} = ${} RETURNING *",
                sets.join(", "),
                quote_ident(&pk.name),
                params.len()
            )
        };

        let mut rows = conn.execute_returning(&sql, &params)?;
        if rows.is_empty() {
            if is_insert {
                return Err(DbError::new("INSERT returned no row").with_sql(sql).into());
            }
            return Ok(SaveOutcome::RecordGone);
        }
        let row = rows.remove(0);
        self.apply_db_row(&row)?;
        Ok(SaveOutcome::Saved)
    }

    fn run_saving_extenders(
        &mut self,
        written: &[String],
        is_insert: bool,
        conn: &dyn Connection,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        for column in schema.columns() {
            let virtual_with_value = !column.exists_in_db
                && self
                    .record_value(&column.name)
                    .is_some_and(RecordValue::has_value);
            if !written.contains(&column.name) && !virtual_with_value {
                continue;
            }
            if let RecordState::Live(values) = &mut self.state {
                if let Some(container) = values.get_mut(&column.name) {
                    column.behavior().after_save(column, container, is_insert, conn)?;
                }
            }
        }
        Ok(())
    }

    fn reset_after_stale_update(&mut self) {
        self.related.clear();
        if let RecordState::Live(values) = &mut self.state {
            for container in values.values_mut() {
                container.mark_not_from_db();
            }
        }
        self.exists_in_db = Some(false);
    }

    /// Cascade saves into the named relations, aborting on the first
    /// failure.
    fn save_relations(&mut self, names: &[&str], conn: &dyn Connection) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        for name in names {
            let relation = schema
                .relation(name)
                .ok_or_else(|| QueryError::unknown_relation(schema.table_name(), *name))?
                .clone();
            match relation.kind {
                RelationKind::BelongsTo => {
                    let adopted = match self.related.get_mut(*name) {
                        Some(RelatedData::One(parent)) => {
                            parent.save(conn)?;
                            parent.value(&relation.foreign_column).cloned()
                        }
                        _ => None,
                    };
                    if let Some(value) = adopted {
                        if self.value(&relation.local_column) != Some(&value) {
                            self.update_value(&relation.local_column, value, false)?;
                            // the main save already ran; flush the key
                            if self.exists() {
                                self.save_to_db(&[relation.local_column.clone()], conn)?;
                            }
                        }
                    }
                }
                RelationKind::HasOne | RelationKind::HasMany => {
                    let local_value = self.value(&relation.local_column).cloned();
                    match self.related.get_mut(*name) {
                        Some(RelatedData::One(child)) => {
                            push_foreign_key(child, &relation.foreign_column, &local_value)?;
                            child.save(conn)?;
                        }
                        Some(RelatedData::Many { records, .. }) => {
                            for child in records {
                                push_foreign_key(child, &relation.foreign_column, &local_value)?;
                                child.save(conn)?;
                            }
                        }
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete this record by primary key.
    ///
    /// Per-column delete extenders run after the write transaction
    /// closes but before the local state reset.
    #[tracing::instrument(level = "debug", skip(self, conn), fields(table = %self.schema.table_name()))]
    pub fn delete(&mut self, conn: &dyn Connection) -> Result<()> {
        self.delete_with_reset(conn, true)
    }

    /// Delete, optionally keeping column values (only the primary key
    /// is dropped).
    pub fn delete_with_reset(&mut self, conn: &dyn Connection, full_reset: bool) -> Result<()> {
        if matches!(self.state, RecordState::Snapshot(_)) {
            return Err(self.record_error(
                RecordErrorKind::ReadOnly,
                "record is a read-only snapshot",
            ));
        }
        let schema = Arc::clone(&self.schema);
        let pk = schema.primary_key();
        let pk_value = self.value(&pk.name).cloned().ok_or_else(|| {
            self.record_error(
                RecordErrorKind::NoPrimaryKeyValue,
                "cannot delete a record without a primary key value",
            )
        })?;

        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_qualified(&schema.qualified_name()),
            quote_ident(&pk.name)
        );
        let owns_tx = !conn.in_transaction();
        if owns_tx {
            conn.begin()?;
        }
        match conn.execute(&sql, &[pk_value]) {
            Ok(_) => {
                if owns_tx {
                    if let Err(err) = conn.commit() {
                        let _ = conn.rollback();
                        return Err(err);
                    }
                }
            }
            Err(err) => {
                if owns_tx {
                    let _ = conn.rollback();
                }
                return Err(err);
            }
        }

        for column in schema.columns() {
            if let RecordState::Live(values) = &mut self.state {
                if let Some(container) = values.get_mut(&column.name) {
                    column.behavior().after_delete(column, container, conn)?;
                }
            }
        }

        self.related.clear();
        self.backup.clear();
        self.collecting = false;
        if full_reset {
            self.state = RecordState::Live(HashMap::new());
        } else if let RecordState::Live(values) = &mut self.state {
            values.remove(&pk.name);
            for container in values.values_mut() {
                container.mark_not_from_db();
            }
        }
        self.exists_in_db = Some(false);
        Ok(())
    }

    /// Re-read every non-heavy column from the DB.
    pub fn reload(&mut self, conn: &dyn Connection) -> Result<()> {
        let row = self.fetch_own_row(&[], conn)?;
        self.state = RecordState::Live(HashMap::new());
        self.related.clear();
        self.apply_db_row(&row)
    }

    /// Read the named columns (heavy ones included) from the DB.
    pub fn read_columns(&mut self, columns: &[&str], conn: &dyn Connection) -> Result<()> {
        let row = self.fetch_own_row(columns, conn)?;
        self.apply_db_row(&row)
    }

    fn fetch_own_row(&self, columns: &[&str], conn: &dyn Connection) -> Result<Row> {
        let pk = self.schema.primary_key().name.clone();
        let pk_value = self.value(&pk).cloned().ok_or_else(|| {
            self.record_error(
                RecordErrorKind::NoPrimaryKeyValue,
                "cannot fetch a record without a primary key value",
            )
        })?;
        let mut select = SelectBuilder::new(Arc::clone(&self.schema));
        if !columns.is_empty() {
            select.columns(columns)?;
        }
        select.filter(Condition::Eq(pk, pk_value));
        select.fetch_one(conn)?.ok_or_else(|| {
            self.record_error(RecordErrorKind::NotFound, "record not found")
        })
    }

    /// Capture this record for serialization; relations are excluded
    /// and private columns are skipped.
    pub fn to_snapshot(&self) -> Result<serde_json::Value> {
        let mut values = HashMap::new();
        match &self.state {
            RecordState::Live(containers) => {
                for (name, container) in containers {
                    if self.schema.column(name).is_some_and(|c| c.private) {
                        continue;
                    }
                    values.insert(name.clone(), container.to_snapshot());
                }
            }
            RecordState::Snapshot(raw) => {
                for (name, value) in raw {
                    if self.schema.column(name).is_some_and(|c| c.private) {
                        continue;
                    }
                    values.insert(
                        name.clone(),
                        activerow_core::ValueSnapshot {
                            raw_value: None,
                            value: Some(value.clone()),
                            has_value: true,
                            is_from_db: true,
                            payload: HashMap::new(),
                        },
                    );
                }
            }
        }
        let snapshot = RecordSnapshot {
            props: SnapshotProps {
                exists_in_db: self.exists(),
            },
            values,
        };
        Ok(serde_json::to_value(snapshot)?)
    }

    /// Rebuild a record from a snapshot produced by `to_snapshot`.
    pub fn from_snapshot(
        schema: Arc<dyn TableSchema>,
        snapshot: serde_json::Value,
    ) -> Result<Self> {
        let parsed: RecordSnapshot = serde_json::from_value(snapshot)?;
        let mut record = Self::new(schema);
        let mut values = HashMap::new();
        for (name, captured) in parsed.values {
            let Some(column) = record.schema.column(&name) else {
                continue;
            };
            let mut container = RecordValue::new(column.exists_in_db);
            if captured.has_value {
                let value = captured.value.map_or(Value::Null, Value::from_json);
                let raw = captured.raw_value.map(Value::from_json);
                container.set_value(&name, value, raw, captured.is_from_db)?;
                for (key, data) in captured.payload {
                    container.set_payload(&name, key, data)?;
                }
            }
            values.insert(name, container);
        }
        record.state = RecordState::Live(values);
        record.exists_in_db = Some(parsed.props.exists_in_db);
        Ok(record)
    }

    /// Clear all state so the record can host another row.
    pub(crate) fn reset_for_reuse(&mut self) {
        self.state = RecordState::Live(HashMap::new());
        self.related.clear();
        self.backup.clear();
        self.collecting = false;
        self.exists_in_db = None;
    }

    fn record_error(&self, kind: RecordErrorKind, message: &str) -> Error {
        RecordError::new(kind, self.schema.table_name(), message).into()
    }
}

fn render_write_expr(value: &Value, params: &mut Vec<Value>) -> String {
    if matches!(value, Value::Default) {
        "DEFAULT".to_string()
    } else {
        params.push(value.clone());
        format!("${}", params.len())
    }
}

fn push_foreign_key(
    child: &mut Record,
    foreign_column: &str,
    local_value: &Option<Value>,
) -> Result<()> {
    if let Some(value) = local_value {
        if child.value(foreign_column) != Some(value) {
            child.update_value(foreign_column, value.clone(), false)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryTable, ScriptedConnection};
    use activerow_core::{ColumnSpec, ColumnType, DefaultValue, Relation, ValueErrorKind};

    fn users_schema() -> Arc<dyn TableSchema> {
        if let Some(schema) = SchemaRegistry::get("rec_users") {
            return schema;
        }
        MemoryTable::new(
            "rec_users",
            vec![
                ColumnSpec::int("id").unwrap().primary_key(),
                ColumnSpec::string("name").unwrap(),
                ColumnSpec::email("email").unwrap().nullable(),
                ColumnSpec::int("age")
                    .unwrap()
                    .with_default(DefaultValue::Literal(Value::Int(0))),
                ColumnSpec::int("team_id").unwrap().nullable(),
            ],
        )
        .unwrap()
        .with_relations(vec![Relation::belongs_to(
            "Team", "team_id", "rec_teams", "id",
        )])
        .register()
    }

    fn teams_schema() -> Arc<dyn TableSchema> {
        if let Some(schema) = SchemaRegistry::get("rec_teams") {
            return schema;
        }
        MemoryTable::new(
            "rec_teams",
            vec![
                ColumnSpec::int("id").unwrap().primary_key(),
                ColumnSpec::string("name").unwrap(),
            ],
        )
        .unwrap()
        .register()
    }

    fn docs_schema() -> Arc<dyn TableSchema> {
        if let Some(schema) = SchemaRegistry::get("rec_docs") {
            return schema;
        }
        MemoryTable::new(
            "rec_docs",
            vec![
                ColumnSpec::int("id").unwrap().primary_key(),
                ColumnSpec::string("title").unwrap(),
                ColumnSpec::new("updated_at", ColumnType::UnixTimestamp)
                    .unwrap()
                    .nullable()
                    .auto_updating(),
            ],
        )
        .unwrap()
        .register()
    }

    fn db_user(id: i64, name: &str) -> Record {
        let row = Row::new(
            vec!["id".into(), "name".into(), "age".into()],
            vec![Value::Int(id), Value::from(name), Value::Int(0)],
        );
        Record::from_db_row(users_schema(), &row).unwrap()
    }

    #[test]
    fn insert_assigns_pk_default_and_reconciles_returning_row() {
        let mut user = Record::new(users_schema());
        user.set_value("name", "ada").unwrap();
        assert!(!user.exists());

        let conn = ScriptedConnection::new();
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "name".into(), "age".into()],
            vec![Value::Int(7), Value::from("ada"), Value::Int(0)],
        )]);
        let outcome = user.save(&conn).unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);
        assert!(user.exists());
        assert_eq!(user.primary_key_value(), Some(&Value::Int(7)));
        assert_eq!(user.value("age"), Some(&Value::Int(0)));

        let sql = conn.statement_sql();
        assert_eq!(sql[0], "BEGIN");
        assert_eq!(
            sql[1],
            "INSERT INTO \"rec_users\" (\"id\", \"name\") VALUES (DEFAULT, $1) RETURNING *"
        );
        assert_eq!(sql[2], "COMMIT");
    }

    #[test]
    fn update_writes_only_dirty_columns() {
        let mut user = db_user(7, "ada");
        user.set_value("name", "grace").unwrap();

        let conn = ScriptedConnection::new();
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "name".into(), "age".into()],
            vec![Value::Int(7), Value::from("grace"), Value::Int(0)],
        )]);
        assert_eq!(user.save(&conn).unwrap(), SaveOutcome::Saved);

        let statements = conn.statements();
        assert_eq!(
            statements[1].0,
            "UPDATE \"rec_users\" SET \"name\" = $1 WHERE \"id\" = $2 RETURNING *"
        );
        assert_eq!(
            statements[1].1,
            vec![Value::Text("grace".into()), Value::Int(7)]
        );
    }

    #[test]
    fn save_with_no_dirty_columns_writes_nothing() {
        let mut user = db_user(7, "ada");
        let conn = ScriptedConnection::new();
        assert_eq!(user.save(&conn).unwrap(), SaveOutcome::NothingToSave);
        assert!(conn.statements().is_empty());
    }

    #[test]
    fn clean_record_save_never_writes_auto_updating_columns() {
        let row = Row::new(
            vec!["id".into(), "title".into(), "updated_at".into()],
            vec![Value::Int(7), Value::from("notes"), Value::Int(100)],
        );
        let mut doc = Record::from_db_row(docs_schema(), &row).unwrap();

        let conn = ScriptedConnection::new();
        assert_eq!(doc.save(&conn).unwrap(), SaveOutcome::NothingToSave);
        assert!(conn.statements().is_empty());

        // A real data write still carries the forced value along.
        doc.set_value("title", "draft").unwrap();
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "title".into(), "updated_at".into()],
            vec![Value::Int(7), Value::from("draft"), Value::Int(200)],
        )]);
        assert_eq!(doc.save(&conn).unwrap(), SaveOutcome::Saved);
        let sql = conn.statement_sql();
        let update = sql
            .iter()
            .find(|s| s.starts_with("UPDATE"))
            .expect("an UPDATE statement");
        assert!(update.contains("\"title\" = $1"));
        assert!(update.contains("\"updated_at\" = $2"));
    }

    #[test]
    fn stale_update_resets_without_error() {
        let mut user = db_user(42, "ada");
        user.set_value("name", "grace").unwrap();

        let conn = ScriptedConnection::new();
        conn.expect_rows(vec![]);
        let outcome = user.save(&conn).unwrap();
        assert_eq!(outcome, SaveOutcome::RecordGone);
        assert!(!user.exists());
    }

    #[test]
    fn save_joins_an_open_transaction_without_owning_it() {
        let mut user = db_user(7, "ada");
        user.set_value("name", "grace").unwrap();

        let conn = ScriptedConnection::new();
        conn.begin().unwrap();
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int(7), Value::from("grace")],
        )]);
        user.save(&conn).unwrap();
        assert!(conn.in_transaction());
        let sql = conn.statement_sql();
        assert_eq!(sql.iter().filter(|s| *s == "BEGIN").count(), 1);
        assert!(!sql.contains(&"COMMIT".to_string()));
    }

    #[test]
    fn db_error_rolls_back_owned_transaction() {
        let mut user = db_user(7, "ada");
        user.set_value("name", "grace").unwrap();

        let conn = ScriptedConnection::new();
        conn.expect_error("deadlock detected");
        assert!(user.save(&conn).is_err());
        let sql = conn.statement_sql();
        assert_eq!(sql[0], "BEGIN");
        assert_eq!(*sql.last().unwrap(), "ROLLBACK");
    }

    #[test]
    fn begin_requires_existing_record() {
        let mut user = Record::new(users_schema());
        let err = user.begin().unwrap_err();
        assert_eq!(
            err.record_kind(),
            Some(RecordErrorKind::BeginOnNonexistentRecord)
        );
    }

    #[test]
    fn rollback_restores_values_before_begin() {
        let mut user = db_user(7, "ada");
        user.begin().unwrap();
        user.set_value("name", "grace").unwrap();
        user.set_value("email", "g@x.io").unwrap();
        user.rollback().unwrap();
        assert_eq!(user.value("name"), Some(&Value::Text("ada".into())));
        assert_eq!(user.value("email"), None);
        assert!(!user.is_collecting());
    }

    #[test]
    fn commit_persists_only_touched_columns() {
        let mut user = db_user(7, "ada");
        user.begin().unwrap();
        user.set_value("email", "ada@x.io").unwrap();

        let conn = ScriptedConnection::new();
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "name".into(), "email".into()],
            vec![Value::Int(7), Value::from("ada"), Value::from("ada@x.io")],
        )]);
        assert_eq!(user.commit(&conn).unwrap(), SaveOutcome::Saved);
        assert_eq!(
            conn.statements()[1].0,
            "UPDATE \"rec_users\" SET \"email\" = $1 WHERE \"id\" = $2 RETURNING *"
        );
    }

    #[test]
    fn db_sourced_updates_rejected_while_collecting() {
        let mut user = db_user(7, "ada");
        user.begin().unwrap();
        let err = user
            .update_value("name", Value::from("x"), true)
            .unwrap_err();
        assert_eq!(
            err.record_kind(),
            Some(RecordErrorKind::DbUpdateDuringCollect)
        );
    }

    #[test]
    fn validation_errors_surface_and_do_not_commit() {
        let mut user = db_user(7, "ada");
        let err = user.set_value("age", "").unwrap_err();
        let validation = err.as_validation().unwrap();
        assert!(validation.contains("age", ValueErrorKind::CannotBeNull));
        // the failed attempt left an error container, not a value
        assert_eq!(user.value("age"), None);
        assert_eq!(user.column_errors("age").len(), 1);
    }

    #[test]
    fn client_cannot_change_db_loaded_primary_key() {
        let mut user = db_user(7, "ada");
        let err = user.set_value("id", 8).unwrap_err();
        assert_eq!(err.record_kind(), Some(RecordErrorKind::PrimaryKeyConflict));
    }

    #[test]
    fn unset_primary_key_detaches_values_from_db() {
        let mut user = db_user(7, "ada");
        user.unset_primary_key().unwrap();
        assert!(!user.exists());
        assert_eq!(user.primary_key_value(), None);
        let name = user.record_value("name").unwrap();
        assert!(name.has_value());
        assert!(!name.is_from_db());
    }

    #[test]
    fn db_sourced_fk_change_evicts_stale_related() {
        teams_schema();
        let row = Row::new(
            vec![
                "id".into(),
                "name".into(),
                "team_id".into(),
                "Team__id".into(),
                "Team__name".into(),
            ],
            vec![
                Value::Int(1),
                Value::from("ada"),
                Value::Int(5),
                Value::Int(5),
                Value::from("core"),
            ],
        );
        let mut user = Record::from_db_row(users_schema(), &row).unwrap();
        assert!(matches!(user.related("Team"), Some(RelatedData::One(_))));

        user.update_value("team_id", Value::Int(6), true).unwrap();
        assert!(user.related("Team").is_none());
    }

    #[test]
    fn forbid_and_allow_saving() {
        let mut user = db_user(7, "ada");
        user.set_value("name", "grace").unwrap();
        user.forbid_saving();

        let conn = ScriptedConnection::new();
        let err = user.save(&conn).unwrap_err();
        assert_eq!(err.record_kind(), Some(RecordErrorKind::SavingForbidden));

        user.allow_saving();
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int(7), Value::from("grace")],
        )]);
        assert_eq!(user.save(&conn).unwrap(), SaveOutcome::Saved);
    }

    #[test]
    fn delete_runs_in_own_transaction_and_resets() {
        let mut user = db_user(7, "ada");
        let conn = ScriptedConnection::new();
        conn.expect_affected(1);
        user.delete(&conn).unwrap();
        assert!(!user.exists());
        assert_eq!(user.value("name"), None);
        assert_eq!(
            conn.statement_sql(),
            vec!["BEGIN", "DELETE FROM \"rec_users\" WHERE \"id\" = $1", "COMMIT"]
        );
    }

    #[test]
    fn delete_without_pk_fails() {
        let mut user = Record::new(users_schema());
        let conn = ScriptedConnection::new();
        let err = user.delete(&conn).unwrap_err();
        assert_eq!(err.record_kind(), Some(RecordErrorKind::NoPrimaryKeyValue));
    }

    #[test]
    fn snapshot_round_trip_excludes_relations() {
        teams_schema();
        let row = Row::new(
            vec![
                "id".into(),
                "name".into(),
                "team_id".into(),
                "Team__id".into(),
                "Team__name".into(),
            ],
            vec![
                Value::Int(1),
                Value::from("ada"),
                Value::Int(5),
                Value::Int(5),
                Value::from("core"),
            ],
        );
        let user = Record::from_db_row(users_schema(), &row).unwrap();
        let snapshot = user.to_snapshot().unwrap();
        assert!(snapshot.get("values").is_some());

        let restored = Record::from_snapshot(users_schema(), snapshot).unwrap();
        assert!(restored.exists());
        assert_eq!(restored.value("name"), Some(&Value::Text("ada".into())));
        assert_eq!(restored.value("team_id"), Some(&Value::Int(5)));
        assert!(restored.related("Team").is_none());
    }

    #[test]
    fn read_only_snapshot_rejects_mutation() {
        let mut values = HashMap::new();
        values.insert("id".to_string(), serde_json::json!(1));
        values.insert("name".to_string(), serde_json::json!("ada"));
        let mut user = Record::read_only_snapshot(users_schema(), values);
        assert_eq!(user.snapshot_value("name"), Some(&serde_json::json!("ada")));

        let err = user.set_value("name", "grace").unwrap_err();
        assert_eq!(err.record_kind(), Some(RecordErrorKind::ReadOnly));
        assert!(user.begin().is_err());
    }

    #[test]
    fn trust_mode_blocks_saving() {
        let mut user = db_user(7, "ada");
        user.set_trust_db_data(true);
        let conn = ScriptedConnection::new();
        let err = user.save_to_db(&["name".to_string()], &conn).unwrap_err();
        assert_eq!(err.record_kind(), Some(RecordErrorKind::TrustModeActive));
    }

    #[test]
    fn insert_rejects_missing_non_nullable_columns() {
        let mut user = Record::new(users_schema());
        user.set_value("email", "a@b.io").unwrap();
        let conn = ScriptedConnection::new();
        let err = user.save(&conn).unwrap_err();
        let validation = err.as_validation().unwrap();
        assert!(validation.contains("name", ValueErrorKind::CannotBeNull));
        assert!(conn.statements().is_empty());
    }

    #[test]
    fn belongs_to_cascade_saves_parent_and_adopts_key() {
        teams_schema();
        let mut user = db_user(7, "ada");
        let mut team = Record::new(teams_schema());
        team.set_value("name", "core").unwrap();
        user.attach_related("Team", RelatedData::One(Box::new(team)))
            .unwrap();

        let conn = ScriptedConnection::new();
        // parent INSERT, then the adopted FK is saved with the user
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int(3), Value::from("core")],
        )]);
        conn.expect_rows(vec![Row::new(
            vec!["id".into(), "team_id".into()],
            vec![Value::Int(7), Value::Int(3)],
        )]);
        user.save_with_relations(&conn, &["Team"]).unwrap();
        assert_eq!(user.value("team_id"), Some(&Value::Int(3)));
        let sql = conn.statement_sql();
        assert!(sql.iter().any(|s| s.starts_with("INSERT INTO \"rec_teams\"")));
        assert!(sql.iter().any(|s| s.starts_with("UPDATE \"rec_users\" SET \"team_id\"")));
    }
}
