//! Column specifications and the incoming-value pipeline.
//!
//! A [`ColumnSpec`] is immutable after construction and describes one
//! table column: logical type, flags, default, allowed values, and a
//! [`ColumnBehavior`] strategy. Every value entering a record passes
//! through [`ColumnSpec::process_incoming`], which preprocesses,
//! validates, and normalizes it before committing it into a fresh
//! [`RecordValue`] container.

use crate::connection::Connection;
use crate::error::{ColumnError, Result, ValidationErrors};
use crate::record_value::RecordValue;
use crate::value::Value;
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// The logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    String,
    Email,
    Text,
    Json,
    Jsonb,
    Password,
    Timestamp,
    TimestampTz,
    UnixTimestamp,
    Date,
    Time,
    TimezoneOffset,
    Enum,
    Ipv4,
    File,
    Image,
    Blob,
}

impl ColumnType {
    /// Is this a JSON-typed column?
    pub const fn is_json(&self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }

    /// Is this a file-backed column?
    pub const fn is_file(&self) -> bool {
        matches!(self, ColumnType::File | ColumnType::Image)
    }
}

/// How a column's default value is produced.
#[derive(Clone)]
pub enum DefaultValue {
    /// No default
    None,
    /// A literal value, validated against the column itself
    Literal(Value),
    /// A DB-side SQL expression, opaque to validation
    Expression(String),
    /// A generator invoked at resolution time
    Generated(fn() -> Value),
}

impl std::fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultValue::None => write!(f, "None"),
            DefaultValue::Literal(v) => write!(f, "Literal({v:?})"),
            DefaultValue::Expression(e) => write!(f, "Expression({e:?})"),
            DefaultValue::Generated(_) => write!(f, "Generated(..)"),
        }
    }
}

/// The set of values an enum-like column accepts.
#[derive(Clone)]
pub enum AllowedValues {
    /// No restriction
    None,
    /// A fixed set
    Fixed(Vec<Value>),
    /// A set computed lazily on first use
    Lazy(fn() -> Vec<Value>),
}

impl AllowedValues {
    /// Resolve the set, if any.
    pub fn resolve(&self) -> Option<Vec<Value>> {
        match self {
            AllowedValues::None => None,
            AllowedValues::Fixed(values) => Some(values.clone()),
            AllowedValues::Lazy(producer) => Some(producer()),
        }
    }
}

impl std::fmt::Debug for AllowedValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllowedValues::None => write!(f, "None"),
            AllowedValues::Fixed(v) => write!(f, "Fixed({v:?})"),
            AllowedValues::Lazy(_) => write!(f, "Lazy(..)"),
        }
    }
}

/// Uniqueness declaration for a column.
#[derive(Debug, Clone, Default)]
pub struct UniqueSpec {
    /// Compare case-insensitively when checking uniqueness
    pub case_insensitive: bool,
    /// Other columns that together with this one form the unique key
    pub companions: Vec<String>,
}

/// Per-column behavior strategy.
///
/// Every hook has a default implementation driven by the column's type
/// and flags; override only the hooks a column needs to change. Hooks
/// receive the owning [`ColumnSpec`] so a single strategy object can
/// serve many columns.
pub trait ColumnBehavior: Send + Sync {
    /// Adjust an incoming value before validation.
    ///
    /// The default trims, lowercases, and converts empty strings to
    /// null per the column's flags.
    fn preprocess(&self, spec: &ColumnSpec, value: Value) -> Value {
        default_preprocess(spec, value)
    }

    /// Validate a preprocessed value, recording failures.
    ///
    /// Runs the type-fit check, then the allowed-values check, then
    /// [`ColumnBehavior::validate_extra`]. Format checks (email, IPv4,
    /// JSON text) are skipped when `for_condition` is true, since
    /// WHERE-clause matching is less strict than assignment.
    fn validate(
        &self,
        spec: &ColumnSpec,
        value: &Value,
        for_condition: bool,
        errors: &mut ValidationErrors,
    ) {
        if value.is_null() {
            if !spec.nullable {
                errors.add_cannot_be_null(&spec.name);
            }
            return;
        }
        default_type_check(spec, value, for_condition, errors);
        if errors.is_empty() {
            self.validate_allowed(spec, value, errors);
        }
        if errors.is_empty() {
            self.validate_extra(spec, value, errors);
        }
    }

    /// Check the value against the column's allowed set, if declared.
    fn validate_allowed(&self, spec: &ColumnSpec, value: &Value, errors: &mut ValidationErrors) {
        if let Some(allowed) = spec.allowed_values.resolve() {
            if !allowed.contains(value) {
                errors.add_not_allowed(&spec.name);
            }
        }
    }

    /// Arbitrary extra validation. The default accepts everything.
    fn validate_extra(&self, _spec: &ColumnSpec, _value: &Value, _errors: &mut ValidationErrors) {}

    /// Convert a validated value into its committed representation.
    fn normalize(&self, spec: &ColumnSpec, value: Value) -> Value {
        default_normalize(spec, value)
    }

    /// Cheap type coercion for values arriving straight from the DB.
    ///
    /// Used by the trust-mode fast path; must not perform validation.
    fn normalize_from_db(&self, spec: &ColumnSpec, value: Value) -> Value {
        default_normalize(spec, value)
    }

    /// Render a committed value for display.
    fn format(&self, spec: &ColumnSpec, value: &Value) -> String {
        if spec.column_type == ColumnType::Password {
            return "******".to_string();
        }
        match value {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }

    /// Side effect after this column was written (or after a save that
    /// touched a valued virtual column). `is_insert` distinguishes the
    /// first write. The container is mutable so the hook can pull its
    /// deferred payload.
    fn after_save(
        &self,
        _spec: &ColumnSpec,
        _value: &mut RecordValue,
        _is_insert: bool,
        _conn: &dyn Connection,
    ) -> Result<()> {
        Ok(())
    }

    /// Side effect after the owning record was deleted.
    fn after_delete(
        &self,
        _spec: &ColumnSpec,
        _value: &mut RecordValue,
        _conn: &dyn Connection,
    ) -> Result<()> {
        Ok(())
    }

    /// Produce the forced value for an auto-updating column.
    ///
    /// The default yields the current unix time for `UnixTimestamp`
    /// columns and `Value::Default` otherwise, delegating to the DB's
    /// own default expression.
    fn auto_update_value(&self, spec: &ColumnSpec) -> Value {
        match spec.column_type {
            ColumnType::UnixTimestamp => Value::Int(unix_now()),
            _ => Value::Default,
        }
    }
}

/// The stock behavior used by every column that declares no override.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultColumnBehavior;

impl ColumnBehavior for DefaultColumnBehavior {}

/// Result of running a value through the column pipeline.
#[derive(Debug)]
pub enum ValueUpdate {
    /// The incoming value matched the stored one; nothing to replace.
    Unchanged {
        /// The stored value just became DB-sourced.
        became_from_db: bool,
    },
    /// A replacement container, possibly carrying validation errors
    /// instead of a committed value.
    New(RecordValue),
}

/// Immutable description of one table column.
#[derive(Clone)]
pub struct ColumnSpec {
    /// snake_case column name, validated at construction
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Trim surrounding whitespace from text during preprocessing
    pub trims: bool,
    /// Lowercase text during preprocessing
    pub lowercases: bool,
    /// Convert empty strings to null during preprocessing
    pub empty_string_to_null: bool,
    pub unique: Option<UniqueSpec>,
    pub primary_key: bool,
    /// Excluded from generic serialization
    pub private: bool,
    /// Persisted column, as opposed to a virtual one
    pub exists_in_db: bool,
    /// Cannot be set or changed by client code
    pub read_only: bool,
    /// Excluded from wildcard SELECT
    pub heavy: bool,
    /// Value is regenerated on every save
    pub auto_updating: bool,
    pub default: DefaultValue,
    pub allowed_values: AllowedValues,
    behavior: Arc<dyn ColumnBehavior>,
    resolved_default: OnceLock<Value>,
}

impl std::fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnSpec")
            .field("name", &self.name)
            .field("column_type", &self.column_type)
            .field("nullable", &self.nullable)
            .field("primary_key", &self.primary_key)
            .field("exists_in_db", &self.exists_in_db)
            .field("read_only", &self.read_only)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl ColumnSpec {
    /// Create a column with default flags for its type.
    ///
    /// Fails if the name is not snake_case or the type is `Enum`
    /// (enum columns must be built via [`ColumnSpec::enum_values`] so
    /// they always carry a non-empty allowed set).
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Result<Self> {
        let name = name.into();
        if !is_valid_column_name(&name) {
            return Err(ColumnError::invalid_name(name).into());
        }
        if column_type == ColumnType::Enum {
            return Err(ColumnError::no_allowed_values(name).into());
        }
        Ok(Self::build(name, column_type, AllowedValues::None))
    }

    /// Create an enum column with a fixed allowed set.
    pub fn enum_values(name: impl Into<String>, values: Vec<Value>) -> Result<Self> {
        let name = name.into();
        if !is_valid_column_name(&name) {
            return Err(ColumnError::invalid_name(name).into());
        }
        if values.is_empty() {
            return Err(ColumnError::no_allowed_values(name).into());
        }
        Ok(Self::build(name, ColumnType::Enum, AllowedValues::Fixed(values)))
    }

    fn build(name: String, column_type: ColumnType, allowed_values: AllowedValues) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
            trims: true,
            lowercases: column_type == ColumnType::Email,
            empty_string_to_null: true,
            unique: None,
            primary_key: false,
            private: column_type == ColumnType::Password,
            exists_in_db: true,
            read_only: false,
            heavy: matches!(column_type, ColumnType::Text | ColumnType::Blob) || column_type.is_json(),
            auto_updating: false,
            default: DefaultValue::None,
            allowed_values,
            behavior: Arc::new(DefaultColumnBehavior),
            resolved_default: OnceLock::new(),
        }
    }

    /// An auto-generated integer primary key named `name`.
    pub fn id(name: impl Into<String>) -> Result<Self> {
        let mut spec = Self::new(name, ColumnType::Int)?;
        spec.primary_key = true;
        spec.read_only = true;
        Ok(spec)
    }

    pub fn int(name: impl Into<String>) -> Result<Self> {
        Self::new(name, ColumnType::Int)
    }

    pub fn string(name: impl Into<String>) -> Result<Self> {
        Self::new(name, ColumnType::String)
    }

    pub fn email(name: impl Into<String>) -> Result<Self> {
        Self::new(name, ColumnType::Email)
    }

    pub fn timestamp(name: impl Into<String>) -> Result<Self> {
        Self::new(name, ColumnType::Timestamp)
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    #[must_use]
    pub fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }

    /// Include this column in wildcard SELECTs even when its type
    /// defaults to heavy.
    #[must_use]
    pub fn light(mut self) -> Self {
        self.heavy = false;
        self
    }

    #[must_use]
    pub fn auto_updating(mut self) -> Self {
        self.auto_updating = true;
        self
    }

    /// Mark this column as virtual (not persisted).
    #[must_use]
    pub fn virtual_column(mut self) -> Self {
        self.exists_in_db = false;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = Some(UniqueSpec::default());
        self
    }

    #[must_use]
    pub fn unique_with(mut self, spec: UniqueSpec) -> Self {
        self.unique = Some(spec);
        self
    }

    #[must_use]
    pub fn no_trim(mut self) -> Self {
        self.trims = false;
        self
    }

    #[must_use]
    pub fn keep_empty_strings(mut self) -> Self {
        self.empty_string_to_null = false;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub fn with_allowed_values(mut self, allowed: AllowedValues) -> Self {
        self.allowed_values = allowed;
        self
    }

    /// Replace the behavior strategy.
    #[must_use]
    pub fn with_behavior(mut self, behavior: Arc<dyn ColumnBehavior>) -> Self {
        self.behavior = behavior;
        self
    }

    /// The behavior strategy for this column.
    pub fn behavior(&self) -> &dyn ColumnBehavior {
        self.behavior.as_ref()
    }

    /// Persisted and settable by client code.
    pub const fn is_writable(&self) -> bool {
        self.exists_in_db && !self.read_only
    }

    /// Run an incoming value through the pipeline.
    ///
    /// `existing` is the container currently held for this column, if
    /// any; it is consulted for the short-circuit check and never
    /// mutated. The caller applies the returned [`ValueUpdate`].
    #[tracing::instrument(level = "trace", skip(self, raw, existing), fields(column = %self.name))]
    pub fn process_incoming(
        &self,
        raw: Value,
        is_from_db: bool,
        trust_db: bool,
        existing: Option<&RecordValue>,
    ) -> Result<ValueUpdate> {
        if !is_from_db && self.read_only {
            return Err(ColumnError::read_only(&self.name).into());
        }

        if is_from_db && trust_db {
            let normalized = self.behavior.normalize_from_db(self, raw);
            if let Some(current) = existing {
                if current.has_value() && current.value() == Some(&normalized) {
                    return Ok(ValueUpdate::Unchanged {
                        became_from_db: !current.is_from_db(),
                    });
                }
            }
            let mut container = RecordValue::new(self.exists_in_db);
            container.set_value(&self.name, normalized, None, true)?;
            return Ok(ValueUpdate::New(container));
        }

        let processed = self.behavior.preprocess(self, raw);
        if let Some(current) = existing {
            if current.has_value()
                && (current.raw_value() == Some(&processed) || current.value() == Some(&processed))
            {
                return Ok(ValueUpdate::Unchanged {
                    became_from_db: is_from_db && !current.is_from_db(),
                });
            }
        }

        let mut errors = ValidationErrors::new();
        self.behavior.validate(self, &processed, false, &mut errors);
        if !errors.is_empty() {
            tracing::debug!(column = %self.name, count = errors.errors.len(), "value rejected");
            let mut container = RecordValue::new(self.exists_in_db);
            container.set_errors(errors.errors);
            return Ok(ValueUpdate::New(container));
        }

        let normalized = self.behavior.normalize(self, processed.clone());
        let raw_to_keep = if processed == normalized { None } else { Some(processed) };
        let mut container = RecordValue::new(self.exists_in_db);
        container.set_value(&self.name, normalized, raw_to_keep, is_from_db)?;
        Ok(ValueUpdate::New(container))
    }

    /// Process a value destined for a WHERE-style comparison.
    ///
    /// Same pipeline as assignment but with format checks relaxed; the
    /// result is bound as a statement parameter, never stored.
    pub fn process_for_condition(&self, raw: Value) -> Result<Value> {
        let processed = self.behavior.preprocess(self, raw);
        let mut errors = ValidationErrors::new();
        self.behavior.validate(self, &processed, true, &mut errors);
        errors.into_result().map_err(crate::error::Error::from)?;
        Ok(self.behavior.normalize(self, processed))
    }

    /// Resolve this column's default value.
    ///
    /// Literal and generated defaults must pass the column's own
    /// validation; the first successful resolution is memoized.
    /// Expression defaults resolve to `None` here, the DB applies them.
    pub fn resolve_default(&self) -> Result<Option<Value>> {
        match &self.default {
            DefaultValue::None | DefaultValue::Expression(_) => Ok(None),
            DefaultValue::Literal(_) | DefaultValue::Generated(_) => {
                if let Some(cached) = self.resolved_default.get() {
                    return Ok(Some(cached.clone()));
                }
                let candidate = match &self.default {
                    DefaultValue::Literal(value) => value.clone(),
                    DefaultValue::Generated(producer) => producer(),
                    _ => unreachable!(),
                };
                let processed = self.behavior.preprocess(self, candidate);
                let mut errors = ValidationErrors::new();
                self.behavior.validate(self, &processed, false, &mut errors);
                if !errors.is_empty() {
                    return Err(ColumnError::invalid_default(&self.name, errors.to_string()).into());
                }
                let value = self.behavior.normalize(self, processed);
                let _ = self.resolved_default.set(value.clone());
                Ok(Some(value))
            }
        }
    }

    /// Does this column have any default, including a DB expression?
    pub const fn has_default(&self) -> bool {
        !matches!(self.default, DefaultValue::None)
    }
}

fn is_valid_column_name(name: &str) -> bool {
    match cached_regex("^[a-z_][a-z0-9_]*$") {
        Some(re) => re.is_match(name),
        None => !name.is_empty(),
    }
}

fn is_valid_email(text: &str) -> bool {
    cached_regex(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_some_and(|re| re.is_match(text))
}

/// Compile and cache the fixed patterns this module uses.
fn cached_regex(pattern: &'static str) -> Option<&'static Regex> {
    static CACHE: OnceLock<std::sync::RwLock<std::collections::HashMap<&'static str, &'static Regex>>> =
        OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::RwLock::new(std::collections::HashMap::new()));
    {
        let read = cache.read().unwrap_or_else(|e| e.into_inner());
        if let Some(re) = read.get(pattern) {
            return Some(re);
        }
    }
    match Regex::new(pattern) {
        Ok(re) => {
            let leaked: &'static Regex = Box::leak(Box::new(re));
            let mut write = cache.write().unwrap_or_else(|e| e.into_inner());
            Some(write.entry(pattern).or_insert(leaked))
        }
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid column regex, treating as match-all");
            None
        }
    }
}

fn default_preprocess(spec: &ColumnSpec, value: Value) -> Value {
    let Value::Text(text) = value else {
        return value;
    };
    let mut text = if spec.trims { text.trim().to_string() } else { text };
    if spec.lowercases {
        text = text.to_lowercase();
    }
    if spec.empty_string_to_null && text.is_empty() {
        return Value::Null;
    }
    Value::Text(text)
}

fn default_type_check(
    spec: &ColumnSpec,
    value: &Value,
    for_condition: bool,
    errors: &mut ValidationErrors,
) {
    match spec.column_type {
        ColumnType::Int | ColumnType::UnixTimestamp => {
            let fits = match value {
                Value::Int(_) => true,
                Value::Text(s) => s.parse::<i64>().is_ok(),
                _ => false,
            };
            if !fits {
                errors.add_invalid_type(&spec.name, "integer", value.type_name());
            }
        }
        ColumnType::TimezoneOffset => match value {
            Value::Int(i) if (-86400..=86400).contains(i) => {}
            Value::Int(_) => errors.add_invalid_format(&spec.name, "offset within a day"),
            Value::Text(s) if parse_timezone_offset(s).is_some() => {}
            Value::Text(_) => errors.add_invalid_format(&spec.name, "timezone offset"),
            _ => errors.add_invalid_type(&spec.name, "timezone offset", value.type_name()),
        },
        ColumnType::Float => {
            let fits = match value {
                Value::Float(_) | Value::Int(_) => true,
                Value::Text(s) => s.parse::<f64>().is_ok(),
                _ => false,
            };
            if !fits {
                errors.add_invalid_type(&spec.name, "float", value.type_name());
            }
        }
        ColumnType::Bool => {
            let fits = match value {
                Value::Bool(_) => true,
                Value::Int(i) => *i == 0 || *i == 1,
                Value::Text(s) => {
                    matches!(s.as_str(), "true" | "false" | "t" | "f" | "1" | "0")
                }
                _ => false,
            };
            if !fits {
                errors.add_invalid_type(&spec.name, "boolean", value.type_name());
            }
        }
        ColumnType::Email => {
            if !for_condition {
                match value {
                    Value::Text(s) if is_valid_email(s) => {}
                    Value::Text(_) => errors.add_invalid_format(&spec.name, "email address"),
                    _ => errors.add_invalid_type(&spec.name, "text", value.type_name()),
                }
            }
        }
        ColumnType::Ipv4 => {
            if !for_condition {
                match value {
                    Value::Text(s) if s.parse::<std::net::Ipv4Addr>().is_ok() => {}
                    Value::Text(_) => errors.add_invalid_format(&spec.name, "IPv4 address"),
                    _ => errors.add_invalid_type(&spec.name, "text", value.type_name()),
                }
            }
        }
        ColumnType::Json | ColumnType::Jsonb => {
            if !for_condition {
                match value {
                    Value::Json(_) => {}
                    Value::Text(s) => {
                        if serde_json::from_str::<serde_json::Value>(s).is_err() {
                            errors.add_invalid_format(&spec.name, "JSON document");
                        }
                    }
                    _ => errors.add_invalid_type(&spec.name, "JSON", value.type_name()),
                }
            }
        }
        ColumnType::Blob => {
            if !matches!(value, Value::Bytes(_) | Value::Text(_)) {
                errors.add_invalid_type(&spec.name, "bytes", value.type_name());
            }
        }
        // Text-shaped types accept any text; dates and times are
        // passed through to the DB for final checking.
        ColumnType::String
        | ColumnType::Text
        | ColumnType::Password
        | ColumnType::Timestamp
        | ColumnType::TimestampTz
        | ColumnType::Date
        | ColumnType::Time
        | ColumnType::Enum
        | ColumnType::File
        | ColumnType::Image => {
            if matches!(value, Value::Bytes(_) | Value::Json(_)) {
                errors.add_invalid_type(&spec.name, "text", value.type_name());
            }
        }
    }
}

fn default_normalize(spec: &ColumnSpec, value: Value) -> Value {
    match (spec.column_type, value) {
        (ColumnType::Int | ColumnType::UnixTimestamp, Value::Text(s)) => {
            s.parse::<i64>().map_or(Value::Text(s), Value::Int)
        }
        (ColumnType::TimezoneOffset, Value::Text(s)) => {
            parse_timezone_offset(&s).map_or(Value::Text(s), Value::Int)
        }
        (ColumnType::Float, Value::Int(i)) => Value::Float(i as f64),
        (ColumnType::Float, Value::Text(s)) => {
            s.parse::<f64>().map_or(Value::Text(s), Value::Float)
        }
        (ColumnType::Bool, Value::Int(i)) => Value::Bool(i != 0),
        (ColumnType::Bool, Value::Text(s)) => match s.as_str() {
            "true" | "t" | "1" => Value::Bool(true),
            "false" | "f" | "0" => Value::Bool(false),
            _ => Value::Text(s),
        },
        (ColumnType::Json | ColumnType::Jsonb, Value::Text(s)) => {
            serde_json::from_str(&s).map_or(Value::Text(s), Value::Json)
        }
        (_, value) => value,
    }
}

/// Parse a timezone offset into seconds.
///
/// Accepts plain seconds or `±HH:MM` text; either form must stay
/// within one day of UTC.
fn parse_timezone_offset(text: &str) -> Option<i64> {
    if let Ok(seconds) = text.parse::<i64>() {
        return (-86400..=86400).contains(&seconds).then_some(seconds);
    }
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if minutes > 59 {
        return None;
    }
    let seconds = sign * (hours * 3600 + minutes * 60);
    (-86400..=86400).contains(&seconds).then_some(seconds)
}

fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
