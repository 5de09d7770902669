//! Entity metadata and the value/row representation shared by every backend.
//!
//! Entity types describe themselves through a `'static` [`EntitySchema`] generated by
//! `#[derive(Entity)]`. Validation, query binding and backend row mapping consult that
//! schema instead of inspecting entity values at runtime.

use std::fmt;

use crate::{OrmError, OrmResult};

/// A backend-agnostic representation of a column value.
/// Entities are flattened into rows of these values before reaching a storage session,
/// so `txorm_core` never depends on a specific database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Null,
}

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    I32,
    I64,
    F64,
    Bool,
    Null,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::String => "string",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F64 => "f64",
            ValueKind::Bool => "bool",
            ValueKind::Null => "null",
        };
        f.write_str(s)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F64(_) => ValueKind::F64,
            Value::Bool(_) => ValueKind::Bool,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert this value into the representation used by a column of `kind`.
    /// Integer widths are interchangeable as long as the value fits; `Null` is kept as is.
    /// Returns `None` when the value cannot be represented in that column.
    pub fn coerce(self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (Value::Null, _) => Some(Value::Null),
            (Value::I32(i), ValueKind::I64) => Some(Value::I64(i64::from(i))),
            (Value::I64(i), ValueKind::I32) => i32::try_from(i).ok().map(Value::I32),
            (Value::I32(i), ValueKind::F64) => Some(Value::F64(f64::from(i))),
            (Value::I64(i), ValueKind::F64) => Some(Value::F64(i as f64)),
            (Value::I64(i), ValueKind::Bool) if i == 0 || i == 1 => Some(Value::Bool(i == 1)),
            (v, k) if v.kind() == k => Some(v),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A value could not be converted into the requested Rust type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} value, found {found}")]
pub struct ConversionError {
    pub expected: ValueKind,
    pub found: ValueKind,
}

/// Rust types that can be stored in an entity column.
///
/// The derive macro reads `KIND` and `NULLABLE` in const context to build the entity
/// schema, and calls `to_value`/`from_value` for row mapping.
pub trait ColumnValue: Sized {
    const KIND: ValueKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

fn mismatch<T: ColumnValue>(found: &Value) -> ConversionError {
    ConversionError {
        expected: T::KIND,
        found: found.kind(),
    }
}

impl ColumnValue for String {
    const KIND: ValueKind = ValueKind::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl ColumnValue for i32 {
    const KIND: ValueKind = ValueKind::I32;

    fn to_value(&self) -> Value {
        Value::I32(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::I32(i) => Ok(i),
            Value::I64(i) => i32::try_from(i).map_err(|_| mismatch::<Self>(&Value::I64(i))),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl ColumnValue for i64 {
    const KIND: ValueKind = ValueKind::I64;

    fn to_value(&self) -> Value {
        Value::I64(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::I64(i) => Ok(i),
            Value::I32(i) => Ok(i64::from(i)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl ColumnValue for f64 {
    const KIND: ValueKind = ValueKind::F64;

    fn to_value(&self) -> Value {
        Value::F64(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::F64(f) => Ok(f),
            Value::I32(i) => Ok(f64::from(i)),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl ColumnValue for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(b) => Ok(b),
            // SQLite-style stores hand booleans back as 0/1 integers.
            Value::I64(i) if i == 0 || i == 1 => Ok(i == 1),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ColumnValue::to_value)
    }

    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Static description of one persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Rust field name, used by find queries.
    pub name: &'static str,
    /// Column name in the backing store.
    pub column: &'static str,
    pub kind: ValueKind,
    /// The Rust type can hold "no value" (`Option<_>`).
    pub nullable: bool,
    /// A value must be present before the entity may be persisted.
    pub required: bool,
    /// The store rejects two rows with the same non-null value.
    pub unique: bool,
    /// Store-assigned identity (auto-increment primary key).
    pub identity: bool,
}

impl FieldDef {
    /// Whether a NULL in this column is rejected.
    pub fn rejects_null(&self) -> bool {
        !self.identity && (self.required || !self.nullable)
    }
}

/// Static description of an entity type: its table and persisted fields.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub entity: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldDef],
}

impl EntitySchema {
    /// The identity field. The derive guarantees exactly one exists.
    pub fn identity(&self) -> &'static FieldDef {
        // `fields` is 'static, so the borrow outlives `self`.
        let fields: &'static [FieldDef] = self.fields;
        fields
            .iter()
            .find(|f| f.identity)
            .unwrap_or(&fields[0])
    }

    /// Look up a field by its Rust name.
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        let fields: &'static [FieldDef] = self.fields;
        fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by its column name.
    pub fn column(&self, column: &str) -> Option<&'static FieldDef> {
        let fields: &'static [FieldDef] = self.fields;
        fields.iter().find(|f| f.column == column)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.column).collect()
    }
}

/// An ordered set of `column -> value` pairs exchanged with storage sessions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            columns: Vec::with_capacity(n),
        }
    }

    /// Set `column` to `value`, replacing an existing entry.
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|(c, _)| c == column)?;
        Some(self.columns.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (c, v) in iter {
            row.set(c, v);
        }
        row
    }
}

/// Decode one column of `row` into `T`. Used by derive-generated `from_row` bodies.
pub fn decode_column<T: ColumnValue>(row: &Row, column: &'static str) -> OrmResult<T> {
    let value = row.get(column).cloned().ok_or(OrmError::MissingColumn { column })?;
    T::from_value(value).map_err(|source| OrmError::Mapping {
        column,
        source: Box::new(source),
    })
}

/// Compile-time table metadata.
/// Implemented via `#[derive(Entity)]` in `txorm_macros`.
pub trait Fetchable {
    const TABLE: &'static str;
    const SELECT_COLUMNS: &'static [&'static str];
}

/// Trait for entities that carry a store-assigned identity.
pub trait Identifiable {
    /// The type of the identity (e.g., `i64`).
    type Key: ColumnValue + Clone + Send + Sync;

    /// The name of the identity column in the store.
    const ID_COLUMN: &'static str;

    /// Returns a copy of the entity's identity, if it has one.
    fn id(&self) -> Option<Self::Key>;

    /// Record the identity assigned by the store.
    fn set_id(&mut self, id: Self::Key);
}

/// An application record mapped to a row in a backing store.
pub trait Entity: Fetchable + Identifiable + Sized + Send + Sync + 'static {
    const SCHEMA: &'static EntitySchema;

    /// Flatten every persisted field (identity included, `Null` when unassigned).
    fn to_row(&self) -> Row;

    /// Rebuild an entity from a row carrying every persisted column.
    fn from_row(row: &Row) -> OrmResult<Self>;
}
