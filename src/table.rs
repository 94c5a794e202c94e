use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, Result};

/// Scalar type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Str,
    Int,
    Float,
    Bool,
    Timestamp,
}

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The cell's type, if it is not null.
    pub fn cell_type(&self) -> Option<CellType> {
        match self {
            Value::Null => None,
            Value::Str(_) => Some(CellType::Str),
            Value::Int(_) => Some(CellType::Int),
            Value::Float(_) => Some(CellType::Float),
            Value::Bool(_) => Some(CellType::Bool),
            Value::Timestamp(_) => Some(CellType::Timestamp),
        }
    }

    /// Numeric view of the cell: Int and Float only.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric coercion: Int/Float pass through, strings are parsed.
    /// Returns None for Null and for values that cannot be coerced.
    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Parse one raw delimited-text field into the loosest matching type.
    /// Empty (after trim) and any spelling of NaN are Null; otherwise Int,
    /// then Float, then Bool, falling back to Str.
    pub fn infer_from_text(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Value::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            // "NaN" in a text cell marks a missing value, not a number.
            return if v.is_nan() { Value::Null } else { Value::Float(v) };
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Str(trimmed.to_string()),
        }
    }

    /// Convert a JSON scalar into a cell. Nested arrays/objects are kept
    /// as their compact JSON text so no record data is silently dropped.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }

    /// Convert a cell back into JSON. Non-finite floats become JSON null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Int(v) => serde_json::Value::Number((*v).into()),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }

    /// Render the cell for a delimited-text field. Null is the empty string.
    pub fn to_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Str(s) => s.clone(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
        }
    }

    /// Re-coerce a cell to a column type decided by [`promote`]: Int cells
    /// widen to Float, anything widens to Str via its field rendering.
    /// Null stays Null. Other combinations pass through untouched.
    pub(crate) fn coerce_to(self, ty: CellType) -> Value {
        match (&self, ty) {
            (Value::Null, _) => Value::Null,
            (Value::Int(v), CellType::Float) => Value::Float(*v as f64),
            (_, CellType::Str) => match self {
                Value::Str(_) => self,
                other => Value::Str(other.to_field()),
            },
            _ => self,
        }
    }

    /// Hashable key form for de-duplication and joins. Floats are keyed by
    /// bit pattern with 0.0/-0.0 and all NaNs collapsed.
    pub fn key_atom(&self) -> KeyAtom {
        match self {
            Value::Null => KeyAtom::Null,
            Value::Str(s) => KeyAtom::Str(s.clone()),
            Value::Int(v) => KeyAtom::Int(*v),
            Value::Float(v) => {
                let canonical = if *v == 0.0 {
                    0.0f64
                } else if v.is_nan() {
                    f64::NAN
                } else {
                    *v
                };
                KeyAtom::Float(canonical.to_bits())
            }
            Value::Bool(b) => KeyAtom::Bool(*b),
            Value::Timestamp(ts) => KeyAtom::Timestamp(ts.timestamp_micros()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            other => write!(f, "{}", other.to_field()),
        }
    }
}

/// Hashable projection of a [`Value`], used for key tuples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyAtom {
    Null,
    Str(String),
    Int(i64),
    Float(u64),
    Bool(bool),
    Timestamp(i64),
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: CellType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: CellType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered list of columns describing a table's row shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Index of a column that must exist.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            EtlError::Schema(format!(
                "missing required column '{}'. columns={:?}",
                name,
                self.names().collect::<Vec<_>>()
            ))
        })
    }
}

/// Type unification used when concatenating and inferring columns.
/// Int and Float widen to Float; any other mismatch widens to Str.
pub fn promote(a: CellType, b: CellType) -> CellType {
    if a == b {
        return a;
    }
    match (a, b) {
        (CellType::Int, CellType::Float) | (CellType::Float, CellType::Int) => CellType::Float,
        _ => CellType::Str,
    }
}

/// In-memory tabular data: an ordered sequence of rows over a fixed schema.
///
/// Tables are immutable once produced; every transform returns a new
/// `Table` instead of mutating in place. The `new` constructor enforces
/// the row-width invariant so downstream stages never see ragged rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        let width = schema.width();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(EtlError::Schema(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    width
                )));
            }
        }
        Ok(Self { schema, rows })
    }

    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Internal constructor for rows already known to match the schema.
    pub(crate) fn from_parts(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == schema.width()));
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.schema.width()
    }

    /// (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        (self.row_count(), self.column_count())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.names().collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.index_of(name)
    }

    /// A new table holding the first `n` rows.
    pub fn head(&self, n: usize) -> Table {
        let rows = self.rows.iter().take(n).cloned().collect();
        Table::from_parts(self.schema.clone(), rows)
    }

    /// Null count per column, in schema order.
    pub fn null_counts(&self) -> Vec<(String, usize)> {
        let mut counts = vec![0usize; self.schema.width()];
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if cell.is_null() {
                    counts[i] += 1;
                }
            }
        }
        self.schema
            .names()
            .map(str::to_string)
            .zip(counts)
            .collect()
    }

    /// A new table with only the rows matching `predicate`.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(&[Value]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        Table::from_parts(self.schema.clone(), rows)
    }
}
