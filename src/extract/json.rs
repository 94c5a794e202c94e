use std::fs;
use std::path::Path;

use serde_json::Map;
use tracing::debug;

use crate::error::{EtlError, Result};
use crate::extract::delimited::assemble;
use crate::table::{Table, Value};

/// Read a JSON document into a [`Table`].
///
/// Accepts either a single JSON array of objects or newline-delimited
/// JSON (one object per line). The column set is the union of keys seen
/// across records, in first-seen order; keys missing from a record become
/// Null cells.
pub fn extract_json(path: impl AsRef<Path>) -> Result<Table> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EtlError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path)?;
    let table = extract_json_str(&text, &path.display().to_string())?;
    debug!(
        path = %path.display(),
        rows = table.row_count(),
        columns = table.column_count(),
        "extracted json file"
    );
    Ok(table)
}

/// Parse JSON text (array-of-objects or NDJSON) into a [`Table`].
/// `context` names the origin for error messages (a path or URL).
pub fn extract_json_str(text: &str, context: &str) -> Result<Table> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EtlError::parse(context, "json input is empty"));
    }

    // A whole-document parse first; fall back to NDJSON line by line.
    if let Ok(doc) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let records = match doc {
            serde_json::Value::Array(items) => items,
            obj @ serde_json::Value::Object(_) => vec![obj],
            _ => {
                return Err(EtlError::parse(
                    context,
                    "json must be an object, an array of objects, or NDJSON",
                ))
            }
        };
        return table_from_records(&records, context);
    }

    let mut records = Vec::new();
    for (i, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str::<serde_json::Value>(line).map_err(|e| {
            EtlError::parse(context, format!("invalid ndjson at line {}: {}", i + 1, e))
        })?;
        records.push(value);
    }
    table_from_records(&records, context)
}

/// Build a table from parsed JSON records: union of keys in first-seen
/// order, missing keys as Null, column types unified by promotion.
pub(crate) fn table_from_records(records: &[serde_json::Value], context: &str) -> Result<Table> {
    let mut objects: Vec<&Map<String, serde_json::Value>> = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let obj = record.as_object().ok_or_else(|| {
            EtlError::parse(context, format!("record {} is not a json object", idx + 1))
        })?;
        objects.push(obj);
    }

    let mut names: Vec<String> = Vec::new();
    for obj in &objects {
        for key in obj.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }

    let rows = objects
        .iter()
        .map(|obj| {
            names
                .iter()
                .map(|name| obj.get(name).map(Value::from_json).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(assemble(names, rows))
}
