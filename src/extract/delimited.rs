use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::table::{CellType, Column, Schema, Table, Value, promote};

/// Read a delimited text file with a header row into a [`Table`].
///
/// Column types are inferred per column from the loosest type every
/// non-empty cell agrees on (Int, then Float, Bool, falling back to Str).
/// Empty cells become Null. A row with the wrong field count is a parse
/// error carrying the 1-based row number; malformed rows are never
/// silently dropped.
pub fn extract_delimited(path: impl AsRef<Path>, separator: char) -> Result<Table> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EtlError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(separator_byte(separator)?)
        .from_path(path)?;

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| EtlError::parse(path.display().to_string(), e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        // Header is row 1, so the first data row reports as row 2.
        let user_row = idx + 2;
        let record = record.map_err(|e| {
            EtlError::parse(
                format!("{} row {}", path.display(), user_row),
                e.to_string(),
            )
        })?;
        if record.len() != headers.len() {
            return Err(EtlError::parse(
                format!("{} row {}", path.display(), user_row),
                format!("expected {} fields, found {}", headers.len(), record.len()),
            ));
        }
        rows.push(record.iter().map(Value::infer_from_text).collect());
    }

    let table = assemble(headers, rows);
    debug!(
        path = %path.display(),
        rows = table.row_count(),
        columns = table.column_count(),
        "extracted delimited file"
    );
    Ok(table)
}

/// Read every `*.csv` file directly under `dir`, in path order.
///
/// Zero matching files is an empty result, not an error; a file that
/// exists but fails to parse still surfaces its error.
pub fn extract_delimited_dir(
    dir: impl AsRef<Path>,
    separator: char,
) -> Result<Vec<(PathBuf, Table)>> {
    let pattern = dir.as_ref().join("*.csv");
    let pattern = pattern.to_string_lossy();
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| EtlError::parse(pattern.to_string(), e.to_string()))?
        .filter_map(|entry| entry.ok())
        .collect();
    paths.sort();

    let mut tables = Vec::with_capacity(paths.len());
    for path in paths {
        let table = extract_delimited(&path, separator)?;
        tables.push((path, table));
    }
    info!(count = tables.len(), pattern = %pattern, "swept delimited directory");
    Ok(tables)
}

/// Build a typed table out of loosely-inferred cells: decide each column's
/// type by promotion over its non-null cells, then re-coerce every cell to
/// the decided type so column type and cell type always agree.
pub(crate) fn assemble(names: Vec<String>, rows: Vec<Vec<Value>>) -> Table {
    let types: Vec<CellType> = (0..names.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row[col].cell_type())
                .fold(None, |acc, ty| {
                    Some(match acc {
                        None => ty,
                        Some(prev) => promote(prev, ty),
                    })
                })
                .unwrap_or(CellType::Str)
        })
        .collect();

    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(types.iter())
                .map(|(cell, ty)| cell.coerce_to(*ty))
                .collect()
        })
        .collect();

    let columns = names
        .into_iter()
        .zip(types)
        .map(|(name, ty)| Column::new(name, ty))
        .collect();
    Table::from_parts(Schema::new(columns), rows)
}

// Code points 128-255 fit in a u8 but span two UTF-8 bytes, so only
// ascii delimiters are safe to hand to the csv crate.
pub(crate) fn separator_byte(separator: char) -> Result<u8> {
    if separator.is_ascii() {
        Ok(separator as u8)
    } else {
        Err(EtlError::Config(format!(
            "delimiter '{separator}' must be an ascii character"
        )))
    }
}
