//! Load stage: persist tables as CSV, JSON, or XLSX artifacts.
//!
//! Writers create missing parent directories and overwrite by default;
//! [`write_if_absent`] and [`write_versioned`] are the guarded variants.
//! None of the writes are atomic: a crash mid-write can leave a partial
//! file behind.

pub mod run_log;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use csv::WriterBuilder;
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::VERSION_TIMESTAMP_FORMAT;
use crate::error::{EtlError, Result};
use crate::extract::delimited::separator_byte;
use crate::table::{Table, Value};

pub use run_log::log_event;

/// On-disk artifact encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Delimited,
    Json,
    Spreadsheet,
}

impl OutputFormat {
    /// Decide a format from the path extension. Unknown or missing
    /// extensions fall back to delimited text.
    pub fn from_extension(path: &Path) -> OutputFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            Some(ext) if ext.eq_ignore_ascii_case("xlsx") => OutputFormat::Spreadsheet,
            _ => OutputFormat::Delimited,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Delimited => "csv",
            OutputFormat::Json => "json",
            OutputFormat::Spreadsheet => "xlsx",
        }
    }
}

/// JSON artifact layouts: one object per row, or one array per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonLayout {
    Records,
    Columns,
}

/// Write delimited text with a header row.
///
/// `include_index` prepends an unnamed 0-based row-index column.
pub fn write_delimited(
    table: &Table,
    path: &Path,
    separator: char,
    include_index: bool,
) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .delimiter(separator_byte(separator)?)
        .from_path(path)?;

    let mut header: Vec<String> = Vec::with_capacity(table.column_count() + 1);
    if include_index {
        header.push(String::new());
    }
    header.extend(table.schema().names().map(str::to_string));
    writer.write_record(&header)?;

    for (i, row) in table.rows().iter().enumerate() {
        let mut record: Vec<String> = Vec::with_capacity(row.len() + 1);
        if include_index {
            record.push(i.to_string());
        }
        record.extend(row.iter().map(Value::to_field));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the table as a single JSON document. `indent` of 0 writes
/// compact output.
pub fn write_json(table: &Table, path: &Path, layout: JsonLayout, indent: usize) -> Result<()> {
    ensure_parent(path)?;
    let doc = match layout {
        JsonLayout::Records => serde_json::Value::Array(
            table
                .rows()
                .iter()
                .map(|row| {
                    let record: serde_json::Map<String, serde_json::Value> = table
                        .schema()
                        .names()
                        .zip(row.iter())
                        .map(|(name, cell)| (name.to_string(), cell.to_json()))
                        .collect();
                    serde_json::Value::Object(record)
                })
                .collect(),
        ),
        JsonLayout::Columns => {
            let columns: serde_json::Map<String, serde_json::Value> = table
                .schema()
                .names()
                .enumerate()
                .map(|(i, name)| {
                    (
                        name.to_string(),
                        serde_json::Value::Array(
                            table.rows().iter().map(|row| row[i].to_json()).collect(),
                        ),
                    )
                })
                .collect();
            serde_json::Value::Object(columns)
        }
    };

    let text = if indent == 0 {
        serde_json::to_string(&doc)?
    } else {
        let indent_bytes = vec![b' '; indent];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent_bytes);
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        doc.serialize(&mut ser)?;
        String::from_utf8_lossy(&buf).into_owned()
    };
    fs::write(path, text)?;
    Ok(())
}

/// Write one worksheet with a header row and typed cells. Null cells are
/// left blank.
pub fn write_spreadsheet(
    table: &Table,
    path: &Path,
    sheet_name: &str,
    include_index: bool,
) -> Result<()> {
    ensure_parent(path)?;
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;

    let offset: u16 = if include_index { 1 } else { 0 };
    for (c, name) in table.schema().names().enumerate() {
        sheet.write_string(0, c as u16 + offset, name)?;
    }
    for (r, row) in table.rows().iter().enumerate() {
        let sheet_row = (r + 1) as u32;
        if include_index {
            sheet.write_number(sheet_row, 0, r as f64)?;
        }
        for (c, cell) in row.iter().enumerate() {
            let col = c as u16 + offset;
            match cell {
                Value::Null => {}
                Value::Str(s) => {
                    sheet.write_string(sheet_row, col, s)?;
                }
                Value::Int(v) => {
                    sheet.write_number(sheet_row, col, *v as f64)?;
                }
                Value::Float(v) => {
                    sheet.write_number(sheet_row, col, *v)?;
                }
                Value::Bool(b) => {
                    sheet.write_boolean(sheet_row, col, *b)?;
                }
                Value::Timestamp(ts) => {
                    sheet.write_string(sheet_row, col, ts.to_rfc3339())?;
                }
            }
        }
    }
    workbook.save(path)?;
    Ok(())
}

/// Write with the format picked from the extension and stock settings
/// for each format: comma separator, records layout with indent 2, a
/// sheet named `Sheet1`, no row index.
pub fn write_auto(table: &Table, path: &Path) -> Result<()> {
    match OutputFormat::from_extension(path) {
        OutputFormat::Delimited => write_delimited(table, path, ',', false),
        OutputFormat::Json => write_json(table, path, JsonLayout::Records, 2),
        OutputFormat::Spreadsheet => write_spreadsheet(table, path, "Sheet1", false),
    }
}

/// Write only when nothing exists at `path` yet; the return value says
/// whether a write happened.
///
/// There is no locking between the existence check and the write; the
/// single-writer batch contract makes that safe.
pub fn write_if_absent(table: &Table, path: &Path) -> Result<bool> {
    if path.exists() {
        info!(path = %path.display(), "artifact already present, skipping");
        return Ok(false);
    }
    write_auto(table, path)?;
    info!(path = %path.display(), rows = table.row_count(), "artifact written");
    Ok(true)
}

/// Splice `_tag` in front of the extension: `out/users.csv` with tag
/// `v1` lands at `out/users_v1.csv`. A missing extension defaults to
/// `.csv`.
pub fn versioned_path(base_path: &Path, version_tag: &str) -> Result<PathBuf> {
    let stem = base_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            EtlError::Config(format!(
                "artifact path '{}' has no usable file name",
                base_path.display()
            ))
        })?;
    let ext = base_path.extension().and_then(|e| e.to_str()).unwrap_or("csv");
    Ok(base_path.with_file_name(format!("{stem}_{version_tag}.{ext}")))
}

/// Write to the [`versioned_path`] of `base_path`, with the format picked
/// from the extension. The caller supplies a unique tag; two runs inside
/// the same second collide, a known limitation of second-resolution tags.
pub fn write_versioned(table: &Table, base_path: &Path, version_tag: &str) -> Result<PathBuf> {
    let path = versioned_path(base_path, version_tag)?;
    write_auto(table, &path)?;
    info!(path = %path.display(), rows = table.row_count(), "versioned artifact written");
    Ok(path)
}

/// Second-resolution tag for versioned artifacts, e.g. `20250115_093042`.
pub fn timestamp_tag() -> String {
    Utc::now().format(VERSION_TIMESTAMP_FORMAT).to_string()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CellType, Column, Schema};

    fn sample() -> Table {
        let schema = Schema::new(vec![
            Column::new("name", CellType::Str),
            Column::new("height_m", CellType::Float),
        ]);
        Table::new(
            schema,
            vec![
                vec![Value::Str("Ana".into()), Value::Float(1.78)],
                vec![Value::Str("Bo".into()), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn format_follows_the_extension() {
        assert_eq!(
            OutputFormat::from_extension(Path::new("out/users.json")),
            OutputFormat::Json
        );
        assert_eq!(
            OutputFormat::from_extension(Path::new("out/users.XLSX")),
            OutputFormat::Spreadsheet
        );
        assert_eq!(
            OutputFormat::from_extension(Path::new("out/users.csv")),
            OutputFormat::Delimited
        );
        assert_eq!(
            OutputFormat::from_extension(Path::new("out/users")),
            OutputFormat::Delimited
        );
    }

    #[test]
    fn delimited_writer_renders_nulls_as_empty_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("users.csv");
        write_delimited(&sample(), &path, ',', false).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "name,height_m");
        assert_eq!(lines[1], "Ana,1.78");
        assert_eq!(lines[2], "Bo,");
    }

    #[test]
    fn delimited_writer_can_prepend_a_row_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        write_delimited(&sample(), &path, ';', true).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], ";name;height_m");
        assert_eq!(lines[1], "0;Ana;1.78");
    }

    #[test]
    fn json_columns_layout_groups_by_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        write_json(&sample(), &path, JsonLayout::Columns, 0).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["name"][1], serde_json::json!("Bo"));
        assert_eq!(doc["height_m"][0], serde_json::json!(1.78));
        assert_eq!(doc["height_m"][1], serde_json::Value::Null);
    }

    #[test]
    fn write_if_absent_only_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");

        assert!(write_if_absent(&sample(), &path).unwrap());
        let first = fs::read_to_string(&path).unwrap();

        let smaller = sample().head(1);
        assert!(!write_if_absent(&smaller, &path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn versioned_path_splices_the_tag_before_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out").join("users.csv");
        let path = write_versioned(&sample(), &base, "20240301_120000").unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("users_20240301_120000.csv")
        );
        assert!(path.exists());

        let no_ext = dir.path().join("report");
        let path = write_versioned(&sample(), &no_ext, "v1").unwrap();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("report_v1.csv"));
    }
}
