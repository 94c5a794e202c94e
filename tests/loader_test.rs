use std::fs;

use anyhow::Result;
use tempfile::tempdir;

use tablemill::extract::{extract_delimited, extract_json};
use tablemill::load::{
    JsonLayout, log_event, write_delimited, write_if_absent, write_json, write_spreadsheet,
    write_versioned,
};
use tablemill::table::{CellType, Column, Schema, Table, Value};

fn sample() -> Table {
    let schema = Schema::new(vec![
        Column::new("age", CellType::Int),
        Column::new("bmi", CellType::Float),
        Column::new("name", CellType::Str),
    ]);
    Table::new(
        schema,
        vec![
            vec![
                Value::Int(31),
                Value::Float(22.05),
                Value::Str("Ana García".into()),
            ],
            vec![Value::Null, Value::Float(24.5), Value::Str("Luis".into())],
        ],
    )
    .unwrap()
}

#[test]
fn delimited_artifacts_read_back_with_the_same_shape() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.csv");
    let table = sample();

    write_delimited(&table, &path, ',', false)?;
    let back = extract_delimited(&path, ',')?;

    assert_eq!(back.column_names(), table.column_names());
    assert_eq!(back.row_count(), table.row_count());
    assert_eq!(back.rows()[0][0], Value::Int(31));
    assert_eq!(back.rows()[1][0], Value::Null);
    assert_eq!(back.rows()[0][2], Value::Str("Ana García".into()));
    Ok(())
}

#[test]
fn json_records_artifacts_read_back_with_the_same_shape() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.json");
    let table = sample();

    write_json(&table, &path, JsonLayout::Records, 2)?;
    let back = extract_json(&path)?;

    let mut names = back.column_names();
    names.sort();
    assert_eq!(names, vec!["age", "bmi", "name"]);
    assert_eq!(back.row_count(), table.row_count());

    let age = back.column_index("age").unwrap();
    assert_eq!(back.rows()[0][age], Value::Int(31));
    assert_eq!(back.rows()[1][age], Value::Null);
    Ok(())
}

#[test]
fn json_columns_layout_writes_one_array_per_column() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("columns.json");

    write_json(&sample(), &path, JsonLayout::Columns, 0)?;
    let text = fs::read_to_string(&path)?;
    // Compact output: indent zero means no pretty-printing
    assert!(!text.contains('\n'));

    let doc: serde_json::Value = serde_json::from_str(&text)?;
    let obj = doc.as_object().unwrap();
    assert_eq!(obj.len(), 3);
    assert_eq!(obj["age"], serde_json::json!([31, null]));
    assert_eq!(obj["name"], serde_json::json!(["Ana García", "Luis"]));
    Ok(())
}

#[test]
fn index_column_prepends_row_numbers() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("indexed.csv");

    write_delimited(&sample(), &path, ',', true)?;
    let text = fs::read_to_string(&path)?;
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), ",age,bmi,name");
    assert!(lines.next().unwrap().starts_with("0,"));
    assert!(lines.next().unwrap().starts_with("1,"));
    Ok(())
}

#[test]
fn spreadsheet_artifacts_are_written() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("out.xlsx");

    write_spreadsheet(&sample(), &path, "users", false)?;
    assert!(path.exists());
    assert!(fs::metadata(&path)?.len() > 0);
    Ok(())
}

#[test]
fn guarded_writes_never_overwrite() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("guarded.csv");

    assert!(write_if_absent(&sample(), &path)?);
    let first = fs::read_to_string(&path)?;

    // Second call leaves the artifact untouched
    assert!(!write_if_absent(&sample(), &path)?);
    assert_eq!(fs::read_to_string(&path)?, first);
    Ok(())
}

#[test]
fn versioned_writes_splice_the_tag_before_the_extension() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("final_users.json");

    let written = write_versioned(&sample(), &base, "20260823_120000")?;
    assert_eq!(
        written.file_name().unwrap().to_str().unwrap(),
        "final_users_20260823_120000.json"
    );
    assert!(written.exists());
    assert!(!base.exists());
    Ok(())
}

#[test]
fn versioned_writes_default_to_csv_without_an_extension() -> Result<()> {
    let dir = tempdir()?;
    let base = dir.path().join("final_users");

    let written = write_versioned(&sample(), &base, "20260823_120000")?;
    assert_eq!(
        written.file_name().unwrap().to_str().unwrap(),
        "final_users_20260823_120000.csv"
    );
    Ok(())
}

#[test]
fn run_log_appends_timestamped_lines() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("etl_log.txt");

    log_event("run started", &path)?;
    log_event("run finished", &path)?;

    let text = fs::read_to_string(&path)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        let (stamp, message) = line.split_once(',').unwrap();
        assert_eq!(stamp.len(), 15);
        assert!(message.starts_with("run "));
    }
    Ok(())
}
