//! Transform stage: column normalization, cleaning, unit conversion,
//! null handling, de-duplication and derived columns.
//!
//! Every operation takes a table by reference and returns a new one;
//! nothing mutates in place.

pub mod clean;

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EtlError, Result};
use crate::table::{CellType, Column, KeyAtom, Schema, Table, Value, promote};

pub use clean::{CleanRule, clean_text_field};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lower-case column names and collapse internal whitespace runs to `_`.
/// Idempotent: a second pass finds nothing left to change.
pub fn normalize_columns(table: &Table) -> Table {
    let columns = table
        .schema()
        .columns()
        .iter()
        .map(|c| Column::new(normalize_name(&c.name), c.ty))
        .collect();
    Table::from_parts(Schema::new(columns), table.rows().to_vec())
}

pub(crate) fn normalize_name(name: &str) -> String {
    WHITESPACE_RUN
        .replace_all(name.trim(), "_")
        .to_lowercase()
}

/// Rename columns per `(from, to)` pairs. Pairs whose `from` column is
/// absent are skipped, so one mapping can serve sources with different
/// shapes.
pub fn rename_columns<S: AsRef<str>>(table: &Table, mapping: &[(S, S)]) -> Table {
    let mut columns = table.schema().columns().to_vec();
    for (from, to) in mapping {
        if let Some(idx) = table.column_index(from.as_ref()) {
            columns[idx].name = to.as_ref().to_string();
        }
    }
    Table::from_parts(Schema::new(columns), table.rows().to_vec())
}

/// Replace each numeric cell `v` with `round(v * factor, 2)`.
///
/// String cells are coerced to numbers first; a cell that cannot be
/// coerced is a type error. Null cells stay null and the column comes
/// out typed Float.
pub fn convert_units(table: &Table, column: &str, factor: f64) -> Result<Table> {
    let idx = table.schema().require(column)?;
    let mut rows = table.rows().to_vec();
    for row in &mut rows {
        row[idx] = match &row[idx] {
            Value::Null => Value::Null,
            cell => match cell.coerce_f64() {
                Some(v) => Value::Float(round2(v * factor)),
                None => {
                    return Err(EtlError::type_error(
                        column,
                        format!("cannot convert '{cell}' to a number"),
                    ));
                }
            },
        };
    }
    Ok(Table::from_parts(
        Schema::new(retype(table.schema(), idx, CellType::Float)),
        rows,
    ))
}

/// Null-replacement policy for one column.
#[derive(Debug, Clone)]
pub enum FillStrategy {
    /// Arithmetic mean of the column's non-null numeric values.
    Mean,
    /// Median of the column's non-null numeric values.
    Median,
    /// A caller-supplied constant.
    Constant(Value),
    /// Remove rows whose cell is null instead of filling.
    DropRow,
}

/// Replace every null in `column` according to `strategy`.
///
/// Afterwards the column contains zero nulls, except for `DropRow` which
/// removes the offending rows instead. Mean and median over an Int column
/// promote it to Float.
pub fn fill_nulls(table: &Table, column: &str, strategy: &FillStrategy) -> Result<Table> {
    let idx = table.schema().require(column)?;
    let fill = match strategy {
        FillStrategy::DropRow => {
            return Ok(table.filter_rows(|row| !row[idx].is_null()));
        }
        FillStrategy::Mean => Value::Float(numeric_statistic(table, idx, column, Statistic::Mean)?),
        FillStrategy::Median => {
            Value::Float(numeric_statistic(table, idx, column, Statistic::Median)?)
        }
        FillStrategy::Constant(v) => v.clone(),
    };

    let old_ty = table.schema().columns()[idx].ty;
    let new_ty = match fill.cell_type() {
        Some(fill_ty) => promote(old_ty, fill_ty),
        None => {
            return Err(EtlError::Config(
                "fill_nulls cannot use null as the fill constant".to_string(),
            ));
        }
    };

    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let cell = if row[idx].is_null() {
                fill.clone()
            } else {
                row[idx].clone()
            };
            row[idx] = cell.coerce_to(new_ty);
            row
        })
        .collect();
    Ok(Table::from_parts(
        Schema::new(retype(table.schema(), idx, new_ty)),
        rows,
    ))
}

enum Statistic {
    Mean,
    Median,
}

fn numeric_statistic(table: &Table, idx: usize, column: &str, which: Statistic) -> Result<f64> {
    let mut values: Vec<f64> = table
        .rows()
        .iter()
        .filter_map(|row| row[idx].as_f64())
        .collect();
    if values.is_empty() {
        let name = match which {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
        };
        return Err(EtlError::type_error(
            column,
            format!("cannot take the {name} of a column with no numeric values"),
        ));
    }
    Ok(match which {
        Statistic::Mean => values.iter().sum::<f64>() / values.len() as f64,
        Statistic::Median => {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mid = values.len() / 2;
            if values.len() % 2 == 1 {
                values[mid]
            } else {
                (values[mid - 1] + values[mid]) / 2.0
            }
        }
    })
}

/// Keep the first occurrence, in row order, of each distinct key tuple
/// over `key_columns`. Never grows the table.
pub fn deduplicate(table: &Table, key_columns: &[&str]) -> Result<Table> {
    let indices: Vec<usize> = key_columns
        .iter()
        .map(|name| table.schema().require(name))
        .collect::<Result<_>>()?;
    let mut seen: HashSet<Vec<KeyAtom>> = HashSet::new();
    let rows = table
        .rows()
        .iter()
        .filter(|row| {
            let key: Vec<KeyAtom> = indices.iter().map(|&i| row[i].key_atom()).collect();
            seen.insert(key)
        })
        .cloned()
        .collect();
    Ok(Table::from_parts(table.schema().clone(), rows))
}

/// Append one deterministic column computed from each row.
pub fn compute_derived<F>(table: &Table, name: &str, ty: CellType, mut formula: F) -> Result<Table>
where
    F: FnMut(&[Value]) -> Result<Value>,
{
    if table.column_index(name).is_some() {
        return Err(EtlError::Schema(format!(
            "derived column '{name}' already exists"
        )));
    }
    let mut columns = table.schema().columns().to_vec();
    columns.push(Column::new(name, ty));
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.push(formula(&row)?);
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Table::from_parts(Schema::new(columns), rows))
}

/// Body mass index: `weight / height²`, rounded to 2 decimals. A null
/// operand or a zero height yields a null cell.
pub fn derive_bmi(
    table: &Table,
    weight_col: &str,
    height_col: &str,
    target: &str,
) -> Result<Table> {
    let w = table.schema().require(weight_col)?;
    let h = table.schema().require(height_col)?;
    let weight_name = weight_col.to_string();
    let height_name = height_col.to_string();
    compute_derived(table, target, CellType::Float, move |row| {
        if row[w].is_null() || row[h].is_null() {
            return Ok(Value::Null);
        }
        let weight = row[w].coerce_f64().ok_or_else(|| {
            EtlError::type_error(&weight_name, format!("cannot convert '{}' to a number", row[w]))
        })?;
        let height = row[h].coerce_f64().ok_or_else(|| {
            EtlError::type_error(&height_name, format!("cannot convert '{}' to a number", row[h]))
        })?;
        if height == 0.0 {
            return Ok(Value::Null);
        }
        Ok(Value::Float(round2(weight / (height * height))))
    })
}

/// `"{first} {last}"`, trimmed; a missing half leaves the other alone,
/// both missing yields null.
pub fn derive_full_name(
    table: &Table,
    first_col: &str,
    last_col: &str,
    target: &str,
) -> Result<Table> {
    let f = table.schema().require(first_col)?;
    let l = table.schema().require(last_col)?;
    compute_derived(table, target, CellType::Str, move |row| {
        let first = row[f].as_str().unwrap_or("");
        let last = row[l].as_str().unwrap_or("");
        let full = format!("{first} {last}");
        let full = full.trim();
        Ok(if full.is_empty() {
            Value::Null
        } else {
            Value::Str(full.to_string())
        })
    })
}

/// True when age is 18 or above; null age stays null.
pub fn derive_is_adult(table: &Table, age_col: &str, target: &str) -> Result<Table> {
    let a = table.schema().require(age_col)?;
    compute_derived(table, target, CellType::Bool, move |row| {
        Ok(match row[a].coerce_f64() {
            Some(age) => Value::Bool(age >= 18.0),
            None => Value::Null,
        })
    })
}

/// Project onto `columns`, in the order given.
pub fn select_columns(table: &Table, columns: &[&str]) -> Result<Table> {
    let indices: Vec<usize> = columns
        .iter()
        .map(|name| table.schema().require(name))
        .collect::<Result<_>>()?;
    let selected = indices
        .iter()
        .map(|&i| table.schema().columns()[i].clone())
        .collect();
    let rows = table
        .rows()
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(Table::from_parts(Schema::new(selected), rows))
}

/// Stable sort on one column. Null cells order last in either direction.
pub fn sort_by(table: &Table, column: &str, ascending: bool) -> Result<Table> {
    let idx = table.schema().require(column)?;
    let mut rows = table.rows().to_vec();
    rows.sort_by(|a, b| compare_cells(&a[idx], &b[idx], ascending));
    Ok(Table::from_parts(table.schema().clone(), rows))
}

fn compare_cells(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let ord = match (a, b) {
        (Value::Null, Value::Null) => return Ordering::Equal,
        (Value::Null, _) => return Ordering::Greater,
        (_, Value::Null) => return Ordering::Less,
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (x, y) => match (x.as_f64(), y.as_f64()) {
            (Some(xf), Some(yf)) => xf.partial_cmp(&yf).unwrap_or(Ordering::Equal),
            _ => x.to_field().cmp(&y.to_field()),
        },
    };
    if ascending { ord } else { ord.reverse() }
}

/// Parse a string column into UTC timestamps using a chrono format
/// string. Date-only formats get a midnight time component. A cell that
/// does not match the format is a type error.
pub fn parse_timestamps(table: &Table, column: &str, format: &str) -> Result<Table> {
    let idx = table.schema().require(column)?;
    let mut rows = table.rows().to_vec();
    for row in &mut rows {
        row[idx] = match &row[idx] {
            Value::Null => Value::Null,
            Value::Timestamp(ts) => Value::Timestamp(*ts),
            cell => {
                let text = cell.to_field();
                let parsed = NaiveDateTime::parse_from_str(&text, format)
                    .or_else(|_| {
                        NaiveDate::parse_from_str(&text, format)
                            .map(|d| d.and_time(NaiveTime::MIN))
                    })
                    .map_err(|e| {
                        EtlError::type_error(
                            column,
                            format!("'{text}' does not match format '{format}': {e}"),
                        )
                    })?;
                Value::Timestamp(parsed.and_utc())
            }
        };
    }
    Ok(Table::from_parts(
        Schema::new(retype(table.schema(), idx, CellType::Timestamp)),
        rows,
    ))
}

fn retype(schema: &Schema, idx: usize, ty: CellType) -> Vec<Column> {
    schema
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == idx {
                Column::new(c.name.clone(), ty)
            } else {
                c.clone()
            }
        })
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{INCH_TO_METERS, POUNDS_TO_KG};

    fn people() -> Table {
        let schema = Schema::new(vec![
            Column::new("Name", CellType::Str),
            Column::new("age", CellType::Int),
        ]);
        Table::new(
            schema,
            vec![
                vec![Value::Str("Ana".into()), Value::Int(31)],
                vec![Value::Str("Carlos".into()), Value::Null],
                vec![Value::Str("Lucia".into()), Value::Int(27)],
                vec![Value::Str("Ana".into()), Value::Int(31)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn normalize_columns_is_idempotent() {
        let schema = Schema::new(vec![
            Column::new("First  Name", CellType::Str),
            Column::new(" Email Address ", CellType::Str),
        ]);
        let t = Table::empty(schema);
        let once = normalize_columns(&t);
        assert_eq!(once.column_names(), vec!["first_name", "email_address"]);
        let twice = normalize_columns(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn rename_columns_skips_absent_pairs() {
        let t = people();
        let renamed = rename_columns(&t, &[("Name", "full_name"), ("missing", "x")]);
        assert_eq!(renamed.column_names(), vec!["full_name", "age"]);
        assert_eq!(renamed.rows(), t.rows());
    }

    #[test]
    fn convert_units_rounds_to_two_decimals() {
        let schema = Schema::new(vec![
            Column::new("height_inch", CellType::Int),
            Column::new("weight_lb", CellType::Int),
        ]);
        let t = Table::new(schema, vec![vec![Value::Int(70), Value::Int(154)]]).unwrap();
        let t = convert_units(&t, "height_inch", INCH_TO_METERS).unwrap();
        let t = convert_units(&t, "weight_lb", POUNDS_TO_KG).unwrap();
        assert_eq!(t.rows()[0][0], Value::Float(1.78));
        assert_eq!(t.rows()[0][1], Value::Float(69.85));
    }

    #[test]
    fn convert_units_coerces_strings_and_rejects_junk() {
        let schema = Schema::new(vec![Column::new("height", CellType::Str)]);
        let ok = Table::new(schema.clone(), vec![vec![Value::Str("70".into())]]).unwrap();
        let out = convert_units(&ok, "height", INCH_TO_METERS).unwrap();
        assert_eq!(out.rows()[0][0], Value::Float(1.78));

        let bad = Table::new(schema, vec![vec![Value::Str("tall".into())]]).unwrap();
        let err = convert_units(&bad, "height", INCH_TO_METERS).unwrap_err();
        assert!(matches!(err, EtlError::Type { .. }));
    }

    #[test]
    fn fill_mean_leaves_no_nulls_and_promotes_to_float() {
        let filled = fill_nulls(&people(), "age", &FillStrategy::Mean).unwrap();
        assert_eq!(filled.null_counts()[1].1, 0);
        let idx = filled.column_index("age").unwrap();
        assert_eq!(filled.schema().columns()[idx].ty, CellType::Float);
        // mean of 31, 27, 31
        assert_eq!(filled.rows()[1][idx], Value::Float((31 + 27 + 31) as f64 / 3.0));
        assert_eq!(filled.rows()[0][idx], Value::Float(31.0));
    }

    #[test]
    fn fill_median_averages_the_middle_pair() {
        let schema = Schema::new(vec![Column::new("age", CellType::Int)]);
        let t = Table::new(
            schema,
            vec![
                vec![Value::Int(20)],
                vec![Value::Int(40)],
                vec![Value::Int(30)],
                vec![Value::Int(10)],
                vec![Value::Null],
            ],
        )
        .unwrap();
        let filled = fill_nulls(&t, "age", &FillStrategy::Median).unwrap();
        assert_eq!(filled.rows()[4][0], Value::Float(25.0));
    }

    #[test]
    fn fill_drop_row_removes_null_rows() {
        let filled = fill_nulls(&people(), "age", &FillStrategy::DropRow).unwrap();
        assert_eq!(filled.row_count(), 3);
        assert_eq!(filled.null_counts()[1].1, 0);
    }

    #[test]
    fn fill_constant_keeps_column_type_when_it_matches() {
        let filled =
            fill_nulls(&people(), "age", &FillStrategy::Constant(Value::Int(0))).unwrap();
        let idx = filled.column_index("age").unwrap();
        assert_eq!(filled.schema().columns()[idx].ty, CellType::Int);
        assert_eq!(filled.rows()[1][idx], Value::Int(0));
    }

    #[test]
    fn fill_mean_of_text_column_is_a_type_error() {
        let err = fill_nulls(&people(), "Name", &FillStrategy::Mean).unwrap_err();
        assert!(matches!(err, EtlError::Type { .. }));
    }

    #[test]
    fn deduplicate_keeps_first_occurrence() {
        let t = people();
        let out = deduplicate(&t, &["Name", "age"]).unwrap();
        assert!(out.row_count() <= t.row_count());
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.rows()[0][0], Value::Str("Ana".into()));
        assert_eq!(out.rows()[1][0], Value::Str("Carlos".into()));
    }

    #[test]
    fn bmi_rounds_to_two_decimals() {
        let schema = Schema::new(vec![
            Column::new("weight_kg", CellType::Float),
            Column::new("height_m", CellType::Float),
        ]);
        let t = Table::new(
            schema,
            vec![vec![Value::Float(69.85), Value::Float(1.78)]],
        )
        .unwrap();
        let out = derive_bmi(&t, "weight_kg", "height_m", "bmi").unwrap();
        let idx = out.column_index("bmi").unwrap();
        assert_eq!(out.rows()[0][idx], Value::Float(22.05));
    }

    #[test]
    fn full_name_joins_and_trims() {
        let schema = Schema::new(vec![
            Column::new("first_name", CellType::Str),
            Column::new("last_name", CellType::Str),
        ]);
        let t = Table::new(
            schema,
            vec![
                vec![Value::Str("Ana".into()), Value::Str("García".into())],
                vec![Value::Str("Cher".into()), Value::Null],
                vec![Value::Null, Value::Null],
            ],
        )
        .unwrap();
        let out = derive_full_name(&t, "first_name", "last_name", "name").unwrap();
        let idx = out.column_index("name").unwrap();
        assert_eq!(out.rows()[0][idx], Value::Str("Ana García".into()));
        assert_eq!(out.rows()[1][idx], Value::Str("Cher".into()));
        assert_eq!(out.rows()[2][idx], Value::Null);
    }

    #[test]
    fn is_adult_is_null_for_unknown_age() {
        let out = derive_is_adult(&people(), "age", "is_adult").unwrap();
        let idx = out.column_index("is_adult").unwrap();
        assert_eq!(out.rows()[0][idx], Value::Bool(true));
        assert_eq!(out.rows()[1][idx], Value::Null);
    }

    #[test]
    fn select_columns_reorders_and_projects() {
        let out = select_columns(&people(), &["age", "Name"]).unwrap();
        assert_eq!(out.column_names(), vec!["age", "Name"]);
        assert_eq!(out.rows()[0][1], Value::Str("Ana".into()));

        let err = select_columns(&people(), &["missing"]).unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn sort_by_orders_nulls_last_both_directions() {
        let asc = sort_by(&people(), "age", true).unwrap();
        assert_eq!(asc.rows()[0][1], Value::Int(27));
        assert_eq!(asc.rows()[3][1], Value::Null);

        let desc = sort_by(&people(), "age", false).unwrap();
        assert_eq!(desc.rows()[0][1], Value::Int(31));
        assert_eq!(desc.rows()[3][1], Value::Null);
    }

    #[test]
    fn parse_timestamps_handles_date_only_formats() {
        let schema = Schema::new(vec![Column::new("joined", CellType::Str)]);
        let t = Table::new(
            schema,
            vec![vec![Value::Str("2024-03-01".into())], vec![Value::Null]],
        )
        .unwrap();
        let out = parse_timestamps(&t, "joined", "%Y-%m-%d").unwrap();
        let idx = out.column_index("joined").unwrap();
        assert_eq!(out.schema().columns()[idx].ty, CellType::Timestamp);
        match &out.rows()[0][idx] {
            Value::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2024-03-01T00:00:00+00:00"),
            other => panic!("expected timestamp, got {other:?}"),
        }
        assert_eq!(out.rows()[1][idx], Value::Null);
    }

    #[test]
    fn parse_timestamps_rejects_mismatched_text() {
        let schema = Schema::new(vec![Column::new("joined", CellType::Str)]);
        let t = Table::new(schema, vec![vec![Value::Str("yesterday".into())]]).unwrap();
        let err = parse_timestamps(&t, "joined", "%Y-%m-%d").unwrap_err();
        assert!(matches!(err, EtlError::Type { .. }));
    }
}
