//! Combine stage: schema alignment, provenance tagging, concatenation
//! and relational merge.

use std::collections::{HashMap, HashSet};

use crate::constants::SOURCE_COLUMN;
use crate::error::{EtlError, Result};
use crate::table::{CellType, Column, KeyAtom, Schema, Table, Value, promote};

/// Select and rename columns per an ordered `(from, to)` mapping.
pub fn align_schema<S: AsRef<str>>(table: &Table, mapping: &[(S, S)]) -> Result<Table> {
    let mut columns = Vec::with_capacity(mapping.len());
    let mut indices = Vec::with_capacity(mapping.len());
    for (from, to) in mapping {
        let idx = table.schema().require(from.as_ref())?;
        columns.push(Column::new(to.as_ref(), table.schema().columns()[idx].ty));
        indices.push(idx);
    }
    let rows = table
        .rows()
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(Table::from_parts(Schema::new(columns), rows))
}

/// Project onto `columns`, padding absent ones with null cells.
///
/// The lenient alignment used right before concatenation; nothing is
/// renamed and nothing fails. Columns the table does not have come out
/// all-null and typed Str.
pub fn conform<S: AsRef<str>>(table: &Table, columns: &[S]) -> Table {
    let indices: Vec<Option<usize>> = columns
        .iter()
        .map(|name| table.column_index(name.as_ref()))
        .collect();
    let out_columns = columns
        .iter()
        .zip(indices.iter())
        .map(|(name, idx)| match idx {
            Some(i) => table.schema().columns()[*i].clone(),
            None => Column::new(name.as_ref(), CellType::Str),
        })
        .collect();
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            indices
                .iter()
                .map(|idx| match idx {
                    Some(i) => row[*i].clone(),
                    None => Value::Null,
                })
                .collect()
        })
        .collect();
    Table::from_parts(Schema::new(out_columns), rows)
}

/// Append the constant provenance column.
///
/// A tag is written once and never overwritten; re-tagging a table that
/// already carries a source column is a schema error.
pub fn tag_source(table: &Table, tag: &str) -> Result<Table> {
    if table.column_index(SOURCE_COLUMN).is_some() {
        return Err(EtlError::Schema(format!(
            "table already carries a '{SOURCE_COLUMN}' column"
        )));
    }
    let mut columns = table.schema().columns().to_vec();
    columns.push(Column::new(SOURCE_COLUMN, CellType::Str));
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.push(Value::Str(tag.to_string()));
            row
        })
        .collect();
    Ok(Table::from_parts(Schema::new(columns), rows))
}

/// Stack tables that share an identical column-name sequence.
///
/// Row order is preserved input by input. Column types are unified by
/// promotion, ignoring inputs where a column is entirely null so a
/// padded column never drags a numeric one down to Str.
pub fn concat(tables: &[Table]) -> Result<Table> {
    let Some(first) = tables.first() else {
        return Err(EtlError::Schema(
            "concat needs at least one input table".to_string(),
        ));
    };
    let names = first.column_names();
    for t in &tables[1..] {
        if t.column_names() != names {
            return Err(EtlError::Schema(format!(
                "concat inputs must share one column sequence: {:?} vs {:?}",
                names,
                t.column_names()
            )));
        }
    }

    let types: Vec<CellType> = (0..first.column_count())
        .map(|i| {
            tables
                .iter()
                .filter(|t| t.rows().iter().any(|row| !row[i].is_null()))
                .map(|t| t.schema().columns()[i].ty)
                .fold(None, |acc, ty| {
                    Some(match acc {
                        None => ty,
                        Some(prev) => promote(prev, ty),
                    })
                })
                .unwrap_or(CellType::Str)
        })
        .collect();

    let mut rows = Vec::with_capacity(tables.iter().map(Table::row_count).sum());
    for t in tables {
        for row in t.rows() {
            rows.push(
                row.iter()
                    .cloned()
                    .zip(types.iter())
                    .map(|(cell, ty)| cell.coerce_to(*ty))
                    .collect(),
            );
        }
    }
    let columns = names
        .into_iter()
        .zip(types)
        .map(|(name, ty)| Column::new(name, ty))
        .collect();
    Ok(Table::from_parts(Schema::new(columns), rows))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
}

/// Relational join of two tables on one key column.
///
/// Inner keeps only matching keys; Left/Right keep every row of that
/// side with the other side null-padded; Outer keeps both. Duplicate
/// keys on either side produce the cross product of their matches, so
/// the result can silently grow beyond both inputs when keys were not
/// de-duplicated first. Null keys never match anything; they survive
/// only through Left/Right/Outer padding. Right columns that collide
/// with a left column name come out suffixed `_right`.
pub fn merge(left: &Table, right: &Table, join_key: &str, how: JoinKind) -> Result<Table> {
    let lk = left.schema().require(join_key)?;
    let rk = right.schema().require(join_key)?;

    let left_names: HashSet<&str> = left.schema().names().collect();
    let mut columns: Vec<Column> = left.schema().columns().to_vec();
    let mut right_out: Vec<usize> = Vec::new();
    for (i, col) in right.schema().columns().iter().enumerate() {
        if i == rk {
            continue;
        }
        let name = if left_names.contains(col.name.as_str()) {
            format!("{}_right", col.name)
        } else {
            col.name.clone()
        };
        columns.push(Column::new(name, col.ty));
        right_out.push(i);
    }

    // keys compare after promotion so an Int key still meets its Float twin
    let key_ty = promote(
        left.schema().columns()[lk].ty,
        right.schema().columns()[rk].ty,
    );
    let key_of = |cell: &Value| cell.clone().coerce_to(key_ty).key_atom();

    let mut right_index: HashMap<KeyAtom, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows().iter().enumerate() {
        if !row[rk].is_null() {
            right_index.entry(key_of(&row[rk])).or_default().push(i);
        }
    }

    let right_width = right_out.len();
    let mut matched_right = vec![false; right.row_count()];
    let mut rows: Vec<Vec<Value>> = Vec::new();

    for lrow in left.rows() {
        let matches = if lrow[lk].is_null() {
            None
        } else {
            right_index.get(&key_of(&lrow[lk]))
        };
        match matches {
            Some(indices) => {
                for &ri in indices {
                    matched_right[ri] = true;
                    let mut row = lrow.clone();
                    for &ci in &right_out {
                        row.push(right.rows()[ri][ci].clone());
                    }
                    rows.push(row);
                }
            }
            None => {
                if matches!(how, JoinKind::Left | JoinKind::Outer) {
                    let mut row = lrow.clone();
                    row.extend(std::iter::repeat(Value::Null).take(right_width));
                    rows.push(row);
                }
            }
        }
    }

    if matches!(how, JoinKind::Right | JoinKind::Outer) {
        for (ri, was_matched) in matched_right.iter().enumerate() {
            if *was_matched {
                continue;
            }
            let rrow = &right.rows()[ri];
            let mut row = vec![Value::Null; left.column_count()];
            row[lk] = rrow[rk].clone();
            for &ci in &right_out {
                row.push(rrow[ci].clone());
            }
            rows.push(row);
        }
    }

    columns[lk].ty = key_ty;
    for row in &mut rows {
        row[lk] = row[lk].clone().coerce_to(key_ty);
    }
    Ok(Table::from_parts(Schema::new(columns), rows))
}
