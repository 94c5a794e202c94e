//! Per-cell text cleaning rules.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EtlError, Result};
use crate::table::{CellType, Table, Value};

/// local@domain, no whitespace, exactly one `@`.
static EMAIL_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap());

/// One normalization step for a string column. A rule is a pure
/// `&str -> Option<String>` function; `None` nulls the cell.
#[derive(Debug, Clone)]
pub enum CleanRule {
    /// Strip leading and trailing whitespace.
    Trim,
    Lowercase,
    /// Upper-case the first letter of each word, lower-case the rest.
    Capitalize,
    /// Replace values listed in the alias table with their canonical
    /// form. The table is configuration, not code.
    CollapseAliases(HashMap<String, String>),
    /// Keep only values shaped like an email address.
    ValidateEmail,
}

impl CleanRule {
    pub fn apply(&self, value: &str) -> Option<String> {
        match self {
            CleanRule::Trim => Some(value.trim().to_string()),
            CleanRule::Lowercase => Some(value.to_lowercase()),
            CleanRule::Capitalize => Some(capitalize_words(value)),
            CleanRule::CollapseAliases(aliases) => Some(
                aliases
                    .get(value)
                    .cloned()
                    .unwrap_or_else(|| value.to_string()),
            ),
            CleanRule::ValidateEmail => {
                if EMAIL_SHAPE.is_match(value) {
                    Some(value.to_string())
                } else {
                    None
                }
            }
        }
    }
}

fn capitalize_words(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Apply `rules` in order to every non-null cell of `column`.
///
/// Null cells pass through unchanged. Once a rule nulls a cell the
/// remaining rules are skipped for that cell.
pub fn clean_text_field(table: &Table, column: &str, rules: &[CleanRule]) -> Result<Table> {
    let idx = table.schema().require(column)?;
    let ty = table.schema().columns()[idx].ty;
    if ty != CellType::Str {
        return Err(EtlError::Schema(format!(
            "text cleaning needs a str column, '{column}' is {ty:?}"
        )));
    }

    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if let Value::Str(text) = &row[idx] {
                let mut current = Some(text.clone());
                for rule in rules {
                    current = current.and_then(|v| rule.apply(&v));
                }
                row[idx] = match current {
                    Some(cleaned) => Value::Str(cleaned),
                    None => Value::Null,
                };
            }
            row
        })
        .collect();
    Ok(Table::from_parts(table.schema().clone(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, Schema};

    fn text_table(column: &str, cells: Vec<Value>) -> Table {
        let schema = Schema::new(vec![Column::new(column, CellType::Str)]);
        let rows = cells.into_iter().map(|c| vec![c]).collect();
        Table::new(schema, rows).unwrap()
    }

    #[test]
    fn trim_and_lowercase_compose_in_order() {
        let t = text_table(
            "email",
            vec![
                Value::Str("  Ana@Example.COM ".into()),
                Value::Null,
            ],
        );
        let out = clean_text_field(&t, "email", &[CleanRule::Trim, CleanRule::Lowercase]).unwrap();
        assert_eq!(out.rows()[0][0], Value::Str("ana@example.com".into()));
        assert_eq!(out.rows()[1][0], Value::Null);
    }

    #[test]
    fn capitalize_title_cases_each_word() {
        let t = text_table("name", vec![Value::Str("ana maría garcía".into())]);
        let out = clean_text_field(&t, "name", &[CleanRule::Capitalize]).unwrap();
        assert_eq!(out.rows()[0][0], Value::Str("Ana María García".into()));
    }

    #[test]
    fn aliases_collapse_to_canonical_form() {
        let mut aliases = HashMap::new();
        aliases.insert("españa".to_string(), "spain".to_string());
        let t = text_table(
            "country",
            vec![Value::Str("españa".into()), Value::Str("peru".into())],
        );
        let out = clean_text_field(&t, "country", &[CleanRule::CollapseAliases(aliases)]).unwrap();
        assert_eq!(out.rows()[0][0], Value::Str("spain".into()));
        assert_eq!(out.rows()[1][0], Value::Str("peru".into()));
    }

    #[test]
    fn invalid_emails_become_null() {
        let t = text_table(
            "email",
            vec![
                Value::Str("ana@example.com".into()),
                Value::Str("not-an-email".into()),
                Value::Str("two@@example.com".into()),
                Value::Str("@example.com".into()),
            ],
        );
        let out = clean_text_field(&t, "email", &[CleanRule::ValidateEmail]).unwrap();
        assert_eq!(out.rows()[0][0], Value::Str("ana@example.com".into()));
        assert_eq!(out.rows()[1][0], Value::Null);
        assert_eq!(out.rows()[2][0], Value::Null);
        assert_eq!(out.rows()[3][0], Value::Null);
    }

    #[test]
    fn cleaning_a_numeric_column_is_a_schema_error() {
        let schema = Schema::new(vec![Column::new("age", CellType::Int)]);
        let t = Table::new(schema, vec![vec![Value::Int(31)]]).unwrap();
        let err = clean_text_field(&t, "age", &[CleanRule::Trim]).unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }
}
