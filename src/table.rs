//! In-memory tabular snapshot used by the analyzers.
//!
//! Stores data column-wise over a dynamic [`Value`] type and exposes the
//! operations the analysis pipeline needs: column lookup, value counts,
//! set-membership filtering, and partitioning by a column's values.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{AnalysisError, Result};

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }

    /// Parses a raw CSV cell, preferring the narrowest type.
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(v) = trimmed.parse::<i64>() {
            return Value::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return Value::Float(v);
        }
        match trimmed {
            "true" | "True" => Value::Bool(true),
            "false" | "False" => Value::Bool(false),
            _ => Value::Str(trimmed.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Null => Ok(()),
        }
    }
}

/// A columnar table with named columns of equal length.
#[derive(Debug, Clone, Default)]
pub struct Table {
    names: Vec<String>,
    columns: HashMap<String, Vec<Value>>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    /// Creates an empty table with the given column names.
    pub fn with_columns(names: &[&str]) -> Self {
        let mut table = Table::new();
        for name in names {
            table.names.push(name.to_string());
            table.columns.insert(name.to_string(), Vec::new());
        }
        table
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Returns the values of a column.
    pub fn column(&self, name: &str) -> Result<&[Value]> {
        self.columns
            .get(name)
            .map(|c| c.as_slice())
            .ok_or_else(|| AnalysisError::MissingColumn(name.to_string()))
    }

    /// Collects the numeric values of a column, skipping nulls.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self
            .column(name)?
            .iter()
            .filter_map(Value::as_f64)
            .collect())
    }

    /// Appends a row. The row must have one value per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.names.len() {
            return Err(AnalysisError::InvalidArgument(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.names.len()
            )));
        }
        for (name, value) in self.names.iter().zip(row) {
            self.columns.get_mut(name).expect("column exists").push(value);
        }
        self.rows += 1;
        Ok(())
    }

    /// Appends a full column. Must match the current row count unless the
    /// table has no columns yet.
    pub fn add_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        if !self.names.is_empty() && values.len() != self.rows {
            return Err(AnalysisError::InvalidArgument(format!(
                "column '{}' has {} values, table has {} rows",
                name,
                values.len(),
                self.rows
            )));
        }
        if self.names.is_empty() {
            self.rows = values.len();
        }
        self.names.push(name.to_string());
        self.columns.insert(name.to_string(), values);
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let values = self
            .columns
            .remove(from)
            .ok_or_else(|| AnalysisError::MissingColumn(from.to_string()))?;
        self.columns.insert(to.to_string(), values);
        for name in &mut self.names {
            if name == from {
                *name = to.to_string();
            }
        }
        Ok(())
    }

    /// The dtype of a column: kind of its first non-null value.
    pub fn dtype(&self, name: &str) -> Result<&'static str> {
        let col = self.column(name)?;
        Ok(col
            .iter()
            .find(|v| !v.is_null())
            .map(Value::kind)
            .unwrap_or("null"))
    }

    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.names
            .iter()
            .map(|name| self.columns[name][idx].clone())
            .collect()
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Table {
        let mut out = Table::new();
        for name in &self.names {
            let col = &self.columns[name];
            out.names.push(name.clone());
            out.columns
                .insert(name.clone(), col.iter().take(n).cloned().collect());
        }
        out.rows = self.rows.min(n);
        out
    }

    /// Copy of the table without the named columns. Unknown names are ignored.
    pub fn drop_columns(&self, names: &[&str]) -> Table {
        let dropped: HashSet<&str> = names.iter().copied().collect();
        let mut out = Table::new();
        for name in &self.names {
            if dropped.contains(name.as_str()) {
                continue;
            }
            out.names.push(name.clone());
            out.columns.insert(name.clone(), self.columns[name].clone());
        }
        out.rows = self.rows;
        out
    }

    fn filter_by_indices(&self, keep: &[usize]) -> Table {
        let mut out = Table::new();
        for name in &self.names {
            let col = &self.columns[name];
            out.names.push(name.clone());
            out.columns.insert(
                name.clone(),
                keep.iter().map(|&i| col[i].clone()).collect(),
            );
        }
        out.rows = keep.len();
        out
    }

    /// Rows whose `column` value is a member of `values`.
    pub fn filter_isin(&self, column: &str, values: &HashSet<String>) -> Result<Table> {
        let col = self.column(column)?;
        let keep: Vec<usize> = col
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null() && values.contains(&v.to_string()))
            .map(|(i, _)| i)
            .collect();
        Ok(self.filter_by_indices(&keep))
    }

    /// Rows whose `column` value displays as `value`.
    pub fn filter_eq(&self, column: &str, value: &str) -> Result<Table> {
        let col = self.column(column)?;
        let keep: Vec<usize> = col
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null() && v.to_string() == value)
            .map(|(i, _)| i)
            .collect();
        Ok(self.filter_by_indices(&keep))
    }

    /// Value counts of a column, descending by count.
    ///
    /// Ties are broken by the first-occurrence order of the category, so the
    /// result is deterministic for a given row order. Nulls are skipped.
    pub fn value_counts(&self, column: &str) -> Result<Vec<(String, u64)>> {
        let col = self.column(column)?;
        Ok(count_labels(col.iter().filter_map(|v| {
            if v.is_null() {
                None
            } else {
                Some(v.to_string())
            }
        })))
    }

    /// Joint value counts of two columns, treating each row as the tuple
    /// `(a, b)`. Rows where either side is null are skipped.
    pub fn joint_value_counts(&self, a: &str, b: &str) -> Result<Vec<(String, u64)>> {
        let col_a = self.column(a)?;
        let col_b = self.column(b)?;
        Ok(count_labels(col_a.iter().zip(col_b).filter_map(|(x, y)| {
            if x.is_null() || y.is_null() {
                None
            } else {
                Some(format!("({}, {})", x, y))
            }
        })))
    }

    /// Distinct values of a column in first-encounter order, skipping nulls.
    pub fn distinct(&self, column: &str) -> Result<Vec<String>> {
        let col = self.column(column)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for v in col {
            if v.is_null() {
                continue;
            }
            let label = v.to_string();
            if seen.insert(label.clone()) {
                out.push(label);
            }
        }
        Ok(out)
    }

    /// Partitions rows by the distinct values of `column`, preserving
    /// first-encountered group order. Null-valued rows belong to no group.
    pub fn partition_by(&self, column: &str) -> Result<Vec<(String, Table)>> {
        let col = self.column(column)?;
        let mut order = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, v) in col.iter().enumerate() {
            if v.is_null() {
                continue;
            }
            let label = v.to_string();
            if !groups.contains_key(&label) {
                order.push(label.clone());
            }
            groups.entry(label).or_default().push(i);
        }
        Ok(order
            .into_iter()
            .map(|label| {
                let table = self.filter_by_indices(&groups[&label]);
                (label, table)
            })
            .collect())
    }
}

/// Counts labels, returning (label, count) descending by count with ties in
/// first-occurrence order.
fn count_labels(labels: impl Iterator<Item = String>) -> Vec<(String, u64)> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for label in labels {
        if !counts.contains_key(&label) {
            order.push(label.clone());
        }
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut out: Vec<(String, u64)> = order
        .into_iter()
        .map(|label| {
            let count = counts[&label];
            (label, count)
        })
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        let mut t = Table::with_columns(&["fruit", "color", "qty"]);
        let rows = vec![
            vec![
                Value::Str("apple".into()),
                Value::Str("red".into()),
                Value::Int(3),
            ],
            vec![
                Value::Str("banana".into()),
                Value::Str("yellow".into()),
                Value::Int(1),
            ],
            vec![
                Value::Str("apple".into()),
                Value::Str("green".into()),
                Value::Int(2),
            ],
            vec![
                Value::Str("cherry".into()),
                Value::Str("red".into()),
                Value::Int(5),
            ],
            vec![
                Value::Str("apple".into()),
                Value::Str("red".into()),
                Value::Int(4),
            ],
        ];
        for row in rows {
            t.push_row(row).unwrap();
        }
        t
    }

    #[test]
    fn test_missing_column_error() {
        let t = sample_table();
        let err = t.column("nope").unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn(name) if name == "nope"));
    }

    #[test]
    fn test_value_counts_descending_with_stable_ties() {
        let t = sample_table();
        let counts = t.value_counts("fruit").unwrap();
        assert_eq!(
            counts,
            vec![
                ("apple".to_string(), 3),
                ("banana".to_string(), 1),
                ("cherry".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_value_counts_skips_nulls() {
        let mut t = Table::with_columns(&["a"]);
        t.push_row(vec![Value::Str("x".into())]).unwrap();
        t.push_row(vec![Value::Null]).unwrap();
        t.push_row(vec![Value::Str("x".into())]).unwrap();
        assert_eq!(t.value_counts("a").unwrap(), vec![("x".to_string(), 2)]);
    }

    #[test]
    fn test_joint_value_counts() {
        let t = sample_table();
        let counts = t.joint_value_counts("fruit", "color").unwrap();
        assert_eq!(counts[0], ("(apple, red)".to_string(), 2));
        assert_eq!(counts.len(), 4);
    }

    #[test]
    fn test_distinct_first_encounter_order() {
        let t = sample_table();
        assert_eq!(t.distinct("color").unwrap(), vec!["red", "yellow", "green"]);
    }

    #[test]
    fn test_filter_isin() {
        let t = sample_table();
        let wanted: HashSet<String> = ["red".to_string()].into_iter().collect();
        let filtered = t.filter_isin("color", &wanted).unwrap();
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_partition_by_preserves_group_order() {
        let t = sample_table();
        let groups = t.partition_by("fruit").unwrap();
        let names: Vec<&str> = groups.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["apple", "banana", "cherry"]);
        assert_eq!(groups[0].1.len(), 3);
    }

    #[test]
    fn test_numeric_column() {
        let t = sample_table();
        assert_eq!(t.numeric_column("qty").unwrap(), vec![3.0, 1.0, 2.0, 5.0, 4.0]);
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse("12"), Value::Int(12));
        assert_eq!(Value::parse("1.5"), Value::Float(1.5));
        assert_eq!(Value::parse("true"), Value::Bool(true));
        assert_eq!(Value::parse(""), Value::Null);
        assert_eq!(Value::parse("hello"), Value::Str("hello".to_string()));
    }

    #[test]
    fn test_push_row_arity_check() {
        let mut t = Table::with_columns(&["a", "b"]);
        let err = t.push_row(vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidArgument(_)));
    }

    #[test]
    fn test_drop_columns_ignores_unknown() {
        let t = sample_table();
        let dropped = t.drop_columns(&["color", "not_there"]);
        assert_eq!(dropped.column_names(), &["fruit".to_string(), "qty".to_string()]);
        assert_eq!(dropped.len(), 5);
    }
}
