//! Relational store construction and loading.
//!
//! Reads the raw errand and order CSV exports, normalizes them, derives the
//! per-order errand count, and persists both tables into a SQLite database
//! with indices. The loader reads them back as [`Table`]s.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use tracing::info;

use crate::error::{self, AnalysisError};
use crate::table::{Table, Value};

/// Timestamp format used across both source files.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rows taken from each source in subset mode.
const SUBSET_ROWS: usize = 100;

/// Converts a base36 encoded string to a decimal integer.
///
/// # Errors
///
/// Fails with [`AnalysisError::InvalidArgument`] for strings that are not
/// valid base36.
pub fn base36_to_decimal(value: &str) -> error::Result<i64> {
    i64::from_str_radix(value, 36)
        .map_err(|e| AnalysisError::InvalidArgument(format!("invalid base36 value '{}': {}", value, e)))
}

/// Checks that every non-null value of `column` parses as a timestamp.
/// Evaluated eagerly over the whole column before any transformation runs.
pub fn validate_datetime_column(table: &Table, column: &str) -> error::Result<()> {
    for value in table.column(column)? {
        if value.is_null() {
            continue;
        }
        let raw = value.to_string();
        NaiveDateTime::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
            AnalysisError::InvalidArgument(format!(
                "column '{}' holds non-timestamp value '{}': {}",
                column, raw, e
            ))
        })?;
    }
    Ok(())
}

/// Reads a CSV file into a [`Table`], normalizing headers to lowercase
/// snake_case and inferring cell types.
pub fn read_csv_table(path: &Path) -> Result<Table> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase().replace(' ', "_"))
        .collect();

    let mut table = Table::with_columns(&headers.iter().map(String::as_str).collect::<Vec<_>>());
    for record in reader.records() {
        let record = record?;
        table.push_row(record.iter().map(Value::parse).collect())?;
    }

    info!(path = %path.display(), rows = table.len(), "CSV loaded");
    Ok(table)
}

/// Normalizes the errands table: decodes `order_number` from base36 into
/// `order_id` and validates the `created` timestamps.
pub fn process_errands(mut errands: Table) -> Result<Table> {
    if errands.has_column("order_number") {
        errands.rename_column("order_number", "order_id")?;
    }

    let decoded: Vec<Value> = errands
        .column("order_id")?
        .iter()
        .map(|v| match v {
            Value::Str(raw) => base36_to_decimal(raw).map(Value::Int),
            // digit-only identifiers are still base36 encoded
            Value::Int(n) => base36_to_decimal(&n.to_string()).map(Value::Int),
            other => Ok(other.clone()),
        })
        .collect::<error::Result<_>>()?;
    let mut errands = errands.drop_columns(&["order_id"]);
    errands.add_column("order_id", decoded)?;

    validate_datetime_column(&errands, "created")?;
    Ok(errands)
}

/// Normalizes the orders table: validates the `order_created_at` timestamps.
pub fn process_orders(orders: Table) -> Result<Table> {
    validate_datetime_column(&orders, "order_created_at")?;
    Ok(orders)
}

/// Adds a `count_errands` column to orders: the number of errand rows per
/// `order_id`, 0 for orders with no errands.
pub fn attach_errand_counts(errands: &Table, orders: Table) -> Result<Table> {
    info!("Computing errand counts per order");

    let mut counts: HashMap<String, i64> = HashMap::new();
    for value in errands.column("order_id")? {
        if !value.is_null() {
            *counts.entry(value.to_string()).or_insert(0) += 1;
        }
    }

    let count_column: Vec<Value> = orders
        .column("order_id")?
        .iter()
        .map(|v| Value::Int(*counts.get(&v.to_string()).unwrap_or(&0)))
        .collect();

    let mut orders = orders;
    orders.add_column("count_errands", count_column)?;
    Ok(orders)
}

fn sql_type(dtype: &str) -> &'static str {
    match dtype {
        "int" => "INTEGER",
        "float" => "REAL",
        "bool" => "BOOLEAN",
        _ => "TEXT",
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Str(v) => SqlValue::Text(v.clone()),
        Value::Bool(v) => SqlValue::Integer(*v as i64),
        Value::Null => SqlValue::Null,
    }
}

fn write_table(conn: &Connection, name: &str, table: &Table) -> Result<()> {
    let columns: Vec<String> = table
        .column_names()
        .iter()
        .map(|c| Ok(format!("{} {}", c, sql_type(table.dtype(c)?))))
        .collect::<error::Result<_>>()?;

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} ({});",
        columns.join(", ")
    ))?;

    let placeholders: Vec<String> = (1..=table.column_names().len())
        .map(|i| format!("?{}", i))
        .collect();
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        name,
        table.column_names().join(", "),
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&insert)?;
    for i in 0..table.len() {
        let row: Vec<SqlValue> = table.row(i).iter().map(to_sql_value).collect();
        stmt.execute(rusqlite::params_from_iter(row))?;
    }

    info!(table = name, rows = table.len(), "Table written");
    Ok(())
}

/// Builds the SQLite database from the raw errand and order CSV files.
pub fn build_database(
    errands_csv: &Path,
    orders_csv: &Path,
    database: &Path,
    subset: bool,
) -> Result<()> {
    info!(
        errands = %errands_csv.display(),
        orders = %orders_csv.display(),
        database = %database.display(),
        subset,
        "Building database"
    );

    let mut errands = read_csv_table(errands_csv)?;
    let mut orders = read_csv_table(orders_csv)?;

    if subset {
        info!(rows = SUBSET_ROWS, "Subset mode: truncating inputs");
        errands = errands.head(SUBSET_ROWS);
        orders = orders.head(SUBSET_ROWS);
    }

    let errands = process_errands(errands)?;
    let orders = process_orders(orders)?;
    let orders = attach_errand_counts(&errands, orders)?;

    if let Some(parent) = database.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(database)?;
    write_table(&conn, "errands", &errands)?;
    write_table(&conn, "orders", &orders)?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_errands_order_id ON errands (order_id);
         CREATE INDEX IF NOT EXISTS idx_orders_is_changed ON orders (is_changed);
         CREATE INDEX IF NOT EXISTS idx_orders_is_canceled ON orders (is_canceled);",
    )?;

    info!("Database build completed");
    Ok(())
}

fn read_table(conn: &Connection, name: &str, limit: Option<usize>) -> Result<Table> {
    let query = match limit {
        Some(n) => format!("SELECT * FROM {} LIMIT {}", name, n),
        None => format!("SELECT * FROM {}", name),
    };

    let mut stmt = conn.prepare(&query)?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut table =
        Table::with_columns(&column_names.iter().map(String::as_str).collect::<Vec<_>>());

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_names.len());
        for i in 0..column_names.len() {
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                rusqlite::types::ValueRef::Text(v) => {
                    Value::Str(String::from_utf8_lossy(v).into_owned())
                }
                rusqlite::types::ValueRef::Blob(v) => {
                    Value::Str(String::from_utf8_lossy(v).into_owned())
                }
            };
            values.push(value);
        }
        table.push_row(values)?;
    }

    Ok(table)
}

/// Loads the errands and orders tables back from the database, optionally
/// limiting the rows read per table.
pub fn load_tables(database: &Path, limits: Option<(usize, usize)>) -> Result<(Table, Table)> {
    let conn = Connection::open(database)?;
    let (limit_errands, limit_orders) = match limits {
        Some((e, o)) => (Some(e), Some(o)),
        None => (None, None),
    };

    let errands = read_table(&conn, "errands", limit_errands)?;
    let orders = read_table(&conn, "orders", limit_orders)?;

    info!(
        errands = errands.len(),
        orders = orders.len(),
        "Tables loaded"
    );
    Ok((errands, orders))
}
