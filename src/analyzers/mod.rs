//! Statistical analysis of tabular errand/order data.
//!
//! This module computes frequency tables, concentration metrics, and
//! descriptive statistics with outlier flags, and renders them through a
//! [`crate::report::ReportSink`].

pub mod categorical;
pub mod contacts;
pub mod utility;

use std::fmt::Write as _;

use anyhow::Result;
use tracing::info;

use crate::report::ReportSink;
use crate::table::Table;

/// Renders the dataset summary header: row/column totals plus one line per
/// column with its type and whether it is excluded from or dependent in the
/// analysis.
pub fn dataset_summary(
    table: &Table,
    exclude_columns: &[&str],
    dependencies: &[(&str, &str)],
    sink: &mut dyn ReportSink,
) -> Result<()> {
    let mut report = format!(
        "### Dataset Summary\n\n- Total Rows: {}\n- Total Columns: {}\n\n",
        table.len(),
        table.column_names().len()
    );
    report.push_str("| Column Name | Type | Excluded | Dependent |\n");
    report.push_str("|-------------|------|----------|-----------|\n");
    for name in table.column_names() {
        let excluded = exclude_columns.contains(&name.as_str());
        let dependent = dependencies.iter().any(|(_, dep)| *dep == name.as_str());
        let _ = writeln!(
            report,
            "| {} | {} | {} | {} |",
            name,
            table.dtype(name)?,
            excluded,
            dependent
        );
    }
    sink.render_markdown(&report)?;
    Ok(())
}

/// Renders descriptive statistics for every numeric column.
pub fn numerical_summary(table: &Table, sink: &mut dyn ReportSink) -> Result<()> {
    let mut report = String::from(
        "#### Numerical Summary\n\n\
         | Column | Count | Mean | Std | Min | 25% | 50% | 75% | Max |\n\
         |--------|-------|------|-----|-----|-----|-----|-----|-----|\n",
    );
    for name in table.column_names() {
        if !matches!(table.dtype(name)?, "int" | "float") {
            continue;
        }
        let stats = contacts::DescriptiveStats::from_series(table.numeric_column(name)?);
        let _ = writeln!(
            report,
            "| {} | {} | {:.4} | {:.4} | {} | {} | {} | {} | {} |",
            name,
            stats.count,
            stats.mean,
            stats.std_dev,
            stats.min,
            stats.p25,
            stats.median,
            stats.p75,
            stats.max
        );
    }
    sink.render_markdown(&report)?;
    Ok(())
}

/// Full table analysis: summary header, numerical summary, per-column
/// categorical analysis (skipping excluded and dependent columns), and
/// dependency analysis for each configured column pair.
pub fn analyze_table(
    table: &Table,
    exclude_columns: &[&str],
    dependencies: &[(&str, &str)],
    sink: &mut dyn ReportSink,
) -> Result<()> {
    info!(
        rows = table.len(),
        columns = table.column_names().len(),
        "Analyzing table"
    );

    dataset_summary(table, exclude_columns, dependencies, sink)?;

    let table = table.drop_columns(exclude_columns);

    numerical_summary(&table, sink)?;

    let dependent_columns: Vec<&str> = dependencies.iter().map(|(_, dep)| *dep).collect();
    for name in table.column_names() {
        if table.dtype(name)? == "str" && !dependent_columns.contains(&name.as_str()) {
            categorical::analyze_column(&table, name, sink)?;
        }
    }

    for (main_col, dep_col) in dependencies {
        categorical::analyze_dependency(&table, main_col, dep_col, sink)?;
    }

    Ok(())
}
