//! Categorical distribution analysis.
//!
//! Quantifies the distribution of one categorical column, or the joint
//! distribution of two (as a row-wise tuple), computing frequency tables,
//! concentration metrics, and stratified breakdowns.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzers::utility::round_to;
use crate::error::{self, AnalysisError};
use crate::report::{PlotConfig, ReportSink};
use crate::table::Table;

/// Number of top/bottom rows kept when a frequency table is truncated for
/// display.
pub const DISPLAY_TOP_N: i64 = 5;
pub const DISPLAY_BOTTOM_N: i64 = 5;

/// One row of a (possibly truncated) frequency table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FrequencyRow {
    Entry {
        category: String,
        count: u64,
        ratio: f64,
    },
    /// Literal "..." row between the top and bottom slices.
    Separator,
}

/// Concentration metrics for a categorical distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcentrationMetrics {
    /// Number of distinct categories.
    pub unique: usize,
    /// 1 minus the sum of squared category proportions, in [0, 1).
    pub gini_coef: f64,
    /// Minimum number of top categories whose cumulative share reaches 80%.
    pub abs_top_cat: usize,
    /// `abs_top_cat` relative to the number of categories.
    pub rel_top_cat: f64,
}

impl ConcentrationMetrics {
    /// Zero-filled metrics for an empty distribution.
    fn empty() -> Self {
        ConcentrationMetrics {
            unique: 0,
            gini_coef: 0.0,
            abs_top_cat: 0,
            rel_top_cat: 0.0,
        }
    }
}

/// Builds the full frequency table for `counts`: one row per category with
/// its count and its ratio of the total, rounded to 4 decimals.
///
/// `counts` must already be ordered descending by count, as produced by
/// [`Table::value_counts`].
pub fn frequency_table(counts: &[(String, u64)]) -> Vec<FrequencyRow> {
    let total: u64 = counts.iter().map(|(_, c)| c).sum();
    counts
        .iter()
        .map(|(category, count)| FrequencyRow::Entry {
            category: category.clone(),
            count: *count,
            ratio: round_to(*count as f64 / total as f64, 4),
        })
        .collect()
}

/// Builds the display view of a frequency table.
///
/// If `top_n` and `bottom_n` are both given and positive, and the table has
/// more than `top_n + bottom_n + 1` rows, only the top and bottom slices are
/// kept with a separator row between them. Otherwise the full table is
/// returned.
///
/// # Errors
///
/// Fails with [`AnalysisError::InvalidArgument`] if `top_n` or `bottom_n` is
/// negative.
pub fn truncated_table(
    counts: &[(String, u64)],
    top_n: Option<i64>,
    bottom_n: Option<i64>,
) -> error::Result<Vec<FrequencyRow>> {
    for (name, value) in [("top_n", top_n), ("bottom_n", bottom_n)] {
        if let Some(v) = value {
            if v < 0 {
                return Err(AnalysisError::InvalidArgument(format!(
                    "{} must be non-negative, got {}",
                    name, v
                )));
            }
        }
    }

    let full = frequency_table(counts);

    if let (Some(top), Some(bottom)) = (top_n, bottom_n) {
        let (top, bottom) = (top as usize, bottom as usize);
        if top > 0 && bottom > 0 && full.len() > top + bottom + 1 {
            let mut out = Vec::with_capacity(top + bottom + 1);
            out.extend_from_slice(&full[..top]);
            out.push(FrequencyRow::Separator);
            out.extend_from_slice(&full[full.len() - bottom..]);
            return Ok(out);
        }
    }

    Ok(full)
}

/// Computes concentration metrics for a categorical distribution.
///
/// Empty input yields zero-filled metrics rather than an error.
pub fn concentration_metrics(counts: &[(String, u64)]) -> ConcentrationMetrics {
    let total: u64 = counts.iter().map(|(_, c)| c).sum();
    if counts.is_empty() || total == 0 {
        return ConcentrationMetrics::empty();
    }

    let proportions: Vec<f64> = counts
        .iter()
        .map(|(_, c)| *c as f64 / total as f64)
        .collect();

    let gini = 1.0 - proportions.iter().map(|p| p * p).sum::<f64>();

    // Categories needed to cover 80% of observations: the count of categories
    // whose cumulative share stays strictly below the 80% mass, plus one.
    // Integer comparison (cum * 5 < total * 4) keeps the exact-boundary case
    // out of the count regardless of float rounding. Always at least 1.
    let mut cumulative = 0u64;
    let within_mass = counts
        .iter()
        .filter(|(_, c)| {
            cumulative += *c;
            cumulative * 5 < total * 4
        })
        .count();
    let abs_top_cat = within_mass + 1;

    ConcentrationMetrics {
        unique: counts.len(),
        gini_coef: round_to(gini, 4),
        abs_top_cat,
        rel_top_cat: round_to(abs_top_cat as f64 / counts.len() as f64, 4),
    }
}

/// Analyzes a single categorical column: renders its truncated frequency
/// table, concentration metrics, and a distribution plot.
pub fn analyze_column(table: &Table, column: &str, sink: &mut dyn ReportSink) -> Result<()> {
    info!(column, "Processing categorical column");
    let counts = table.value_counts(column)?;
    let rows = truncated_table(&counts, Some(DISPLAY_TOP_N), Some(DISPLAY_BOTTOM_N))?;
    let metrics = concentration_metrics(&counts);

    sink.render_table(&format!("Column: {}", column), &metrics, &rows)?;

    sink.render_distribution_plot(
        &to_plot_data(&counts),
        &PlotConfig {
            title: format!("{} Distribution", column),
            xlabel: column.to_string(),
            ..PlotConfig::default()
        },
    )?;

    Ok(())
}

/// Analyzes the dependency between two columns: first the joint distribution
/// of the row-wise tuple, then the dependent column stratified by every
/// distinct value of the main column.
///
/// Skips the pair entirely when either column is absent from the table.
pub fn analyze_dependency(
    table: &Table,
    main_col: &str,
    dep_col: &str,
    sink: &mut dyn ReportSink,
) -> Result<()> {
    if !table.has_column(main_col) || !table.has_column(dep_col) {
        debug!(main_col, dep_col, "Skipping dependency pair with missing column");
        return Ok(());
    }
    info!(main_col, dep_col, "Processing dependency");

    // Combined analysis
    let combined_counts = table.joint_value_counts(main_col, dep_col)?;
    let rows = truncated_table(&combined_counts, Some(DISPLAY_TOP_N), Some(DISPLAY_BOTTOM_N))?;
    let metrics = concentration_metrics(&combined_counts);

    sink.render_table(
        &format!("Combined Analysis: ({}, {})", main_col, dep_col),
        &metrics,
        &rows,
    )?;

    sink.render_distribution_plot(
        &to_plot_data(&combined_counts),
        &PlotConfig {
            title: format!("({}, {}) Distribution", main_col, dep_col),
            xlabel: format!("{} + {}", main_col, dep_col),
            ..PlotConfig::default()
        },
    )?;

    // Stratified analysis
    sink.render_markdown(&format!(
        "#### Stratified Analysis: {} by {}\n",
        dep_col, main_col
    ))?;
    for main_value in table.distinct(main_col)? {
        let subset = table.filter_eq(main_col, &main_value)?;
        let counts = subset.value_counts(dep_col)?;
        let rows = truncated_table(&counts, Some(DISPLAY_TOP_N), Some(DISPLAY_BOTTOM_N))?;
        let metrics = concentration_metrics(&counts);

        sink.render_table(&format!("{} = {}", main_col, main_value), &metrics, &rows)?;

        sink.render_distribution_plot(
            &to_plot_data(&counts),
            &PlotConfig {
                title: format!("{} Distribution for {} = {}", dep_col, main_col, main_value),
                xlabel: dep_col.to_string(),
                ..PlotConfig::default()
            },
        )?;
    }

    Ok(())
}

fn to_plot_data(counts: &[(String, u64)]) -> Vec<(String, f64)> {
    counts
        .iter()
        .map(|(label, count)| (label.clone(), *count as f64))
        .collect()
}
