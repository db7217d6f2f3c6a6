//! Descriptive statistics for the per-order errand count measure.
//!
//! Computes overall or stratified summaries, flags statistically anomalous
//! groups with two independent Z-score signals, and derives a fixed-bucket
//! percentage distribution vector per group.

use std::collections::HashSet;
use std::fmt::Write as _;

use anyhow::Result;
use tracing::info;

use crate::analyzers::utility::{mean, quantile, round_to, sample_stddev};
use crate::error;
use crate::report::{PlotConfig, ReportSink};
use crate::table::Table;

/// The numeric measure this analyzer summarizes.
pub const MEASURE_COLUMN: &str = "count_errands";

/// Key used for unstratified statistics.
pub const OVERALL_KEY: &str = "overall";

/// Z-score magnitude above which a group is flagged.
const OUTLIER_Z_THRESHOLD: f64 = 2.0;

/// Descriptive statistics for one numeric series.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptiveStats {
    /// Raw values the statistics were computed from.
    pub series: Vec<f64>,
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
}

impl DescriptiveStats {
    /// Computes the full statistics record for a series. An empty series
    /// yields a zero-filled record.
    pub fn from_series(series: Vec<f64>) -> Self {
        let count = series.len();
        let mean_value = mean(&series);
        let min = series.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        DescriptiveStats {
            count,
            mean: mean_value,
            std_dev: sample_stddev(&series, mean_value),
            min: if count == 0 { 0.0 } else { min },
            p25: quantile(&series, 0.25),
            median: quantile(&series, 0.5),
            p75: quantile(&series, 0.75),
            max: if count == 0 { 0.0 } else { max },
            series,
        }
    }
}

/// Statistics keyed by stratification group, in first-encountered group
/// order. Unstratified results hold a single entry keyed [`OVERALL_KEY`].
pub type StatsMap = Vec<(String, DescriptiveStats)>;

/// Restricts `table` to rows whose `filter_column` value is in
/// `filter_values`. Passes the table through unchanged unless both are given.
pub fn filter_rows(
    table: &Table,
    filter_column: Option<&str>,
    filter_values: Option<&HashSet<String>>,
) -> error::Result<Table> {
    match (filter_column, filter_values) {
        (Some(column), Some(values)) => table.filter_isin(column, values),
        _ => Ok(table.clone()),
    }
}

/// Computes descriptive statistics for the errand count measure.
///
/// Without `stratify_by`, returns one record keyed [`OVERALL_KEY`] over the
/// whole measure column. With it, partitions by every distinct value of the
/// stratification column and computes one record per group.
///
/// # Errors
///
/// Fails with [`crate::error::AnalysisError::MissingColumn`] when the measure
/// or stratification column is absent.
pub fn compute_stats(table: &Table, stratify_by: Option<&str>) -> error::Result<StatsMap> {
    match stratify_by {
        None => {
            let series = table.numeric_column(MEASURE_COLUMN)?;
            Ok(vec![(
                OVERALL_KEY.to_string(),
                DescriptiveStats::from_series(series),
            )])
        }
        Some(column) => {
            let mut out = StatsMap::new();
            for (group, subset) in table.partition_by(column)? {
                let series = subset.numeric_column(MEASURE_COLUMN)?;
                out.push((group, DescriptiveStats::from_series(series)));
            }
            Ok(out)
        }
    }
}

fn is_overall(stats: &StatsMap) -> bool {
    stats.len() == 1 && stats[0].0 == OVERALL_KEY
}

/// Z-score of `value` against a baseline mean and standard deviation.
/// A zero or negative baseline deviation yields 0 rather than a division
/// error.
fn z_score(value: f64, baseline_mean: f64, baseline_std: f64) -> f64 {
    if baseline_std > 0.0 {
        (value - baseline_mean) / baseline_std
    } else {
        0.0
    }
}

/// Fraction of a group's values falling in buckets 0, 1, 2, 3, 4, and 5+,
/// each rounded to 2 decimals.
pub fn percentage_vector(series: &[f64]) -> [f64; 6] {
    let mut vector = [0.0; 6];
    if series.is_empty() {
        return vector;
    }
    let total = series.len() as f64;
    for bucket in 0..5 {
        let hits = series.iter().filter(|v| **v == bucket as f64).count();
        vector[bucket] = round_to(hits as f64 / total, 2);
    }
    let overflow = series.iter().filter(|v| **v >= 5.0).count();
    vector[5] = round_to(overflow as f64 / total, 2);
    vector
}

/// Per-group mean values, used for the stratified bar plot.
pub fn group_means(stats: &StatsMap) -> Vec<(String, f64)> {
    stats
        .iter()
        .map(|(group, s)| (group.clone(), s.mean))
        .collect()
}

/// Renders the output of [`compute_stats`] as a markdown table.
///
/// Overall statistics become a two-column Metric/Value table. Stratified
/// statistics become one row per group, with two independent outlier flags:
/// a Z-score of the group mean against the unfiltered overall series, and a
/// Z-score against the other groups' means. Both are gated by a minimum group
/// size (the 25th percentile of all group counts) so tiny groups cannot
/// trigger false positives.
pub fn render_stats(
    stats: &StatsMap,
    overall_series: Option<&[f64]>,
    sink: &mut dyn ReportSink,
) -> Result<()> {
    if is_overall(stats) {
        sink.render_markdown(&overall_table(&stats[0].1))?;
        return Ok(());
    }
    sink.render_markdown(&stratified_table(stats, overall_series))?;
    Ok(())
}

fn overall_table(stats: &DescriptiveStats) -> String {
    let mut table = String::from(
        "### Overall Statistics\n\n\
         | Metric             | Value           |\n\
         |--------------------|-----------------|\n",
    );
    let rows: [(&str, String); 8] = [
        ("Count", stats.count.to_string()),
        ("Mean", stats.mean.to_string()),
        ("Std_dev", stats.std_dev.to_string()),
        ("Min", stats.min.to_string()),
        ("25th_percentile", stats.p25.to_string()),
        ("Median", stats.median.to_string()),
        ("75th_percentile", stats.p75.to_string()),
        ("Max", stats.max.to_string()),
    ];
    for (metric, value) in rows {
        let _ = writeln!(table, "| {} | {} |", metric, value);
    }
    table
}

fn stratified_table(stats: &StatsMap, overall_series: Option<&[f64]>) -> String {
    let overall_series = overall_series.unwrap_or(&[]);
    let overall_mean = mean(overall_series);
    let overall_std = sample_stddev(overall_series, overall_mean);

    // Small-group gate: groups below the 25th percentile of group counts
    // never get flagged.
    let all_counts: Vec<f64> = stats.iter().map(|(_, s)| s.count as f64).collect();
    let small_threshold = quantile(&all_counts, 0.25);

    let mut table = String::from(
        "### Stratified Statistics\n\n\
         | Group     | Count | Mean | StD | Min | 25% | 50% | 75% | Max | GlobOutlier | InGrpOutlier | Percentage Vector |\n\
         |-----------|-------|------|-----|-----|-----|-----|-----|-----|-------------|--------------|-------------------|\n",
    );

    for (group, group_stats) in stats {
        let large_enough = group_stats.count as f64 >= small_threshold;

        // Z-score of the group mean against the overall series
        let global_z = z_score(group_stats.mean, overall_mean, overall_std);
        let global_flag = if global_z.abs() > OUTLIER_Z_THRESHOLD && large_enough {
            "*"
        } else {
            ""
        };

        // Z-score against the other groups' means
        let other_means: Vec<f64> = stats
            .iter()
            .filter(|(other, _)| other != group)
            .map(|(_, s)| s.mean)
            .collect();
        let other_mean = mean(&other_means);
        let other_std = sample_stddev(&other_means, other_mean);
        let inter_group_z = z_score(group_stats.mean, other_mean, other_std);
        let inter_group_flag = if inter_group_z.abs() > OUTLIER_Z_THRESHOLD && large_enough {
            "*"
        } else {
            ""
        };

        let vector = percentage_vector(&group_stats.series)
            .iter()
            .map(|v| format!("{:.2}", v))
            .collect::<Vec<_>>()
            .join(" ");

        let _ = writeln!(
            table,
            "| {} | {} | {:.2} | {:.2} | {} | {} | {} | {} | {} | {} | {} | [{}] |",
            group,
            group_stats.count,
            group_stats.mean,
            group_stats.std_dev,
            group_stats.min,
            group_stats.p25,
            group_stats.median,
            group_stats.p75,
            group_stats.max,
            global_flag,
            inter_group_flag,
            vector,
        );
    }

    table
}

/// Runs the contact-statistics analysis end to end: overall summary, a
/// stratified breakdown with outlier flags, the binned distribution of the
/// measure, and a bar plot of group means.
pub fn analyze_contacts(
    table: &Table,
    stratify_by: &str,
    sink: &mut dyn ReportSink,
) -> Result<()> {
    info!(stratify_by, "Computing contact statistics");

    let overall = compute_stats(table, None)?;
    render_stats(&overall, None, sink)?;
    let overall_series = overall[0].1.series.clone();

    let stratified = compute_stats(table, Some(stratify_by))?;
    render_stats(&stratified, Some(&overall_series), sink)?;

    let buckets = percentage_vector(&overall_series);
    let bucket_data: Vec<(String, f64)> = ["0", "1", "2", "3", "4", "5+"]
        .iter()
        .zip(buckets)
        .map(|(label, share)| (label.to_string(), share))
        .collect();
    sink.render_distribution_plot(
        &bucket_data,
        &PlotConfig {
            title: format!("{} distribution", MEASURE_COLUMN),
            xlabel: MEASURE_COLUMN.to_string(),
            ylabel: "Share".to_string(),
            show_decimals: true,
            ..PlotConfig::default()
        },
    )?;

    sink.render_distribution_plot(
        &group_means(&stratified),
        &PlotConfig {
            title: format!("Mean {} by {}", MEASURE_COLUMN, stratify_by),
            xlabel: "Group".to_string(),
            ylabel: "Mean".to_string(),
            show_decimals: true,
            ..PlotConfig::default()
        },
    )?;

    Ok(())
}
