//! Report rendering: markdown tables and text distribution plots.
//!
//! The analyzers talk to a [`ReportSink`] so the same analysis can be
//! written to a file, to stdout, or captured in tests.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info};

use crate::analyzers::categorical::{ConcentrationMetrics, FrequencyRow};

/// Display options for a distribution plot.
#[derive(Debug, Clone)]
pub struct PlotConfig {
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
    /// Bars beyond this many categories are collapsed or dropped.
    pub max_categories: usize,
    /// Labels longer than this are elided.
    pub label_max_length: usize,
    /// Show values as percentages of the total.
    pub show_percentage: bool,
    /// Show values with two decimal places.
    pub show_decimals: bool,
    /// Collapse overflow categories into a single "Other" bar.
    pub show_other: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            title: String::new(),
            xlabel: String::new(),
            ylabel: "Count".to_string(),
            max_categories: 20,
            label_max_length: 16,
            show_percentage: false,
            show_decimals: false,
            show_other: true,
        }
    }
}

/// Sink the analyzers render their results into.
pub trait ReportSink {
    /// Appends raw markdown content.
    fn render_markdown(&mut self, content: &str) -> Result<()>;

    /// Appends a titled metrics block followed by a frequency table.
    fn render_table(
        &mut self,
        title: &str,
        metrics: &ConcentrationMetrics,
        rows: &[FrequencyRow],
    ) -> Result<()>;

    /// Appends a bar chart of the given (label, value) data.
    fn render_distribution_plot(&mut self, data: &[(String, f64)], config: &PlotConfig)
    -> Result<()>;
}

/// Logs concentration metrics as pretty-printed JSON.
pub fn print_json(metrics: &ConcentrationMetrics) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(metrics)?);
    Ok(())
}

/// Elides a label to at most `max_length` characters, ending in an ellipsis.
/// Tuple labels of the form `(a, b)` split the budget across their elements.
pub fn truncate_label(label: &str, max_length: usize) -> String {
    if let Some(inner) = label.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        if inner.contains(", ") {
            let parts: Vec<&str> = inner.split(", ").collect();
            let budget = (max_length / parts.len()).max(4);
            let truncated: Vec<String> = parts
                .iter()
                .map(|part| truncate_single(part, budget))
                .collect();
            return format!("({})", truncated.join(", "));
        }
    }
    truncate_single(label, max_length)
}

fn truncate_single(label: &str, max_length: usize) -> String {
    let chars: Vec<char> = label.chars().collect();
    if chars.len() <= max_length || max_length < 4 {
        return label.to_string();
    }
    let mut out: String = chars[..max_length - 1].iter().collect();
    out.push('…');
    out
}

/// Markdown report writer. Plots are rendered as fenced text bar charts.
pub struct MarkdownReport {
    out: Box<dyn Write>,
}

impl MarkdownReport {
    pub fn to_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Opening report file");
        Ok(MarkdownReport {
            out: Box::new(File::create(path)?),
        })
    }

    pub fn stdout() -> Self {
        MarkdownReport {
            out: Box::new(std::io::stdout()),
        }
    }
}

impl ReportSink for MarkdownReport {
    fn render_markdown(&mut self, content: &str) -> Result<()> {
        writeln!(self.out, "{}", content)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn render_table(
        &mut self,
        title: &str,
        metrics: &ConcentrationMetrics,
        rows: &[FrequencyRow],
    ) -> Result<()> {
        let mut report = format!(
            "#### {}\n\n\
             - **Unique Categories:** {}\n\
             - **Gini Coefficient:** {}\n\
             - **Top Categories (abs/rel):** {} / {}\n\n\
             | Category | Count | Ratio |\n\
             |----------|-------|-------|\n",
            title, metrics.unique, metrics.gini_coef, metrics.abs_top_cat, metrics.rel_top_cat
        );
        for row in rows {
            match row {
                FrequencyRow::Entry {
                    category,
                    count,
                    ratio,
                } => {
                    report.push_str(&format!("| {} | {} | {} |\n", category, count, ratio));
                }
                FrequencyRow::Separator => report.push_str("| ... | ... | ... |\n"),
            }
        }
        self.render_markdown(&report)
    }

    fn render_distribution_plot(
        &mut self,
        data: &[(String, f64)],
        config: &PlotConfig,
    ) -> Result<()> {
        let chart = text_bar_chart(data, config);
        self.render_markdown(&chart)
    }
}

const BAR_WIDTH: usize = 40;

/// Renders (label, value) data as a fenced text bar chart.
fn text_bar_chart(data: &[(String, f64)], config: &PlotConfig) -> String {
    let mut data: Vec<(String, f64)> = data.to_vec();

    // Collapse the tail into "Other" (or drop it) past max_categories
    if data.len() > config.max_categories {
        let overflow: f64 = data[config.max_categories - 1..].iter().map(|(_, v)| v).sum();
        data.truncate(config.max_categories - 1);
        if config.show_other {
            data.push(("Other".to_string(), overflow));
        }
    }

    let total: f64 = data.iter().map(|(_, v)| v).sum();
    if config.show_percentage && total > 0.0 {
        for (_, v) in &mut data {
            *v = *v / total * 100.0;
        }
    }

    let labels: Vec<String> = data
        .iter()
        .map(|(label, _)| truncate_label(label, config.label_max_length))
        .collect();
    let label_width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let max_value = data.iter().map(|(_, v)| *v).fold(0.0, f64::max);

    let mut chart = format!("```text\n{} (Total: {:.0})\n", config.title, total);
    for ((_, value), label) in data.iter().zip(&labels) {
        let bar_len = if max_value > 0.0 {
            ((value / max_value) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let rendered_value = if config.show_percentage || config.show_decimals {
            format!("{:.2}", value)
        } else {
            format!("{:.0}", value)
        };
        chart.push_str(&format!(
            "{:<width$} | {} {}\n",
            label,
            "#".repeat(bar_len),
            rendered_value,
            width = label_width
        ));
    }
    chart.push_str(&format!("x: {}  y: {}\n```", config.xlabel, config.ylabel));
    chart
}

/// Sink that records everything it is given. Used in tests.
#[derive(Default)]
pub struct RecordingSink {
    pub markdown: Vec<String>,
    pub tables: Vec<(String, ConcentrationMetrics, Vec<FrequencyRow>)>,
    pub plots: Vec<(String, Vec<(String, f64)>)>,
}

impl ReportSink for RecordingSink {
    fn render_markdown(&mut self, content: &str) -> Result<()> {
        self.markdown.push(content.to_string());
        Ok(())
    }

    fn render_table(
        &mut self,
        title: &str,
        metrics: &ConcentrationMetrics,
        rows: &[FrequencyRow],
    ) -> Result<()> {
        self.tables
            .push((title.to_string(), metrics.clone(), rows.to_vec()));
        Ok(())
    }

    fn render_distribution_plot(
        &mut self,
        data: &[(String, f64)],
        config: &PlotConfig,
    ) -> Result<()> {
        self.plots.push((config.title.clone(), data.to_vec()));
        Ok(())
    }
}
