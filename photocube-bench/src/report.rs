//! Summaries, comparison tables, bar charts and CSV/JSON export of a
//! [`LatencyDataset`].

use crate::{BenchResult, Columns, LatencyDataset, LatencyRecorder};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Statistics for one `(query, category)` group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub query: String,
    pub category: String,
    pub count: usize,
    pub mean_ms: f64,
    /// Sample standard deviation; the error bar of the chart.
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
}

// ────────────────────────────────────────────────────────────────────────────────
// Aggregation
// ────────────────────────────────────────────────────────────────────────────────

/// Group observations by `(query, category)`, keeping first-seen order.
pub fn summarize(data: &LatencyDataset) -> BenchResult<Vec<GroupSummary>> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut groups: HashMap<(String, String), Vec<f64>> = HashMap::new();
    for o in data.observations() {
        let key = (o.query.clone(), o.category.clone());
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(o.latency_ms);
    }

    let mut summaries = Vec::with_capacity(order.len());
    for key in order {
        let samples = &groups[&key];
        let mut rec = LatencyRecorder::new()?;
        for &ms in samples {
            rec.record_ms(ms);
        }
        let count = samples.len();
        let mean_ms = samples.iter().sum::<f64>() / count as f64;
        let std_ms = if count > 1 {
            let var = samples.iter().map(|x| (x - mean_ms).powi(2)).sum::<f64>()
                / (count - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        summaries.push(GroupSummary {
            query: key.0,
            category: key.1,
            count,
            mean_ms,
            std_ms,
            min_ms: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: samples.iter().copied().fold(0.0, f64::max),
            p50_ms: rec.percentile_ms(50.0),
            p99_ms: rec.percentile_ms(99.0),
        });
    }
    Ok(summaries)
}

/// Query labels in first-seen order with their summaries.
fn by_query(summaries: &[GroupSummary]) -> Vec<(&str, Vec<&GroupSummary>)> {
    let mut out: Vec<(&str, Vec<&GroupSummary>)> = Vec::new();
    for s in summaries {
        match out.iter_mut().find(|(q, _)| *q == s.query) {
            Some((_, group)) => group.push(s),
            None => out.push((s.query.as_str(), vec![s])),
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────────
// Terminal output
// ────────────────────────────────────────────────────────────────────────────────

/// Print one comparison table per query label, fastest category starred.
pub fn print_report(title: &str, summaries: &[GroupSummary]) {
    println!(
        "\n{}",
        "╔══════════════════════════════════════════════════════════════╗"
            .bold()
            .blue()
    );
    for line in title.lines() {
        println!("  {}", line.bold().blue());
    }
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝"
            .bold()
            .blue()
    );

    for (query, group) in by_query(summaries) {
        println!("\n{}", format!("━━━ {} ━━━", query).bold().cyan());

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS);
        table.set_header(vec![
            "Category", "Trials", "Mean (ms)", "Std (ms)", "p50 (ms)", "p99 (ms)", "Min (ms)",
            "Max (ms)",
        ]);

        let best = group.iter().map(|s| s.mean_ms).fold(f64::INFINITY, f64::min);
        for s in &group {
            let is_best = group.len() > 1 && s.mean_ms == best;
            let (name, mean) = if is_best {
                (
                    Cell::new(format!("★ {}", s.category)).fg(Color::Green),
                    Cell::new(format!("{:.2}", s.mean_ms)).fg(Color::Green),
                )
            } else {
                (
                    Cell::new(&s.category),
                    Cell::new(format!("{:.2}", s.mean_ms)),
                )
            };
            table.add_row(vec![
                name,
                Cell::new(s.count),
                mean,
                Cell::new(format!("{:.2}", s.std_ms)),
                Cell::new(format!("{:.2}", s.p50_ms)),
                Cell::new(format!("{:.2}", s.p99_ms)),
                Cell::new(format!("{:.2}", s.min_ms)),
                Cell::new(format!("{:.2}", s.max_ms)),
            ]);
        }
        println!("{table}");
    }

    println!("\n{}", render_bar_chart(summaries, 40));
}

/// Horizontal bar chart of mean latency on a log scale, one bar per
/// category, grouped by query, with the mean and error bar printed per bar.
pub fn render_bar_chart(summaries: &[GroupSummary], width: usize) -> String {
    let top = summaries.iter().map(|s| s.mean_ms).fold(0.0f64, f64::max);
    let label_width = summaries
        .iter()
        .map(|s| s.category.chars().count())
        .max()
        .unwrap_or(0);
    let scale = (1.0 + top).ln();

    let mut out = String::from("Mean latency (ms), log scale\n");
    for (query, group) in by_query(summaries) {
        out.push_str(query);
        out.push('\n');
        for s in group {
            let len = if scale > 0.0 {
                (((1.0 + s.mean_ms).ln() / scale) * width as f64).round() as usize
            } else {
                0
            };
            out.push_str(&format!(
                "  {:<label_width$} │{:<width$}│ {:.1} ± {:.1}\n",
                s.category,
                "█".repeat(len.max(1)),
                s.mean_ms,
                s.std_ms,
            ));
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────────
// CSV export
// ────────────────────────────────────────────────────────────────────────────────

/// One row per observation: `query,latency_ms,category`.
pub fn export_csv(data: &LatencyDataset, path: &Path) -> std::io::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["query", "latency_ms", "category"])?;
    for o in data.observations() {
        wtr.write_record([&o.query, &format!("{:.6}", o.latency_ms), &o.category])?;
    }
    wtr.flush()?;
    println!("  CSV exported to {}", path.display());
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────────
// JSON export
// ────────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonReport<'a> {
    title: &'a str,
    results: Columns,
    summaries: &'a [GroupSummary],
}

pub fn export_json(
    title: &str,
    data: &LatencyDataset,
    summaries: &[GroupSummary],
    path: &Path,
) -> std::io::Result<()> {
    let report = JsonReport {
        title,
        results: data.export(),
        summaries,
    };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    std::fs::write(path, json)?;
    println!("  JSON exported to {}", path.display());
    Ok(())
}
