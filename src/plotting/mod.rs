use textplots::{Chart, Plot, Shape};

use crate::catalog::days_between;
use crate::service::{format_date, format_number, SeriesPoint};

/// ASCII charts of per-country time series
pub struct SeriesPlotter;

impl SeriesPlotter {
    pub fn new() -> Self {
        Self
    }

    /// Plot one series as an ASCII line chart, one x step per reported date
    pub fn plot_series(&self, data: &[SeriesPoint], title: &str, width: Option<usize>, height: Option<usize>) -> String {
        let (Some(first), Some(last)) = (data.first(), data.last()) else {
            return format!("📊 No data available for {}", title);
        };

        let values: Vec<f64> = data.iter().map(|p| p.value).collect();
        let min_val = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max_val = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let avg_val = values.iter().sum::<f64>() / values.len() as f64;

        // Index-based x-axis keeps sparse (weekly) reporting evenly spaced
        let plot_data: Vec<(f32, f32)> = data
            .iter()
            .enumerate()
            .map(|(i, point)| (i as f32, point.value as f32))
            .collect();

        let chart_width = width.unwrap_or(80);
        let chart_height = height.unwrap_or(20);
        let x_max = (data.len().max(2) - 1) as f32;

        let mut output = String::new();
        output.push_str(&format!("📊 {}\n", title));
        output.push_str(&format!(
            "📈 Data Points: {} | Min: {} | Max: {} | Avg: {}\n",
            data.len(),
            format_number(Some(min_val)),
            format_number(Some(max_val)),
            format_number(Some(avg_val))
        ));
        output.push_str(&"─".repeat(chart_width));
        output.push('\n');

        let chart = Chart::new(chart_width as u32, chart_height as u32, 0.0, x_max)
            .lineplot(&Shape::Lines(&plot_data))
            .to_string();
        output.push_str(&chart);
        output.push('\n');

        output.push_str(&self.format_date_axis(&first.date, &last.date));
        output.push_str(&"─".repeat(chart_width));
        output
    }

    /// One chart per country, stacked, followed by the latest value of each
    pub fn plot_comparison(&self, series: &[(String, Vec<SeriesPoint>)], column: &str, width: Option<usize>, height: Option<usize>) -> String {
        if series.is_empty() {
            return "📊 No data available for plotting".to_string();
        }

        let names: Vec<&str> = series.iter().map(|(name, _)| name.as_str()).collect();
        let mut output = format!("📊 Comparison of {}: {}\n\n", column, names.join(", "));

        for (name, data) in series {
            output.push_str(&self.plot_series(data, &format!("{} - {}", name, column), width, height));
            output.push_str("\n\n");
        }

        output.push_str("Latest values:\n");
        for (name, data) in series {
            let latest = data.last();
            output.push_str(&format!(
                "  {:<24} {:>14}  {}\n",
                name,
                format_number(latest.map(|p| p.value)),
                latest.map(|p| format_date(&p.date)).unwrap_or_default()
            ));
        }
        output
    }

    /// Get appropriate plot dimensions based on terminal size
    pub fn get_optimal_dimensions(&self) -> (usize, usize) {
        match crossterm::terminal::size() {
            Ok((cols, rows)) => {
                let width = (cols as usize).clamp(60, 120);
                let height = (rows as usize / 3).clamp(15, 30);
                (width, height)
            }
            Err(_) => (80, 20),
        }
    }

    fn format_date_axis(&self, start: &str, end: &str) -> String {
        let span = days_between(start, end).unwrap_or(0);
        format!(
            "📍 Dates: {} ──────── {} ({} days, evenly spaced data points)\n",
            format_date(start),
            format_date(end),
            span
        )
    }
}

impl Default for SeriesPlotter {
    fn default() -> Self {
        Self::new()
    }
}

/// Text histogram of a value distribution
pub fn create_value_histogram(values: &[f64], bins: usize) -> String {
    if values.is_empty() || bins == 0 {
        return "No data for histogram".to_string();
    }

    let min_val = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_val = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    if min_val == max_val {
        return format!("All values are {}", format_number(Some(min_val)));
    }

    let bin_width = (max_val - min_val) / bins as f64;
    let mut histogram = vec![0usize; bins];

    for &value in values {
        let bin_index = (((value - min_val) / bin_width).floor() as usize).min(bins - 1);
        histogram[bin_index] += 1;
    }

    let max_count = histogram.iter().copied().max().unwrap_or(1).max(1);

    let mut output = String::from("📊 Value Distribution:\n");
    for (i, &count) in histogram.iter().enumerate() {
        let bin_start = min_val + i as f64 * bin_width;
        let bin_end = bin_start + bin_width;
        let bar = "█".repeat((count * 20) / max_count);
        output.push_str(&format!(
            "  {}-{}: {} ({})\n",
            format_number(Some(bin_start)),
            format_number(Some(bin_end)),
            bar,
            count
        ));
    }
    output
}
