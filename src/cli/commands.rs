use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::cli::interactive::GlobeExplorer;
use crate::config::ServiceConfig;
use crate::loader::DataSource;
use crate::monitoring::ResourceMonitor;
use crate::plotting::{create_value_histogram, SeriesPlotter};
use crate::progress::PipelineProgress;
use crate::search::CountrySearch;
use crate::service::{format_date, format_number, DataService, LoadReport, Query};

/// Where to load the four tables from; built-in sample data when nothing is given.
#[derive(Args, Clone, Debug)]
pub struct SourceArgs {
    /// Directory holding the published CSV files
    #[arg(long, conflicts_with = "url")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of a server exposing the CSV endpoints
    #[arg(long)]
    pub url: Option<String>,

    /// Epidemiology CSV; the four file options go together
    #[arg(long, requires_all = ["hospitalizations", "vaccinations", "country_index"])]
    pub epidem: Option<PathBuf>,

    /// Hospitalizations CSV
    #[arg(long, requires_all = ["epidem", "vaccinations", "country_index"])]
    pub hospitalizations: Option<PathBuf>,

    /// Vaccinations CSV
    #[arg(long, requires_all = ["epidem", "hospitalizations", "country_index"])]
    pub vaccinations: Option<PathBuf>,

    /// Country index CSV
    #[arg(long, requires_all = ["epidem", "hospitalizations", "vaccinations"])]
    pub country_index: Option<PathBuf>,

    /// YAML file overriding pipeline settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl SourceArgs {
    pub fn source(&self) -> DataSource {
        if let (Some(epidemiology), Some(hospitalizations), Some(vaccinations), Some(country_index)) = (
            &self.epidem,
            &self.hospitalizations,
            &self.vaccinations,
            &self.country_index,
        ) {
            return DataSource::Files {
                epidemiology: epidemiology.clone(),
                hospitalizations: hospitalizations.clone(),
                vaccinations: vaccinations.clone(),
                country_index: country_index.clone(),
            };
        }
        if let Some(dir) = &self.data_dir {
            return DataSource::Directory(dir.clone());
        }
        if let Some(url) = &self.url {
            return DataSource::Http(url.clone());
        }
        DataSource::Sample
    }

    pub fn service_config(&self) -> Result<ServiceConfig> {
        match &self.config {
            Some(path) => ServiceConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to read config {}", path.display())),
            None => Ok(ServiceConfig::default()),
        }
    }

    /// Build a service and run the full load pipeline
    pub async fn load(&self, progress: PipelineProgress) -> Result<(DataService, LoadReport)> {
        let mut service = DataService::new(self.service_config()?).with_progress(progress);
        let source = self.source();
        let report = service
            .load_all(&source)
            .await
            .with_context(|| format!("Failed to load data from {}", source.describe()))?;
        Ok((service, report))
    }
}

/// Dataset, date and column to select after loading
#[derive(Args, Clone, Debug)]
pub struct SelectionArgs {
    /// Dataset: epidem, hospitalizations or vaccinations
    #[arg(short, long)]
    pub dataset: Option<String>,

    /// Date (YYYY-MM-DD); defaults to the latest available date
    #[arg(long)]
    pub date: Option<String>,

    /// Value column; defaults to the dataset's primary column
    #[arg(long)]
    pub column: Option<String>,
}

impl SelectionArgs {
    pub fn apply(&self, service: &mut DataService) -> Result<()> {
        if let Some(dataset) = &self.dataset {
            service
                .change_dataset(dataset)
                .ok_or_else(|| anyhow!("Unknown dataset '{}'", dataset))?;
        }
        if let Some(date) = &self.date {
            if !service.change_date(date) {
                bail!("Date {} is not among the available dates", date);
            }
        }
        if let Some(column) = &self.column {
            if !service.change_column(column) {
                bail!("Column '{}' is not available for the selected dataset", column);
            }
        }
        Ok(())
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

fn loaded_query(service: &DataService) -> Result<Query<'_>> {
    service.query().ok_or_else(|| anyhow!("No data loaded"))
}

/// Accept a display name, a key, or a fuzzy name and return the country key
fn resolve_country(query: &Query<'_>, input: &str) -> Result<String> {
    if let Some(key) = query.country_key_from_name(input) {
        return Ok(key.to_string());
    }
    if let Some(entry) = query
        .all_countries()
        .iter()
        .find(|e| e.country_key.eq_ignore_ascii_case(input))
    {
        return Ok(entry.country_key.clone());
    }
    let summary = CountrySearch::new(query.all_countries()).search(input, 1);
    match summary.results.into_iter().next() {
        Some(best) => {
            info!("Resolved '{}' to {} ({})", input, best.country_name, best.country_key);
            Ok(best.country_key)
        }
        None => bail!("No country matches '{}'", input),
    }
}

fn selection_label(query: &Query<'_>) -> String {
    let state = query.state();
    format!(
        "{} / {} / {}",
        state.dataset.display_name(),
        state.column.as_deref().unwrap_or("-"),
        state.date.as_deref().map(format_date).unwrap_or_else(|| "-".to_string())
    )
}

#[derive(Args)]
pub struct LoadCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Log memory and CPU usage around the load
    #[arg(long)]
    pub monitor: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", help = "Output format: table, json, or csv")]
    pub format: OutputFormat,
}

impl LoadCommand {
    pub async fn execute(self) -> Result<()> {
        let source = self.source.source();
        info!("🚀 Loading data from {}", source.describe());

        let monitor = self.monitor.then(ResourceMonitor::new);
        if let Some(monitor) = &monitor {
            monitor.log_system_summary("before_load");
        }
        let operation = monitor.as_ref().map(|m| m.start_operation("load"));

        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} columns {msg}")?
                .progress_chars("##-"),
        );
        let progress = PipelineProgress::new().with_progress_bar(bar);

        let (service, report) = self.source.load(progress).await?;
        info!("Pipeline finished after {}", service.progress().elapsed_time());

        if let (Some(monitor), Some(operation)) = (&monitor, operation) {
            let metrics = monitor.finish_operation(operation);
            if let Some(delta) = metrics.memory_delta_mb() {
                info!(
                    "📈 Memory delta over load: {:+} MB for {} records and {} colors",
                    delta, report.indexed_records, report.cached_colors
                );
            }
            if metrics.after.is_some_and(|after| after.memory_pressure() > 0.9) {
                warn!("⚠️  System memory is over 90% used");
            }
        }

        match self.format {
            OutputFormat::Table => print_load_report(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Csv => {
                println!("range,min,max,original_max,q1,q3,samples,capped");
                for (name, range) in &report.ranges {
                    println!(
                        "{},{},{},{},{},{},{},{}",
                        name,
                        range.min,
                        range.max,
                        range.original_max,
                        range.q1,
                        range.q3,
                        range.samples,
                        range.is_capped()
                    );
                }
            }
        }
        Ok(())
    }
}

fn print_load_report(report: &LoadReport) {
    println!("\n🎉 Load {} completed!", report.run_id);
    match (report.dates.first(), report.dates.last()) {
        (Some(first), Some(last)) => println!(
            "📅 Dates: {} ({} to {})",
            report.dates.len(),
            format_date(first),
            format_date(last)
        ),
        _ => println!("📅 Dates: none passed the filters"),
    }
    println!("🌍 Countries: {}", report.countries);
    for summary in &report.ingested {
        println!(
            "📂 {}: {} records, {} missing fields, country field {}",
            summary.dataset.display_name(),
            summary.records,
            summary.missing_fields,
            summary.country_field.as_deref().unwrap_or("-")
        );
    }
    for (dataset, columns) in &report.columns {
        println!("📊 {} columns: {}", dataset.display_name(), columns.join(", "));
    }
    println!("📈 Records indexed: {}", report.indexed_records);
    println!("🎨 Colors cached: {}", report.cached_colors);
    let capped = report.ranges.values().filter(|r| r.is_capped()).count();
    println!("✂️  Ranges capped at the outlier fence: {}/{}", capped, report.ranges.len());
    println!("⏱️  Processing time: {}", humanize_millis(report.elapsed_ms));
}

#[derive(Args)]
pub struct QueryCommand {
    /// Country name or key
    pub country: String,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(short, long, value_enum, default_value = "table", help = "Output format: table, json, or csv")]
    pub format: OutputFormat,
}

impl QueryCommand {
    pub async fn execute(self) -> Result<()> {
        let (mut service, _) = self.source.load(PipelineProgress::new()).await?;
        self.selection.apply(&mut service)?;
        let query = loaded_query(&service)?;

        let key = resolve_country(&query, &self.country)?;
        let data = query.country_data(&key);
        let value = query.value(&key);
        let color = query.color(&key);

        match self.format {
            OutputFormat::Table => {
                println!("\n{} ({})", query.country_name(&key), key);
                println!("{:-<60}", "");
                println!("Selection: {}", selection_label(&query));
                println!("Value: {}", format_number(Some(value)));
                println!("Color: {}", color);
                match &data {
                    Some(data) => {
                        if data.substituted {
                            println!("Reported on: {} (nearest to {})", format_date(&data.date), format_date(&data.requested_date));
                        }
                        println!("{:-<60}", "");
                        for (column, raw) in &data.values {
                            println!("{:<36} {:>20}", column, format_number(crate::store::parse_value(raw)));
                        }
                    }
                    None => println!("No data for this country in the selected dataset"),
                }
            }
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "country_key": key,
                    "value": value,
                    "color": color,
                    "data": data,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Csv => {
                println!("country_key,date,value,color");
                let date = data.as_ref().map(|d| d.date.as_str()).unwrap_or("");
                println!("{},{},{},\"{}\"", key, date, value, color);
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct CountriesCommand {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Limit number of rows
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    #[arg(short, long, value_enum, default_value = "table", help = "Output format: table, json, or csv")]
    pub format: OutputFormat,
}

impl CountriesCommand {
    pub async fn execute(self) -> Result<()> {
        let (mut service, _) = self.source.load(PipelineProgress::new()).await?;
        self.selection.apply(&mut service)?;
        let query = loaded_query(&service)?;
        let column = query.state().column.clone().unwrap_or_default();

        let mut rows = query.all_countries_for_current_date();
        rows.sort_by(|a, b| {
            let a = a.value(&column).unwrap_or(0.0);
            let b = b.value(&column).unwrap_or(0.0);
            b.total_cmp(&a)
        });
        let total = rows.len();
        rows.truncate(self.limit);

        match self.format {
            OutputFormat::Table => {
                println!("\n{} ({} countries reporting)", selection_label(&query), total);
                println!("{:-<80}", "");
                for row in &rows {
                    println!(
                        "{:<6} {:<32} {:>16}  {}",
                        row.country_key,
                        row.country_name,
                        format_number(row.value(&column)),
                        query.color(&row.country_key)
                    );
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            OutputFormat::Csv => {
                println!("country_key,country_name,date,value,color");
                for row in &rows {
                    println!(
                        "{},\"{}\",{},{},\"{}\"",
                        row.country_key,
                        row.country_name,
                        row.date,
                        row.value(&column).map(|v| v.to_string()).unwrap_or_default(),
                        query.color(&row.country_key)
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct SearchCommand {
    /// Search query (fuzzy search across country names and keys)
    #[arg(help = "Search term to find countries (supports partial matches)")]
    pub query: String,

    /// Limit number of results
    #[arg(short, long, default_value = "10", help = "Maximum number of results to return")]
    pub limit: usize,

    #[command(flatten)]
    pub source: SourceArgs,

    #[arg(short, long, value_enum, default_value = "table", help = "Output format: table, json, or csv")]
    pub format: OutputFormat,
}

impl SearchCommand {
    pub async fn execute(self) -> Result<()> {
        info!("Searching for: '{}'", self.query);
        let (service, _) = self.source.load(PipelineProgress::new()).await?;
        let query = loaded_query(&service)?;
        let search = CountrySearch::new(query.all_countries());
        let results = search.search(&self.query, self.limit);

        match self.format {
            OutputFormat::Table => {
                println!("\nSearch Results ({} found in {}ms):", results.total_results, results.search_time_ms);
                println!("{:-<80}", "");
                for result in &results.results {
                    println!("Country: {} ({})", result.country_name, result.country_key);
                    println!("Matched: {}", result.match_reasons.join(", "));
                    println!("Value: {}", format_number(Some(query.value(&result.country_key))));
                    println!("{:-<80}", "");
                }
                if results.results.is_empty() {
                    let suggestions = search.suggestions(&self.query, 5);
                    if !suggestions.is_empty() {
                        println!("Did you mean: {}", suggestions.join(", "));
                    }
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            OutputFormat::Csv => {
                println!("country_key,country_name,score");
                for result in &results.results {
                    println!("{},\"{}\",{}", result.country_key, result.country_name, result.score);
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct SeriesCommand {
    /// Country name or key
    pub country: String,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Also print a histogram of the values
    #[arg(long)]
    pub histogram: bool,

    #[arg(short, long, value_enum, default_value = "table", help = "Output format: table, json, or csv")]
    pub format: OutputFormat,
}

impl SeriesCommand {
    pub async fn execute(self) -> Result<()> {
        let (mut service, _) = self.source.load(PipelineProgress::new()).await?;
        self.selection.apply(&mut service)?;
        let query = loaded_query(&service)?;

        let key = resolve_country(&query, &self.country)?;
        let column = query
            .state()
            .column
            .clone()
            .ok_or_else(|| anyhow!("The selected dataset has no value columns"))?;
        let series = query.country_series(&key, &column);

        match self.format {
            OutputFormat::Table => {
                let plotter = SeriesPlotter::new();
                let (width, height) = plotter.get_optimal_dimensions();
                let title = format!("{} - {} ({})", query.country_name(&key), column, query.state().dataset.display_name());
                println!("{}", plotter.plot_series(&series, &title, Some(width), Some(height)));
                if self.histogram {
                    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
                    println!("\n{}", create_value_histogram(&values, 10));
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&series)?),
            OutputFormat::Csv => {
                println!("date,{}", column);
                for point in &series {
                    println!("{},{}", point.date, point.value);
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct CompareCommand {
    /// Country names or keys
    #[arg(required = true, num_args = 2..)]
    pub countries: Vec<String>,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Plot each country's series below the table
    #[arg(long)]
    pub plot: bool,

    #[arg(short, long, value_enum, default_value = "table", help = "Output format: table, json, or csv")]
    pub format: OutputFormat,
}

impl CompareCommand {
    pub async fn execute(self) -> Result<()> {
        let (mut service, _) = self.source.load(PipelineProgress::new()).await?;
        self.selection.apply(&mut service)?;
        let query = loaded_query(&service)?;

        let keys = self
            .countries
            .iter()
            .map(|c| resolve_country(&query, c))
            .collect::<Result<Vec<_>>>()?;
        let rows = query.compare(&keys);
        let column = query.state().column.clone().unwrap_or_default();

        match self.format {
            OutputFormat::Table => {
                println!("\n{}", selection_label(&query));
                println!("{:-<80}", "");
                for row in &rows {
                    let note = if row.substituted {
                        format!(" (from {})", format_date(&row.date))
                    } else {
                        String::new()
                    };
                    println!(
                        "{:<32} {:>16}  {}{}",
                        row.country_name,
                        format_number(row.value(&column)),
                        query.color(&row.country_key),
                        note
                    );
                }
                let missing = keys.len() - rows.len();
                if missing > 0 {
                    println!("{} of the requested countries have no data in this dataset", missing);
                }
                if self.plot {
                    let series: Vec<_> = rows
                        .iter()
                        .map(|row| (row.country_name.clone(), query.country_series(&row.country_key, &column)))
                        .collect();
                    let plotter = SeriesPlotter::new();
                    let (width, _) = plotter.get_optimal_dimensions();
                    println!("\n{}", plotter.plot_comparison(&series, &column, Some(width), Some(12)));
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            OutputFormat::Csv => {
                println!("country_key,country_name,date,requested_date,value");
                for row in &rows {
                    println!(
                        "{},\"{}\",{},{},{}",
                        row.country_key,
                        row.country_name,
                        row.date,
                        row.requested_date,
                        row.value(&column).map(|v| v.to_string()).unwrap_or_default()
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct ExploreCommand {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub source: SourceArgs,
}

impl ExploreCommand {
    pub async fn execute(self) -> Result<()> {
        let (mut service, report) = self.source.load(PipelineProgress::new()).await?;
        self.selection.apply(&mut service)?;
        info!("Opening explorer over {} countries and {} dates", report.countries, report.dates.len());
        GlobeExplorer::new(service).run().await
    }
}

fn humanize_millis(millis: u128) -> String {
    if millis < 1000 {
        return format!("{}ms", millis);
    }
    let total_seconds = (millis / 1000) as u64;
    if total_seconds < 60 {
        format!("{}.{}s", total_seconds, (millis % 1000) / 100)
    } else if total_seconds < 3600 {
        format!("{}m {}s", total_seconds / 60, total_seconds % 60)
    } else {
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        format!("{}h {}m", hours, minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::sample_tables;

    #[test]
    fn test_humanize_millis() {
        assert_eq!(humanize_millis(250), "250ms");
        assert_eq!(humanize_millis(1500), "1.5s");
        assert_eq!(humanize_millis(125_000), "2m 5s");
        assert_eq!(humanize_millis(7_500_000), "2h 5m");
    }

    #[test]
    fn test_source_defaults_to_sample() {
        let args = SourceArgs {
            data_dir: None,
            url: None,
            epidem: None,
            hospitalizations: None,
            vaccinations: None,
            country_index: None,
            config: None,
        };
        assert_eq!(args.source(), DataSource::Sample);

        let args = SourceArgs {
            data_dir: Some(PathBuf::from("/data")),
            ..args
        };
        assert_eq!(args.source(), DataSource::Directory(PathBuf::from("/data")));
    }

    #[derive(clap::Parser, Debug)]
    struct SourceCli {
        #[command(flatten)]
        source: SourceArgs,
    }

    #[test]
    fn test_file_options_must_come_together() {
        use clap::Parser;

        assert!(SourceCli::try_parse_from(["globe-stats", "--vaccinations", "v.csv"]).is_err());
        assert!(SourceCli::try_parse_from(["globe-stats", "--epidem", "e.csv", "--hospitalizations", "h.csv"]).is_err());

        let cli = SourceCli::try_parse_from([
            "globe-stats",
            "--epidem",
            "e.csv",
            "--hospitalizations",
            "h.csv",
            "--vaccinations",
            "v.csv",
            "--country-index",
            "i.csv",
        ])
        .unwrap();
        assert!(matches!(cli.source.source(), DataSource::Files { .. }));

        let cli = SourceCli::try_parse_from(["globe-stats"]).unwrap();
        assert_eq!(cli.source.source(), DataSource::Sample);
    }

    #[tokio::test]
    async fn test_resolve_country_by_name_key_and_fuzzy() {
        let mut service = DataService::new(ServiceConfig::default());
        service.load_tables(sample_tables()).await.unwrap();
        let query = service.query().unwrap();

        let entry = query.all_countries()[0].clone();
        assert_eq!(resolve_country(&query, &entry.country_name).unwrap(), entry.country_key);
        assert_eq!(
            resolve_country(&query, &entry.country_key.to_uppercase()).unwrap(),
            entry.country_key
        );
        assert!(resolve_country(&query, "qqqqqqqqqq").is_err());
    }

    #[tokio::test]
    async fn test_selection_rejects_unknown_values() {
        let mut service = DataService::new(ServiceConfig::default());
        service.load_tables(sample_tables()).await.unwrap();

        let bad_dataset = SelectionArgs { dataset: Some("weather".into()), date: None, column: None };
        assert!(bad_dataset.apply(&mut service).is_err());

        let bad_date = SelectionArgs { dataset: None, date: Some("1999-01-01".into()), column: None };
        assert!(bad_date.apply(&mut service).is_err());

        let good = SelectionArgs { dataset: Some("vaccinations".into()), date: None, column: None };
        good.apply(&mut service).unwrap();
        assert_eq!(service.state().unwrap().dataset.as_str(), "vaccinations");
    }
}
