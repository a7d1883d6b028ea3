pub mod format;
pub mod query;
pub mod state;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::catalog::DateColumnCatalog;
use crate::color::ColorCache;
use crate::config::ServiceConfig;
use crate::countries::CountryIndex;
use crate::error::DataResult;
use crate::index::RecordIndex;
use crate::loader::{self, DataSource, SourceTables};
use crate::monitoring::Timer;
use crate::progress::PipelineProgress;
use crate::ranges::{GlobalRange, RangeAnalyzer};
use crate::scheduler::BatchScheduler;
use crate::store::{Dataset, IngestSummary, TabularStore};

pub use format::{format_date, format_number};
pub use query::{CountryData, Query, SeriesPoint};
pub use state::{DatasetSelection, ServiceState};

/// Everything one load produces. Immutable once built.
#[derive(Debug)]
pub struct LoadedData {
    pub run_id: Uuid,
    pub store: TabularStore,
    pub catalog: DateColumnCatalog,
    pub countries: CountryIndex,
    pub index: RecordIndex,
    pub ranges: RangeAnalyzer,
    pub colors: ColorCache,
    pub color_exponent: f64,
}

/// Outcome of a successful load, for display.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub dates: Vec<String>,
    pub columns: BTreeMap<Dataset, Vec<String>>,
    pub ingested: Vec<IngestSummary>,
    pub countries: usize,
    pub indexed_records: usize,
    pub ranges: BTreeMap<String, GlobalRange>,
    pub cached_colors: usize,
    pub elapsed_ms: u128,
}

/// Run the whole pipeline on `tables`, producing a fresh snapshot.
pub async fn build_snapshot(
    config: &ServiceConfig,
    tables: SourceTables,
    progress: &PipelineProgress,
) -> DataResult<(LoadedData, Vec<IngestSummary>)> {
    config.validate()?;
    tables.ensure_non_empty()?;
    let run_id = Uuid::new_v4();
    let _timer = Timer::new(format!("load_{}", run_id));
    info!("Starting load run {}", run_id);

    progress.set_status("Processing data...");
    let mut store = TabularStore::new();
    let ingested: Vec<IngestSummary> = Dataset::ALL
        .iter()
        .map(|&dataset| store.ingest(dataset, tables.table(dataset)))
        .collect();
    store.ingest_country_index(tables.country_index);

    let (catalog, countries) = futures::join!(
        async { DateColumnCatalog::build(&store, config) },
        async { CountryIndex::build_from(store.country_rows()) },
    );
    if catalog.dates().is_empty() {
        error!("No dates with enough data were found");
    }

    progress.set_status("Indexing data for performance...");
    let index = RecordIndex::build_concurrent(&store).await;

    progress.set_status("Calculating global ranges...");
    let mut ranges = RangeAnalyzer::new(config.outlier_fence_multiplier);
    for dataset in Dataset::ALL {
        for column in catalog.columns_of(dataset) {
            ranges.analyze(dataset, column, catalog.dates(), &index);
        }
    }

    progress.start_stage(ranges.len());
    let scheduler = BatchScheduler::new(config.batch_size);
    let colors = ColorCache::precompute(&catalog, &index, &ranges, &scheduler, config.color_exponent, progress).await;

    Ok((
        LoadedData {
            run_id,
            store,
            catalog,
            countries,
            index,
            ranges,
            colors,
            color_exponent: config.color_exponent,
        },
        ingested,
    ))
}

/// Owns the loaded snapshot and the current selection.
pub struct DataService {
    config: ServiceConfig,
    data: Option<Arc<LoadedData>>,
    state: Option<ServiceState>,
    progress: PipelineProgress,
}

impl DataService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            data: None,
            state: None,
            progress: PipelineProgress::new(),
        }
    }

    pub fn with_progress(mut self, progress: PipelineProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn progress(&self) -> &PipelineProgress {
        &self.progress
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Arc<LoadedData>> {
        self.data.as_ref()
    }

    pub fn state(&self) -> Option<&ServiceState> {
        self.state.as_ref()
    }

    /// Fetch the four tables from `source` and load them.
    pub async fn load_all(&mut self, source: &DataSource) -> DataResult<LoadReport> {
        self.progress.set_status(format!("Loading data from {}...", source.describe()));
        let tables = match loader::fetch(source).await {
            Ok(tables) => tables,
            Err(e) => {
                self.progress.set_status(format!("Error loading data: {}", e));
                return Err(e);
            }
        };
        self.load_tables(tables).await
    }

    /// Replace the current snapshot with one built from `tables`.
    ///
    /// The previous snapshot and selection stay in place until the new pipeline
    /// has finished; on failure they are kept.
    pub async fn load_tables(&mut self, tables: SourceTables) -> DataResult<LoadReport> {
        let started = Instant::now();
        let (data, ingested) = match build_snapshot(&self.config, tables, &self.progress).await {
            Ok(built) => built,
            Err(e) => {
                self.progress.set_status(format!("Error loading data: {}", e));
                return Err(e);
            }
        };

        let snapshot = &data;
        let ranges = Dataset::ALL
            .iter()
            .flat_map(move |&dataset| {
                snapshot.catalog.columns_of(dataset).iter().filter_map(move |column| {
                    snapshot
                        .ranges
                        .get(dataset, column)
                        .map(|range| (format!("{}.{}", dataset, column), *range))
                })
            })
            .collect();

        let report = LoadReport {
            run_id: data.run_id,
            dates: data.catalog.dates().to_vec(),
            columns: data.catalog.columns().clone(),
            ingested,
            countries: data.countries.len(),
            indexed_records: data.index.record_count(),
            ranges,
            cached_colors: data.colors.len(),
            elapsed_ms: started.elapsed().as_millis(),
        };

        self.state = Some(ServiceState::initial(&data.catalog, &self.config.primary_columns));
        self.data = Some(Arc::new(data));
        self.progress.finish("Ready!");
        info!(
            "Load {} finished in {}ms: {} dates, {} cached colors",
            report.run_id,
            report.elapsed_ms,
            report.dates.len(),
            report.cached_colors
        );
        Ok(report)
    }

    /// Read view of the current snapshot; `None` before the first successful load.
    pub fn query(&self) -> Option<Query<'_>> {
        match (self.data.as_deref(), self.state.as_ref()) {
            (Some(data), Some(state)) => Some(Query::new(data, state)),
            _ => None,
        }
    }

    pub fn change_dataset(&mut self, name: &str) -> Option<DatasetSelection> {
        let data = self.data.as_ref()?;
        self.state
            .as_mut()?
            .change_dataset(name, &data.catalog, &self.config.primary_columns)
    }

    pub fn change_date(&mut self, date: &str) -> bool {
        match (self.data.as_ref(), self.state.as_mut()) {
            (Some(data), Some(state)) => state.change_date(date, &data.catalog),
            _ => false,
        }
    }

    pub fn change_column(&mut self, column: &str) -> bool {
        match (self.data.as_ref(), self.state.as_mut()) {
            (Some(data), Some(state)) => state.change_column(column, &data.catalog),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{palette, ColorLookup};
    use crate::error::DataError;
    use crate::store::RawTable;

    fn tiny_config() -> ServiceConfig {
        ServiceConfig {
            min_values_per_date: 1,
            ..ServiceConfig::default()
        }
    }

    fn dataset_table(column: &str, rows: &[[&str; 3]]) -> RawTable {
        RawTable::from_rows(
            &["date", "country_key", column],
            &rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>(),
        )
    }

    /// Two countries over three dates; hospitalizations lacks the gb value on the last date.
    fn tiny_tables() -> SourceTables {
        SourceTables {
            epidemiology: dataset_table(
                "new_confirmed",
                &[
                    ["2021-01-01", "us", "100"],
                    ["2021-01-02", "us", "200"],
                    ["2021-01-03", "us", "400"],
                    ["2021-01-01", "gb", "10"],
                    ["2021-01-02", "gb", "20"],
                    ["2021-01-03", "gb", "40"],
                ],
            ),
            hospitalizations: dataset_table(
                "current_hospitalized",
                &[
                    ["2021-01-01", "us", "5"],
                    ["2021-01-02", "us", "6"],
                    ["2021-01-03", "us", "7"],
                    ["2021-01-01", "gb", "3"],
                    ["2021-01-02", "gb", "4"],
                    ["2021-01-03", "gb", ""],
                ],
            ),
            vaccinations: dataset_table(
                "new_persons_vaccinated",
                &[
                    ["2021-01-01", "us", "1000"],
                    ["2021-01-02", "us", "1100"],
                    ["2021-01-03", "us", "1200"],
                    ["2021-01-01", "gb", "500"],
                    ["2021-01-02", "gb", "600"],
                    ["2021-01-03", "gb", "700"],
                ],
            ),
            country_index: RawTable::from_rows(
                &["location_key", "country_name"],
                &[vec!["us", "United States"], vec!["gb", "United Kingdom"]],
            ),
        }
    }

    async fn loaded() -> DataService {
        let mut service = DataService::new(tiny_config());
        service.load_tables(tiny_tables()).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_load_report() {
        let mut service = DataService::new(tiny_config());
        let report = service.load_tables(tiny_tables()).await.unwrap();
        assert_eq!(report.dates, vec!["2021-01-01", "2021-01-02", "2021-01-03"]);
        assert_eq!(report.columns[&Dataset::Hospitalizations], vec!["current_hospitalized"]);
        assert_eq!(report.countries, 2);
        assert_eq!(report.indexed_records, 18);
        // every positive cell gets a colour: 6 + 5 + 6
        assert_eq!(report.cached_colors, 17);
        assert!(report.ranges.contains_key("epidem.new_confirmed"));
        assert_eq!(service.progress().status(), "Ready!");
    }

    #[tokio::test]
    async fn test_scenario_missing_cell() {
        let mut service = loaded().await;
        assert!(service.change_dataset("hospitalizations").is_some());

        let query = service.query().unwrap();
        assert_eq!(query.state().date.as_deref(), Some("2021-01-03"));
        assert_eq!(query.value("gb"), 0.0);
        assert_eq!(query.value("us"), 7.0);
        assert_eq!(query.cached_color("gb"), ColorLookup::NoData);
        assert_eq!(query.color("gb"), palette(Dataset::Hospitalizations).background);
        assert_eq!(query.color("gb"), "#1a315a");
        assert_ne!(query.color("us"), "#1a315a");
    }

    #[tokio::test]
    async fn test_color_is_deterministic_and_matches_live_computation() {
        let service = loaded().await;
        let query = service.query().unwrap();

        let first = query.color("us");
        assert_eq!(first, query.color("US"));
        assert!(matches!(query.cached_color("us"), ColorLookup::Hit(_)));

        let data = service.data().unwrap();
        let range = data.ranges.get(Dataset::Epidemiology, "new_confirmed").unwrap();
        let live = crate::color::ColorScale::new(Dataset::Epidemiology, range, data.color_exponent)
            .color(query.value("us"))
            .unwrap();
        assert_eq!(first, live.to_string());
    }

    #[tokio::test]
    async fn test_dataset_round_trip_restores_default_column() {
        let mut service = loaded().await;
        let initial = service.state().unwrap().column.clone();
        assert_eq!(initial.as_deref(), Some("new_confirmed"));

        service.change_dataset("hospitalizations").unwrap();
        let selection = service.change_dataset("epidem").unwrap();
        assert_eq!(selection.current_column, initial);
    }

    #[tokio::test]
    async fn test_state_changes_validate() {
        let mut service = loaded().await;
        assert!(!service.change_date("2022-01-01"));
        assert!(service.change_date("2021-01-01"));
        assert!(!service.change_column("current_hospitalized"));
        assert!(service.change_dataset("nope").is_none());
        assert_eq!(service.query().unwrap().value("us"), 100.0);
    }

    #[tokio::test]
    async fn test_empty_source_rejected_and_previous_snapshot_kept() {
        let mut service = loaded().await;
        let previous = service.data().unwrap().run_id;

        let mut tables = tiny_tables();
        tables.epidemiology = RawTable::default();
        let err = service.load_tables(tables).await.unwrap_err();
        assert!(matches!(err, DataError::EmptySource { .. }));
        assert!(err.to_string().starts_with("One or more datasets are empty or invalid"));
        assert_eq!(service.data().unwrap().run_id, previous);
        assert!(service.progress().status().starts_with("Error loading data"));
    }

    #[tokio::test]
    async fn test_reload_builds_fresh_snapshot() {
        let mut service = loaded().await;
        service.change_dataset("vaccinations");
        let first = service.data().unwrap().clone();

        service.load_tables(tiny_tables()).await.unwrap();
        let second = service.data().unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(service.state().unwrap().dataset, Dataset::Epidemiology);
        assert_eq!(first.colors.len(), second.colors.len());
    }

    #[tokio::test]
    async fn test_sample_source_loads() {
        let mut service = DataService::new(ServiceConfig::default());
        let report = service.load_all(&DataSource::Sample).await.unwrap();
        assert_eq!(report.dates.len(), 31);
        assert_eq!(report.countries, 30);
        assert!(report.cached_colors > 0);
        let query = service.query().unwrap();
        assert_eq!(query.country_name("us"), "United States");
        assert!(query.value("us") > 0.0);
    }

    #[test]
    fn test_query_unavailable_before_load() {
        let mut service = DataService::new(ServiceConfig::default());
        assert!(service.query().is_none());
        assert!(!service.change_date("2021-01-01"));
        assert!(service.change_dataset("epidem").is_none());
    }
}
