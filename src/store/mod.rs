use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Field names that may carry the country identifier, in priority order.
pub const COUNTRY_FIELD_CANDIDATES: [&str; 5] =
    ["country_key", "country_code", "location_key", "country", "iso_code"];

pub const DATE_FIELD: &str = "date";

/// The three tracked metric families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dataset {
    #[serde(rename = "epidem")]
    Epidemiology,
    #[serde(rename = "hospitalizations")]
    Hospitalizations,
    #[serde(rename = "vaccinations")]
    Vaccinations,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [
        Dataset::Epidemiology,
        Dataset::Hospitalizations,
        Dataset::Vaccinations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Epidemiology => "epidem",
            Dataset::Hospitalizations => "hospitalizations",
            Dataset::Vaccinations => "vaccinations",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Dataset::Epidemiology => "Epidemiology",
            Dataset::Hospitalizations => "Hospitalizations",
            Dataset::Vaccinations => "Vaccinations",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "epidem" | "epidemiology" => Ok(Dataset::Epidemiology),
            "hospitalizations" | "hospitalization" | "hospital" => Ok(Dataset::Hospitalizations),
            "vaccinations" | "vaccination" => Ok(Dataset::Vaccinations),
            other => Err(format!("Unknown dataset '{}'", other)),
        }
    }
}

/// Loosely typed tabular input: a header plus rows of optional cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Build a table from string cells; empty strings become missing cells.
    pub fn from_rows<S: AsRef<str>>(columns: &[S], rows: &[Vec<S>]) -> Self {
        let mut table = Self::new(columns.iter().map(|c| c.as_ref().to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|cell| cell.as_ref()).collect());
        }
        table
    }

    pub fn push_row(&mut self, cells: Vec<&str>) {
        self.rows.push(
            cells
                .into_iter()
                .map(|cell| {
                    let cell = cell.trim();
                    (!cell.is_empty()).then(|| cell.to_string())
                })
                .collect(),
        );
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }
}

/// Whether a field name is the date or one of the recognised country identifiers.
pub fn is_identifier_field(name: &str) -> bool {
    name == DATE_FIELD || COUNTRY_FIELD_CANDIDATES.contains(&name)
}

/// Parse a cell the way the value columns are read: a finite number or nothing.
pub fn parse_value(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// One normalized row of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub country_key: Option<String>,
    pub date: Option<String>,
    /// Non-empty value cells keyed by column name.
    pub values: HashMap<String, String>,
}

impl Record {
    pub fn raw(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.raw(column).and_then(parse_value)
    }

    /// Number of value cells that parse as a number greater than zero.
    pub fn positive_value_count(&self) -> usize {
        self.values
            .values()
            .filter_map(|raw| parse_value(raw))
            .filter(|v| *v > 0.0)
            .count()
    }

    pub fn is_indexable(&self) -> bool {
        self.country_key.is_some() && self.date.is_some()
    }
}

/// Ordered list of country-identifier columns found in a table header.
///
/// Rows are resolved by trying each present candidate in priority order and
/// taking the first non-empty cell.
#[derive(Debug, Clone, Default)]
pub struct CountryFieldResolver {
    candidates: Vec<(String, usize)>,
}

impl CountryFieldResolver {
    pub fn for_columns(columns: &[String]) -> Self {
        let candidates = COUNTRY_FIELD_CANDIDATES
            .iter()
            .filter_map(|name| {
                columns
                    .iter()
                    .position(|c| c == name)
                    .map(|pos| (name.to_string(), pos))
            })
            .collect();
        Self { candidates }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The highest-priority identifier column present in the header.
    pub fn primary_field(&self) -> Option<&str> {
        self.candidates.first().map(|(name, _)| name.as_str())
    }

    pub fn resolve(&self, row: &[Option<String>]) -> Option<String> {
        self.candidates.iter().find_map(|(_, pos)| {
            row.get(*pos)
                .and_then(|cell| cell.as_deref())
                .map(|key| key.trim().to_lowercase())
                .filter(|key| !key.is_empty())
        })
    }
}

/// Records and value columns of one dataset after ingestion.
#[derive(Debug, Clone, Default)]
pub struct DatasetTable {
    pub columns: Vec<String>,
    pub records: Vec<Arc<Record>>,
    pub country_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub dataset: Dataset,
    pub records: usize,
    pub missing_fields: usize,
    pub country_field: Option<String>,
}

/// Raw per-record rows for the three datasets plus the country reference rows.
#[derive(Debug, Clone, Default)]
pub struct TabularStore {
    tables: HashMap<Dataset, DatasetTable>,
    country_rows: RawTable,
}

impl TabularStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize and store the rows of one dataset, replacing anything ingested before.
    pub fn ingest(&mut self, dataset: Dataset, table: &RawTable) -> IngestSummary {
        let resolver = CountryFieldResolver::for_columns(&table.columns);
        let country_field = resolver.primary_field().map(str::to_string);

        match country_field.as_deref() {
            Some("country_key") => {}
            Some(field) => info!(
                "Found country identifier in field '{}' for {} data, mapping to country_key",
                field, dataset
            ),
            None if !table.is_empty() => error!(
                "Could not find any country identifier field in {} data (columns: {:?})",
                dataset, table.columns
            ),
            None => {}
        }

        let date_pos = table.column_position(DATE_FIELD);
        if date_pos.is_none() && !table.is_empty() {
            error!("{} data is missing the '{}' field", dataset, DATE_FIELD);
        }

        let value_columns: Vec<(usize, String)> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !is_identifier_field(name))
            .map(|(pos, name)| (pos, name.clone()))
            .collect();

        let mut missing_fields = 0;
        let records: Vec<Arc<Record>> = table
            .rows
            .iter()
            .map(|row| {
                let country_key = resolver.resolve(row);
                let date = date_pos
                    .and_then(|pos| row.get(pos))
                    .and_then(|cell| cell.as_deref())
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty());
                let values = value_columns
                    .iter()
                    .filter_map(|(pos, name)| {
                        row.get(*pos)
                            .and_then(|cell| cell.clone())
                            .map(|cell| (name.clone(), cell))
                    })
                    .collect();
                let record = Record { country_key, date, values };
                if !record.is_indexable() {
                    missing_fields += 1;
                }
                Arc::new(record)
            })
            .collect();

        if missing_fields > 0 {
            warn!(
                "{} of {} {} records lack a country identifier or date and will not be indexed",
                missing_fields,
                records.len(),
                dataset
            );
        }
        if records.is_empty() {
            error!("No {} data records found", dataset);
        }
        debug!("Ingested {} {} records", records.len(), dataset);

        let summary = IngestSummary {
            dataset,
            records: records.len(),
            missing_fields,
            country_field: country_field.clone(),
        };

        self.tables.insert(
            dataset,
            DatasetTable {
                columns: value_columns.into_iter().map(|(_, name)| name).collect(),
                records,
                country_field,
            },
        );
        summary
    }

    pub fn ingest_country_index(&mut self, table: RawTable) {
        info!("Stored {} country index rows", table.len());
        self.country_rows = table;
    }

    pub fn columns_of(&self, dataset: Dataset) -> &[String] {
        self.tables
            .get(&dataset)
            .map(|t| t.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn records(&self, dataset: Dataset) -> &[Arc<Record>] {
        self.tables
            .get(&dataset)
            .map(|t| t.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn table(&self, dataset: Dataset) -> Option<&DatasetTable> {
        self.tables.get(&dataset)
    }

    pub fn country_rows(&self) -> &RawTable {
        &self.country_rows
    }

    pub fn total_records(&self) -> usize {
        self.tables.values().map(|t| t.records.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[Vec<&str>]) -> RawTable {
        RawTable::from_rows(columns, rows)
    }

    #[test]
    fn test_dataset_names_round_trip() {
        for dataset in Dataset::ALL {
            assert_eq!(dataset.as_str().parse::<Dataset>().unwrap(), dataset);
        }
        assert_eq!("Epidemiology".parse::<Dataset>().unwrap(), Dataset::Epidemiology);
        assert!("weather".parse::<Dataset>().is_err());
    }

    #[test]
    fn test_canonical_country_field_kept() {
        let mut store = TabularStore::new();
        let summary = store.ingest(
            Dataset::Epidemiology,
            &table(&["date", "country_key", "new_confirmed"], &[vec!["2021-01-01", "US", "5"]]),
        );
        assert_eq!(summary.country_field.as_deref(), Some("country_key"));
        let record = &store.records(Dataset::Epidemiology)[0];
        assert_eq!(record.country_key.as_deref(), Some("us"));
        assert_eq!(record.value("new_confirmed"), Some(5.0));
    }

    #[test]
    fn test_alternate_country_field_mapped() {
        let mut store = TabularStore::new();
        let summary = store.ingest(
            Dataset::Vaccinations,
            &table(&["iso_code", "date", "new_persons_vaccinated"], &[vec!["GB", "2021-01-01", "10"]]),
        );
        assert_eq!(summary.country_field.as_deref(), Some("iso_code"));
        assert_eq!(store.records(Dataset::Vaccinations)[0].country_key.as_deref(), Some("gb"));
        assert_eq!(store.columns_of(Dataset::Vaccinations), &["new_persons_vaccinated".to_string()]);
    }

    #[test]
    fn test_resolver_priority_and_fallthrough() {
        let columns: Vec<String> = ["country", "location_key", "date"].iter().map(|s| s.to_string()).collect();
        let resolver = CountryFieldResolver::for_columns(&columns);
        assert_eq!(resolver.primary_field(), Some("location_key"));
        let row = vec![Some("France".to_string()), None, Some("2021-01-01".to_string())];
        assert_eq!(resolver.resolve(&row).as_deref(), Some("france"));
        let row = vec![Some("France".to_string()), Some("FR".to_string()), None];
        assert_eq!(resolver.resolve(&row).as_deref(), Some("fr"));
    }

    #[test]
    fn test_no_identifier_field_records_not_indexable() {
        let mut store = TabularStore::new();
        let summary = store.ingest(
            Dataset::Hospitalizations,
            &table(&["date", "region", "new_hospitalized"], &[vec!["2021-01-01", "x", "3"]]),
        );
        assert_eq!(summary.country_field, None);
        assert_eq!(summary.missing_fields, 1);
        assert!(!store.records(Dataset::Hospitalizations)[0].is_indexable());
    }

    #[test]
    fn test_columns_exclude_identifiers() {
        let mut store = TabularStore::new();
        store.ingest(
            Dataset::Epidemiology,
            &table(
                &["date", "country_key", "location_key", "new_confirmed", "new_deceased"],
                &[vec!["2021-01-01", "us", "US", "1", "2"]],
            ),
        );
        assert_eq!(
            store.columns_of(Dataset::Epidemiology),
            &["new_confirmed".to_string(), "new_deceased".to_string()]
        );
        assert!(store.columns_of(Dataset::Vaccinations).is_empty());
    }

    #[test]
    fn test_positive_value_count_ignores_garbage() {
        let mut store = TabularStore::new();
        store.ingest(
            Dataset::Epidemiology,
            &table(&["date", "country_key", "a", "b", "c", "d"], &[vec!["2021-01-01", "us", "3", "0", "x", "-2"]]),
        );
        assert_eq!(store.records(Dataset::Epidemiology)[0].positive_value_count(), 1);
    }

    #[test]
    fn test_parse_value_rejects_non_finite() {
        assert_eq!(parse_value(" 12.5 "), Some(12.5));
        assert_eq!(parse_value("NaN"), None);
        assert_eq!(parse_value("inf"), None);
        assert_eq!(parse_value(""), None);
    }
}
