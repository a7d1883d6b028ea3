use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::ServiceConfig;
use crate::store::{Dataset, Record, TabularStore};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()
}

/// Absolute number of days between two ISO dates, if both parse.
pub fn days_between(a: &str, b: &str) -> Option<i64> {
    Some((parse_date(a)? - parse_date(b)?).num_days().abs())
}

/// Dates that carry meaningful data, plus the value columns of each dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DateColumnCatalog {
    dates: Vec<String>,
    columns: BTreeMap<Dataset, Vec<String>>,
}

impl DateColumnCatalog {
    pub fn build(store: &TabularStore, config: &ServiceConfig) -> Self {
        let mut combined = BTreeSet::new();
        let mut columns = BTreeMap::new();

        for dataset in Dataset::ALL {
            let records = store.records(dataset);
            if records.is_empty() {
                error!("No {} data records found, it contributes no dates or columns", dataset);
                columns.insert(dataset, Vec::new());
                continue;
            }

            let dates = qualifying_dates(records, config.min_values_per_date);
            info!("Found {} dates with data in {} dataset", dates.len(), dataset);
            combined.extend(dates);

            let dataset_columns = store.columns_of(dataset).to_vec();
            debug!("Found {} columns in {} data: {:?}", dataset_columns.len(), dataset, dataset_columns);
            columns.insert(dataset, dataset_columns);
        }

        // BTreeSet iteration is lexicographic, which is chronological for ISO dates.
        let dates = trim_isolated_dates(combined.into_iter().collect(), config.isolated_date_gap_days);
        info!("Combined to {} unique dates with actual data", dates.len());

        Self { dates, columns }
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    pub fn columns_of(&self, dataset: Dataset) -> &[String] {
        self.columns.get(&dataset).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn columns(&self) -> &BTreeMap<Dataset, Vec<String>> {
        &self.columns
    }

    pub fn has_date(&self, date: &str) -> bool {
        self.dates.binary_search_by(|d| d.as_str().cmp(date)).is_ok()
    }

    pub fn has_column(&self, dataset: Dataset, column: &str) -> bool {
        self.columns_of(dataset).iter().any(|c| c == column)
    }

    pub fn date_index(&self, date: &str) -> Option<usize> {
        self.dates.binary_search_by(|d| d.as_str().cmp(date)).ok()
    }

    pub fn date_at(&self, index: usize) -> Option<&str> {
        self.dates.get(index).map(String::as_str)
    }

    pub fn latest_date(&self) -> Option<&str> {
        self.dates.last().map(String::as_str)
    }
}

/// Dates whose positive-value count, summed over all records of that date, reaches `min_values`.
fn qualifying_dates(records: &[Arc<Record>], min_values: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        let Some(date) = record.date.as_deref() else {
            continue;
        };
        let count = record.positive_value_count();
        if count > 0 {
            *counts.entry(date).or_insert(0) += count;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count >= min_values)
        .map(|(date, _)| date.to_string())
        .collect()
}

/// Drop a first or last date that sits more than `max_gap_days` away from its neighbour.
///
/// Both ends are measured on the untrimmed list and only lists of four or more dates
/// are considered.
fn trim_isolated_dates(mut dates: Vec<String>, max_gap_days: i64) -> Vec<String> {
    if dates.len() < 4 {
        return dates;
    }

    let n = dates.len();
    let first_gap = days_between(&dates[1], &dates[0]).unwrap_or(0);
    let last_gap = days_between(&dates[n - 1], &dates[n - 2]).unwrap_or(0);

    if last_gap > max_gap_days {
        info!("Last date {} seems isolated ({} days), removing it", dates[n - 1], last_gap);
        dates.pop();
    }
    if first_gap > max_gap_days {
        info!("First date {} seems isolated ({} days), removing it", dates[0], first_gap);
        dates.remove(0);
    }
    dates
}
