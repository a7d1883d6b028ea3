use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::state::ServiceState;
use super::LoadedData;
use crate::color::{palette, ColorLookup, ColorScale, Rgb};
use crate::countries::CountryEntry;
use crate::store::{Dataset, Record};

/// A country's row for the current selection, annotated for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryData {
    pub country_key: String,
    pub country_name: String,
    pub dataset: Dataset,
    /// Date of the returned record.
    pub date: String,
    pub requested_date: String,
    /// True when `date` was substituted by the nearest-date fallback.
    pub substituted: bool,
    pub values: BTreeMap<String, String>,
}

impl CountryData {
    fn from_record(
        country_key: &str,
        country_name: String,
        dataset: Dataset,
        record: &Record,
        date: &str,
        requested_date: &str,
    ) -> Self {
        Self {
            country_key: country_key.to_string(),
            country_name,
            dataset,
            date: date.to_string(),
            requested_date: requested_date.to_string(),
            substituted: date != requested_date,
            values: record
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).and_then(|raw| crate::store::parse_value(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: String,
    pub value: f64,
}

/// Read-only view over one loaded snapshot and a selection.
///
/// Every read is a function of `(state, data)`; nothing here mutates either.
#[derive(Clone, Copy)]
pub struct Query<'a> {
    data: &'a LoadedData,
    state: &'a ServiceState,
}

impl<'a> Query<'a> {
    pub fn new(data: &'a LoadedData, state: &'a ServiceState) -> Self {
        Self { data, state }
    }

    pub fn state(&self) -> &'a ServiceState {
        self.state
    }

    pub fn data(&self) -> &'a LoadedData {
        self.data
    }

    /// Current-date row of the current dataset, with nearest-date fallback.
    pub fn country_data(&self, country_key: &str) -> Option<CountryData> {
        if country_key.trim().is_empty() {
            return None;
        }
        let requested = self.state.date.as_deref()?;
        let found = self.data.index.lookup(self.state.dataset, country_key, requested)?;
        Some(CountryData::from_record(
            country_key,
            self.country_name(country_key),
            self.state.dataset,
            &found.record,
            &found.date,
            requested,
        ))
    }

    /// Numeric value of the current column; 0 when absent or unparseable.
    pub fn value(&self, country_key: &str) -> f64 {
        let Some(column) = self.state.column.as_deref() else {
            return 0.0;
        };
        self.country_data(country_key)
            .and_then(|data| data.value(column))
            .unwrap_or(0.0)
    }

    /// Precomputed colour probe for the exact current selection.
    pub fn cached_color(&self, country_key: &str) -> ColorLookup {
        match (self.state.column.as_deref(), self.state.date.as_deref()) {
            (Some(column), Some(date)) => {
                self.data
                    .colors
                    .lookup(self.state.dataset, column, date, country_key)
            }
            _ => ColorLookup::Miss,
        }
    }

    /// Display colour: cached if available, otherwise computed from the current
    /// value and global range, otherwise the dataset background.
    pub fn color(&self, country_key: &str) -> String {
        match self.resolve_color(country_key) {
            Some(color) => color.to_string(),
            None => self.background().to_string(),
        }
    }

    /// Same as [`Query::color`], as channels.
    pub fn color_rgb(&self, country_key: &str) -> Rgb {
        self.resolve_color(country_key)
            .or_else(|| Rgb::from_hex(self.background()))
            .unwrap_or(Rgb::BLACK)
    }

    /// `None` means the background colour applies.
    fn resolve_color(&self, country_key: &str) -> Option<Rgb> {
        if country_key.trim().is_empty() {
            return None;
        }

        if let ColorLookup::Hit(color) = self.cached_color(country_key) {
            return Some(color);
        }

        let value = self.value(country_key);
        if value == 0.0 {
            return None;
        }

        let column = self.state.column.as_deref()?;
        let range = self.data.ranges.get(self.state.dataset, column)?;
        let color = ColorScale::new(self.state.dataset, range, self.data.color_exponent).color(value)?;
        debug!("Dynamic color for {}: value={}, color={}", country_key, value, color);
        Some(color)
    }

    /// Flat colour for countries without data in the current dataset.
    pub fn background(&self) -> &'static str {
        palette(self.state.dataset).background
    }

    pub fn country_name(&self, key: &str) -> String {
        self.data.countries.name_from_key(key)
    }

    pub fn country_key_from_name(&self, name: &str) -> Option<&'a str> {
        self.data.countries.key_from_name(name)
    }

    /// Map a globe feature to a country key by name, then by numeric id.
    pub fn resolve_feature(&self, name: &str, numeric_id: Option<&str>) -> Option<String> {
        self.data.countries.resolve_feature(name, numeric_id)
    }

    pub fn all_countries(&self) -> &'a [CountryEntry] {
        self.data.countries.entries()
    }

    pub fn dates(&self) -> &'a [String] {
        self.data.catalog.dates()
    }

    pub fn columns(&self, dataset: Dataset) -> &'a [String] {
        self.data.catalog.columns_of(dataset)
    }

    pub fn date_index(&self, date: &str) -> Option<usize> {
        self.data.catalog.date_index(date)
    }

    /// Date at a slider position; out of range falls back to the current date.
    pub fn date_at(&self, index: usize) -> String {
        self.data
            .catalog
            .date_at(index)
            .map(str::to_string)
            .or_else(|| self.state.date.clone())
            .unwrap_or_default()
    }

    /// Every country's row on exactly `date`, sorted by key.
    pub fn data_for_date(&self, dataset: Dataset, date: &str) -> Vec<CountryData> {
        self.data
            .index
            .records_on(dataset, date)
            .into_iter()
            .map(|(key, record)| CountryData::from_record(key, self.country_name(key), dataset, record, date, date))
            .collect()
    }

    pub fn all_countries_for_current_date(&self) -> Vec<CountryData> {
        match self.state.date.as_deref() {
            Some(date) => self.data_for_date(self.state.dataset, date),
            None => Vec::new(),
        }
    }

    /// Values of `column` for one country on each available date it reported exactly.
    pub fn country_series(&self, country_key: &str, column: &str) -> Vec<SeriesPoint> {
        self.dates()
            .iter()
            .filter_map(|date| {
                let record: &Arc<Record> = self.data.index.get_exact(self.state.dataset, country_key, date)?;
                Some(SeriesPoint {
                    date: date.clone(),
                    value: record.value(column)?,
                })
            })
            .collect()
    }

    /// Current-selection rows for several countries; countries without data are left out.
    pub fn compare(&self, country_keys: &[String]) -> Vec<CountryData> {
        country_keys
            .iter()
            .filter_map(|key| {
                let data = self.country_data(key);
                if data.is_none() {
                    debug!("No {} data for {} to compare", self.state.dataset, key);
                }
                data
            })
            .collect()
    }
}
