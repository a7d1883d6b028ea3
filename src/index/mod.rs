use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::catalog::{days_between, parse_date};
use crate::store::{Dataset, Record, TabularStore};

/// `countryKey -> date -> record` for one dataset. Dates iterate in ascending order.
pub type DatasetIndex = HashMap<String, BTreeMap<String, Arc<Record>>>;

/// A record found for a (dataset, country, date) request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMatch {
    pub record: Arc<Record>,
    /// The date the record was indexed under; differs from the request on fallback.
    pub date: String,
    pub substituted: bool,
}

/// O(1) point lookups over the ingested records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordIndex {
    datasets: HashMap<Dataset, DatasetIndex>,
}

impl RecordIndex {
    pub fn build(store: &TabularStore) -> Self {
        let datasets = Dataset::ALL
            .iter()
            .map(|&dataset| (dataset, index_dataset(dataset, store.records(dataset))))
            .collect();
        Self { datasets }
    }

    /// Index the three datasets as interleaved tasks on the current task's thread.
    pub async fn build_concurrent(store: &TabularStore) -> Self {
        let tasks = Dataset::ALL.iter().map(|&dataset| async move {
            tokio::task::yield_now().await;
            (dataset, index_dataset(dataset, store.records(dataset)))
        });
        let datasets = join_all(tasks).await.into_iter().collect();
        info!("Data indexing complete");
        Self { datasets }
    }

    pub fn dataset(&self, dataset: Dataset) -> Option<&DatasetIndex> {
        self.datasets.get(&dataset)
    }

    pub fn get_exact(&self, dataset: Dataset, country_key: &str, date: &str) -> Option<&Arc<Record>> {
        self.datasets
            .get(&dataset)?
            .get(&country_key.trim().to_lowercase())?
            .get(date)
    }

    /// Exact match if indexed, otherwise the record whose date is closest to `date`.
    ///
    /// Ties go to the earlier date. `None` when the country has no dates in this
    /// dataset or the requested date does not parse.
    pub fn lookup(&self, dataset: Dataset, country_key: &str, date: &str) -> Option<RecordMatch> {
        let by_date = self
            .datasets
            .get(&dataset)?
            .get(&country_key.trim().to_lowercase())?;

        if let Some(record) = by_date.get(date) {
            return Some(RecordMatch {
                record: record.clone(),
                date: date.to_string(),
                substituted: false,
            });
        }

        parse_date(date)?;
        let mut best: Option<(i64, &String, &Arc<Record>)> = None;
        for (candidate, record) in by_date {
            let Some(distance) = days_between(candidate, date) else {
                continue;
            };
            if best.map_or(true, |(d, _, _)| distance < d) {
                best = Some((distance, candidate, record));
            }
        }

        best.map(|(_, candidate, record)| {
            debug!("Using closest date {} for {} (requested {})", candidate, country_key, date);
            RecordMatch {
                record: record.clone(),
                date: candidate.clone(),
                substituted: true,
            }
        })
    }

    /// Every country with a record on exactly this date.
    pub fn records_on(&self, dataset: Dataset, date: &str) -> Vec<(&str, &Arc<Record>)> {
        let Some(index) = self.datasets.get(&dataset) else {
            return Vec::new();
        };
        let mut rows: Vec<(&str, &Arc<Record>)> = index
            .iter()
            .filter_map(|(country, by_date)| by_date.get(date).map(|r| (country.as_str(), r)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        rows
    }

    pub fn countries(&self, dataset: Dataset) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .datasets
            .get(&dataset)
            .map(|index| index.keys().map(String::as_str).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    pub fn country_count(&self, dataset: Dataset) -> usize {
        self.datasets.get(&dataset).map_or(0, HashMap::len)
    }

    pub fn record_count(&self) -> usize {
        self.datasets
            .values()
            .flat_map(|index| index.values())
            .map(BTreeMap::len)
            .sum()
    }
}

/// Later duplicates of a (country, date) pair replace earlier ones.
fn index_dataset(dataset: Dataset, records: &[Arc<Record>]) -> DatasetIndex {
    let mut index = DatasetIndex::new();
    for record in records {
        let (Some(country), Some(date)) = (record.country_key.as_deref(), record.date.as_deref()) else {
            continue;
        };
        index
            .entry(country.to_lowercase())
            .or_default()
            .insert(date.to_string(), record.clone());
    }
    info!("Indexed {} data: {} countries", dataset, index.len());
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RawTable;

    fn store() -> TabularStore {
        let mut store = TabularStore::new();
        store.ingest(
            Dataset::Vaccinations,
            &RawTable::from_rows(
                &["date", "country_key", "new_persons_vaccinated"],
                &[
                    vec!["2021-01-01", "US", "100"],
                    vec!["2021-01-15", "us", "300"],
                    vec!["2021-01-01", "gb", "50"],
                    vec!["", "gb", "70"],
                    vec!["2021-01-02", "", "70"],
                ],
            ),
        );
        store
    }

    #[test]
    fn test_exact_lookup() {
        let index = RecordIndex::build(&store());
        let hit = index.lookup(Dataset::Vaccinations, "US", "2021-01-15").unwrap();
        assert!(!hit.substituted);
        assert_eq!(hit.record.value("new_persons_vaccinated"), Some(300.0));
    }

    #[test]
    fn test_nearest_date_tie_prefers_earlier() {
        let index = RecordIndex::build(&store());
        let hit = index.lookup(Dataset::Vaccinations, "us", "2021-01-08").unwrap();
        assert_eq!(hit.date, "2021-01-01");
        assert!(hit.substituted);

        let hit = index.lookup(Dataset::Vaccinations, "us", "2021-01-10").unwrap();
        assert_eq!(hit.date, "2021-01-15");
    }

    #[test]
    fn test_nearest_date_equidistant_request() {
        let mut store = TabularStore::new();
        store.ingest(
            Dataset::Epidemiology,
            &RawTable::from_rows(
                &["date", "country_key", "new_confirmed"],
                &[vec!["2021-01-15", "fr", "2"], vec!["2021-01-05", "fr", "1"]],
            ),
        );
        let index = RecordIndex::build(&store);
        let hit = index.lookup(Dataset::Epidemiology, "fr", "2021-01-10").unwrap();
        assert_eq!(hit.date, "2021-01-05");
    }

    #[test]
    fn test_lookup_misses() {
        let index = RecordIndex::build(&store());
        assert!(index.lookup(Dataset::Vaccinations, "fr", "2021-01-01").is_none());
        assert!(index.lookup(Dataset::Epidemiology, "us", "2021-01-01").is_none());
        assert!(index.lookup(Dataset::Vaccinations, "us", "not-a-date").is_none());
    }

    #[test]
    fn test_records_missing_fields_skipped() {
        let index = RecordIndex::build(&store());
        assert_eq!(index.record_count(), 3);
        assert_eq!(index.countries(Dataset::Vaccinations), vec!["gb", "us"]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let store = store();
        let first = RecordIndex::build(&store);
        let second = RecordIndex::build(&store);
        assert_eq!(first, second);
        assert_eq!(first.record_count(), second.record_count());
    }

    #[tokio::test]
    async fn test_concurrent_build_matches_sequential() {
        let store = store();
        let concurrent = RecordIndex::build_concurrent(&store).await;
        assert_eq!(concurrent, RecordIndex::build(&store));
    }

    #[test]
    fn test_records_on_date() {
        let index = RecordIndex::build(&store());
        let rows = index.records_on(Dataset::Vaccinations, "2021-01-01");
        let keys: Vec<&str> = rows.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["gb", "us"]);
    }
}
