use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::DateColumnCatalog;
use crate::store::Dataset;

/// Current selection the read operations are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub dataset: Dataset,
    pub date: Option<String>,
    pub column: Option<String>,
}

/// Returned by a dataset change so callers can refresh their column picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSelection {
    pub dataset: Dataset,
    pub columns: Vec<String>,
    pub current_column: Option<String>,
}

/// First preferred column the dataset has, else its first column.
pub fn default_column(columns: &[String], preferred: &[String]) -> Option<String> {
    preferred
        .iter()
        .find(|p| columns.contains(*p))
        .or_else(|| columns.first())
        .cloned()
}

impl ServiceState {
    /// Epidemiology, its default column, and the most recent available date.
    pub fn initial(catalog: &DateColumnCatalog, preferred_columns: &[String]) -> Self {
        let dataset = Dataset::Epidemiology;
        Self {
            dataset,
            date: catalog.latest_date().map(str::to_string),
            column: default_column(catalog.columns_of(dataset), preferred_columns),
        }
    }

    /// Switch dataset and reset the column to that dataset's default.
    pub fn change_dataset(
        &mut self,
        name: &str,
        catalog: &DateColumnCatalog,
        preferred_columns: &[String],
    ) -> Option<DatasetSelection> {
        let dataset: Dataset = match name.parse() {
            Ok(dataset) => dataset,
            Err(e) => {
                debug!("Rejected dataset change: {}", e);
                return None;
            }
        };

        let columns = catalog.columns_of(dataset).to_vec();
        self.dataset = dataset;
        self.column = default_column(&columns, preferred_columns);
        info!("Changed dataset to {}, column set to {:?}", dataset, self.column);

        Some(DatasetSelection {
            dataset,
            columns,
            current_column: self.column.clone(),
        })
    }

    pub fn change_date(&mut self, date: &str, catalog: &DateColumnCatalog) -> bool {
        if !catalog.has_date(date) {
            debug!("Rejected date change to {}", date);
            return false;
        }
        self.date = Some(date.to_string());
        debug!("Changed date to {}", date);
        true
    }

    pub fn change_column(&mut self, column: &str, catalog: &DateColumnCatalog) -> bool {
        if !catalog.has_column(self.dataset, column) {
            debug!("Rejected column change to {} for {}", column, self.dataset);
            return false;
        }
        self.column = Some(column.to_string());
        info!("Changed column to {}", column);
        true
    }
}
