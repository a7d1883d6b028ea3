//! Load per-country COVID-19 tables, index them by country and date, and
//! precompute the globe colours of every (dataset, column, date, country).

pub mod catalog;
pub mod cli;
pub mod color;
pub mod config;
pub mod countries;
pub mod error;
pub mod index;
pub mod loader;
pub mod monitoring;
pub mod plotting;
pub mod progress;
pub mod ranges;
pub mod scheduler;
pub mod search;
pub mod service;
pub mod store;

pub use config::ServiceConfig;
pub use error::{DataError, DataResult};
pub use loader::{DataSource, SourceTables};
pub use service::{DataService, LoadReport, Query};
