use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DataError, DataResult};

/// Tunable constants of the load pipeline.
///
/// Every field has a default, so a YAML file only needs to name what it overrides:
///
/// ```yaml
/// min_values_per_date: 5
/// color_exponent: 0.4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// A date is kept only if at least this many positive cells are reported on it.
    pub min_values_per_date: usize,
    /// A first/last date further than this from its neighbour is dropped as isolated.
    pub isolated_date_gap_days: i64,
    /// Dates handled per cooperative batch before yielding.
    pub batch_size: usize,
    /// Tukey fence multiplier applied to the interquartile range.
    pub outlier_fence_multiplier: f64,
    /// Power-scale exponent applied to the normalised value before interpolation.
    pub color_exponent: f64,
    /// Columns preferred as the default selection, in priority order.
    pub primary_columns: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            min_values_per_date: 10,
            isolated_date_gap_days: 30,
            batch_size: 10,
            outlier_fence_multiplier: 1.5,
            color_exponent: 0.5,
            primary_columns: vec![
                "new_confirmed".to_string(),
                "cumulative_confirmed".to_string(),
            ],
        }
    }
}

impl ServiceConfig {
    /// Read a YAML config file, falling back to defaults for missing keys
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> DataResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DataError::MissingFile {
                path: path.display().to_string(),
            },
            _ => DataError::Io(e),
        })?;
        let config = Self::from_yaml_str(&content)?;
        info!("Loaded service config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> DataResult<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ServiceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        debug!("Service config: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> DataResult<()> {
        if self.batch_size == 0 {
            return Err(DataError::Config("batch_size must be at least 1".to_string()));
        }
        if !(self.color_exponent.is_finite() && self.color_exponent > 0.0) {
            return Err(DataError::Config(format!(
                "color_exponent must be a positive number, got {}",
                self.color_exponent
            )));
        }
        if !(self.outlier_fence_multiplier.is_finite() && self.outlier_fence_multiplier >= 0.0) {
            return Err(DataError::Config(format!(
                "outlier_fence_multiplier must be non-negative, got {}",
                self.outlier_fence_multiplier
            )));
        }
        if self.isolated_date_gap_days < 0 {
            return Err(DataError::Config(
                "isolated_date_gap_days must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = ServiceConfig::default();
        assert_eq!(config.min_values_per_date, 10);
        assert_eq!(config.isolated_date_gap_days, 30);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.outlier_fence_multiplier, 1.5);
        assert_eq!(config.color_exponent, 0.5);
        assert_eq!(config.primary_columns[0], "new_confirmed");
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = ServiceConfig::from_yaml_str("min_values_per_date: 2\ncolor_exponent: 0.25\n").unwrap();
        assert_eq!(config.min_values_per_date, 2);
        assert_eq!(config.color_exponent, 0.25);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(ServiceConfig::from_yaml_str("  \n").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ServiceConfig::from_yaml_str("batch_size: 0"),
            Err(DataError::Config(_))
        ));
        assert!(matches!(
            ServiceConfig::from_yaml_str("color_exponent: -1.0"),
            Err(DataError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_reported() {
        let err = ServiceConfig::from_yaml_file("/nonexistent/globe-stats.yaml").unwrap_err();
        assert!(matches!(err, DataError::MissingFile { .. }));
    }
}
