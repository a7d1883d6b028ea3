use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::index::RecordIndex;
use crate::store::Dataset;

/// Value domain used to normalize colours for one (dataset, column).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlobalRange {
    pub min: f64,
    /// Domain max: the true max, or the Tukey fence when the max lies beyond it.
    pub max: f64,
    pub original_max: f64,
    pub q1: f64,
    pub q3: f64,
    pub samples: usize,
}

impl GlobalRange {
    /// Range used when a column has no positive values.
    pub const EMPTY: GlobalRange = GlobalRange {
        min: 0.0,
        max: 1.0,
        original_max: 0.0,
        q1: 0.0,
        q3: 0.0,
        samples: 0,
    };

    pub fn is_capped(&self) -> bool {
        self.max < self.original_max
    }
}

/// Linear interpolation between order statistics ("type 7").
///
/// `sorted` must be ascending. Returns `None` for an empty slice.
pub fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

/// Compute the colour domain of a set of values. Non-positive and non-finite values are ignored.
pub fn range_of(values: &[f64], fence_multiplier: f64) -> GlobalRange {
    let mut sorted: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if sorted.is_empty() {
        return GlobalRange::EMPTY;
    }
    sorted.sort_by(f64::total_cmp);

    let max = sorted[sorted.len() - 1];
    let q1 = quantile(&sorted, 0.25).unwrap_or(0.0);
    let q3 = quantile(&sorted, 0.75).unwrap_or(0.0);
    let upper_fence = q3 + fence_multiplier * (q3 - q1);

    let domain_max = if max > upper_fence && upper_fence > 0.0 {
        upper_fence
    } else {
        max
    };

    GlobalRange {
        min: 0.0,
        max: domain_max,
        original_max: max,
        q1,
        q3,
        samples: sorted.len(),
    }
}

/// Global ranges for every analysed (dataset, column).
#[derive(Debug, Clone, Default)]
pub struct RangeAnalyzer {
    fence_multiplier: f64,
    ranges: HashMap<Dataset, HashMap<String, GlobalRange>>,
}

impl RangeAnalyzer {
    pub fn new(fence_multiplier: f64) -> Self {
        Self {
            fence_multiplier,
            ranges: HashMap::new(),
        }
    }

    /// Gather every positive value of `column` on `dates` across all countries and
    /// store the resulting range.
    pub fn analyze(&mut self, dataset: Dataset, column: &str, dates: &[String], index: &RecordIndex) -> GlobalRange {
        let values: Vec<f64> = dates
            .iter()
            .flat_map(|date| index.records_on(dataset, date))
            .filter_map(|(_, record)| record.value(column))
            .collect();

        let range = range_of(&values, self.fence_multiplier);
        if range.is_capped() {
            info!(
                "Using outlier-adjusted domain max for {}.{}: {} (original max: {})",
                dataset, column, range.max, range.original_max
            );
        }
        debug!("Global range for {}.{}: [0, {}] from {} values", dataset, column, range.max, range.samples);

        self.ranges
            .entry(dataset)
            .or_default()
            .insert(column.to_string(), range);
        range
    }

    pub fn get(&self, dataset: Dataset, column: &str) -> Option<&GlobalRange> {
        self.ranges.get(&dataset)?.get(column)
    }

    pub fn len(&self) -> usize {
        self.ranges.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
