use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::catalog::DateColumnCatalog;
use crate::index::RecordIndex;
use crate::progress::PipelineProgress;
use crate::ranges::{GlobalRange, RangeAnalyzer};
use crate::scheduler::BatchScheduler;
use crate::store::Dataset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#')?;
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Per-channel linear blend towards `other`, rounding half up.
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| {
            let v = a as f64 + (b as f64 - a as f64) * t;
            (v + 0.5).floor().clamp(0.0, 255.0) as u8
        };
        Rgb::new(mix(self.r, other.r), mix(self.g, other.g), mix(self.b, other.b))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

/// Colours of one dataset: the low end, the high end, and the no-data background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub low: Rgb,
    pub high: Rgb,
    pub background: &'static str,
}

pub fn palette(dataset: Dataset) -> Palette {
    match dataset {
        Dataset::Epidemiology => Palette {
            low: Rgb::new(0xcc, 0x55, 0x55),
            high: Rgb::BLACK,
            background: "#4a0000",
        },
        Dataset::Hospitalizations => Palette {
            low: Rgb::new(0x66, 0x88, 0xcc),
            high: Rgb::BLACK,
            background: "#1a315a",
        },
        Dataset::Vaccinations => Palette {
            low: Rgb::new(0x44, 0xcc, 0x99),
            high: Rgb::BLACK,
            background: "#004d40",
        },
    }
}

/// Square-root (by default) power scale from `[0, domain max]` onto a palette.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    palette: Palette,
    domain_max: f64,
    exponent: f64,
}

impl ColorScale {
    pub fn new(dataset: Dataset, range: &GlobalRange, exponent: f64) -> Self {
        Self {
            palette: palette(dataset),
            domain_max: range.max,
            exponent,
        }
    }

    /// `None` for values that carry no colour (zero, negative, non-finite).
    pub fn color(&self, value: f64) -> Option<Rgb> {
        if !value.is_finite() || value <= 0.0 || self.domain_max <= 0.0 {
            return None;
        }
        let normalized = (value / self.domain_max).min(1.0);
        let scaled = normalized.powf(self.exponent);
        Some(self.palette.low.lerp(self.palette.high, scaled))
    }
}

/// Result of a cache probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorLookup {
    Hit(Rgb),
    /// The (dataset, column, date) was never precomputed.
    Miss,
    /// Precomputed, but the country had no positive value on that exact date.
    NoData,
}

type DateColors = HashMap<String, Rgb>;

/// Precomputed colours keyed by dataset, column, date and country.
#[derive(Debug, Clone, Default)]
pub struct ColorCache {
    entries: HashMap<Dataset, HashMap<String, HashMap<String, DateColors>>>,
    len: usize,
}

impl ColorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute colours for every analysed (dataset, column) on every catalog date.
    ///
    /// Dates are handled in scheduler-sized batches with a yield in between. Columns
    /// without a range in `analyzer` are skipped.
    pub async fn precompute(
        catalog: &DateColumnCatalog,
        index: &RecordIndex,
        analyzer: &RangeAnalyzer,
        scheduler: &BatchScheduler,
        exponent: f64,
        progress: &PipelineProgress,
    ) -> Self {
        let mut cache = Self::new();
        let dates = catalog.dates();

        for dataset in Dataset::ALL {
            for column in catalog.columns_of(dataset) {
                let Some(range) = analyzer.get(dataset, column) else {
                    debug!("No range for {}.{}, skipping colour precompute", dataset, column);
                    continue;
                };
                progress.set_status(format!("Calculating colors: {} - {}...", dataset, column));
                let scale = ColorScale::new(dataset, range, exponent);

                scheduler
                    .run(dates, |batch| {
                        for date in batch {
                            cache.fill_date(dataset, column, date, &scale, index);
                        }
                    })
                    .await;
                progress.increment_completed();
            }
        }

        info!("Color pre-calculation complete: {} cached colors", cache.len());
        cache
    }

    /// Cache the colour of every country with a positive value on exactly `date`.
    pub fn fill_date(&mut self, dataset: Dataset, column: &str, date: &str, scale: &ColorScale, index: &RecordIndex) {
        let rows = index.records_on(dataset, date);
        if rows.is_empty() {
            return;
        }
        let bucket = self
            .entries
            .entry(dataset)
            .or_default()
            .entry(column.to_string())
            .or_default()
            .entry(date.to_string())
            .or_default();

        for (country, record) in rows {
            let Some(color) = record.value(column).and_then(|v| scale.color(v)) else {
                continue;
            };
            if bucket.insert(country.to_string(), color).is_none() {
                self.len += 1;
            }
        }
    }

    pub fn lookup(&self, dataset: Dataset, column: &str, date: &str, country_key: &str) -> ColorLookup {
        let Some(bucket) = self
            .entries
            .get(&dataset)
            .and_then(|columns| columns.get(column))
            .and_then(|dates| dates.get(date))
        else {
            return ColorLookup::Miss;
        };
        match bucket.get(&country_key.trim().to_lowercase()) {
            Some(color) => ColorLookup::Hit(*color),
            None => ColorLookup::NoData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::store::{RawTable, TabularStore};

    #[test]
    fn test_hex_round_trip_and_display() {
        let c = Rgb::from_hex("#cc5555").unwrap();
        assert_eq!(c, Rgb::new(204, 85, 85));
        assert_eq!(c.to_hex(), "#cc5555");
        assert_eq!(c.to_string(), "rgb(204, 85, 85)");
        assert_eq!(Rgb::from_hex("cc5555"), None);
        assert_eq!(Rgb::from_hex("#zz5555"), None);
    }

    #[test]
    fn test_lerp_endpoints_and_rounding() {
        let low = Rgb::new(0xcc, 0x55, 0x55);
        assert_eq!(low.lerp(Rgb::BLACK, 0.0), low);
        assert_eq!(low.lerp(Rgb::BLACK, 1.0), Rgb::BLACK);
        // 204 * 0.5 = 102, 85 * 0.5 = 42.5 rounds up
        assert_eq!(low.lerp(Rgb::BLACK, 0.5), Rgb::new(102, 43, 43));
    }

    #[test]
    fn test_power_scale() {
        let range = GlobalRange { max: 100.0, ..GlobalRange::EMPTY };
        let scale = ColorScale::new(Dataset::Epidemiology, &range, 0.5);
        // sqrt(25 / 100) = 0.5
        assert_eq!(scale.color(25.0), Some(Rgb::new(102, 43, 43)));
        // values beyond the domain saturate
        assert_eq!(scale.color(1e9), Some(Rgb::BLACK));
        assert_eq!(scale.color(0.0), None);
        assert_eq!(scale.color(-5.0), None);
        assert_eq!(scale.color(f64::NAN), None);
    }

    #[test]
    fn test_palettes_per_dataset() {
        assert_eq!(palette(Dataset::Hospitalizations).low.to_hex(), "#6688cc");
        assert_eq!(palette(Dataset::Vaccinations).low.to_hex(), "#44cc99");
        assert_eq!(palette(Dataset::Vaccinations).background, "#004d40");
    }

    #[tokio::test]
    async fn test_precompute_and_lookup_variants() {
        let mut store = TabularStore::new();
        store.ingest(
            Dataset::Epidemiology,
            &RawTable::from_rows(
                &["date", "country_key", "new_confirmed"],
                &[
                    vec!["2021-01-01", "us", "100"],
                    vec!["2021-01-01", "gb", "0"],
                    vec!["2021-01-02", "us", "25"],
                ],
            ),
        );
        let config = ServiceConfig { min_values_per_date: 1, ..ServiceConfig::default() };
        let catalog = DateColumnCatalog::build(&store, &config);
        let index = RecordIndex::build(&store);
        let mut analyzer = RangeAnalyzer::new(1.5);
        let range = analyzer.analyze(Dataset::Epidemiology, "new_confirmed", catalog.dates(), &index);

        let cache = ColorCache::precompute(
            &catalog,
            &index,
            &analyzer,
            &BatchScheduler::new(1),
            0.5,
            &PipelineProgress::new(),
        )
        .await;

        assert_eq!(cache.len(), 2);
        let scale = ColorScale::new(Dataset::Epidemiology, &range, 0.5);
        assert_eq!(
            cache.lookup(Dataset::Epidemiology, "new_confirmed", "2021-01-02", "US"),
            ColorLookup::Hit(scale.color(25.0).unwrap())
        );
        assert_eq!(
            cache.lookup(Dataset::Epidemiology, "new_confirmed", "2021-01-01", "gb"),
            ColorLookup::NoData
        );
        assert_eq!(
            cache.lookup(Dataset::Epidemiology, "new_confirmed", "2021-02-01", "us"),
            ColorLookup::Miss
        );
        assert_eq!(
            cache.lookup(Dataset::Hospitalizations, "new_confirmed", "2021-01-01", "us"),
            ColorLookup::Miss
        );
    }
}
