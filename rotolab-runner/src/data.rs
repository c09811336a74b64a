//! Market data loading for the runner.
//!
//! Bars arrive as one CSV per instrument plus a universe TOML naming the
//! instruments. The loader sorts and deduplicates each series, derives the
//! trading calendar from the union of bar dates, and fingerprints the whole
//! dataset with BLAKE3 so audit events can be tied to the exact data that
//! produced them.
//!
//! Synthetic data is a developer-only mode for tests and demos. It is
//! deterministic per (seed, instrument) so fixtures never drift.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use rotolab_core::calendar::TradingCalendar;
use rotolab_core::config::LookbackConfig;
use rotolab_core::domain::{Bar, Instrument, InstrumentId};
use rotolab_core::error::EngineError;
use rotolab_core::features::FeatureVector;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no bar file for '{instrument}' at {path}")]
    MissingBars { instrument: InstrumentId, path: PathBuf },

    #[error("bar file for '{instrument}' is empty")]
    EmptyBars { instrument: InstrumentId },

    #[error("invalid universe file: {0}")]
    InvalidUniverse(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct UniverseSpec {
    instruments: Vec<Instrument>,
}

/// Load the universe definition from a TOML file with an `[[instruments]]`
/// array.
pub fn load_universe(path: &Path) -> Result<Vec<Instrument>, DataError> {
    let text = std::fs::read_to_string(path)?;
    let spec: UniverseSpec =
        toml::from_str(&text).map_err(|e| DataError::InvalidUniverse(e.to_string()))?;
    if spec.instruments.is_empty() {
        return Err(DataError::InvalidUniverse(format!(
            "{} declares no instruments",
            path.display()
        )));
    }
    let mut instruments = spec.instruments;
    instruments.sort_by(|a, b| a.id.cmp(&b.id));
    instruments.dedup_by(|a, b| a.id == b.id);
    Ok(instruments)
}

/// One CSV row of an instrument's bar file.
#[derive(Debug, Deserialize)]
struct BarRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    value: f64,
    #[serde(default)]
    breadth: Option<f64>,
}

impl From<BarRow> for Bar {
    fn from(row: BarRow) -> Self {
        Bar {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            value: row.value,
            breadth: row.breadth,
        }
    }
}

/// Loaded bar data for the whole universe.
#[derive(Debug, Clone)]
pub struct MarketData {
    instruments: Vec<Instrument>,
    bars: BTreeMap<InstrumentId, Vec<Bar>>,
    dataset_hash: String,
}

impl MarketData {
    /// Load one CSV per instrument from `bars_dir` (`{id}.csv`). Each series
    /// is sorted by date; duplicate dates keep the first row.
    pub fn load(bars_dir: &Path, instruments: &[Instrument]) -> Result<Self, DataError> {
        let mut bars = BTreeMap::new();
        for instrument in instruments {
            let path = bars_dir.join(format!("{}.csv", instrument.id));
            if !path.exists() {
                return Err(DataError::MissingBars {
                    instrument: instrument.id.clone(),
                    path,
                });
            }
            let mut reader = csv::Reader::from_path(&path)?;
            let mut series: Vec<Bar> = Vec::new();
            for row in reader.deserialize::<BarRow>() {
                series.push(row?.into());
            }
            if series.is_empty() {
                return Err(DataError::EmptyBars {
                    instrument: instrument.id.clone(),
                });
            }
            series.sort_by_key(|b| b.date);
            series.dedup_by_key(|b| b.date);
            bars.insert(instrument.id.clone(), series);
        }
        Ok(Self::from_parts(instruments.to_vec(), bars))
    }

    /// Generate a deterministic synthetic dataset: a seeded random walk per
    /// instrument over weekday sessions in `[start, end]`. Instruments with a
    /// breadth feed get a synthetic breadth series as well.
    pub fn synthetic(
        instruments: &[Instrument],
        start: NaiveDate,
        end: NaiveDate,
        seed: u64,
    ) -> Self {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut bars = BTreeMap::new();
        for instrument in instruments {
            // Per-instrument seed so adding an instrument never reshuffles
            // the others' series.
            let mut hasher = blake3::Hasher::new();
            hasher.update(&seed.to_le_bytes());
            hasher.update(instrument.id.as_str().as_bytes());
            let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

            let drift: f64 = rng.gen_range(-0.0008..0.0012);
            let daily_vol: f64 = rng.gen_range(0.005..0.025);
            let mut price = rng.gen_range(20.0..200.0);
            let mut breadth: f64 = rng.gen_range(0.3..0.7);
            let mut series = Vec::new();
            let mut current = start;

            while current <= end {
                let weekday = current.weekday();
                if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
                    current += chrono::Duration::days(1);
                    continue;
                }

                let daily_return: f64 = drift + rng.gen_range(-daily_vol..daily_vol);
                let open = price;
                let close = (price * (1.0 + daily_return)).max(0.01);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = (open.min(close) * (1.0 - rng.gen_range(0.0..0.01))).max(0.01);
                let volume = rng.gen_range(500_000..5_000_000u64);

                breadth = (breadth + rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0);
                series.push(Bar {
                    date: current,
                    open,
                    high,
                    low,
                    close,
                    volume,
                    value: close * volume as f64,
                    breadth: instrument.has_breadth_feed.then_some(breadth),
                });

                price = close;
                current += chrono::Duration::days(1);
            }
            bars.insert(instrument.id.clone(), series);
        }
        Self::from_parts(instruments.to_vec(), bars)
    }

    fn from_parts(instruments: Vec<Instrument>, bars: BTreeMap<InstrumentId, Vec<Bar>>) -> Self {
        let dataset_hash = compute_dataset_hash(&bars);
        Self {
            instruments,
            bars,
            dataset_hash,
        }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// BLAKE3 fingerprint over every bar of every instrument.
    pub fn dataset_hash(&self) -> &str {
        &self.dataset_hash
    }

    pub fn bars_for(&self, id: &InstrumentId) -> Option<&[Bar]> {
        self.bars.get(id).map(|v| v.as_slice())
    }

    /// Trading calendar derived from the union of all bar dates.
    pub fn calendar(&self) -> TradingCalendar {
        let dates: Vec<NaiveDate> = self
            .bars
            .values()
            .flat_map(|series| series.iter().map(|b| b.date))
            .collect();
        TradingCalendar::new(dates)
    }

    /// An instrument's bars up to and including `date`.
    pub fn history_until(&self, id: &InstrumentId, date: NaiveDate) -> &[Bar] {
        match self.bars.get(id) {
            Some(series) => {
                let end = series.partition_point(|b| b.date <= date);
                &series[..end]
            }
            None => &[],
        }
    }

    /// Closing price on exactly `date`, if the instrument traded that day.
    pub fn close_on(&self, id: &InstrumentId, date: NaiveDate) -> Option<f64> {
        let series = self.bars.get(id)?;
        let idx = series.binary_search_by_key(&date, |b| b.date).ok()?;
        Some(series[idx].close)
    }

    /// Close-to-close return into `date` for every instrument that has a bar
    /// on `date` and on its preceding bar. Instruments absent from the map
    /// did not trade and are treated as flat by the accounting layer.
    pub fn returns_into(&self, date: NaiveDate) -> BTreeMap<InstrumentId, f64> {
        let mut out = BTreeMap::new();
        for (id, series) in &self.bars {
            if let Ok(idx) = series.binary_search_by_key(&date, |b| b.date) {
                if idx > 0 && series[idx - 1].close > 0.0 {
                    out.insert(id.clone(), series[idx].close / series[idx - 1].close - 1.0);
                }
            }
        }
        out
    }

    /// Compute feature vectors for every instrument with enough clean history
    /// as of `date`. The work is fanned out across the rayon pool; the result
    /// is keyed, so thread scheduling cannot affect it.
    ///
    /// Returns the feature map and the instruments skipped for insufficient
    /// history, in ascending id order.
    pub fn features_as_of(
        &self,
        date: NaiveDate,
        lookbacks: &LookbackConfig,
    ) -> (BTreeMap<InstrumentId, FeatureVector>, Vec<InstrumentId>) {
        let results: Vec<(InstrumentId, Result<FeatureVector, EngineError>)> = self
            .bars
            .par_iter()
            .map(|(id, _)| {
                let history = self.history_until(id, date);
                (
                    id.clone(),
                    FeatureVector::compute(id.clone(), history, lookbacks),
                )
            })
            .collect();

        let mut features = BTreeMap::new();
        let mut skipped = Vec::new();
        for (id, result) in results {
            match result {
                Ok(fv) => {
                    features.insert(id, fv);
                }
                Err(_) => skipped.push(id),
            }
        }
        skipped.sort();
        (features, skipped)
    }
}

/// Deterministic BLAKE3 hash over all bar data, in ascending instrument order.
fn compute_dataset_hash(bars: &BTreeMap<InstrumentId, Vec<Bar>>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (id, series) in bars {
        hasher.update(id.as_str().as_bytes());
        for bar in series {
            hasher.update(bar.date.to_string().as_bytes());
            hasher.update(&bar.open.to_le_bytes());
            hasher.update(&bar.high.to_le_bytes());
            hasher.update(&bar.low.to_le_bytes());
            hasher.update(&bar.close.to_le_bytes());
            hasher.update(&bar.volume.to_le_bytes());
            hasher.update(&bar.value.to_le_bytes());
            if let Some(b) = bar.breadth {
                hasher.update(&b.to_le_bytes());
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn two_instruments() -> Vec<Instrument> {
        vec![
            Instrument::new("XLE", "Energy"),
            Instrument::new("XLK", "Technology"),
        ]
    }

    #[test]
    fn universe_toml_parses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("universe.toml");
        std::fs::write(
            &path,
            r#"
            [[instruments]]
            id = "XLK"
            name = "Technology"

            [[instruments]]
            id = "XLE"
            name = "Energy"
            has_breadth_feed = true
            "#,
        )
        .unwrap();

        let instruments = load_universe(&path).unwrap();
        assert_eq!(instruments.len(), 2);
        assert_eq!(instruments[0].id.as_str(), "XLE");
        assert!(instruments[0].has_breadth_feed);
        assert!(!instruments[1].has_breadth_feed);
    }

    #[test]
    fn empty_universe_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("universe.toml");
        std::fs::write(&path, "instruments = []\n").unwrap();
        assert!(matches!(
            load_universe(&path),
            Err(DataError::InvalidUniverse(_))
        ));
    }

    #[test]
    fn csv_load_sorts_and_parses_breadth() {
        let dir = tempfile::tempdir().unwrap();
        // Out of order on purpose; XLE carries a breadth column.
        std::fs::write(
            dir.path().join("XLE.csv"),
            "date,open,high,low,close,volume,value,breadth\n\
             2024-01-03,101.0,103.0,100.0,102.0,1000,102000.0,0.6\n\
             2024-01-02,100.0,102.0,99.0,101.0,1000,101000.0,0.5\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("XLK.csv"),
            "date,open,high,low,close,volume,value\n\
             2024-01-02,50.0,51.0,49.0,50.5,2000,101000.0\n\
             2024-01-03,50.5,52.0,50.0,51.5,2000,103000.0\n",
        )
        .unwrap();

        let data = MarketData::load(dir.path(), &two_instruments()).unwrap();
        let xle = data.bars_for(&InstrumentId::from("XLE")).unwrap();
        assert_eq!(xle[0].date, d(2024, 1, 2));
        assert_eq!(xle[0].breadth, Some(0.5));
        let xlk = data.bars_for(&InstrumentId::from("XLK")).unwrap();
        assert_eq!(xlk[1].breadth, None);
    }

    #[test]
    fn missing_bar_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("XLE.csv"),
            "date,open,high,low,close,volume,value\n\
             2024-01-02,100.0,102.0,99.0,101.0,1000,101000.0\n",
        )
        .unwrap();
        let err = MarketData::load(dir.path(), &two_instruments()).unwrap_err();
        match err {
            DataError::MissingBars { instrument, .. } => {
                assert_eq!(instrument.as_str(), "XLK")
            }
            other => panic!("expected MissingBars, got {other:?}"),
        }
    }

    #[test]
    fn synthetic_is_deterministic_per_seed() {
        let instruments = two_instruments();
        let a = MarketData::synthetic(&instruments, d(2024, 1, 1), d(2024, 3, 31), 42);
        let b = MarketData::synthetic(&instruments, d(2024, 1, 1), d(2024, 3, 31), 42);
        let c = MarketData::synthetic(&instruments, d(2024, 1, 1), d(2024, 3, 31), 43);
        assert_eq!(a.dataset_hash(), b.dataset_hash());
        assert_ne!(a.dataset_hash(), c.dataset_hash());
    }

    #[test]
    fn synthetic_skips_weekends() {
        let instruments = two_instruments();
        // 2024-01-06/07 are a weekend.
        let data = MarketData::synthetic(&instruments, d(2024, 1, 5), d(2024, 1, 8), 1);
        let cal = data.calendar();
        assert!(cal.contains(d(2024, 1, 5)));
        assert!(!cal.contains(d(2024, 1, 6)));
        assert!(!cal.contains(d(2024, 1, 7)));
        assert!(cal.contains(d(2024, 1, 8)));
    }

    #[test]
    fn synthetic_breadth_follows_feed_flag() {
        let instruments = vec![
            Instrument {
                id: InstrumentId::from("FED"),
                name: "With feed".into(),
                has_breadth_feed: true,
            },
            Instrument::new("RAW", "Without feed"),
        ];
        let data = MarketData::synthetic(&instruments, d(2024, 1, 2), d(2024, 1, 10), 7);
        let fed = data.bars_for(&InstrumentId::from("FED")).unwrap();
        assert!(fed.iter().all(|b| b.breadth.is_some()));
        let raw = data.bars_for(&InstrumentId::from("RAW")).unwrap();
        assert!(raw.iter().all(|b| b.breadth.is_none()));
    }

    #[test]
    fn calendar_unions_staggered_series() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("XLE.csv"),
            "date,open,high,low,close,volume,value\n\
             2024-01-02,100.0,102.0,99.0,101.0,1000,101000.0\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("XLK.csv"),
            "date,open,high,low,close,volume,value\n\
             2024-01-03,50.0,51.0,49.0,50.5,2000,101000.0\n",
        )
        .unwrap();
        let data = MarketData::load(dir.path(), &two_instruments()).unwrap();
        let cal = data.calendar();
        assert_eq!(cal.len(), 2);
        assert!(cal.contains(d(2024, 1, 2)));
        assert!(cal.contains(d(2024, 1, 3)));
    }

    #[test]
    fn history_until_slices_inclusive() {
        let instruments = two_instruments();
        let data = MarketData::synthetic(&instruments, d(2024, 1, 2), d(2024, 1, 12), 3);
        let id = InstrumentId::from("XLE");
        let all = data.bars_for(&id).unwrap().len();
        let until = data.history_until(&id, d(2024, 1, 5));
        assert!(until.len() < all);
        assert_eq!(until.last().unwrap().date, d(2024, 1, 5));
        // A date before the series starts yields nothing.
        assert!(data.history_until(&id, d(2023, 12, 31)).is_empty());
    }

    #[test]
    fn features_as_of_skips_short_history() {
        let instruments = two_instruments();
        // 30 weekday sessions — far less than the default 60-session need.
        let data = MarketData::synthetic(&instruments, d(2024, 1, 1), d(2024, 2, 9), 9);
        let (features, skipped) =
            data.features_as_of(d(2024, 2, 9), &LookbackConfig::default());
        assert!(features.is_empty());
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].as_str(), "XLE");
    }

    #[test]
    fn features_as_of_produces_vectors_with_enough_history() {
        let instruments = two_instruments();
        let data = MarketData::synthetic(&instruments, d(2023, 9, 1), d(2024, 2, 9), 9);
        let (features, skipped) =
            data.features_as_of(d(2024, 2, 9), &LookbackConfig::default());
        assert_eq!(features.len(), 2);
        assert!(skipped.is_empty());
        for fv in features.values() {
            assert!(fv.volatility.is_finite());
            assert!((0.0..=1.0).contains(&fv.breadth));
        }
    }

    #[test]
    fn close_on_exact_date_only() {
        let instruments = two_instruments();
        let data = MarketData::synthetic(&instruments, d(2024, 1, 2), d(2024, 1, 12), 3);
        let id = InstrumentId::from("XLK");
        assert!(data.close_on(&id, d(2024, 1, 3)).is_some());
        // Weekend date: no bar.
        assert!(data.close_on(&id, d(2024, 1, 6)).is_none());
    }

    #[test]
    fn returns_into_matches_closes() {
        let instruments = two_instruments();
        let data = MarketData::synthetic(&instruments, d(2024, 1, 2), d(2024, 1, 12), 3);
        let id = InstrumentId::from("XLE");
        let returns = data.returns_into(d(2024, 1, 3));
        let prev = data.close_on(&id, d(2024, 1, 2)).unwrap();
        let curr = data.close_on(&id, d(2024, 1, 3)).unwrap();
        assert!((returns[&id] - (curr / prev - 1.0)).abs() < 1e-12);
        // First session has no predecessor.
        assert!(data.returns_into(d(2024, 1, 2)).is_empty());
    }
}
