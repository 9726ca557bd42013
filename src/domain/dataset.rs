//! Complete Dataset: the bars and indicators for every symbol that was a
//! member of a universe at any point in a date range.
//!
//! A dataset is identified by its [`DatasetKey`], which embeds the snapshot
//! revision it was built against. Datasets are rebuilt, never patched.

use crate::domain::indicator::{IndicatorResult, IndicatorType};
use crate::domain::ohlcv::{OhlcvBar, last_index_on_or_before};
use crate::domain::signal::{CompositeConfig, CompositeSignal, composite_at};
use crate::domain::snapshot::SnapshotRevision;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetKey {
    pub universe_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Sorted and deduplicated.
    pub indicators: Vec<IndicatorType>,
    pub snapshot_revision: Option<SnapshotRevision>,
}

impl DatasetKey {
    pub fn new(
        universe_id: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        indicators: impl IntoIterator<Item = IndicatorType>,
        snapshot_revision: Option<SnapshotRevision>,
    ) -> Self {
        let mut indicators: Vec<IndicatorType> = indicators.into_iter().collect();
        indicators.sort();
        indicators.dedup();
        Self {
            universe_id: universe_id.into(),
            start,
            end,
            indicators,
            snapshot_revision,
        }
    }

    /// Canonical form with sorted keys.
    pub fn canonical(&self) -> serde_json::Value {
        serde_json::json!({
            "universe_id": &self.universe_id,
            "start": self.start,
            "end": self.end,
            "indicators": &self.indicators,
            "snapshot_revision": &self.snapshot_revision,
        })
    }

    /// Hex BLAKE3 digest of the canonical form.
    pub fn handle(&self) -> String {
        blake3::hash(self.canonical().to_string().as_bytes())
            .to_hex()
            .to_string()
    }

    /// Same request, ignoring the snapshot revision.
    pub fn same_scope(&self, other: &DatasetKey) -> bool {
        self.universe_id == other.universe_id
            && self.start == other.start
            && self.end == other.end
            && self.indicators == other.indicators
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorGap {
    pub symbol: String,
    pub indicator: IndicatorType,
    pub required: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSeries {
    pub symbol: String,
    pub bars: Vec<OhlcvBar>,
    pub indicators: BTreeMap<IndicatorType, IndicatorResult>,
}

impl SymbolSeries {
    pub fn close_on_or_before(&self, date: NaiveDate) -> Option<f64> {
        last_index_on_or_before(&self.bars, date).map(|i| self.bars[i].close)
    }

    pub fn has_bar_on_or_before(&self, date: NaiveDate) -> bool {
        last_index_on_or_before(&self.bars, date).is_some()
    }

    pub fn composite_at(&self, date: NaiveDate, config: &CompositeConfig) -> CompositeSignal {
        composite_at(&self.symbol, date, config, &self.indicators)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompleteDataset {
    pub key: DatasetKey,
    pub handle: String,
    pub superset: BTreeSet<String>,
    pub series: BTreeMap<String, SymbolSeries>,
    /// Symbols the provider could not serve, with the reason.
    pub missing: BTreeMap<String, String>,
    pub indicator_gaps: Vec<IndicatorGap>,
    pub content_hash: String,
    pub built_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CompleteDataset {
    pub fn series(&self, symbol: &str) -> Option<&SymbolSeries> {
        self.series.get(symbol)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Every date on which at least one symbol has a bar, within `[start, end]`.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let days: BTreeSet<NaiveDate> = self
            .series
            .values()
            .flat_map(|s| s.bars.iter().map(|b| b.date))
            .filter(|d| *d >= start && *d <= end)
            .collect();
        days.into_iter().collect()
    }

    pub fn summary(&self, cached: bool) -> DatasetSummary {
        DatasetSummary {
            handle: self.handle.clone(),
            universe_id: self.key.universe_id.clone(),
            start: self.key.start,
            end: self.key.end,
            symbols: self.series.keys().cloned().collect(),
            missing: self.missing.clone(),
            indicator_gaps: self.indicator_gaps.clone(),
            content_hash: self.content_hash.clone(),
            built_at: self.built_at,
            expires_at: self.expires_at,
            cached,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub handle: String,
    pub universe_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub symbols: Vec<String>,
    pub missing: BTreeMap<String, String>,
    pub indicator_gaps: Vec<IndicatorGap>,
    pub content_hash: String,
    pub built_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cached: bool,
}

/// BLAKE3 over every bar, indicator value and signal in symbol order.
/// Build timestamps are excluded, so rebuilding the same inputs reproduces
/// the same hash.
pub fn content_hash(
    series: &BTreeMap<String, SymbolSeries>,
    missing: &BTreeMap<String, String>,
) -> String {
    let mut hasher = blake3::Hasher::new();

    for (symbol, s) in series {
        hasher.update(symbol.as_bytes());
        for bar in &s.bars {
            hasher.update(bar.date.to_string().as_bytes());
            hasher.update(&bar.open.to_le_bytes());
            hasher.update(&bar.high.to_le_bytes());
            hasher.update(&bar.low.to_le_bytes());
            hasher.update(&bar.close.to_le_bytes());
            hasher.update(&bar.volume.to_le_bytes());
        }
        for (indicator, result) in &s.indicators {
            hasher.update(indicator.to_string().as_bytes());
            for point in &result.values {
                hasher.update(&[point.valid as u8]);
                hasher.update(&point.value.primary().to_le_bytes());
            }
            for signal in &result.signals {
                hasher.update(&i8::from(signal.signal).to_le_bytes());
            }
        }
    }
    for (symbol, reason) in missing {
        hasher.update(b"missing");
        hasher.update(symbol.as_bytes());
        hasher.update(reason.as_bytes());
    }

    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn revision(seq: i64) -> SnapshotRevision {
        SnapshotRevision {
            seq,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    fn key(seq: i64) -> DatasetKey {
        DatasetKey::new(
            "tech",
            d("2023-01-01"),
            d("2023-12-31"),
            [IndicatorType::rsi_default(), IndicatorType::macd_default()],
            Some(revision(seq)),
        )
    }

    #[test]
    fn key_sorts_and_dedupes_indicators() {
        let k = DatasetKey::new(
            "u",
            d("2023-01-01"),
            d("2023-02-01"),
            [
                IndicatorType::momentum_default(),
                IndicatorType::macd_default(),
                IndicatorType::momentum_default(),
            ],
            None,
        );
        assert_eq!(
            k.indicators,
            vec![IndicatorType::macd_default(), IndicatorType::momentum_default()]
        );
    }

    #[test]
    fn key_handle_is_stable_and_order_independent() {
        let a = key(3);
        let b = DatasetKey::new(
            "tech",
            d("2023-01-01"),
            d("2023-12-31"),
            [IndicatorType::macd_default(), IndicatorType::rsi_default()],
            Some(revision(3)),
        );
        assert_eq!(a.handle(), b.handle());
        assert_eq!(a.handle().len(), 64);
    }

    #[test]
    fn key_round_trips_through_json() {
        let original = key(9);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: DatasetKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.handle(), original.handle());
    }

    #[test]
    fn revision_changes_handle_but_not_scope() {
        let old = key(3);
        let new = key(4);
        assert_ne!(old.handle(), new.handle());
        assert!(old.same_scope(&new));
    }

    fn series(symbol: &str, closes: &[(&str, f64)]) -> SymbolSeries {
        SymbolSeries {
            symbol: symbol.into(),
            bars: closes
                .iter()
                .map(|(date, close)| OhlcvBar {
                    symbol: symbol.into(),
                    date: d(date),
                    open: *close,
                    high: *close,
                    low: *close,
                    close: *close,
                    volume: 10,
                })
                .collect(),
            indicators: BTreeMap::new(),
        }
    }

    #[test]
    fn trading_days_are_union_within_range() {
        let mut map = BTreeMap::new();
        map.insert("A".into(), series("A", &[("2023-01-02", 1.0), ("2023-01-04", 1.0)]));
        map.insert("B".into(), series("B", &[("2023-01-03", 1.0), ("2023-01-09", 1.0)]));
        let dataset = CompleteDataset {
            key: key(1),
            handle: key(1).handle(),
            superset: ["A", "B"].iter().map(|s| s.to_string()).collect(),
            series: map,
            missing: BTreeMap::new(),
            indicator_gaps: vec![],
            content_hash: String::new(),
            built_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            expires_at: DateTime::<Utc>::from_timestamp(10, 0).unwrap(),
        };
        assert_eq!(
            dataset.trading_days(d("2023-01-01"), d("2023-01-05")),
            vec![d("2023-01-02"), d("2023-01-03"), d("2023-01-04")]
        );
        assert!(dataset.is_expired(DateTime::<Utc>::from_timestamp(10, 0).unwrap()));
        assert!(!dataset.is_expired(DateTime::<Utc>::from_timestamp(9, 0).unwrap()));
    }

    #[test]
    fn content_hash_tracks_values() {
        let mut a = BTreeMap::new();
        a.insert("A".to_string(), series("A", &[("2023-01-02", 1.0)]));
        let mut b = BTreeMap::new();
        b.insert("A".to_string(), series("A", &[("2023-01-02", 1.5)]));
        let none = BTreeMap::new();
        assert_eq!(content_hash(&a, &none), content_hash(&a.clone(), &none));
        assert_ne!(content_hash(&a, &none), content_hash(&b, &none));
    }

    #[test]
    fn series_lookups() {
        let s = series("A", &[("2023-01-02", 1.0), ("2023-01-05", 2.0)]);
        assert_eq!(s.close_on_or_before(d("2023-01-01")), None);
        assert_eq!(s.close_on_or_before(d("2023-01-04")), Some(1.0));
        assert!(s.has_bar_on_or_before(d("2023-01-05")));
    }
}
