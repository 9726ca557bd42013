//! OHLCV bar representation.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl OhlcvBar {
    /// close * volume
    pub fn dollar_volume(&self) -> f64 {
        self.close * self.volume as f64
    }
}

/// Bar interval requested from the data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Daily,
    Weekly,
}

/// Index of the last bar dated on or before `date`, assuming `bars` is sorted by date.
pub fn last_index_on_or_before(bars: &[OhlcvBar], date: NaiveDate) -> Option<usize> {
    let idx = bars.partition_point(|b| b.date <= date);
    idx.checked_sub(1)
}

/// Collapse date-sorted daily bars into ISO-week bars dated on the last
/// trading day of each week.
pub fn resample_weekly(bars: &[OhlcvBar]) -> Vec<OhlcvBar> {
    let mut weeks: Vec<OhlcvBar> = Vec::new();
    for bar in bars {
        match weeks.last_mut() {
            Some(week) if week.date.iso_week() == bar.date.iso_week() => {
                week.date = bar.date;
                week.high = week.high.max(bar.high);
                week.low = week.low.min(bar.low);
                week.close = bar.close;
                week.volume += bar.volume;
            }
            _ => weeks.push(bar.clone()),
        }
    }
    weeks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: "BHP".into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 50_000,
        }
    }

    #[test]
    fn dollar_volume() {
        let b = bar("2024-01-15", 10.0);
        assert!((b.dollar_volume() - 500_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn last_index_lookup() {
        let bars = vec![
            bar("2024-01-02", 1.0),
            bar("2024-01-03", 2.0),
            bar("2024-01-05", 3.0),
        ];
        let d = |s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        assert_eq!(last_index_on_or_before(&bars, d("2024-01-01")), None);
        assert_eq!(last_index_on_or_before(&bars, d("2024-01-02")), Some(0));
        assert_eq!(last_index_on_or_before(&bars, d("2024-01-04")), Some(1));
        assert_eq!(last_index_on_or_before(&bars, d("2024-02-01")), Some(2));
    }

    #[test]
    fn weekly_resample_aggregates() {
        // Thu, Fri, then Mon of the next week
        let mut bars = vec![
            bar("2024-01-04", 10.0),
            bar("2024-01-05", 12.0),
            bar("2024-01-08", 11.0),
        ];
        bars[0].high = 15.0;
        bars[1].low = 9.0;
        let weekly = resample_weekly(&bars);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(weekly[0].open, 10.0);
        assert_eq!(weekly[0].high, 15.0);
        assert_eq!(weekly[0].low, 9.0);
        assert_eq!(weekly[0].close, 12.0);
        assert_eq!(weekly[0].volume, 100_000);
        assert_eq!(weekly[1].close, 11.0);
    }

    #[test]
    fn interval_serde_lowercase() {
        let json = serde_json::to_string(&Interval::Weekly).unwrap();
        assert_eq!(json, "\"weekly\"");
    }
}
