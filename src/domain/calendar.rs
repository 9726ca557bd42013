//! Cadences for backfill and rebalancing schedules.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
}

impl Frequency {
    fn is_period_start(self, date: NaiveDate) -> bool {
        match self {
            Frequency::Daily => true,
            Frequency::Weekly => date.weekday() == Weekday::Mon,
            Frequency::Monthly => date.day() == 1,
            Frequency::Quarterly => date.day() == 1 && (date.month() - 1) % 3 == 0,
            Frequency::Annually => date.day() == 1 && date.month() == 1,
        }
    }

    /// First period start strictly after `date`.
    fn next_period_start(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Frequency::Daily => date.succ_opt(),
            Frequency::Weekly => {
                let days_ahead = 7 - date.weekday().num_days_from_monday() as i64;
                date.checked_add_signed(Duration::days(days_ahead))
            }
            Frequency::Monthly => add_months(first_of_month(date), 1),
            Frequency::Quarterly => {
                let start_month = (date.month() - 1) / 3 * 3 + 1;
                let quarter_start = NaiveDate::from_ymd_opt(date.year(), start_month, 1)?;
                add_months(quarter_start, 3)
            }
            Frequency::Annually => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        }
    }

    /// `start` followed by every period start in `(start, end]`.
    pub fn schedule(self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        if start > end {
            return dates;
        }
        dates.push(start);
        let mut cursor = start;
        while let Some(next) = self.next_period_start(cursor) {
            if next > end {
                break;
            }
            debug_assert!(self.is_period_start(next));
            dates.push(next);
            cursor = next;
        }
        dates
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annually => "annually",
        };
        f.write_str(s)
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "annually" | "yearly" => Ok(Frequency::Annually),
            other => Err(format!("unknown frequency: {other}")),
        }
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(chrono::Months::new(months))
}

/// Map schedule dates onto trading days: each date moves to the first trading
/// day on or after it. Duplicates collapse; dates past the last trading day drop.
pub fn align_to_trading_days(schedule: &[NaiveDate], trading_days: &[NaiveDate]) -> Vec<NaiveDate> {
    let mut aligned: Vec<NaiveDate> = Vec::with_capacity(schedule.len());
    for &date in schedule {
        let idx = trading_days.partition_point(|d| *d < date);
        if let Some(&day) = trading_days.get(idx) {
            if aligned.last() != Some(&day) {
                aligned.push(day);
            }
        }
    }
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn monthly_schedule_starts_at_start() {
        let dates = Frequency::Monthly.schedule(d(2023, 1, 15), d(2023, 4, 1));
        assert_eq!(dates, vec![d(2023, 1, 15), d(2023, 2, 1), d(2023, 3, 1), d(2023, 4, 1)]);
    }

    #[test]
    fn quarterly_schedule() {
        let dates = Frequency::Quarterly.schedule(d(2023, 2, 10), d(2023, 12, 31));
        assert_eq!(dates, vec![d(2023, 2, 10), d(2023, 4, 1), d(2023, 7, 1), d(2023, 10, 1)]);
    }

    #[test]
    fn weekly_schedule_uses_mondays() {
        // 2024-01-03 is a Wednesday
        let dates = Frequency::Weekly.schedule(d(2024, 1, 3), d(2024, 1, 16));
        assert_eq!(dates, vec![d(2024, 1, 3), d(2024, 1, 8), d(2024, 1, 15)]);
    }

    #[test]
    fn annual_and_daily() {
        assert_eq!(
            Frequency::Annually.schedule(d(2020, 6, 1), d(2022, 1, 1)),
            vec![d(2020, 6, 1), d(2021, 1, 1), d(2022, 1, 1)]
        );
        assert_eq!(Frequency::Daily.schedule(d(2024, 1, 1), d(2024, 1, 3)).len(), 3);
    }

    #[test]
    fn empty_when_start_after_end() {
        assert!(Frequency::Monthly.schedule(d(2024, 2, 1), d(2024, 1, 1)).is_empty());
    }

    #[test]
    fn parse_frequency() {
        assert_eq!("Monthly".parse::<Frequency>().unwrap(), Frequency::Monthly);
        assert_eq!("yearly".parse::<Frequency>().unwrap(), Frequency::Annually);
        assert!("hourly".parse::<Frequency>().is_err());
    }

    #[test]
    fn align_moves_to_next_trading_day() {
        let trading = vec![d(2023, 1, 3), d(2023, 1, 4), d(2023, 2, 1), d(2023, 2, 2)];
        let schedule = vec![d(2023, 1, 1), d(2023, 1, 2), d(2023, 2, 1), d(2023, 3, 1)];
        assert_eq!(
            align_to_trading_days(&schedule, &trading),
            vec![d(2023, 1, 3), d(2023, 2, 1)]
        );
    }
}
