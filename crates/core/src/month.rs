//! Calendar month value type.
//!
//! A `Month` identifies one calendar month (`YYYY-MM`) and is the grouping key
//! for the statistics cache: monthly per-user rows and rebuild tasks are keyed
//! by it, and daily rows are range-scanned through it.

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DomainError;

/// A calendar month, serialized as its `YYYY-MM` string form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    /// Build a month from components. Rejects `month` outside `1..=12`.
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::validation(format!(
                "month out of range: {month}"
            )));
        }
        Ok(Self { year, month })
    }

    /// The month containing the given date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The current month (UTC wall clock).
    pub fn current() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    /// The immediately preceding month.
    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First calendar date of the month.
    pub fn first_day(&self) -> NaiveDate {
        // month is validated to 1..=12, day 1 always exists
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// Last calendar date of the month.
    pub fn last_day(&self) -> NaiveDate {
        let next = if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        };
        next.first_day().pred_opt().unwrap_or_else(|| self.first_day())
    }

    /// Number of days in the month (28..=31).
    pub fn day_count(&self) -> u32 {
        self.last_day().day()
    }

    /// Whether the given date falls inside this month.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| DomainError::validation(format!("not a YYYY-MM month: {s:?}")))?;
        let year: i32 = y
            .parse()
            .map_err(|_| DomainError::validation(format!("bad year in month: {s:?}")))?;
        let month: u32 = m
            .parse()
            .map_err(|_| DomainError::validation(format!("bad month in month: {s:?}")))?;
        Self::new(year, month)
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        let m: Month = "2025-09".parse().unwrap();
        assert_eq!(m.year(), 2025);
        assert_eq!(m.month(), 9);
        assert_eq!(m.to_string(), "2025-09");
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("2025".parse::<Month>().is_err());
        assert!("2025-13".parse::<Month>().is_err());
        assert!("2025-00".parse::<Month>().is_err());
        assert!("abcd-09".parse::<Month>().is_err());
    }

    #[test]
    fn first_and_last_day() {
        let m: Month = "2025-09".parse().unwrap();
        assert_eq!(m.first_day(), NaiveDate::from_ymd_opt(2025, 9, 1).unwrap());
        assert_eq!(m.last_day(), NaiveDate::from_ymd_opt(2025, 9, 30).unwrap());
        assert_eq!(m.day_count(), 30);

        let feb: Month = "2024-02".parse().unwrap();
        assert_eq!(feb.day_count(), 29); // leap year

        let dec: Month = "2025-12".parse().unwrap();
        assert_eq!(dec.last_day(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }

    #[test]
    fn prev_wraps_across_year_boundary() {
        let jan: Month = "2025-01".parse().unwrap();
        assert_eq!(jan.prev().to_string(), "2024-12");

        let sep: Month = "2025-09".parse().unwrap();
        assert_eq!(sep.prev().to_string(), "2025-08");
    }

    #[test]
    fn contains_is_exact() {
        let m: Month = "2025-09".parse().unwrap();
        assert!(m.contains(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()));
        assert!(m.contains(NaiveDate::from_ymd_opt(2025, 9, 30).unwrap()));
        assert!(!m.contains(NaiveDate::from_ymd_opt(2025, 8, 31).unwrap()));
        assert!(!m.contains(NaiveDate::from_ymd_opt(2024, 9, 15).unwrap()));
    }

    #[test]
    fn serde_uses_string_form() {
        let m: Month = "2025-09".parse().unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"2025-09\"");
        let back: Month = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
