use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Year(pub i32);
impl Year {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl Display for Year {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// A UTC calendar month, ordered chronologically. Displays as `YYYY-MM`,
/// which is also the file stem of a monthly partition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Month(pub i32, pub u32);
impl Month {
    pub fn year(self) -> i32 {
        self.0
    }
    pub fn month(self) -> u32 {
        self.1
    }
    pub fn new(month: u32, year: i32) -> Self {
        Self(year, month)
    }

    /// The month containing `ts`.
    pub fn of(ts: &DateTime<Utc>) -> Self {
        Self(ts.year(), ts.month())
    }

    pub fn next(self) -> Self {
        if self.1 >= 12 {
            Self(self.0 + 1, 1)
        } else {
            Self(self.0, self.1 + 1)
        }
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.0, self.1, 1)
    }

    pub fn last_day(self) -> Option<NaiveDate> {
        if !(1..=12).contains(&self.1) {
            return None;
        }
        self.next().first_day()?.pred_opt()
    }
}

impl Display for Month {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.0, self.1)
    }
}

/// Parses the strict `YYYY-MM` form produced by `Display`.
impl FromStr for Month {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s.split_once('-').ok_or(())?;
        if year.len() != 4 || month.len() != 2 {
            return Err(());
        }
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(());
        }
        let year: i32 = year.parse().map_err(|_| ())?;
        let month: u32 = month.parse().map_err(|_| ())?;
        if !(1..=12).contains(&month) {
            return Err(());
        }
        Ok(Self(year, month))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StartEndDateTime {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
