use crate::types::traits::types::{Month, StartEndDateTime, Year};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Anything that can be resolved into an inclusive UTC time window.
///
/// A single instant resolves to a zero-length window; a date, month or year
/// resolves to its full span, so `read().start(date).end(date)` covers the
/// whole day.
pub trait AnyDateTime {
    fn get_datetime_range(self) -> Option<StartEndDateTime>;
}

impl AnyDateTime for NaiveDateTime {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        let dt = Utc.from_utc_datetime(&self);
        Some(StartEndDateTime { start: dt, end: dt })
    }
}

impl AnyDateTime for DateTime<Local> {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        let dt = self.with_timezone(&Utc);
        Some(StartEndDateTime { start: dt, end: dt })
    }
}

impl AnyDateTime for DateTime<Utc> {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        Some(StartEndDateTime {
            start: self,
            end: self,
        })
    }
}

impl AnyDateTime for DateTime<FixedOffset> {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        let dt = self.with_timezone(&Utc);
        Some(StartEndDateTime { start: dt, end: dt })
    }
}

impl AnyDateTime for NaiveDate {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        let start = self
            .and_hms_opt(0, 0, 0)
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))?;
        let end = self
            .and_hms_milli_opt(23, 59, 59, 999)
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))?;
        Some(StartEndDateTime { start, end })
    }
}

impl AnyDateTime for &str {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        if let Some(dt) = parse_instant(self) {
            return dt.get_datetime_range();
        }
        if let Ok(naive_date) = NaiveDate::parse_from_str(self.trim(), "%Y-%m-%d") {
            return naive_date.get_datetime_range();
        }
        if let Ok(month) = self.trim().parse::<Month>() {
            return month.get_datetime_range();
        }
        None
    }
}

impl AnyDateTime for String {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        self.as_str().get_datetime_range()
    }
}

impl AnyDateTime for Year {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        Some(StartEndDateTime {
            start: NaiveDate::from_ymd_opt(self.0, 1, 1)?
                .get_datetime_range()?
                .start,
            end: NaiveDate::from_ymd_opt(self.0, 12, 31)?
                .get_datetime_range()?
                .end,
        })
    }
}

impl AnyDateTime for Month {
    fn get_datetime_range(self) -> Option<StartEndDateTime> {
        Some(StartEndDateTime {
            start: self.first_day()?.get_datetime_range()?.start,
            end: self.last_day()?.get_datetime_range()?.end,
        })
    }
}

/// Parses a single instant. Offsets are honoured; naive forms are read as UTC.
pub(crate) fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive_dt));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_covers_whole_day() {
        let range = NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .get_datetime_range()
            .unwrap();
        assert_eq!(range.start.to_rfc3339(), "2023-06-01T00:00:00+00:00");
        assert_eq!(
            range.end,
            Utc.with_ymd_and_hms(2023, 6, 1, 23, 59, 59).unwrap()
                + chrono::Duration::milliseconds(999)
        );
    }

    #[test]
    fn test_str_forms() {
        let day = "2023-06-01".get_datetime_range().unwrap();
        assert_eq!(day.start, Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());

        let offset = "2023-06-01T09:00:00+09:00".get_datetime_range().unwrap();
        assert_eq!(offset.start, Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());

        let month = "2023-02".get_datetime_range().unwrap();
        assert_eq!(month.end.date_naive(), NaiveDate::from_ymd_opt(2023, 2, 28).unwrap());

        assert!("yesterday".get_datetime_range().is_none());
    }

    #[test]
    fn test_year_range() {
        let range = Year(2023).get_datetime_range().unwrap();
        assert_eq!(range.start.date_naive(), NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        assert_eq!(range.end.date_naive(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }
}
