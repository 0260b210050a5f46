//! Weekday arithmetic and earnings-relative date windows.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// `date` itself if it is a weekday, otherwise the Friday before.
pub fn roll_back_to_weekday(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date - Duration::days(2),
        _ => date,
    }
}

/// `date` itself if it is a weekday, otherwise the Monday after.
pub fn roll_forward_to_weekday(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date + Duration::days(2),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub earliest: NaiveDate,
    pub latest: NaiveDate,
}

impl DateWindow {
    pub fn new(earliest: NaiveDate, latest: NaiveDate) -> Self {
        Self { earliest, latest }
    }

    /// Window of `earnings + offset ± tolerance`, widened to whole weekdays
    /// and kept on the same side of the announcement as `offset`.
    pub fn around_earnings(earnings: NaiveDate, offset: i64, tolerance: i64) -> Self {
        if offset == 0 {
            return Self::new(earnings, earnings);
        }

        let center = earnings + Duration::days(offset);
        let mut earliest = roll_back_to_weekday(center - Duration::days(tolerance));
        let mut latest = roll_forward_to_weekday(center + Duration::days(tolerance));

        if offset < 0 && latest >= earnings {
            latest = roll_back_to_weekday(earnings - Duration::days(1));
        }
        if offset > 0 && earliest <= earnings {
            earliest = roll_forward_to_weekday(earnings + Duration::days(1));
        }

        Self::new(earliest, latest)
    }

    /// Window from `earnings + first` to `earnings + last`, widened to whole
    /// weekdays.
    pub fn relative(earnings: NaiveDate, first: i64, last: i64) -> Self {
        Self::new(
            roll_back_to_weekday(earnings + Duration::days(first)),
            roll_forward_to_weekday(earnings + Duration::days(last)),
        )
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.earliest <= date && date <= self.latest
    }

    pub fn is_empty(&self) -> bool {
        self.earliest > self.latest
    }

    /// Every calendar date in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let latest = self.latest;
        self.earliest.iter_days().take_while(move |d| *d <= latest)
    }
}
