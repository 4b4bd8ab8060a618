use chrono::{Duration, Local, NaiveDate};
use std::fmt;

/// How far back a backfill may reach.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;

/// Most recent days a backfill may not touch, so it never overlaps events
/// still arriving through normal ingestion.
pub const DEFAULT_GRACE_DAYS: i64 = 2;

/// Date-range validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum DateRangeError {
    OutOfRange(String),
    TooOld { date: NaiveDate, minimum: NaiveDate },
    TooRecent { date: NaiveDate, maximum: NaiveDate },
    MissingStart,
    BeforeStart { start: NaiveDate, end: NaiveDate },
}

impl fmt::Display for DateRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateRangeError::OutOfRange(raw) => {
                write!(f, "invalid date '{}': expected YYYY-MM-DD", raw)
            }
            DateRangeError::TooOld { date, minimum } => write!(
                f,
                "date {} is too far in the past (earliest allowed is {})",
                date, minimum
            ),
            DateRangeError::TooRecent { date, maximum } => write!(
                f,
                "date {} is too recent (latest allowed is {})",
                date, maximum
            ),
            DateRangeError::MissingStart => write!(f, "please set a start date first"),
            DateRangeError::BeforeStart { start, end } => write!(
                f,
                "end date {} must be on or after the start date {}",
                end, start
            ),
        }
    }
}

impl std::error::Error for DateRangeError {}

/// Window of calendar dates a backfill may cover.
///
/// Both bounds are inclusive and date-granular:
/// `today - lookback_days <= date <= today - grace_days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRangePolicy {
    today: NaiveDate,
    lookback_days: i64,
    grace_days: i64,
}

impl DateRangePolicy {
    pub fn new(today: NaiveDate) -> Self {
        Self::with_window(today, DEFAULT_LOOKBACK_DAYS, DEFAULT_GRACE_DAYS)
    }

    pub fn with_window(today: NaiveDate, lookback_days: i64, grace_days: i64) -> Self {
        Self {
            today,
            lookback_days,
            grace_days,
        }
    }

    /// Policy anchored at the local calendar date.
    pub fn today() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn minimum_date(&self) -> NaiveDate {
        self.today - Duration::days(self.lookback_days)
    }

    pub fn maximum_date(&self) -> NaiveDate {
        self.today - Duration::days(self.grace_days)
    }

    /// Validates a start date. Empty input is "not provided yet".
    pub fn validate_start(&self, raw: &str) -> Result<Option<NaiveDate>, DateRangeError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }

        let date = parse_date(raw)?;
        if date < self.minimum_date() {
            return Err(DateRangeError::TooOld {
                date,
                minimum: self.minimum_date(),
            });
        }
        if date > self.maximum_date() {
            return Err(DateRangeError::TooRecent {
                date,
                maximum: self.maximum_date(),
            });
        }

        Ok(Some(date))
    }

    /// Validates an end date against the (raw) start date.
    pub fn validate_end(
        &self,
        raw: &str,
        start_raw: &str,
    ) -> Result<Option<NaiveDate>, DateRangeError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        if start_raw.trim().is_empty() {
            return Err(DateRangeError::MissingStart);
        }

        let end = parse_date(raw)?;
        let start = parse_date(start_raw)?;
        if end < start {
            return Err(DateRangeError::BeforeStart { start, end });
        }
        if end > self.maximum_date() {
            return Err(DateRangeError::TooRecent {
                date: end,
                maximum: self.maximum_date(),
            });
        }

        Ok(Some(end))
    }
}

/// Parses the date part of `YYYY-MM-DD` or an ISO-8601 datetime.
pub fn parse_date(raw: &str) -> Result<NaiveDate, DateRangeError> {
    let date_part = raw.trim().split('T').next().unwrap_or_default();
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| DateRangeError::OutOfRange(raw.to_string()))
}
