//! Backfill configuration, date policy and per-day expansion.

use crate::event::{PropertySpec, PropertyValue, ValidationError};
use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod expansion;
pub mod policy;
mod wire;

pub use expansion::{date_chunks, days_inclusive, noon_utc, DEFAULT_MAX_DAYS_PER_CHUNK};
pub use policy::{parse_date, DateRangeError, DateRangePolicy};

/// Per-day count used when a configuration does not name one.
pub const DEFAULT_EVENTS_PER_DAY: u32 = 100;

/// How many events each calendar day receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "wire::EventsPerDayRepr", into = "wire::EventsPerDayRepr")]
pub enum EventsPerDay {
    Fixed(u32),
    /// Uniform draw in `[min, max]`, independently per day
    Range { min: u32, max: u32 },
}

impl Default for EventsPerDay {
    fn default() -> Self {
        EventsPerDay::Fixed(DEFAULT_EVENTS_PER_DAY)
    }
}

impl EventsPerDay {
    /// Draws the count for one day.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match *self {
            EventsPerDay::Fixed(n) => n,
            EventsPerDay::Range { min, max } if min <= max => rng.gen_range(min..=max),
            EventsPerDay::Range { min, .. } => min,
        }
    }
}

/// Backfill request as submitted by the composer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub external_customer_id: Option<String>,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub events_per_day: EventsPerDay,
    #[serde(default, with = "wire::properties")]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Overrides `external_customer_id` on every generated event
    #[serde(default)]
    pub backfill_customer_id: Option<String>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub replace_existing_events: bool,
}

/// Backfill configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum BackfillError {
    MissingField(&'static str),
    Date(DateRangeError),
    Property(ValidationError),
    InvertedEventsPerDay { min: u32, max: u32 },
}

impl fmt::Display for BackfillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackfillError::MissingField(field) => write!(f, "{} is required", field),
            BackfillError::Date(e) => write!(f, "{}", e),
            BackfillError::Property(e) => write!(f, "{}", e),
            BackfillError::InvertedEventsPerDay { min, max } => write!(
                f,
                "events_per_day range is inverted: min {} is greater than max {}",
                min, max
            ),
        }
    }
}

impl std::error::Error for BackfillError {}

impl From<DateRangeError> for BackfillError {
    fn from(e: DateRangeError) -> Self {
        BackfillError::Date(e)
    }
}

impl From<ValidationError> for BackfillError {
    fn from(e: ValidationError) -> Self {
        BackfillError::Property(e)
    }
}

impl BackfillConfig {
    /// Customer every generated event is attributed to: the backfill-level
    /// override when set, otherwise the event's own customer.
    pub fn effective_customer_id(&self) -> Option<&str> {
        non_empty(&self.backfill_customer_id).or_else(|| non_empty(&self.external_customer_id))
    }

    /// Checks required fields, the date window and property constraints.
    ///
    /// Returns the validated `(start, end)` dates.
    pub fn validate(
        &self,
        policy: &DateRangePolicy,
    ) -> Result<(NaiveDate, NaiveDate), BackfillError> {
        if self.event_name.trim().is_empty() {
            return Err(BackfillError::MissingField("event_name"));
        }
        if self.effective_customer_id().is_none() {
            return Err(BackfillError::MissingField("external_customer_id"));
        }

        let start = policy
            .validate_start(&self.start_date)?
            .ok_or(BackfillError::MissingField("start_date"))?;
        let end = policy
            .validate_end(&self.end_date, &self.start_date)?
            .ok_or(BackfillError::MissingField("end_date"))?;

        if let EventsPerDay::Range { min, max } = self.events_per_day {
            if min > max {
                return Err(BackfillError::InvertedEventsPerDay { min, max });
            }
        }

        for (key, value) in &self.properties {
            PropertySpec::new(key.clone(), value.clone()).validate()?;
        }

        Ok((start, end))
    }

    /// Validates the configuration and fixes every random choice that is
    /// made once per job: the per-day event counts.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        job_id: String,
        policy: &DateRangePolicy,
        rng: &mut R,
    ) -> Result<ResolvedBackfill, BackfillError> {
        let (start, end) = self.validate(policy)?;

        let daily_counts = days_inclusive(start, end)
            .map(|date| DailyCount {
                date,
                events: self.events_per_day.draw(rng),
            })
            .collect();

        Ok(ResolvedBackfill {
            job_id,
            event_name: self.event_name.clone(),
            external_customer_id: self
                .effective_customer_id()
                .map(str::to_string)
                .unwrap_or_default(),
            backfill_customer_id: non_empty(&self.backfill_customer_id).map(str::to_string),
            start_date: start,
            end_date: end,
            events_per_day: self.events_per_day,
            properties: self.properties.clone(),
            replace_existing_events: self.replace_existing_events,
            daily_counts,
        })
    }
}

/// Number of events generated for one calendar day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub events: u32,
}

/// A validated backfill with its job id and concrete per-day counts.
///
/// This is what test mode hands back and what the execution backend
/// receives as its config file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBackfill {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub event_name: String,
    /// Effective customer, already overridden by `backfill_customer_id`
    pub external_customer_id: String,
    pub backfill_customer_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub events_per_day: EventsPerDay,
    #[serde(with = "wire::properties")]
    pub properties: BTreeMap<String, PropertyValue>,
    pub replace_existing_events: bool,
    pub daily_counts: Vec<DailyCount>,
}

impl ResolvedBackfill {
    pub fn total_events(&self) -> u64 {
        self.daily_counts.iter().map(|d| u64::from(d.events)).sum()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
