use super::ResolvedBackfill;
use crate::event::{format_utc, IngestEvent, PropertySpec, UsageEvent, ValidationError};
use crate::generator::generate_lookalikes;
use chrono::{Duration, NaiveDate};
use rand::Rng;

/// Largest window a single upstream backfill covers.
pub const DEFAULT_MAX_DAYS_PER_CHUNK: u32 = 10;

/// Every calendar day from `start` to `end`, both inclusive.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |day| *day <= end)
}

/// Splits `[start, end]` into consecutive windows of at most `max_days`.
pub fn date_chunks(start: NaiveDate, end: NaiveDate, max_days: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let span = Duration::days(i64::from(max_days.max(1)) - 1);
    let mut chunks = Vec::new();
    let mut current = start;

    while current <= end {
        let chunk_end = (current + span).min(end);
        chunks.push((current, chunk_end));
        current = chunk_end + Duration::days(1);
    }

    chunks
}

/// Timestamp every backfilled event of `date` carries.
pub fn noon_utc(date: NaiveDate) -> String {
    date.and_hms_opt(12, 0, 0)
        .map(|noon| format_utc(noon.and_utc()))
        .unwrap_or_default()
}

impl ResolvedBackfill {
    /// Template event the generator runs against for `date`.
    pub fn template_for(&self, date: NaiveDate) -> UsageEvent {
        UsageEvent {
            event_name: self.event_name.clone(),
            timestamp: noon_utc(date),
            external_customer_id: self.external_customer_id.clone(),
            properties: self
                .properties
                .iter()
                .map(|(key, value)| PropertySpec::new(key.clone(), value.clone()))
                .collect(),
            ..UsageEvent::new()
        }
    }

    /// Generates the events for every day of the job.
    pub fn expand<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<IngestEvent>, ValidationError> {
        self.expand_between(self.start_date, self.end_date, rng)
    }

    /// Generates the events for the days of the job that fall in `[from, to]`.
    pub fn expand_between<R: Rng + ?Sized>(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        rng: &mut R,
    ) -> Result<Vec<IngestEvent>, ValidationError> {
        let mut events = Vec::new();
        for day in self
            .daily_counts
            .iter()
            .filter(|d| d.date >= from && d.date <= to)
        {
            let template = self.template_for(day.date);
            events.extend(generate_lookalikes(&template, day.events as usize, rng)?);
        }
        Ok(events)
    }
}
