//! Form state for composing events and backfills.
//!
//! Each composer owns its working template and exposes small reducer-style
//! methods. Nothing here performs I/O: callers build a payload, submit it
//! through [`crate::client::SubmissionClient`] and report the outcome back
//! with `apply_success` or `set_error`.

use crate::backfill::{BackfillConfig, BackfillError, DateRangeError, DateRangePolicy, EventsPerDay};
use crate::event::{IngestEvent, PropertySpec, PropertyValue, UsageEvent, ValidationError};
use crate::generator::generate_lookalikes;
use crate::jobs::{JobList, NewJob};
use chrono::Utc;
use rand::Rng;
use std::collections::BTreeMap;


/// Upper bound on lookalikes generated from the event form.
pub const MAX_GENERATED_EVENTS: usize = 20;

/// Bounds for each side of the backfill events-per-day range.
pub const MIN_BACKFILL_EVENTS_PER_DAY: u32 = 1;
pub const MAX_BACKFILL_EVENTS_PER_DAY: u32 = 10;

/// What happens to the working template after a successful submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionPolicy {
    /// Start over from a blank template.
    DiscardAndReset,
    /// Keep every field, mark the template submitted and rotate its
    /// idempotency key so it can be sent again.
    PreserveAndContinue,
}

impl SubmissionPolicy {
    pub fn from_preserve(preserve_form_data: bool) -> Self {
        if preserve_form_data {
            SubmissionPolicy::PreserveAndContinue
        } else {
            SubmissionPolicy::DiscardAndReset
        }
    }
}

/// Edit of one envelope field of an event.
#[derive(Clone, Debug, PartialEq)]
pub enum EventEdit {
    EventName(String),
    Timestamp(String),
    ExternalCustomerId(String),
    IdempotencyKey(String),
    AnimatingSubmission(bool),
}

/// Edit of one property of an event.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyEdit {
    Key(String),
    /// Sets a fixed value; ignored while the property is randomized
    FixedValue(String),
    /// Off returns to an empty fixed value; on starts an empty set
    Lookalike(bool),
    /// Switch to a set (emptied) or a range (reset to 0..=0)
    KindSet,
    KindRange,
    SetValues(Vec<String>),
    Range { min: i64, max: i64 },
    UseUuid(bool),
}

impl PropertyEdit {
    fn apply(self, spec: &mut PropertySpec) {
        match self {
            PropertyEdit::Key(key) => spec.key = key,
            PropertyEdit::FixedValue(value) => {
                if !spec.value.is_lookalike() {
                    spec.value = PropertyValue::Fixed { value };
                }
            }
            PropertyEdit::Lookalike(true) => {
                if !spec.value.is_lookalike() {
                    spec.value = PropertyValue::Set { values: Vec::new() };
                }
            }
            PropertyEdit::Lookalike(false) | PropertyEdit::UseUuid(false) => {
                spec.value = PropertyValue::default();
            }
            PropertyEdit::KindSet => spec.value = PropertyValue::Set { values: Vec::new() },
            PropertyEdit::KindRange => spec.value = PropertyValue::Range { min: 0, max: 0 },
            PropertyEdit::SetValues(values) => spec.value = PropertyValue::Set { values },
            PropertyEdit::Range { min, max } => spec.value = PropertyValue::Range { min, max },
            PropertyEdit::UseUuid(true) => spec.value = PropertyValue::Uuid,
        }
    }
}

fn apply_event_edit(event: &mut UsageEvent, edit: EventEdit) {
    match edit {
        EventEdit::EventName(v) => event.event_name = v,
        EventEdit::Timestamp(v) => event.timestamp = v,
        EventEdit::ExternalCustomerId(v) => event.external_customer_id = v,
        EventEdit::IdempotencyKey(v) => event.idempotency_key = v,
        EventEdit::AnimatingSubmission(v) => event.animating_submission = v,
    }
}

fn check_template(event: &UsageEvent) -> Result<(), ValidationError> {
    if event.event_name.trim().is_empty() {
        return Err(ValidationError::MissingEventName);
    }
    if event.external_customer_id.trim().is_empty() {
        return Err(ValidationError::MissingCustomerId);
    }
    event.properties.iter().try_for_each(PropertySpec::validate)
}

/// State of the interactive event form.
#[derive(Clone, Debug)]
pub struct EventComposer {
    pub events: Vec<UsageEvent>,
    /// Lookalikes to derive from the last event on submit
    pub generated_event_count: usize,
    pub is_submitting: bool,
    pub error: Option<String>,
}

impl Default for EventComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventComposer {
    pub fn new() -> Self {
        Self {
            events: vec![UsageEvent::new()],
            generated_event_count: 0,
            is_submitting: false,
            error: None,
        }
    }

    /// Starts from existing templates instead of a blank one.
    pub fn with_events(events: Vec<UsageEvent>) -> Self {
        Self {
            events,
            ..Self::new()
        }
    }

    pub fn add_event(&mut self) {
        self.events.push(UsageEvent::new());
    }

    pub fn update_event(&mut self, index: usize, edit: EventEdit) -> bool {
        match self.events.get_mut(index) {
            Some(event) => {
                apply_event_edit(event, edit);
                true
            }
            None => false,
        }
    }

    pub fn remove_event(&mut self, index: usize) -> bool {
        if index < self.events.len() {
            self.events.remove(index);
            true
        } else {
            false
        }
    }

    pub fn add_property(&mut self, event_index: usize) -> bool {
        match self.events.get_mut(event_index) {
            Some(event) => {
                event.properties.push(PropertySpec::default());
                true
            }
            None => false,
        }
    }

    pub fn update_property(
        &mut self,
        event_index: usize,
        property_index: usize,
        edit: PropertyEdit,
    ) -> bool {
        match self
            .events
            .get_mut(event_index)
            .and_then(|e| e.properties.get_mut(property_index))
        {
            Some(spec) => {
                edit.apply(spec);
                true
            }
            None => false,
        }
    }

    pub fn remove_property(&mut self, event_index: usize, property_index: usize) -> bool {
        match self.events.get_mut(event_index) {
            Some(event) if property_index < event.properties.len() => {
                event.properties.remove(property_index);
                true
            }
            _ => false,
        }
    }

    pub fn set_generated_event_count(&mut self, count: usize) {
        self.generated_event_count = count.min(MAX_GENERATED_EVENTS);
    }

    pub fn set_submitting(&mut self, is_submitting: bool) {
        self.is_submitting = is_submitting;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn mark_events_submitted(&mut self) {
        let now = Utc::now();
        for event in &mut self.events {
            event.mark_submitted(now);
        }
    }

    pub fn regenerate_idempotency_keys(&mut self) {
        for event in &mut self.events {
            event.rotate_idempotency_key();
        }
    }

    /// Every composed event in wire form, followed by the lookalikes of the
    /// last one.
    pub fn build_batch<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Vec<IngestEvent>, ValidationError> {
        let last = self.events.last().ok_or(ValidationError::EmptyBatch)?;
        for event in &self.events {
            check_template(event)?;
        }

        let mut batch = self
            .events
            .iter()
            .map(|event| event.to_ingest_event(rng))
            .collect::<Result<Vec<_>, _>>()?;
        batch.extend(generate_lookalikes(last, self.generated_event_count, rng)?);
        Ok(batch)
    }

    pub fn apply_success(&mut self, policy: SubmissionPolicy) {
        match policy {
            SubmissionPolicy::DiscardAndReset => self.reset(),
            SubmissionPolicy::PreserveAndContinue => {
                self.mark_events_submitted();
                self.regenerate_idempotency_keys();
                self.is_submitting = false;
                self.error = None;
            }
        }
    }
}

/// State of the backfill form.
#[derive(Clone, Debug)]
pub struct BackfillComposer {
    pub event: UsageEvent,
    policy: DateRangePolicy,
    start_date: String,
    end_date: String,
    start_error: Option<DateRangeError>,
    end_error: Option<DateRangeError>,
    events_per_day_min: u32,
    events_per_day_max: u32,
    backfill_customer_id: String,
    pub test_mode: bool,
    pub replace_existing_events: bool,
    pub is_submitting: bool,
    pub error: Option<String>,
    pub jobs: JobList,
}

impl BackfillComposer {
    pub fn new(policy: DateRangePolicy) -> Self {
        Self {
            event: UsageEvent::new(),
            policy,
            start_date: String::new(),
            end_date: String::new(),
            start_error: None,
            end_error: None,
            events_per_day_min: MIN_BACKFILL_EVENTS_PER_DAY,
            events_per_day_max: MAX_BACKFILL_EVENTS_PER_DAY,
            backfill_customer_id: String::new(),
            test_mode: false,
            replace_existing_events: false,
            is_submitting: false,
            error: None,
            jobs: JobList::new(),
        }
    }

    pub fn policy(&self) -> &DateRangePolicy {
        &self.policy
    }

    pub fn start_date(&self) -> &str {
        &self.start_date
    }

    pub fn end_date(&self) -> &str {
        &self.end_date
    }

    pub fn start_error(&self) -> Option<&DateRangeError> {
        self.start_error.as_ref()
    }

    pub fn end_error(&self) -> Option<&DateRangeError> {
        self.end_error.as_ref()
    }

    pub fn events_per_day(&self) -> (u32, u32) {
        (self.events_per_day_min, self.events_per_day_max)
    }

    pub fn backfill_customer_id(&self) -> &str {
        &self.backfill_customer_id
    }

    /// Sets the start date. A valid start later than the current end date
    /// moves the end date along with it; otherwise the end date is rechecked
    /// against the new start.
    pub fn set_start_date(&mut self, raw: &str) {
        self.start_date = raw.to_string();
        match self.policy.validate_start(raw) {
            Ok(Some(start)) => {
                self.start_error = None;
                let end = crate::backfill::parse_date(&self.end_date).ok();
                if end.map_or(false, |end| start > end) {
                    self.end_date = raw.to_string();
                    self.end_error = None;
                } else if !self.end_date.is_empty() {
                    self.end_error = self.policy.validate_end(&self.end_date, raw).err();
                }
            }
            Ok(None) => self.start_error = None,
            Err(e) => self.start_error = Some(e),
        }
    }

    pub fn set_end_date(&mut self, raw: &str) {
        self.end_date = raw.to_string();
        self.end_error = self.policy.validate_end(raw, &self.start_date).err();
    }

    pub fn set_events_per_day_min(&mut self, min: u32) {
        self.events_per_day_min = min.clamp(MIN_BACKFILL_EVENTS_PER_DAY, MAX_BACKFILL_EVENTS_PER_DAY);
    }

    pub fn set_events_per_day_max(&mut self, max: u32) {
        self.events_per_day_max = max.clamp(MIN_BACKFILL_EVENTS_PER_DAY, MAX_BACKFILL_EVENTS_PER_DAY);
    }

    /// While set, every generated event is attributed to this customer and
    /// the event's own customer field is read-only.
    pub fn set_backfill_customer_id(&mut self, customer_id: &str) {
        self.backfill_customer_id = customer_id.trim().to_string();
    }

    pub fn is_customer_locked(&self) -> bool {
        !self.backfill_customer_id.is_empty()
    }

    /// Returns false (and changes nothing) while the customer is locked.
    pub fn set_external_customer_id(&mut self, customer_id: &str) -> bool {
        if self.is_customer_locked() {
            return false;
        }
        self.event.external_customer_id = customer_id.to_string();
        true
    }

    pub fn update_event(&mut self, edit: EventEdit) -> bool {
        if let EventEdit::ExternalCustomerId(v) = &edit {
            return self.set_external_customer_id(v);
        }
        apply_event_edit(&mut self.event, edit);
        true
    }

    pub fn add_property(&mut self) {
        self.event.properties.push(PropertySpec::default());
    }

    pub fn update_property(&mut self, property_index: usize, edit: PropertyEdit) -> bool {
        match self.event.properties.get_mut(property_index) {
            Some(spec) => {
                edit.apply(spec);
                true
            }
            None => false,
        }
    }

    pub fn remove_property(&mut self, property_index: usize) -> bool {
        if property_index < self.event.properties.len() {
            self.event.properties.remove(property_index);
            true
        } else {
            false
        }
    }

    pub fn set_submitting(&mut self, is_submitting: bool) {
        self.is_submitting = is_submitting;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    /// Builds the configuration sent to the backfill boundary.
    ///
    /// Properties without a key and sets without values are left out.
    pub fn build_config(&self) -> Result<BackfillConfig, BackfillError> {
        if let Some(e) = self.start_error.as_ref().or(self.end_error.as_ref()) {
            return Err(BackfillError::Date(e.clone()));
        }

        let properties: BTreeMap<String, PropertyValue> = self
            .event
            .properties
            .iter()
            .filter(|spec| !spec.key.is_empty())
            .filter(|spec| !matches!(&spec.value, PropertyValue::Set { values } if values.is_empty()))
            .map(|spec| (spec.key.clone(), spec.value.clone()))
            .collect();

        let config = BackfillConfig {
            event_name: self.event.event_name.clone(),
            external_customer_id: Some(self.event.external_customer_id.clone())
                .filter(|s| !s.is_empty()),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            events_per_day: EventsPerDay::Range {
                min: self.events_per_day_min,
                max: self.events_per_day_max,
            },
            properties,
            backfill_customer_id: Some(self.backfill_customer_id.clone()).filter(|s| !s.is_empty()),
            test_mode: self.test_mode,
            replace_existing_events: self.replace_existing_events,
        };

        config.validate(&self.policy)?;
        Ok(config)
    }

    /// Records an accepted job and applies the post-submit policy.
    pub fn apply_success(&mut self, job_id: &str, policy: SubmissionPolicy) {
        if !self.test_mode {
            self.jobs.add_job(NewJob {
                id: Some(job_id.to_string()),
                name: format!("{} backfill", self.event.event_name),
                description: None,
                start_date: Some(self.start_date.clone()),
                end_date: Some(self.end_date.clone()),
                event_type: Some(self.event.event_name.clone()),
            });
        }

        self.is_submitting = false;
        self.error = None;
        match policy {
            SubmissionPolicy::DiscardAndReset => {
                self.event = UsageEvent::new();
                if !self.test_mode {
                    self.clear_range();
                }
            }
            SubmissionPolicy::PreserveAndContinue => {
                self.event.mark_submitted(Utc::now());
                self.event.rotate_idempotency_key();
            }
        }
    }

    fn clear_range(&mut self) {
        self.start_date.clear();
        self.end_date.clear();
        self.start_error = None;
        self.end_error = None;
        self.backfill_customer_id.clear();
    }
}
