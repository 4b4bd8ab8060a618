use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod validation;

pub use validation::{validate_ingest_event, ValidationError};

/// How a property's value is produced for each emitted event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyValue {
    /// Sent verbatim.
    Fixed { value: String },
    /// Sent verbatim as a JSON number.
    Number { value: serde_json::Number },
    /// Uniform pick from `values`.
    Set { values: Vec<String> },
    /// Uniform integer in `[min, max]`.
    Range { min: i64, max: i64 },
    /// Fresh v4 UUID per emitted event.
    Uuid,
}

impl PropertyValue {
    pub fn fixed(value: impl Into<String>) -> Self {
        PropertyValue::Fixed {
            value: value.into(),
        }
    }

    /// Returns true for values that are randomized per event.
    pub fn is_lookalike(&self) -> bool {
        !matches!(
            self,
            PropertyValue::Fixed { .. } | PropertyValue::Number { .. }
        )
    }
}

impl Default for PropertyValue {
    fn default() -> Self {
        PropertyValue::fixed("")
    }
}

/// A single `key = value` entry of a template event.
///
/// Properties with an empty key are kept while editing but never emitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub key: String,
    #[serde(flatten)]
    pub value: PropertyValue,
}

impl PropertySpec {
    pub fn new(key: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    pub fn fixed(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, PropertyValue::fixed(value))
    }

    /// Checks the constraints that cannot be expressed in the type.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let PropertyValue::Range { min, max } = self.value {
            if min > max {
                return Err(ValidationError::InvertedRange {
                    key: self.key.clone(),
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// A usage event as composed by a user: the template that lookalikes and
/// backfills are derived from.
///
/// Missing fields deserialize as in [`UsageEvent::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageEvent {
    pub event_name: String,

    /// ISO-8601. Values without an offset are local time.
    pub timestamp: String,

    pub external_customer_id: String,

    /// UUIDv4, rotated after every preserved submission
    pub idempotency_key: String,

    #[serde(default)]
    pub properties: Vec<PropertySpec>,

    #[serde(default)]
    pub submitted: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub animating_submission: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submitted_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submitted_idempotency_key: Option<String>,
}

impl UsageEvent {
    /// Blank template stamped with the current local time and a fresh key.
    pub fn new() -> Self {
        Self {
            event_name: String::new(),
            timestamp: local_timestamp(Local::now()),
            external_customer_id: String::new(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            properties: Vec::new(),
            submitted: false,
            animating_submission: false,
            last_submitted_at: None,
            last_submitted_idempotency_key: None,
        }
    }

    /// Records a successful submission of this template.
    pub fn mark_submitted(&mut self, at: DateTime<Utc>) {
        self.submitted = true;
        self.animating_submission = true;
        self.last_submitted_at = Some(at.to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    /// Replaces the idempotency key so the next submission is not treated
    /// as a duplicate of the last one.
    pub fn rotate_idempotency_key(&mut self) {
        let previous = std::mem::replace(
            &mut self.idempotency_key,
            uuid::Uuid::new_v4().to_string(),
        );
        self.last_submitted_idempotency_key = Some(previous);
    }

    /// Resolves this template into its wire form, keeping its own
    /// idempotency key.
    pub fn to_ingest_event<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<IngestEvent, ValidationError> {
        Ok(IngestEvent {
            idempotency_key: self.idempotency_key.clone(),
            external_customer_id: self.external_customer_id.clone(),
            event_name: self.event_name.clone(),
            properties: crate::generator::resolve_properties(&self.properties, rng),
            timestamp: normalize_timestamp(&self.timestamp)?,
        })
    }
}

impl Default for UsageEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// An event in the shape the ingestion boundary accepts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestEvent {
    pub idempotency_key: String,
    pub external_customer_id: String,
    pub event_name: String,
    /// Flat map of string or number values
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// ISO-8601 UTC
    pub timestamp: String,
}

/// Formats a local time the way the composer stamps new templates
/// (`2024-03-01T09:30:00`, no offset, no fraction).
pub fn local_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Converts an ISO-8601 timestamp to absolute UTC with millisecond precision.
///
/// Accepts RFC 3339 (any offset) or a naive datetime, which is read as local
/// time.
pub fn normalize_timestamp(raw: &str) -> Result<String, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingTimestamp);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(format_utc(dt.with_timezone(&Utc)));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            let local = Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| ValidationError::InvalidTimestamp(raw.to_string()))?;
            return Ok(format_utc(local.with_timezone(&Utc)));
        }
    }

    Err(ValidationError::InvalidTimestamp(raw.to_string()))
}

pub(crate) fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
