use super::IngestEvent;
use chrono::DateTime;
use std::fmt;

/// Validation errors for composed and wire events
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingEventName,
    MissingCustomerId,
    MissingIdempotencyKey,
    MissingTimestamp,
    InvalidTimestamp(String),
    InvertedRange { key: String, min: i64, max: i64 },
    EmptyBatch,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingEventName => write!(f, "event_name is required"),
            ValidationError::MissingCustomerId => write!(f, "external_customer_id is required"),
            ValidationError::MissingIdempotencyKey => write!(f, "idempotency_key is required"),
            ValidationError::MissingTimestamp => write!(f, "timestamp is required"),
            ValidationError::InvalidTimestamp(ts) => {
                write!(f, "invalid timestamp '{}': expected ISO-8601", ts)
            }
            ValidationError::InvertedRange { key, min, max } => write!(
                f,
                "property '{}' has an inverted range: min {} is greater than max {}",
                key, min, max
            ),
            ValidationError::EmptyBatch => write!(f, "at least one event is required"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates an event in wire form before it is forwarded upstream.
///
/// Rules:
/// - Required fields: idempotency_key, external_customer_id, event_name, timestamp
/// - Timestamp: RFC 3339 with an explicit offset (wire events are absolute)
pub fn validate_ingest_event(event: &IngestEvent) -> Result<(), ValidationError> {
    if event.idempotency_key.is_empty() {
        return Err(ValidationError::MissingIdempotencyKey);
    }
    if event.external_customer_id.is_empty() {
        return Err(ValidationError::MissingCustomerId);
    }
    if event.event_name.is_empty() {
        return Err(ValidationError::MissingEventName);
    }
    if event.timestamp.is_empty() {
        return Err(ValidationError::MissingTimestamp);
    }

    if DateTime::parse_from_rfc3339(&event.timestamp).is_err() {
        return Err(ValidationError::InvalidTimestamp(event.timestamp.clone()));
    }

    Ok(())
}
