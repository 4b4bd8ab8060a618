//! Lookalike event generation.
//!
//! A template event is expanded into any number of derived events. Every
//! derived event gets its own idempotency key and its own draw for each
//! randomized property. All randomness comes from the caller's `Rng`, so a
//! seeded generator reproduces a batch exactly.

use crate::event::{normalize_timestamp, IngestEvent, UsageEvent, ValidationError};
use rand::Rng;

mod resolver;

pub use resolver::{random_uuid, resolve_properties, resolve_property, resolve_value};

/// Produces `count` events derived from `template`.
///
/// The template's own idempotency key is never reused. Its timestamp is
/// normalized to UTC once and shared by every derived event.
pub fn generate_lookalikes<R: Rng + ?Sized>(
    template: &UsageEvent,
    count: usize,
    rng: &mut R,
) -> Result<Vec<IngestEvent>, ValidationError> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let timestamp = normalize_timestamp(&template.timestamp)?;

    Ok((0..count)
        .map(|_| IngestEvent {
            idempotency_key: random_uuid(rng).to_string(),
            external_customer_id: template.external_customer_id.clone(),
            event_name: template.event_name.clone(),
            properties: resolve_properties(&template.properties, rng),
            timestamp: timestamp.clone(),
        })
        .collect())
}
