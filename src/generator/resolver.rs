use crate::event::{PropertySpec, PropertyValue};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};
use uuid::{Builder, Uuid};

/// Resolves one property value for a single emitted event.
///
/// Returns `None` when nothing can be drawn: an empty set, or an inverted
/// range that slipped past validation.
pub fn resolve_value<R: Rng + ?Sized>(value: &PropertyValue, rng: &mut R) -> Option<Value> {
    match value {
        PropertyValue::Uuid => Some(Value::String(random_uuid(rng).to_string())),
        PropertyValue::Set { values } => values.choose(rng).cloned().map(Value::String),
        PropertyValue::Range { min, max } => {
            if min > max {
                return None;
            }
            Some(Value::from(rng.gen_range(*min..=*max)))
        }
        PropertyValue::Fixed { value } => Some(Value::String(value.clone())),
        PropertyValue::Number { value } => Some(Value::Number(value.clone())),
    }
}

/// Resolves a property into the `(key, value)` pair it contributes to a
/// payload. Properties with an empty key contribute nothing.
pub fn resolve_property<R: Rng + ?Sized>(
    spec: &PropertySpec,
    rng: &mut R,
) -> Option<(String, Value)> {
    if spec.key.is_empty() {
        return None;
    }
    resolve_value(&spec.value, rng).map(|value| (spec.key.clone(), value))
}

/// Resolves every property independently into a flat payload map.
///
/// Later duplicates of a key overwrite earlier ones.
pub fn resolve_properties<R: Rng + ?Sized>(
    specs: &[PropertySpec],
    rng: &mut R,
) -> Map<String, Value> {
    specs
        .iter()
        .filter_map(|spec| resolve_property(spec, rng))
        .collect()
}

/// UUIDv4 drawn from the supplied random source.
pub fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    Builder::from_random_bytes(rng.gen()).into_uuid()
}
