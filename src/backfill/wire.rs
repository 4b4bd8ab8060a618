// JSON shapes accepted by the backfill boundary.
//
// events_per_day: 100 | {"type": "range", "min": 1, "max": 10}
// property value: "fixed" | 42 | {"type": "set", "values": [...]}
//                 | {"type": "range", "min": 0, "max": 9} | {"useUUID": true}
//
// "useUUID": true wins over any other field; "useUUID": false is ignored.

use super::EventsPerDay;
use crate::event::PropertyValue;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventsPerDayRepr {
    Fixed(u32),
    Tagged(TaggedCount),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaggedCount {
    Range { min: u32, max: u32 },
}

impl From<EventsPerDayRepr> for EventsPerDay {
    fn from(repr: EventsPerDayRepr) -> Self {
        match repr {
            EventsPerDayRepr::Fixed(n) => EventsPerDay::Fixed(n),
            EventsPerDayRepr::Tagged(TaggedCount::Range { min, max }) => {
                EventsPerDay::Range { min, max }
            }
        }
    }
}

impl From<EventsPerDay> for EventsPerDayRepr {
    fn from(value: EventsPerDay) -> Self {
        match value {
            EventsPerDay::Fixed(n) => EventsPerDayRepr::Fixed(n),
            EventsPerDay::Range { min, max } => {
                EventsPerDayRepr::Tagged(TaggedCount::Range { min, max })
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Text(String),
    Number(serde_json::Number),
    Uuid {
        #[serde(rename = "useUUID", deserialize_with = "only_true")]
        use_uuid: bool,
    },
    Generated(Generated),
    /// `{"useUUID": false}` with nothing else
    Off {
        #[serde(rename = "useUUID")]
        use_uuid: bool,
    },
}

fn only_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    if bool::deserialize(deserializer)? {
        Ok(true)
    } else {
        Err(D::Error::custom("useUUID is off"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Generated {
    Set { values: Vec<String> },
    Range { min: i64, max: i64 },
}

impl From<WireValue> for PropertyValue {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Text(value) => PropertyValue::Fixed { value },
            WireValue::Number(value) => PropertyValue::Number { value },
            WireValue::Uuid { .. } => PropertyValue::Uuid,
            WireValue::Off { .. } => PropertyValue::default(),
            WireValue::Generated(Generated::Set { values }) => PropertyValue::Set { values },
            WireValue::Generated(Generated::Range { min, max }) => {
                PropertyValue::Range { min, max }
            }
        }
    }
}

impl From<&PropertyValue> for WireValue {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Fixed { value } => WireValue::Text(value.clone()),
            PropertyValue::Number { value } => WireValue::Number(value.clone()),
            PropertyValue::Set { values } => WireValue::Generated(Generated::Set {
                values: values.clone(),
            }),
            PropertyValue::Range { min, max } => WireValue::Generated(Generated::Range {
                min: *min,
                max: *max,
            }),
            PropertyValue::Uuid => WireValue::Uuid { use_uuid: true },
        }
    }
}

/// `serde(with)` adapter for a `key -> PropertyValue` map in wire form.
pub mod properties {
    use super::WireValue;
    use crate::event::PropertyValue;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, PropertyValue>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(k, v)| (k, WireValue::from(v)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, PropertyValue>, D::Error> {
        let wire = BTreeMap::<String, WireValue>::deserialize(deserializer)?;
        Ok(wire.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}
