use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, DeserializeOwned, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// Payload type that keeps the `data` field exactly as it appeared on the wire.
pub type RawPayload = Box<RawValue>;

/// Application-level envelope carried in every message body.
///
/// On the wire this is `{"event": "<name>", "data": <payload>}`. The payload
/// type is chosen by the consumer: `serde_json::Value` for dynamic handling,
/// a concrete struct when every message on the queue shares one schema, or
/// [`RawPayload`] to forward the payload untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event<P = serde_json::Value> {
    #[serde(rename = "event")]
    pub name: String,

    #[serde(rename = "data")]
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(name: impl Into<String>, payload: P) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

}

// Only the object form is an envelope; a derived impl would also take
// `["name", payload]`.
impl<'de, P: Deserialize<'de>> Deserialize<'de> for Event<P> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(EnvelopeVisitor(PhantomData))
    }
}

struct EnvelopeVisitor<P>(PhantomData<P>);

impl<'de, P: Deserialize<'de>> Visitor<'de> for EnvelopeVisitor<P> {
    type Value = Event<P>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object with `event` and `data` fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut name: Option<String> = None;
        let mut payload: Option<P> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "event" => {
                    if name.is_some() {
                        return Err(de::Error::duplicate_field("event"));
                    }
                    name = Some(map.next_value()?);
                }
                "data" => {
                    if payload.is_some() {
                        return Err(de::Error::duplicate_field("data"));
                    }
                    payload = Some(map.next_value()?);
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(Event {
            name: name.ok_or_else(|| <A::Error as de::Error>::missing_field("event"))?,
            payload: payload.ok_or_else(|| <A::Error as de::Error>::missing_field("data"))?,
        })
    }
}

impl Event<serde_json::Value> {
    /// Reinterprets the dynamic payload as `T`.
    ///
    /// Handlers match on [`Event::name`] first and then pick the schema for
    /// that event type. The error text is recognised as non-retryable by the
    /// default classifier.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Event<T>, String> {
        let Event { name, payload } = self;
        match serde_json::from_value::<T>(payload) {
            Ok(payload) => Ok(Event { name, payload }),
            Err(e) => Err(format!(
                "event data is not of type {}: {}",
                std::any::type_name::<T>(),
                e
            )),
        }
    }
}

impl Event<RawPayload> {
    pub fn raw_bytes(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }
}
