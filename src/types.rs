use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;
use crate::error::MalformedResponse;
use crate::ws::ResponseParser;

/// A decoded classification reply: the JSON object returned by the service.
///
/// The service decides the keys (typically one score per wake-word model), so
/// they are kept as-is rather than mapped onto a fixed struct. Use
/// [`crate::Client::classify_as`] to decode into a caller-defined type.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classification(Map<String, Value>);

impl Classification {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Numeric value stored under `key`, if it is a number.
    #[must_use]
    pub fn score(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl Deref for Classification {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Classification> for Value {
    fn from(classification: Classification) -> Self {
        Value::Object(classification.0)
    }
}

/// Parses a reply as a single JSON value of type `M`.
///
/// For [`Classification`] the reply must be a JSON object; arrays, scalars
/// and invalid JSON are all [`crate::error::Kind::MalformedResponse`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl<M: serde::de::DeserializeOwned> ResponseParser<M> for JsonParser {
    fn parse(&self, bytes: &[u8]) -> Result<M> {
        if bytes.is_empty() {
            return Err(MalformedResponse {
                reason: "empty reply".to_owned(),
            }
            .into());
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
