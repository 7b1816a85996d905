//! Records: the observations fed into the aggregation engine.
//!
//! A record is a flat JSON object. Numeric properties with a metric rule are
//! folded into aggregate cells; any property can partition a dimension.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::RecordError;

/// Token used in partition keys for properties absent from a record.
pub const MISSING_VALUE: &str = "undefined";

/// A single observation, mapping property names to JSON values.
///
/// # Example
///
/// ```rust
/// use rollup::Record;
///
/// let record = Record::new().with("value", 50).with("mode", "fast");
/// assert_eq!(record.number("value"), Some(50.0));
/// assert_eq!(record.render("mode"), "fast");
/// assert_eq!(record.render("absent"), "undefined");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Returns the record with `property` set to `value`.
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(property.into(), value.into());
        self
    }

    /// Sets `property` to `value`, returning the previous value.
    pub fn insert(&mut self, property: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(property.into(), value.into())
    }

    /// Returns the raw value of a property.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.0.get(property)
    }

    /// Returns a property as a number, if present and numeric.
    pub fn number(&self, property: &str) -> Option<f64> {
        self.0.get(property).and_then(Value::as_f64)
    }

    /// Renders a property for use inside a partition key.
    ///
    /// Strings are used verbatim, other values as compact JSON, and absent
    /// properties as [`MISSING_VALUE`]. Whole numbers render without a
    /// fraction, so `1` and `1.0` land in the same partition.
    pub fn render(&self, property: &str) -> String {
        match self.0.get(property) {
            None => MISSING_VALUE.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => render_number(n),
            Some(other) => other.to_string(),
        }
    }

    /// Iterates over `(property, value)` pairs in property order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no properties.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RecordError::NotAnObject {
                found: kind_of(&other).to_string(),
            }),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Whole floats below 1e21 print as integers; everything else keeps the JSON
/// form.
fn render_number(number: &Number) -> String {
    match number.as_f64() {
        Some(v) if number.is_f64() && v.fract() == 0.0 && v.abs() < 1e21 => {
            if v == 0.0 {
                "0".to_string()
            } else {
                format!("{v:.0}")
            }
        }
        _ => number.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
