//! Tolerant serde deserializers for Tiny's loosely typed JSON.
//!
//! The API serializes ids and money either as strings or bare numbers
//! depending on endpoint and field, so everything funnels through these.

use serde::de::{Deserializer, Error, Unexpected};
use serde::Deserialize;
use serde_json::Value;

/// Accept a JSON number or numeric string (dot or comma decimal) as f64.
/// Fails on anything else; use `flexible_f64_lenient` where a blank or
/// null field should read as zero.
pub fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_f64(&value)
        .ok_or_else(|| Error::invalid_value(unexpected(&value), &"a number or numeric string"))
}

/// Like `flexible_f64`, but null/empty parses as 0.0.
pub fn flexible_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(0.0),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        _ => value_to_f64(&value)
            .ok_or_else(|| Error::invalid_value(unexpected(&value), &"a number or numeric string")),
    }
}

/// Accept a JSON string or integer as an id string.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::invalid_value(
            unexpected(&value),
            &"a string or integer id",
        )),
    }
}

/// Optional id: null or absent maps to None.
pub fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(Error::invalid_value(
            unexpected(&value),
            &"a string or integer id",
        )),
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
}

fn unexpected(value: &Value) -> Unexpected<'_> {
    match value {
        Value::Null => Unexpected::Unit,
        Value::Bool(b) => Unexpected::Bool(*b),
        Value::Number(_) => Unexpected::Other("number"),
        Value::String(s) => Unexpected::Str(s),
        Value::Array(_) => Unexpected::Seq,
        Value::Object(_) => Unexpected::Map,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "flexible_f64")]
        strict: f64,
        #[serde(default, deserialize_with = "flexible_f64_lenient")]
        lenient: f64,
        #[serde(deserialize_with = "id_string")]
        id: String,
    }

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        let p: Probe =
            serde_json::from_str(r#"{"strict": "12,50", "lenient": 3.5, "id": 42}"#).unwrap();
        assert_eq!(p.strict, 12.5);
        assert_eq!(p.lenient, 3.5);
        assert_eq!(p.id, "42");
    }

    #[test]
    fn lenient_maps_blank_to_zero() {
        let p: Probe =
            serde_json::from_str(r#"{"strict": "1.0", "lenient": "", "id": "7"}"#).unwrap();
        assert_eq!(p.lenient, 0.0);
    }

    #[test]
    fn strict_rejects_garbage() {
        let r: Result<Probe, _> =
            serde_json::from_str(r#"{"strict": "abc", "lenient": 0, "id": "7"}"#);
        assert!(r.is_err());
    }
}
