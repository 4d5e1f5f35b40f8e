//! Conversion between plain JSON and Firestore typed values
//!
//! Firestore's REST surface wraps every value in a single-key object naming
//! its type (`{"stringValue": "a"}`, `{"integerValue": "7"}`, ...). Records
//! travel through this crate as plain `serde_json::Value`, so documents are
//! encoded on write and decoded on read.

use crate::error::{StoreError, StoreErrorCode};
use serde_json::{json, Map, Number, Value};

/// Encode a plain JSON value as a Firestore value
///
/// # Example
/// ```
/// use firebase_data_source::firestore::value::encode_value;
/// use serde_json::json;
///
/// assert_eq!(encode_value(&json!(7)), json!({"integerValue": "7"}));
/// assert_eq!(encode_value(&json!(1.5)), json!({"doubleValue": 1.5}));
/// ```
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                json!({ "integerValue": u.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Encode every field of an object
pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), encode_value(v))).collect()
}

/// Decode a Firestore value into plain JSON
///
/// Timestamps, references and bytes decode to their string forms; geo points
/// to `{"latitude", "longitude"}`; non-finite doubles to null.
pub fn decode_value(value: &Value) -> Result<Value, StoreError> {
    let Some((kind, inner)) = value.as_object().and_then(|m| m.iter().next()) else {
        return Err(malformed(value));
    };

    let decoded = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().ok_or_else(|| malformed(value))?),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            Value::Number(parsed.ok_or_else(|| malformed(value))?.into())
        }
        "doubleValue" => {
            let parsed = match inner {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            };
            parsed.and_then(Number::from_f64).map(Value::Number).unwrap_or(Value::Null)
        }
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => {
            Value::String(inner.as_str().ok_or_else(|| malformed(value))?.to_string())
        }
        "geoPointValue" => json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        }),
        "arrayValue" => {
            let items = match inner.get("values").and_then(Value::as_array) {
                Some(values) => values.iter().map(decode_value).collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };
            Value::Array(items)
        }
        "mapValue" => Value::Object(decode_fields(inner.get("fields"))?),
        _ => return Err(malformed(value)),
    };
    Ok(decoded)
}

/// Decode the `fields` object of a document or map value
pub fn decode_fields(fields: Option<&Value>) -> Result<Map<String, Value>, StoreError> {
    let mut map = Map::new();
    if let Some(Value::Object(fields)) = fields {
        for (name, value) in fields {
            map.insert(name.clone(), decode_value(value)?);
        }
    }
    Ok(map)
}

/// Decode a REST document into its ID and plain JSON body
pub fn decode_document(document: &Value) -> Result<(String, Value), StoreError> {
    let name = document
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::new(StoreErrorCode::Unknown(0), "Document without a name"))?;
    let id = name.rsplit('/').next().unwrap_or(name).to_string();
    let fields = decode_fields(document.get("fields"))?;
    Ok((id, Value::Object(fields)))
}

fn malformed(value: &Value) -> StoreError {
    StoreError::new(StoreErrorCode::Unknown(0), format!("Malformed Firestore value: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_nested_document() {
        let encoded = encode_value(&json!({"name": "Ada", "tags": ["a", null], "age": 36, "ok": true}));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {
                "name": {"stringValue": "Ada"},
                "tags": {"arrayValue": {"values": [{"stringValue": "a"}, {"nullValue": null}]}},
                "age": {"integerValue": "36"},
                "ok": {"booleanValue": true}
            }}})
        );
    }

    #[test]
    fn test_decode_special_types() {
        let decoded = decode_fields(Some(&json!({
            "at": {"timestampValue": "2024-03-01T10:20:30Z"},
            "where": {"geoPointValue": {"latitude": 48.85, "longitude": 2.35}},
            "empty": {"arrayValue": {}},
            "nested": {"mapValue": {}},
            "nan": {"doubleValue": "NaN"},
            "count": {"integerValue": "-12"}
        })))
        .unwrap();
        assert_eq!(
            Value::Object(decoded),
            json!({
                "at": "2024-03-01T10:20:30Z",
                "where": {"latitude": 48.85, "longitude": 2.35},
                "empty": [],
                "nested": {},
                "nan": null,
                "count": -12
            })
        );
    }

    #[test]
    fn test_decode_document() {
        let document = json!({
            "name": "projects/p/databases/(default)/documents/users/ada",
            "fields": {"name": {"stringValue": "Ada"}},
            "createTime": "2024-03-01T10:20:30Z"
        });
        let (id, body) = decode_document(&document).unwrap();
        assert_eq!(id, "ada");
        assert_eq!(body, json!({"name": "Ada"}));
    }

    #[test]
    fn test_malformed_values() {
        assert!(decode_value(&json!({"integerValue": "seven"})).is_err());
        assert!(decode_value(&json!({"mysteryValue": 1})).is_err());
        assert!(decode_value(&json!("bare")).is_err());
    }
}
