//! Translation of a [`QuerySpec`] into a Firestore `structuredQuery`
//!
//! Firestore has no native limit-to-last: the ordering is reversed, the limit
//! applied from the front, and the caller reverses the rows back. Cursors
//! move with the reversal, so an inclusive start bound becomes an inclusive
//! end bound and vice versa.

use super::value::encode_value;
use crate::error::AppError;
use crate::query::{Direction, Limit, Operator, OrderBy, QuerySpec};
use serde_json::{json, Value};

/// Field path Firestore uses for the document ID
pub const DOCUMENT_ID_FIELD: &str = "__name__";

/// Reject queries Firestore cannot express
///
/// Bounds and limit-to-last need an explicit ordering. Range predicates are
/// free without one; with an ordered field they must target that field.
pub fn validate(spec: &QuerySpec) -> Result<(), AppError> {
    let order = spec.order_by();

    if order.is_none() && (spec.start_at().is_some() || spec.end_at().is_some()) {
        return Err(AppError::bad_arguments("start_at / end_at require an order_by field"));
    }
    if order.is_none() && matches!(spec.limit(), Some(Limit::Last(_))) {
        return Err(AppError::bad_arguments("limit_to_last requires an order_by field"));
    }

    let Some(order) = order else {
        return Ok(());
    };
    let order_field = order.field().map(field_path).unwrap_or_else(|| DOCUMENT_ID_FIELD.to_string());
    for predicate in spec.predicates().iter().filter(|p| p.op.is_range()) {
        if field_path(&predicate.field) != order_field {
            return Err(AppError::bad_arguments(format!(
                "range filter on '{}' must match the order_by field",
                predicate.field
            )));
        }
    }
    Ok(())
}

/// Whether results come back in reversed order and must be flipped
pub fn is_reversed(spec: &QuerySpec) -> bool {
    matches!(spec.limit(), Some(Limit::Last(_)))
}

/// Build a `structuredQuery` over `collection_id`
///
/// `collection_name` is the full resource name of the collection
/// (`projects/{p}/databases/{d}/documents/{path}`), used for key cursors.
///
/// # Example
/// ```
/// use firebase_data_source::firestore::query::structured_query;
/// use firebase_data_source::query::{Direction, QueryBuilder};
/// use serde_json::json;
///
/// let spec = QueryBuilder::new()
///     .order_by("age", Direction::Descending)
///     .limit_to_first(2)
///     .build()
///     .unwrap();
/// let query = structured_query("users", "projects/p/databases/(default)/documents/users", &spec).unwrap();
/// assert_eq!(query["limit"], json!(2));
/// assert_eq!(query["orderBy"][0]["direction"], json!("DESCENDING"));
/// ```
pub fn structured_query(collection_id: &str, collection_name: &str, spec: &QuerySpec) -> Result<Value, AppError> {
    validate(spec)?;

    let mut query = json!({ "from": [{ "collectionId": collection_id }] });
    let reversed = is_reversed(spec);

    let filters: Vec<Value> = spec
        .predicates()
        .iter()
        .map(|p| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(&p.field) },
                    "op": operator_name(p.op),
                    "value": encode_value(&p.value),
                }
            })
        })
        .collect();
    match filters.len() {
        0 => {}
        1 => query["where"] = filters.into_iter().next().unwrap_or(Value::Null),
        _ => query["where"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
    }

    if let Some(order) = spec.order_by() {
        let path = order.field().map(field_path).unwrap_or_else(|| DOCUMENT_ID_FIELD.to_string());
        let direction = match (order.direction(), reversed) {
            (Direction::Ascending, false) | (Direction::Descending, true) => "ASCENDING",
            (Direction::Descending, false) | (Direction::Ascending, true) => "DESCENDING",
        };
        query["orderBy"] = json!([{ "field": { "fieldPath": path }, "direction": direction }]);

        let cursor = |value: &Value, before: bool| {
            let value = match order {
                OrderBy::Key(_) => key_reference(collection_name, value),
                OrderBy::Field { .. } => encode_value(value),
            };
            json!({ "values": [value], "before": before })
        };
        // Bounds are on values; cursors are on positions in the server order
        let (first, last) = if direction == "ASCENDING" {
            (spec.start_at(), spec.end_at())
        } else {
            (spec.end_at(), spec.start_at())
        };
        if let Some(value) = first {
            query["startAt"] = cursor(value, true);
        }
        if let Some(value) = last {
            query["endAt"] = cursor(value, false);
        }
    }

    match spec.limit() {
        Some(Limit::First(n)) | Some(Limit::Last(n)) => query["limit"] = json!(n),
        None => {}
    }

    Ok(query)
}

/// Firestore field path, quoting segments that are not plain identifiers
///
/// Accepts `.` or `/` as the segment separator.
pub fn field_path(field: &str) -> String {
    field
        .split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(quote_segment)
        .collect::<Vec<_>>()
        .join(".")
}

fn quote_segment(segment: &str) -> String {
    let plain = segment
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        segment.to_string()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn operator_name(op: Operator) -> &'static str {
    match op {
        Operator::Equal => "EQUAL",
        Operator::GreaterThan => "GREATER_THAN",
        Operator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        Operator::LessThan => "LESS_THAN",
        Operator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
    }
}

fn key_reference(collection_name: &str, value: &Value) -> Value {
    let key = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({ "referenceValue": format!("{}/{}", collection_name, key) })
}
