//! Query parameters for Realtime Database REST reads
//!
//! The REST surface filters on a single ordering: `orderBy` names the child
//! (or `"$key"`), and `equalTo`, `startAt`, `endAt`, `limitToFirst` and
//! `limitToLast` restrict it. Values are JSON-encoded. The server returns an
//! unordered object, so results are always re-sorted client side.

use crate::error::AppError;
use crate::query::{Direction, Limit, Operator, OrderBy, QuerySpec};
use crate::store::field_key;
use serde_json::Value;

/// Reject queries the Realtime Database cannot express
pub fn validate(spec: &QuerySpec) -> Result<(), AppError> {
    query_params(spec).map(|_| ())
}

/// Translate a query into REST query parameters
///
/// # Example
/// ```
/// use firebase_data_source::database::params::query_params;
/// use firebase_data_source::query::{Direction, QueryBuilder};
/// use serde_json::json;
///
/// let spec = QueryBuilder::new()
///     .order_by("age", Direction::Ascending)
///     .where_greater_than_or_equal_to("age", json!(18))
///     .limit_to_first(10)
///     .build()
///     .unwrap();
/// let params = query_params(&spec).unwrap();
/// assert!(params.contains(&("orderBy", "\"age\"".to_string())));
/// assert!(params.contains(&("startAt", "18".to_string())));
/// assert!(params.contains(&("limitToFirst", "10".to_string())));
/// ```
pub fn query_params(spec: &QuerySpec) -> Result<Vec<(&'static str, String)>, AppError> {
    let mut params = Vec::new();
    if spec.is_unfiltered() && spec.order_by().is_none() {
        return Ok(params);
    }

    let order_field = spec.order_by().and_then(OrderBy::field).map(field_key);
    let order_param = match &order_field {
        Some(field) => field.clone(),
        None => "$key".to_string(),
    };
    params.push(("orderBy", encode(&Value::String(order_param))));

    let mut equal_to: Option<&Value> = None;
    let mut start_at = spec.start_at();
    let mut end_at = spec.end_at();

    for predicate in spec.predicates() {
        // Error case first: filters must target the ordering
        if order_field.as_deref() != Some(field_key(&predicate.field).as_str()) {
            return Err(AppError::bad_arguments(format!(
                "Realtime Database can only filter on the order-by field, not '{}'",
                predicate.field
            )));
        }
        // Strict bounds go out inclusive and the client filter drops the equal
        // rows; a server-side limit could spend itself on those rows
        let strict = matches!(predicate.op, Operator::GreaterThan | Operator::LessThan);
        if strict && spec.limit().is_some() {
            return Err(AppError::bad_arguments(format!(
                "Realtime Database cannot combine a strict comparison ({:?} on '{}') with a limit",
                predicate.op, predicate.field
            )));
        }
        let slot = match predicate.op {
            Operator::Equal => &mut equal_to,
            Operator::GreaterThan | Operator::GreaterThanOrEqual => &mut start_at,
            Operator::LessThan | Operator::LessThanOrEqual => &mut end_at,
        };
        if slot.is_some() {
            return Err(AppError::bad_arguments(format!(
                "conflicting bounds on '{}'",
                predicate.field
            )));
        }
        *slot = Some(&predicate.value);
    }

    if let Some(value) = equal_to {
        if start_at.is_some() || end_at.is_some() {
            return Err(AppError::bad_arguments("equality cannot be combined with range bounds"));
        }
        params.push(("equalTo", encode(value)));
    }
    if let Some(value) = start_at {
        params.push(("startAt", encode(value)));
    }
    if let Some(value) = end_at {
        params.push(("endAt", encode(value)));
    }

    // The server only orders ascending, so a descending limit takes from the other end
    let descending = spec.order_by().map(OrderBy::direction) == Some(Direction::Descending);
    match (spec.limit(), descending) {
        (Some(Limit::First(n)), false) | (Some(Limit::Last(n)), true) => {
            params.push(("limitToFirst", n.to_string()));
        }
        (Some(Limit::Last(n)), false) | (Some(Limit::First(n)), true) => {
            params.push(("limitToLast", n.to_string()));
        }
        (None, _) => {}
    }

    Ok(params)
}

fn encode(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::QueryBuilder;
    use crate::store::Snapshot;
    use serde_json::json;

    fn lookup<'a>(params: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        params.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_unfiltered_query_has_no_params() {
        assert!(query_params(&QuerySpec::all()).unwrap().is_empty());
    }

    #[test]
    fn test_key_ordering() {
        let spec = QueryBuilder::new()
            .order_by_key(Direction::Ascending)
            .start_at(json!("b"))
            .build()
            .unwrap();
        let params = query_params(&spec).unwrap();
        assert_eq!(lookup(&params, "orderBy"), Some("\"$key\""));
        assert_eq!(lookup(&params, "startAt"), Some("\"b\""));
    }

    #[test]
    fn test_limit_without_order_uses_key() {
        let spec = QueryBuilder::new().limit_to_last(3).build().unwrap();
        let params = query_params(&spec).unwrap();
        assert_eq!(lookup(&params, "orderBy"), Some("\"$key\""));
        assert_eq!(lookup(&params, "limitToLast"), Some("3"));
    }

    #[test]
    fn test_equality_and_nested_field() {
        let spec = QueryBuilder::new()
            .order_by("profile.city", Direction::Ascending)
            .where_equal_to("profile/city", json!("Paris"))
            .build()
            .unwrap();
        let params = query_params(&spec).unwrap();
        assert_eq!(lookup(&params, "orderBy"), Some("\"profile/city\""));
        assert_eq!(lookup(&params, "equalTo"), Some("\"Paris\""));
    }

    #[test]
    fn test_descending_limit_flips_end() {
        let spec = QueryBuilder::new()
            .order_by("score", Direction::Descending)
            .limit_to_first(5)
            .build()
            .unwrap();
        let params = query_params(&spec).unwrap();
        assert_eq!(lookup(&params, "limitToLast"), Some("5"));
        assert_eq!(lookup(&params, "limitToFirst"), None);
    }

    #[test]
    fn test_range_bounds() {
        let spec = QueryBuilder::new()
            .order_by("age", Direction::Ascending)
            .where_greater_than_or_equal_to("age", json!(18))
            .where_less_than_or_equal_to("age", json!(65))
            .build()
            .unwrap();
        let params = query_params(&spec).unwrap();
        assert_eq!(lookup(&params, "startAt"), Some("18"));
        assert_eq!(lookup(&params, "endAt"), Some("65"));
    }

    #[test]
    fn test_strict_bounds_without_limit_go_out_inclusive() {
        let spec = QueryBuilder::new()
            .order_by("age", Direction::Ascending)
            .where_greater_than("age", json!(18))
            .where_less_than("age", json!(65))
            .build()
            .unwrap();
        let params = query_params(&spec).unwrap();
        assert_eq!(lookup(&params, "startAt"), Some("18"));
        assert_eq!(lookup(&params, "endAt"), Some("65"));

        // The server returns the inclusive range; the client drops the bounds themselves
        let children = [("a", 18), ("b", 30), ("c", 65)]
            .into_iter()
            .map(|(k, age)| Snapshot::new(k, Some(json!({ "age": age }))))
            .collect();
        let kept = spec.apply(children);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].key.as_deref(), Some("b"));
    }

    #[test]
    fn test_rejected_queries() {
        let other_field = QueryBuilder::new()
            .order_by("age", Direction::Ascending)
            .where_equal_to("name", json!("Ada"))
            .build()
            .unwrap();
        let strict = QueryBuilder::new()
            .order_by("age", Direction::Ascending)
            .where_greater_than("age", json!(18))
            .limit_to_first(10)
            .build()
            .unwrap();
        let unordered = QueryBuilder::new().where_equal_to("age", json!(1)).build().unwrap();
        let mixed = QueryBuilder::new()
            .order_by("age", Direction::Ascending)
            .where_equal_to("age", json!(1))
            .start_at(json!(0))
            .build()
            .unwrap();

        for spec in [other_field, strict, unordered, mixed] {
            assert_eq!(validate(&spec).unwrap_err().kind(), ErrorKind::BadArguments);
        }
    }
}
