//! Query specification
//!
//! A [`QuerySpec`] is an immutable description of the filtering, ordering and
//! limiting applied to a collection read. It is built once with a
//! [`QueryBuilder`] chain, validated in [`QueryBuilder::build`], and then
//! handed to a store backend.
//!
//! # Example
//! ```
//! use firebase_data_source::query::{Direction, QueryBuilder};
//! use serde_json::json;
//!
//! let spec = QueryBuilder::new()
//!     .order_by("age", Direction::Descending)
//!     .where_greater_than_or_equal_to("age", json!(18))
//!     .limit_to_first(10)
//!     .build()
//!     .unwrap();
//! assert_eq!(spec.predicates().len(), 1);
//! ```

use crate::error::AppError;
use crate::store::Snapshot;
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction for query ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// Comparison applied by a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// field == value
    Equal,
    /// field > value
    GreaterThan,
    /// field >= value
    GreaterThanOrEqual,
    /// field < value
    LessThan,
    /// field <= value
    LessThanOrEqual,
}

impl Operator {
    /// Whether this operator compares by order rather than equality
    pub fn is_range(&self) -> bool {
        !matches!(self, Operator::Equal)
    }
}

/// A single `(field, operator, value)` filter
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Field path, segments separated by `/` or `.`
    pub field: String,
    /// Comparison
    pub op: Operator,
    /// Operand
    pub value: Value,
}

impl Predicate {
    /// Whether a child value satisfies this predicate
    ///
    /// A missing field behaves as null: it matches `Equal(null)` and fails
    /// every range comparison.
    pub fn matches(&self, child: Option<&Value>) -> bool {
        let field = child.and_then(|v| field_value(v, &self.field));
        let candidate = field.unwrap_or(&Value::Null);
        match self.op {
            Operator::Equal => compare_values(candidate, &self.value) == Ordering::Equal,
            _ if candidate.is_null() || self.value.is_null() => false,
            Operator::GreaterThan => compare_values(candidate, &self.value) == Ordering::Greater,
            Operator::GreaterThanOrEqual => compare_values(candidate, &self.value) != Ordering::Less,
            Operator::LessThan => compare_values(candidate, &self.value) == Ordering::Less,
            Operator::LessThanOrEqual => compare_values(candidate, &self.value) != Ordering::Greater,
        }
    }
}

/// Ordering key of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    /// Order by the child key
    Key(Direction),
    /// Order by a child field
    Field {
        /// Field path
        field: String,
        /// Sort direction
        direction: Direction,
    },
}

impl OrderBy {
    /// Sort direction
    pub fn direction(&self) -> Direction {
        match self {
            OrderBy::Key(direction) => *direction,
            OrderBy::Field { direction, .. } => *direction,
        }
    }

    /// Field path, `None` when ordering by key
    pub fn field(&self) -> Option<&str> {
        match self {
            OrderBy::Key(_) => None,
            OrderBy::Field { field, .. } => Some(field),
        }
    }
}

/// Result-count limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Keep the first `n` results
    First(u32),
    /// Keep the last `n` results
    Last(u32),
}

/// Validated, immutable query description
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySpec {
    order_by: Option<OrderBy>,
    predicates: Vec<Predicate>,
    start_at: Option<Value>,
    end_at: Option<Value>,
    limit: Option<Limit>,
}

impl QuerySpec {
    /// A query with no filters, ordered by key
    pub fn all() -> Self {
        Self::default()
    }

    /// Start a builder
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Ordering, if any was declared
    pub fn order_by(&self) -> Option<&OrderBy> {
        self.order_by.as_ref()
    }

    /// Predicates in declaration order
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Inclusive lower bound on the ordering value
    pub fn start_at(&self) -> Option<&Value> {
        self.start_at.as_ref()
    }

    /// Inclusive upper bound on the ordering value
    pub fn end_at(&self) -> Option<&Value> {
        self.end_at.as_ref()
    }

    /// Result-count limit
    pub fn limit(&self) -> Option<Limit> {
        self.limit
    }

    /// Whether the query filters, bounds or limits anything
    pub fn is_unfiltered(&self) -> bool {
        self.predicates.is_empty()
            && self.start_at.is_none()
            && self.end_at.is_none()
            && self.limit.is_none()
    }

    /// Evaluate the query over a set of child snapshots
    ///
    /// Predicates run in declaration order, then the start/end bounds, then
    /// ordering, then the limit. Children without data are dropped.
    ///
    /// A child missing the order-by field is kept and sorts as null, before
    /// every other value, as the Realtime Database orders it. The Firestore
    /// server leaves such documents out of an ordered query, so they never
    /// reach this evaluation on that backend.
    pub fn apply(&self, children: Vec<Snapshot>) -> Vec<Snapshot> {
        let mut rows: Vec<Snapshot> = children
            .into_iter()
            .filter(|child| child.exists())
            .filter(|child| self.predicates.iter().all(|p| p.matches(child.value.as_ref())))
            .filter(|child| self.within_bounds(child))
            .collect();

        rows.sort_by(|a, b| self.compare_rows(a, b));

        match self.limit {
            Some(Limit::First(n)) => rows.truncate(n as usize),
            Some(Limit::Last(n)) => {
                let skip = rows.len().saturating_sub(n as usize);
                rows.drain(..skip);
            }
            None => {}
        }
        rows
    }

    fn within_bounds(&self, child: &Snapshot) -> bool {
        if self.start_at.is_none() && self.end_at.is_none() {
            return true;
        }
        let compare = |bound: &Value| match self.order_field() {
            Some(field) => {
                let value = child
                    .value
                    .as_ref()
                    .and_then(|v| field_value(v, field))
                    .unwrap_or(&Value::Null);
                compare_values(value, bound)
            }
            None => {
                let key = child.key.as_deref().unwrap_or_default();
                match bound {
                    Value::String(bound) => compare_keys(key, bound),
                    other => compare_keys(key, &other.to_string()),
                }
            }
        };
        if let Some(start) = &self.start_at {
            if compare(start) == Ordering::Less {
                return false;
            }
        }
        if let Some(end) = &self.end_at {
            if compare(end) == Ordering::Greater {
                return false;
            }
        }
        true
    }

    fn compare_rows(&self, a: &Snapshot, b: &Snapshot) -> Ordering {
        let key_a = a.key.as_deref().unwrap_or_default();
        let key_b = b.key.as_deref().unwrap_or_default();
        let ordering = match self.order_field() {
            Some(field) => {
                let va = a.value.as_ref().and_then(|v| field_value(v, field)).unwrap_or(&Value::Null);
                let vb = b.value.as_ref().and_then(|v| field_value(v, field)).unwrap_or(&Value::Null);
                compare_values(va, vb).then_with(|| compare_keys(key_a, key_b))
            }
            None => compare_keys(key_a, key_b),
        };
        match self.order_by.as_ref().map(OrderBy::direction).unwrap_or_default() {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }

    fn order_field(&self) -> Option<&str> {
        self.order_by.as_ref().and_then(OrderBy::field)
    }
}

/// Fluent builder for [`QuerySpec`]
///
/// Errors are collected while chaining and reported once by [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    spec: QuerySpec,
    order_calls: usize,
    errors: Vec<String>,
}

impl QueryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Order results by a child field
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        let field = field.into();
        if field.is_empty() {
            self.errors.push("order_by field must not be empty".to_string());
        }
        self.order_calls += 1;
        self.spec.order_by = Some(OrderBy::Field { field, direction });
        self
    }

    /// Order results by child key
    pub fn order_by_key(mut self, direction: Direction) -> Self {
        self.order_calls += 1;
        self.spec.order_by = Some(OrderBy::Key(direction));
        self
    }

    /// Add a predicate
    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: Value) -> Self {
        let field = field.into();
        if field.is_empty() {
            self.errors.push("predicate field must not be empty".to_string());
        }
        if op.is_range() && value.is_null() {
            self.errors.push(format!("range predicate on '{}' needs a non-null value", field));
        }
        self.spec.predicates.push(Predicate { field, op, value });
        self
    }

    /// Filter documents where field equals value
    pub fn where_equal_to(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, Operator::Equal, value)
    }

    /// Filter documents where field is greater than value
    pub fn where_greater_than(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, Operator::GreaterThan, value)
    }

    /// Filter documents where field is greater than or equal to value
    pub fn where_greater_than_or_equal_to(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, Operator::GreaterThanOrEqual, value)
    }

    /// Filter documents where field is less than value
    pub fn where_less_than(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, Operator::LessThan, value)
    }

    /// Filter documents where field is less than or equal to value
    pub fn where_less_than_or_equal_to(self, field: impl Into<String>, value: Value) -> Self {
        self.filter(field, Operator::LessThanOrEqual, value)
    }

    /// Inclusive lower bound on the ordering value
    pub fn start_at(mut self, value: Value) -> Self {
        self.spec.start_at = Some(value);
        self
    }

    /// Inclusive upper bound on the ordering value
    pub fn end_at(mut self, value: Value) -> Self {
        self.spec.end_at = Some(value);
        self
    }

    /// Keep only the first `n` results
    pub fn limit_to_first(mut self, n: u32) -> Self {
        self.set_limit(Limit::First(n), n);
        self
    }

    /// Keep only the last `n` results
    pub fn limit_to_last(mut self, n: u32) -> Self {
        self.set_limit(Limit::Last(n), n);
        self
    }

    fn set_limit(&mut self, limit: Limit, n: u32) {
        if n == 0 {
            self.errors.push("limit must be greater than zero".to_string());
        }
        if self.spec.limit.is_some() {
            self.errors.push("only one of limit_to_first / limit_to_last may be set".to_string());
        }
        self.spec.limit = Some(limit);
    }

    /// Validate and produce the query
    pub fn build(self) -> Result<QuerySpec, AppError> {
        let mut errors = self.errors;
        if self.order_calls > 1 {
            errors.insert(0, "only one order-by field is supported".to_string());
        }
        if !errors.is_empty() {
            return Err(AppError::bad_arguments(errors.join("; ")));
        }
        Ok(self.spec)
    }
}

/// Resolve a nested field, segments separated by `/` or `.`
///
/// Returns `None` if any segment is missing or the parent is not an object.
pub fn field_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split(['/', '.']).filter(|p| !p.is_empty()) {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compare two JSON values using Firebase ordering
///
/// - Cross-type → type rank: null < bool < number < string < array < object
/// - Both numbers → f64 comparison (NaN treated as Equal)
/// - Both strings → lexicographic (codepoint order)
/// - Both booleans → false < true
/// - Arrays and objects compare equal to their own kind
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => {
            let fa = na.as_f64().unwrap_or(f64::NAN);
            let fb = nb.as_f64().unwrap_or(f64::NAN);
            fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
        }
        (Value::String(sa), Value::String(sb)) => sa.cmp(sb),
        (Value::Bool(ba), Value::Bool(bb)) => ba.cmp(bb),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare two child keys
///
/// Keys that parse as 32-bit integers come first in numeric order, the rest
/// follow in lexicographic order.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<i32>(), b.parse::<i32>()) {
        (Ok(ia), Ok(ib)) => ia.cmp(&ib),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
