// quillbase-core/src/query/operators.rs
//! Comparison operator implementations
//!
//! Each operator is a separate type implementing [`OperatorMatcher`]; the
//! evaluator dispatches through [`OPERATOR_REGISTRY`] by operator name.
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌──────────────┬───────────────────────┐
//! │ Equality     │ Range                 │
//! │ ($eq, $in)   │ ($gt, $gte, $lt, $lte)│
//! └──────────────┴───────────────────────┘
//! ```

use lazy_static::lazy_static;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::value_utils::{compare_values, values_equal};

/// Trait for all comparison operators
///
/// `doc_value` is `None` when the document lacks the field.
pub trait OperatorMatcher: Send + Sync {
    /// Operator name as written in JSON filters (`"$gt"`)
    fn name(&self) -> &'static str;

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool;
}

// ============================================================================
// EQUALITY OPERATORS
// ============================================================================

/// $eq: a missing field compares as `null`
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool {
        values_equal(doc_value.unwrap_or(&Value::Null), filter_value)
    }
}

/// $in: equality against any element of the literal array
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool {
        let candidate = doc_value.unwrap_or(&Value::Null);
        match filter_value {
            Value::Array(options) => options.iter().any(|opt| values_equal(candidate, opt)),
            _ => false,
        }
    }
}

// ============================================================================
// RANGE OPERATORS
// ============================================================================

/// Range check shared by $gt/$gte/$lt/$lte
///
/// Missing fields and incomparable types never match.
fn compare_with_predicate<F>(doc_value: Option<&Value>, filter_value: &Value, predicate: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    doc_value
        .and_then(|v| compare_values(v, filter_value))
        .map_or(false, predicate)
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool {
        compare_with_predicate(doc_value, filter_value, |ord| ord == Ordering::Greater)
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool {
        compare_with_predicate(doc_value, filter_value, |ord| ord != Ordering::Less)
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool {
        compare_with_predicate(doc_value, filter_value, |ord| ord == Ordering::Less)
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, doc_value: Option<&Value>, filter_value: &Value) -> bool {
        compare_with_predicate(doc_value, filter_value, |ord| ord != Ordering::Greater)
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Name → operator lookup used by the evaluator
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();
        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$in", Box::new(InOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));
        registry
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_contents() {
        for name in ["$eq", "$in", "$gt", "$gte", "$lt", "$lte"] {
            let op = OPERATOR_REGISTRY.get(name).unwrap();
            assert_eq!(op.name(), name);
        }
        assert!(OPERATOR_REGISTRY.get("$regex").is_none());
    }

    #[test]
    fn test_eq_missing_is_null() {
        assert!(EqOperator.matches(None, &json!(null)));
        assert!(!EqOperator.matches(None, &json!("Orwell")));
        assert!(EqOperator.matches(Some(&json!(1949)), &json!(1949.0)));
        assert!(!EqOperator.matches(Some(&json!("1949")), &json!(1949)));
    }

    #[test]
    fn test_in() {
        let genres = json!(["Fantasy", "Dystopian"]);
        assert!(InOperator.matches(Some(&json!("Fantasy")), &genres));
        assert!(!InOperator.matches(Some(&json!("Romance")), &genres));
        assert!(!InOperator.matches(None, &genres));
        assert!(InOperator.matches(None, &json!([null, "x"])));
    }

    #[test]
    fn test_range_missing_never_matches() {
        for op in ["$gt", "$gte", "$lt", "$lte"] {
            let op = OPERATOR_REGISTRY.get(op).unwrap();
            assert!(!op.matches(None, &json!(10)));
            assert!(!op.matches(Some(&json!(null)), &json!(null)));
        }
    }

    #[test]
    fn test_range_numeric_and_string() {
        assert!(GtOperator.matches(Some(&json!(1960)), &json!(1950)));
        assert!(!GtOperator.matches(Some(&json!(1950)), &json!(1950)));
        assert!(GteOperator.matches(Some(&json!(1950.0)), &json!(1950)));
        assert!(LtOperator.matches(Some(&json!("Animal Farm")), &json!("Brave")));
        assert!(LteOperator.matches(Some(&json!(false)), &json!(true)));
        assert!(!LtOperator.matches(Some(&json!("10")), &json!(20)));
    }
}
