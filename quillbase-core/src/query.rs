// quillbase-core/src/query.rs
//! Predicate trees and their evaluation
//!
//! A [`Filter`] is built either with typed constructors or from a
//! Mongo-shaped JSON value:
//!
//! ```
//! use quillbase_core::query::Filter;
//! use serde_json::json;
//!
//! let typed = Filter::and(vec![
//!     Filter::eq("in_stock", true),
//!     Filter::gt("published_year", 2010),
//! ]);
//! let parsed = Filter::from_json(&json!({
//!     "in_stock": true,
//!     "published_year": {"$gt": 2010}
//! })).unwrap();
//! assert_eq!(typed, parsed);
//! ```

pub mod operators;

use serde_json::{Map, Value};
use std::fmt;

use crate::document::FieldSource;
use crate::error::{QuillError, Result};
use operators::OPERATOR_REGISTRY;

/// Leaf comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Gt => "$gt",
            CompareOp::Lt => "$lt",
            CompareOp::Gte => "$gte",
            CompareOp::Lte => "$lte",
            CompareOp::In => "$in",
        }
    }

    pub fn parse(name: &str) -> Option<CompareOp> {
        match name {
            "$eq" => Some(CompareOp::Eq),
            "$gt" => Some(CompareOp::Gt),
            "$lt" => Some(CompareOp::Lt),
            "$gte" => Some(CompareOp::Gte),
            "$lte" => Some(CompareOp::Lte),
            "$in" => Some(CompareOp::In),
            _ => None,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, CompareOp::Gt | CompareOp::Lt | CompareOp::Gte | CompareOp::Lte)
    }
}

/// `field op literal`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn evaluate<D: FieldSource + ?Sized>(&self, doc: &D) -> bool {
        match OPERATOR_REGISTRY.get(self.op.as_str()) {
            Some(operator) => operator.matches(doc.field(&self.field), &self.value),
            None => false,
        }
    }
}

/// Filter expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every child must match; an empty list matches everything
    And(Vec<Filter>),
    /// At least one child must match; an empty list matches nothing
    Or(Vec<Filter>),
    Leaf(Predicate),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::all()
    }
}

impl Filter {
    // ========== CONSTRUCTORS ==========

    /// Matches every document
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn leaf(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Leaf(Predicate {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, CompareOp::Eq, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, CompareOp::Gt, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, CompareOp::Lt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, CompareOp::Gte, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, CompareOp::Lte, value)
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        Self::leaf(field, CompareOp::In, Value::Array(values))
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Filter::And(children)
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Or(children)
    }

    // ========== JSON FORM ==========

    /// Parse a Mongo-shaped filter document
    ///
    /// Accepts `{field: literal}`, `{field: {"$op": literal, ...}}`,
    /// `{"$and": [...]}` and `{"$or": [...]}`. Several top-level keys are
    /// combined with `And` in key order.
    pub fn from_json(json: &Value) -> Result<Self> {
        let map = json.as_object().ok_or_else(|| {
            QuillError::InvalidFilter(format!("filter must be an object, got {}", json))
        })?;

        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" => clauses.push(Filter::And(parse_clause_list(key, value)?)),
                "$or" => clauses.push(Filter::Or(parse_clause_list(key, value)?)),
                k if k.starts_with('$') => {
                    return Err(QuillError::InvalidFilter(format!(
                        "unknown top-level operator '{}'",
                        k
                    )))
                }
                "" => return Err(QuillError::InvalidFilter("empty field name".to_string())),
                field => clauses.extend(parse_field_clause(field, value)?),
            }
        }

        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Filter::And(clauses)
        })
    }

    /// Inverse of [`Filter::from_json`], used for logging and explain output
    pub fn to_json(&self) -> Value {
        match self {
            Filter::And(children) if children.is_empty() => Value::Object(Map::new()),
            Filter::And(children) => serde_json::json!({
                "$and": children.iter().map(Filter::to_json).collect::<Vec<_>>()
            }),
            Filter::Or(children) => serde_json::json!({
                "$or": children.iter().map(Filter::to_json).collect::<Vec<_>>()
            }),
            Filter::Leaf(p) => {
                let mut op = Map::new();
                op.insert(p.op.as_str().to_string(), p.value.clone());
                let mut field = Map::new();
                field.insert(p.field.clone(), Value::Object(op));
                Value::Object(field)
            }
        }
    }

    // ========== EVALUATION ==========

    /// Evaluate against a document; children are visited left to right and
    /// evaluation stops at the first decisive child
    pub fn matches<D: FieldSource + ?Sized>(&self, doc: &D) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(doc)),
            Filter::Or(children) => children.iter().any(|c| c.matches(doc)),
            Filter::Leaf(predicate) => predicate.evaluate(doc),
        }
    }

    /// Predicates that every match must satisfy (leaves reachable through `And` only)
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_conjuncts(&mut out);
        out
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Filter::Leaf(p) => out.push(p),
            Filter::And(children) => children.iter().for_each(|c| c.collect_conjuncts(out)),
            Filter::Or(_) => {}
        }
    }

    /// Every field path named anywhere in the tree
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::Leaf(p) => vec![p.field.as_str()],
            Filter::And(children) | Filter::Or(children) => {
                children.iter().flat_map(Filter::fields).collect()
            }
        }
    }

    /// Reject fields whose top-level segment is not in `schema`
    pub fn validate_fields(&self, schema: &[&str]) -> Result<()> {
        for field in self.fields() {
            let top = field.split('.').next().unwrap_or(field);
            if !schema.contains(&top) {
                return Err(QuillError::InvalidFilter(format!(
                    "unknown field '{}' (allowed: {})",
                    field,
                    schema.join(", ")
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn parse_clause_list(op: &str, value: &Value) -> Result<Vec<Filter>> {
    let items = value.as_array().ok_or_else(|| {
        QuillError::InvalidFilter(format!("{} expects an array of filters", op))
    })?;
    items.iter().map(Filter::from_json).collect()
}

/// `field: literal` or `field: {"$op": literal, ...}`
fn parse_field_clause(field: &str, value: &Value) -> Result<Vec<Filter>> {
    let ops = match value {
        Value::Object(map) if !map.is_empty() && map.keys().any(|k| k.starts_with('$')) => map,
        // plain literal, including objects without operators
        _ => return Ok(vec![Filter::eq(field, value.clone())]),
    };

    let mut out = Vec::with_capacity(ops.len());
    for (name, literal) in ops {
        let op = CompareOp::parse(name).ok_or_else(|| {
            if name.starts_with('$') {
                QuillError::InvalidFilter(format!("unknown operator '{}' on field '{}'", name, field))
            } else {
                QuillError::InvalidFilter(format!(
                    "field '{}' mixes operators with plain key '{}'",
                    field, name
                ))
            }
        })?;
        if op == CompareOp::In && !literal.is_array() {
            return Err(QuillError::InvalidFilter(format!(
                "$in on '{}' expects an array",
                field
            )));
        }
        out.push(Filter::leaf(field, op, literal.clone()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orwell() -> Value {
        json!({
            "title": "1984",
            "author": "George Orwell",
            "genre": "Dystopian",
            "published_year": 1949,
            "price": 10.99,
            "in_stock": true
        })
    }

    #[test]
    fn test_parse_implicit_and() {
        let filter = Filter::from_json(&json!({
            "author": "George Orwell",
            "published_year": {"$gte": 1940, "$lt": 1950}
        }))
        .unwrap();
        assert_eq!(
            filter,
            Filter::and(vec![
                Filter::eq("author", "George Orwell"),
                Filter::gte("published_year", 1940),
                Filter::lt("published_year", 1950),
            ])
        );
        assert!(filter.matches(&orwell()));
    }

    #[test]
    fn test_parse_single_clause_unwrapped() {
        let filter = Filter::from_json(&json!({"genre": "Dystopian"})).unwrap();
        assert_eq!(filter, Filter::eq("genre", "Dystopian"));
        assert_eq!(Filter::from_json(&json!({})).unwrap(), Filter::all());
    }

    #[test]
    fn test_parse_or_and_in() {
        let filter = Filter::from_json(&json!({
            "$or": [
                {"genre": {"$in": ["Fantasy", "Science Fiction"]}},
                {"price": {"$lt": 11}}
            ]
        }))
        .unwrap();
        assert!(matches!(filter, Filter::Or(ref c) if c.len() == 2));
        assert!(filter.matches(&orwell()));
    }

    #[test]
    fn test_parse_errors() {
        let bad = [
            json!({"price": {"$regex": "x"}}),
            json!({"$nor": []}),
            json!({"$or": {"a": 1}}),
            json!({"genre": {"$in": "Fantasy"}}),
            json!({"price": {"$gt": 1, "plain": 2}}),
            json!(["not", "an", "object"]),
        ];
        for filter in bad {
            assert!(
                matches!(Filter::from_json(&filter), Err(QuillError::InvalidFilter(_))),
                "accepted {}",
                filter
            );
        }
    }

    #[test]
    fn test_object_literal_is_equality() {
        let filter = Filter::from_json(&json!({"meta": {"edition": 2}})).unwrap();
        assert_eq!(filter, Filter::eq("meta", json!({"edition": 2})));
    }

    #[test]
    fn test_missing_field_semantics() {
        let doc = json!({"title": "Untitled"});
        assert!(Filter::eq("price", Value::Null).matches(&doc));
        assert!(Filter::is_in("price", vec![Value::Null]).matches(&doc));
        assert!(!Filter::gt("price", 0).matches(&doc));
        assert!(!Filter::lte("price", 100).matches(&doc));
    }

    #[test]
    fn test_incompatible_types_false() {
        assert!(!Filter::gt("published_year", "1900").matches(&orwell()));
        assert!(!Filter::eq("in_stock", 1).matches(&orwell()));
    }

    #[test]
    fn test_empty_or_matches_nothing() {
        assert!(!Filter::or(vec![]).matches(&orwell()));
        assert!(Filter::all().matches(&orwell()));
    }

    #[test]
    fn test_conjuncts_skip_or() {
        let filter = Filter::and(vec![
            Filter::eq("author", "George Orwell"),
            Filter::or(vec![Filter::eq("genre", "x"), Filter::eq("genre", "y")]),
            Filter::and(vec![Filter::gt("price", 5)]),
        ]);
        let fields: Vec<_> = filter.conjuncts().iter().map(|p| p.field.as_str()).collect();
        assert_eq!(fields, vec!["author", "price"]);
    }

    #[test]
    fn test_validate_fields() {
        let schema = ["_id", "title", "author"];
        assert!(Filter::eq("author", "x").validate_fields(&schema).is_ok());
        assert!(Filter::eq("title.sub", "x").validate_fields(&schema).is_ok());
        let err = Filter::or(vec![Filter::eq("auther", "x")])
            .validate_fields(&schema)
            .unwrap_err();
        assert!(matches!(err, QuillError::InvalidFilter(_)));
    }

    #[test]
    fn test_to_json_round_trip() {
        let filter = Filter::and(vec![
            Filter::eq("genre", "Fantasy"),
            Filter::or(vec![Filter::lt("price", 10), Filter::is_in("author", ["A", "B"])]),
        ]);
        assert_eq!(Filter::from_json(&filter.to_json()).unwrap(), filter);
    }
}
