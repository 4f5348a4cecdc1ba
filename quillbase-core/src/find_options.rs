// quillbase-core/src/find_options.rs
// Find query options: projection, sort, skip, limit, hint

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::document::DocumentId;
use crate::error::{QuillError, Result};
use crate::value_utils::{get_nested_value, set_path_in_map, sort_cmp};

/// Sort direction; JSON form is `1` / `-1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn from_i64(direction: i64) -> Option<Self> {
        match direction {
            1 => Some(SortDirection::Ascending),
            -1 => Some(SortDirection::Descending),
            _ => None,
        }
    }

    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

pub type SortSpec = Vec<(String, SortDirection)>;

/// Parse `{"price": -1, "title": 1}` (key order is sort priority)
pub fn parse_sort(json: &Value) -> Result<SortSpec> {
    let map = json
        .as_object()
        .ok_or_else(|| QuillError::InvalidFilter(format!("sort must be an object, got {}", json)))?;
    map.iter()
        .map(|(field, dir)| {
            dir.as_i64()
                .and_then(SortDirection::from_i64)
                .map(|d| (field.clone(), d))
                .ok_or_else(|| {
                    QuillError::InvalidFilter(format!(
                        "sort direction for '{}' must be 1 or -1, got {}",
                        field, dir
                    ))
                })
        })
        .collect()
}

/// Projection: inclusion set or exclusion set
///
/// `_id` is kept by inclusions unless explicitly suppressed with `_id: 0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Include { fields: Vec<String>, keep_id: bool },
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include {
            fields: fields.into_iter().map(Into::into).collect(),
            keep_id: true,
        }
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Drop `_id` from an inclusion projection
    pub fn without_id(self) -> Self {
        match self {
            Projection::Include { fields, .. } => Projection::Include {
                fields,
                keep_id: false,
            },
            Projection::Exclude(mut fields) => {
                if !fields.iter().any(|f| f == "_id") {
                    fields.push("_id".to_string());
                }
                Projection::Exclude(fields)
            }
        }
    }

    /// Parse `{"title": 1, "author": 1, "_id": 0}` or `{"price": 0}`
    pub fn from_json(json: &Value) -> Result<Self> {
        let map = json.as_object().ok_or_else(|| {
            QuillError::InvalidFilter(format!("projection must be an object, got {}", json))
        })?;

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        let mut suppress_id = false;
        for (field, flag) in map {
            let on = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) if n.as_f64() == Some(1.0) => true,
                Value::Number(n) if n.as_f64() == Some(0.0) => false,
                other => {
                    return Err(QuillError::InvalidFilter(format!(
                        "projection flag for '{}' must be 0 or 1, got {}",
                        field, other
                    )))
                }
            };
            match (field.as_str(), on) {
                ("_id", false) => suppress_id = true,
                ("_id", true) => {}
                (_, true) => include.push(field.clone()),
                (_, false) => exclude.push(field.clone()),
            }
        }

        match (include.is_empty(), exclude.is_empty()) {
            (false, false) => Err(QuillError::InvalidFilter(
                "projection cannot mix inclusion and exclusion".to_string(),
            )),
            (false, true) => Ok(Projection::Include {
                fields: include,
                keep_id: !suppress_id,
            }),
            _ => {
                if suppress_id {
                    exclude.push("_id".to_string());
                }
                Ok(Projection::Exclude(exclude))
            }
        }
    }

    /// Apply to a caller-facing document copy
    ///
    /// Supports dot notation for nested fields (e.g., "address.city").
    pub fn apply(&self, doc: Value) -> Value {
        let obj = match doc {
            Value::Object(obj) => obj,
            other => return other,
        };
        match self {
            Projection::Include { fields, keep_id } => {
                let source = Value::Object(obj);
                let mut result = Map::new();
                if *keep_id {
                    if let Some(id) = source.get("_id") {
                        result.insert("_id".to_string(), id.clone());
                    }
                }
                for field in fields {
                    if let Some(value) = get_nested_value(&source, field) {
                        set_path_in_map(&mut result, field, value.clone());
                    }
                }
                Value::Object(result)
            }
            Projection::Exclude(fields) => {
                let mut result = obj;
                for field in fields {
                    remove_path(&mut result, field);
                }
                Value::Object(result)
            }
        }
    }
}

fn remove_path(map: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = map.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Access-path override, like `.hint({title: 1})`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint {
    /// Index by name (`"title_1"`)
    Name(String),
    /// Index by key pattern
    Fields(Vec<String>),
    /// Force a collection scan
    Natural,
}

impl Hint {
    pub fn name(name: impl Into<String>) -> Self {
        Hint::Name(name.into())
    }

    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Hint::Fields(fields.into_iter().map(Into::into).collect())
    }

    /// `"title_1"`, `{"title": 1}` or `{"$natural": 1}`
    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::String(name) => Ok(Hint::Name(name.clone())),
            Value::Object(map) if map.contains_key("$natural") => Ok(Hint::Natural),
            Value::Object(map) if !map.is_empty() => Ok(Hint::Fields(map.keys().cloned().collect())),
            other => Err(QuillError::InvalidFilter(format!("invalid hint {}", other))),
        }
    }
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hint::Name(name) => write!(f, "'{}'", name),
            Hint::Fields(fields) => write!(f, "{{{}}}", fields.join(", ")),
            Hint::Natural => write!(f, "$natural"),
        }
    }
}

/// Options for find queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Projection>,

    /// Sort keys in priority order
    pub sort: SortSpec,

    /// Number of matching documents to skip (for pagination)
    pub skip: usize,

    /// Maximum number of documents to return; 0 means unbounded
    pub limit: usize,

    pub hint: Option<Hint>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    /// Append one sort key
    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((field.into(), direction));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_hint(mut self, hint: Hint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Parse `{"projection": .., "sort": .., "skip": n, "limit": n, "hint": ..}`
    pub fn from_json(json: &Value) -> Result<Self> {
        let map = json
            .as_object()
            .ok_or_else(|| QuillError::InvalidFilter(format!("options must be an object, got {}", json)))?;
        let mut options = FindOptions::new();
        for (key, value) in map {
            match key.as_str() {
                "projection" => options.projection = Some(Projection::from_json(value)?),
                "sort" => options.sort = parse_sort(value)?,
                "skip" => options.skip = as_count(key, value)?,
                "limit" => options.limit = as_count(key, value)?,
                "hint" => options.hint = Some(Hint::from_json(value)?),
                other => {
                    return Err(QuillError::InvalidFilter(format!("unknown find option '{}'", other)))
                }
            }
        }
        Ok(options)
    }
}

fn as_count(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| QuillError::InvalidFilter(format!("{} must be a non-negative integer", key)))
}

/// Stable sort by `sort`, ties broken by ascending document id
pub fn apply_sort(docs: &mut [(DocumentId, Value)], sort: &[(String, SortDirection)]) {
    docs.sort_by(|(id_a, a), (id_b, b)| {
        for (field, direction) in sort {
            let cmp = sort_cmp(get_nested_value(a, field), get_nested_value(b, field));
            if cmp != Ordering::Equal {
                return direction.apply(cmp);
            }
        }
        id_a.cmp(id_b)
    });
}

/// Apply skip then limit (0 = unbounded)
pub fn apply_limit_skip<T>(docs: Vec<T>, limit: usize, skip: usize) -> Vec<T> {
    let take = if limit == 0 { usize::MAX } else { limit };
    docs.into_iter().skip(skip).take(take).collect()
}
