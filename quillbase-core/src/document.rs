// quillbase-core/src/document.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{QuillError, Result};
use crate::value_utils::{get_nested_value, get_path_in_map, set_path_in_map};

/// Store-assigned document identifier
///
/// Monotonic per collection, so id order is insertion order. Serialized as
/// a plain number: `{"_id": 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl DocumentId {
    /// Next auto-increment id
    pub fn new_auto(last_id: u64) -> Self {
        DocumentId(last_id + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Interpret an `_id` filter literal
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(DocumentId(u))
                } else {
                    let f = n.as_f64()?;
                    (f >= 0.0 && f.fract() == 0.0).then(|| DocumentId(f as u64))
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything the predicate evaluator can read fields from
pub trait FieldSource {
    fn field(&self, path: &str) -> Option<&Value>;
}

impl FieldSource for Value {
    fn field(&self, path: &str) -> Option<&Value> {
        get_nested_value(self, path)
    }
}

impl FieldSource for Map<String, Value> {
    fn field(&self, path: &str) -> Option<&Value> {
        get_path_in_map(self, path)
    }
}

/// A stored record
///
/// `fields` always carries `_id` so filters and projections treat it like
/// any other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Map<String, Value>", try_from = "Map<String, Value>")]
pub struct Document {
    id: DocumentId,
    fields: Map<String, Value>,
}

impl Document {
    /// Build a document from caller input, stamping `id`
    ///
    /// Any `_id` already present in the input is replaced.
    pub fn new(id: DocumentId, value: Value) -> Result<Self> {
        let input = match value {
            Value::Object(map) => map,
            other => {
                return Err(QuillError::Serialization(format!(
                    "document must be a JSON object, got {}",
                    other
                )))
            }
        };
        let mut fields = Map::with_capacity(input.len() + 1);
        fields.insert("_id".to_string(), Value::from(id.0));
        fields.extend(input.into_iter().filter(|(k, _)| k != "_id"));
        Ok(Document { id, fields })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Field lookup with dot notation (includes `_id`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path_in_map(&self.fields, path)
    }

    /// Merge `patch` into the document (`$set` semantics)
    ///
    /// Returns whether any stored value changed. `_id` cannot be patched.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<bool> {
        if patch.keys().any(|k| k == "_id" || k.starts_with("_id.")) {
            return Err(QuillError::InvalidFilter(
                "update patch may not modify _id".to_string(),
            ));
        }
        let mut changed = false;
        for (path, value) in patch {
            if self.get(path) != Some(value) {
                set_path_in_map(&mut self.fields, path, value.clone());
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Caller-facing copy: a JSON object including `_id`
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl FieldSource for Document {
    fn field(&self, path: &str) -> Option<&Value> {
        self.get(path)
    }
}

impl From<Document> for Map<String, Value> {
    fn from(doc: Document) -> Self {
        doc.fields
    }
}

impl TryFrom<Map<String, Value>> for Document {
    type Error = QuillError;

    fn try_from(fields: Map<String, Value>) -> Result<Self> {
        let id = fields
            .get("_id")
            .and_then(DocumentId::from_value)
            .ok_or_else(|| QuillError::Serialization("document is missing a numeric _id".into()))?;
        Ok(Document { id, fields })
    }
}
