// quillbase-core/src/index.rs
// Secondary indexes as ordered (key tuple, document id) sets

use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;

use crate::document::{Document, DocumentId, FieldSource};
use crate::error::{QuillError, Result};
use crate::query::{CompareOp, Filter, Predicate};
use crate::value_utils::canonical_json_string;

/// Name of the implicit primary-key index
pub const PRIMARY_INDEX_NAME: &str = "_id_";

/// Index key - one component of a key tuple
///
/// Ordering follows type brackets: null < numbers < strings < composites <
/// booleans. `MinKey`/`MaxKey` never come from documents; they only appear
/// in scan bounds.
#[derive(Debug, Clone, Serialize)]
pub enum IndexKey {
    MinKey,
    /// Null or missing field
    Null,
    /// Integers and floats share one numeric space
    Number(OrderedFloat),
    String(String),
    /// Arrays and objects, keyed by their canonical JSON form
    Composite(String),
    Bool(bool),
    MaxKey,
}

/// OrderedFloat wrapper for f64 to enable Ord
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal),
        }
    }
}

impl IndexKey {
    fn bracket(&self) -> u8 {
        match self {
            IndexKey::MinKey => 0,
            IndexKey::Null => 1,
            IndexKey::Number(_) => 2,
            IndexKey::String(_) => 3,
            IndexKey::Composite(_) => 4,
            IndexKey::Bool(_) => 5,
            IndexKey::MaxKey => 6,
        }
    }

    /// Smallest key of this key's type bracket
    fn bracket_start(&self) -> IndexKey {
        match self {
            IndexKey::Number(_) => IndexKey::Number(OrderedFloat(f64::NEG_INFINITY)),
            IndexKey::String(_) => IndexKey::String(String::new()),
            IndexKey::Composite(_) => IndexKey::Composite(String::new()),
            IndexKey::Bool(_) => IndexKey::Bool(false),
            other => other.clone(),
        }
    }

    /// First key past this key's type bracket
    fn bracket_end(&self) -> IndexKey {
        match self {
            IndexKey::MinKey => IndexKey::Null,
            IndexKey::Null => IndexKey::Number(OrderedFloat(f64::NEG_INFINITY)),
            IndexKey::Number(_) => IndexKey::String(String::new()),
            IndexKey::String(_) => IndexKey::Composite(String::new()),
            IndexKey::Composite(_) => IndexKey::Bool(false),
            IndexKey::Bool(_) | IndexKey::MaxKey => IndexKey::MaxKey,
        }
    }

    /// Whether range operators can be answered from a key range
    fn is_rangeable(&self) -> bool {
        matches!(self, IndexKey::Number(_) | IndexKey::String(_) | IndexKey::Bool(_))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;
        match (self, other) {
            (Number(a), Number(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Composite(a), Composite(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            _ => self.bracket().cmp(&other.bracket()),
        }
    }
}

/// Convert serde_json::Value to IndexKey
impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            Value::Bool(b) => IndexKey::Bool(*b),
            Value::Number(n) => IndexKey::Number(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => IndexKey::String(s.clone()),
            Value::Array(_) | Value::Object(_) => IndexKey::Composite(canonical_json_string(value)),
        }
    }
}

/// Index identifier, monotonic in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IndexId(pub u64);

/// The primary `_id` index
pub const PRIMARY_INDEX_ID: IndexId = IndexId(0);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How callers refer to an index when dropping or hinting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRef {
    Id(IndexId),
    Name(String),
}

impl From<IndexId> for IndexRef {
    fn from(id: IndexId) -> Self {
        IndexRef::Id(id)
    }
}

impl From<&str> for IndexRef {
    fn from(name: &str) -> Self {
        IndexRef::Name(name.to_string())
    }
}

impl From<String> for IndexRef {
    fn from(name: String) -> Self {
        IndexRef::Name(name)
    }
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexRef::Id(id) => write!(f, "#{}", id),
            IndexRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Public description of an index, as returned by `list_indexes`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSpec {
    pub id: IndexId,
    pub name: String,
    pub fields: Vec<String>,
    /// `{"author": 1, "published_year": 1}`
    pub key: Value,
    /// Number of entries at listing time
    pub entries: usize,
}

/// `["author", "published_year"]` → `author_1_published_year_1`
pub fn index_name(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| format!("{}_1", f))
        .collect::<Vec<_>>()
        .join("_")
}

fn key_pattern(fields: &[String]) -> Value {
    let mut map = serde_json::Map::new();
    for field in fields {
        map.insert(field.clone(), Value::from(1));
    }
    Value::Object(map)
}

type Entry = (Vec<IndexKey>, DocumentId);

/// Key range over index entries
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBounds {
    lower: Bound<Entry>,
    upper: Bound<Entry>,
    /// Human-readable form for explain output
    pub description: String,
}

impl IndexBounds {
    /// Every entry of the index
    pub fn full() -> Self {
        IndexBounds {
            lower: Bound::Included((Vec::new(), DocumentId(0))),
            upper: Bound::Excluded((vec![IndexKey::MaxKey], DocumentId(0))),
            description: "[MinKey, MaxKey]".to_string(),
        }
    }

    /// Bounds for `fields` given the filter's conjunctive predicates
    ///
    /// Leading fields with equality predicates form the prefix; the next
    /// field may contribute a range. Returns the bounds together with the
    /// number of equality fields and whether a range was used.
    pub fn for_predicates(fields: &[String], conjuncts: &[&Predicate]) -> (Self, usize, bool) {
        let mut prefix = Vec::new();
        let mut parts = Vec::new();

        for field in fields {
            let eq = conjuncts
                .iter()
                .find(|p| p.op == CompareOp::Eq && &p.field == field);
            match eq {
                Some(p) => {
                    parts.push(format!("{}: [{}]", field, p.value));
                    prefix.push(IndexKey::from(&p.value));
                }
                None => break,
            }
        }
        let matched = prefix.len();

        if let Some(next) = fields.get(matched) {
            if let Some(range) = KeyRange::from_predicates(next, conjuncts) {
                parts.push(format!("{}: {}", next, range.describe()));
                let bounds = range.into_bounds(&prefix, parts.join(", "));
                return (bounds, matched, true);
            }
        }

        if matched == 0 {
            return (IndexBounds::full(), 0, false);
        }
        let mut upper = prefix.clone();
        upper.push(IndexKey::MaxKey);
        let bounds = IndexBounds {
            lower: Bound::Included((prefix, DocumentId(0))),
            upper: Bound::Excluded((upper, DocumentId(0))),
            description: parts.join(", "),
        };
        (bounds, matched, false)
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }
}

/// Range on a single index field, restricted to one type bracket
struct KeyRange {
    lower: IndexKey,
    lower_inclusive: bool,
    upper: IndexKey,
    upper_inclusive: bool,
}

impl KeyRange {
    fn from_predicates(field: &str, conjuncts: &[&Predicate]) -> Option<KeyRange> {
        let mut ranges = conjuncts
            .iter()
            .filter(|p| p.field == field && p.op.is_range())
            .map(|p| (p.op, IndexKey::from(&p.value)))
            .filter(|(_, key)| key.is_rangeable());

        let (first_op, first_key) = ranges.next()?;
        let bracket = first_key.bracket();
        let mut range = KeyRange {
            lower: first_key.bracket_start(),
            lower_inclusive: true,
            upper: first_key.bracket_end(),
            upper_inclusive: false,
        };
        range.tighten(first_op, first_key);
        for (op, key) in ranges {
            if key.bracket() == bracket {
                range.tighten(op, key);
            }
        }
        Some(range)
    }

    fn tighten(&mut self, op: CompareOp, key: IndexKey) {
        match op {
            CompareOp::Gt | CompareOp::Gte => {
                let inclusive = op == CompareOp::Gte;
                if key > self.lower || (key == self.lower && !inclusive) {
                    self.lower = key;
                    self.lower_inclusive = inclusive;
                }
            }
            CompareOp::Lt | CompareOp::Lte => {
                let inclusive = op == CompareOp::Lte;
                if key < self.upper || (key == self.upper && !inclusive) {
                    self.upper = key;
                    self.upper_inclusive = inclusive;
                }
            }
            CompareOp::Eq | CompareOp::In => {}
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}{:?}, {:?}{}",
            if self.lower_inclusive { "[" } else { "(" },
            self.lower,
            self.upper,
            if self.upper_inclusive { "]" } else { ")" }
        )
    }

    fn into_bounds(self, prefix: &[IndexKey], description: String) -> IndexBounds {
        let with = |key: IndexKey, tail: Option<IndexKey>| {
            let mut keys = prefix.to_vec();
            keys.push(key);
            keys.extend(tail);
            (keys, DocumentId(0))
        };
        // MaxKey tail sorts after every entry sharing the component
        let lower = if self.lower_inclusive {
            Bound::Included(with(self.lower, None))
        } else {
            Bound::Included(with(self.lower, Some(IndexKey::MaxKey)))
        };
        let upper = if self.upper_inclusive {
            Bound::Excluded(with(self.upper, Some(IndexKey::MaxKey)))
        } else {
            Bound::Excluded(with(self.upper, None))
        };
        IndexBounds {
            lower,
            upper,
            description,
        }
    }
}

/// A secondary index over one or more fields
#[derive(Debug, Clone)]
pub struct Index {
    id: IndexId,
    name: String,
    fields: Vec<String>,
    entries: BTreeSet<Entry>,
}

impl Index {
    fn new(id: IndexId, fields: Vec<String>) -> Self {
        Index {
            id,
            name: index_name(&fields),
            fields,
            entries: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key tuple in declared field order; missing fields index as null
    pub fn extract_key<D: FieldSource + ?Sized>(&self, doc: &D) -> Vec<IndexKey> {
        self.fields
            .iter()
            .map(|f| doc.field(f).map(IndexKey::from).unwrap_or(IndexKey::Null))
            .collect()
    }

    fn insert(&mut self, doc: &Document) {
        self.entries.insert((self.extract_key(doc), doc.id()));
    }

    fn remove(&mut self, doc: &Document) {
        self.entries.remove(&(self.extract_key(doc), doc.id()));
    }

    /// Document ids within `bounds`, in key order
    pub fn scan(&self, bounds: &IndexBounds) -> Vec<DocumentId> {
        if bounds.is_empty() {
            return Vec::new();
        }
        self.entries
            .range((bounds.lower.clone(), bounds.upper.clone()))
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn spec(&self) -> IndexSpec {
        IndexSpec {
            id: self.id,
            name: self.name.clone(),
            fields: self.fields.clone(),
            key: key_pattern(&self.fields),
            entries: self.entries.len(),
        }
    }
}

/// Index selected for a filter
#[derive(Debug, Clone)]
pub struct IndexChoice {
    pub id: IndexId,
    pub name: String,
    pub bounds: IndexBounds,
    pub prefix_len: usize,
    pub uses_range: bool,
}

/// Owns the secondary indexes of one collection
///
/// Callers hold the collection lock while mutating, so index entries change
/// in the same critical section as the documents they describe.
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: Vec<Index>,
    last_id: u64,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index over `fields` and backfill it from `docs`
    pub fn create_index<'a, I>(&mut self, fields: Vec<String>, docs: I) -> Result<IndexId>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        if fields.is_empty() {
            return Err(QuillError::InvalidIndex("an index needs at least one field".into()));
        }
        if let Some(empty) = fields.iter().find(|f| f.is_empty() || f.starts_with('$')) {
            return Err(QuillError::InvalidIndex(format!("invalid field name '{}'", empty)));
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].contains(field) {
                return Err(QuillError::InvalidIndex(format!(
                    "field '{}' listed twice",
                    field
                )));
            }
        }
        if fields.len() == 1 && fields[0] == "_id" {
            return Err(QuillError::DuplicateIndex(PRIMARY_INDEX_NAME.to_string()));
        }
        if let Some(existing) = self.indexes.iter().find(|idx| idx.fields == fields) {
            return Err(QuillError::DuplicateIndex(existing.name.clone()));
        }

        self.last_id += 1;
        let mut index = Index::new(IndexId(self.last_id), fields);
        for doc in docs {
            index.insert(doc);
        }
        let id = index.id;
        self.indexes.push(index);
        Ok(id)
    }

    /// Remove an index; the primary index cannot be dropped
    pub fn drop_index(&mut self, target: &IndexRef) -> Result<IndexSpec> {
        let is_primary = match target {
            IndexRef::Id(id) => *id == PRIMARY_INDEX_ID,
            IndexRef::Name(name) => name == PRIMARY_INDEX_NAME,
        };
        if is_primary {
            return Err(QuillError::InvalidIndex(
                "cannot drop the _id_ index".to_string(),
            ));
        }
        let pos = self
            .position(target)
            .ok_or_else(|| QuillError::NotFound(format!("index {}", target)))?;
        Ok(self.indexes.remove(pos).spec())
    }

    fn position(&self, target: &IndexRef) -> Option<usize> {
        self.indexes.iter().position(|idx| match target {
            IndexRef::Id(id) => idx.id == *id,
            IndexRef::Name(name) => &idx.name == name,
        })
    }

    pub fn get(&self, target: &IndexRef) -> Option<&Index> {
        self.position(target).map(|pos| &self.indexes[pos])
    }

    pub fn get_by_fields(&self, fields: &[String]) -> Option<&Index> {
        self.indexes.iter().find(|idx| idx.fields == fields)
    }

    /// Secondary indexes in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter()
    }

    /// Primary `_id_` first, then secondaries in creation order
    pub fn list_indexes(&self, document_count: usize) -> Vec<IndexSpec> {
        let primary_fields = vec!["_id".to_string()];
        let mut specs = vec![IndexSpec {
            id: PRIMARY_INDEX_ID,
            name: PRIMARY_INDEX_NAME.to_string(),
            key: key_pattern(&primary_fields),
            fields: primary_fields,
            entries: document_count,
        }];
        specs.extend(self.indexes.iter().map(Index::spec));
        specs
    }

    // ========== MAINTENANCE ==========

    pub fn on_insert(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            index.insert(doc);
        }
    }

    pub fn on_remove(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            index.remove(doc);
        }
    }

    pub fn on_update(&mut self, old: &Document, new: &Document) {
        for index in &mut self.indexes {
            let old_key = index.extract_key(old);
            let new_key = index.extract_key(new);
            if old_key != new_key {
                index.entries.remove(&(old_key, old.id()));
                index.entries.insert((new_key, new.id()));
            }
        }
    }

    // ========== SELECTION ==========

    /// Pick the index covering the longest equality prefix of `filter`
    ///
    /// A range on the field after the prefix counts as a partial match. Ties
    /// go to the index created first.
    pub fn choose(&self, filter: &Filter) -> Option<IndexChoice> {
        let conjuncts = filter.conjuncts();
        if conjuncts.is_empty() {
            return None;
        }

        let mut best: Option<IndexChoice> = None;
        for index in &self.indexes {
            let (bounds, prefix_len, uses_range) =
                IndexBounds::for_predicates(&index.fields, &conjuncts);
            if prefix_len == 0 && !uses_range {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => (prefix_len, uses_range) > (current.prefix_len, current.uses_range),
            };
            if better {
                best = Some(IndexChoice {
                    id: index.id,
                    name: index.name.clone(),
                    bounds,
                    prefix_len,
                    uses_range,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: u64, value: Value) -> Document {
        Document::new(DocumentId(id), value).unwrap()
    }

    fn books() -> Vec<Document> {
        vec![
            doc(1, json!({"author": "George Orwell", "published_year": 1949, "price": 10.99})),
            doc(2, json!({"author": "George Orwell", "published_year": 1945, "price": 8.5})),
            doc(3, json!({"author": "J.R.R. Tolkien", "published_year": 1937, "price": 14.99})),
            doc(4, json!({"author": "Frank Herbert", "published_year": 1965})),
            doc(5, json!({"author": "Aldous Huxley", "published_year": "1932"})),
        ]
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_index_key_ordering() {
        let keys = [
            IndexKey::MinKey,
            IndexKey::Null,
            IndexKey::Number(OrderedFloat(-3.0)),
            IndexKey::Number(OrderedFloat(2.5)),
            IndexKey::String("".into()),
            IndexKey::String("b".into()),
            IndexKey::Composite("[1]".into()),
            IndexKey::Bool(false),
            IndexKey::Bool(true),
            IndexKey::MaxKey,
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
        }
        assert_eq!(IndexKey::from(&json!(1949)), IndexKey::from(&json!(1949.0)));
    }

    #[test]
    fn test_index_names() {
        assert_eq!(index_name(&fields(&["title"])), "title_1");
        assert_eq!(
            index_name(&fields(&["author", "published_year"])),
            "author_1_published_year_1"
        );
    }

    #[test]
    fn test_create_backfills_and_rejects_duplicates() {
        let docs = books();
        let mut manager = IndexManager::new();
        let id = manager.create_index(fields(&["author"]), &docs).unwrap();
        assert_eq!(manager.get(&id.into()).unwrap().len(), 5);

        let err = manager.create_index(fields(&["author"]), &docs).unwrap_err();
        assert!(matches!(err, QuillError::DuplicateIndex(ref n) if n == "author_1"));
        assert_eq!(manager.iter().count(), 1);
        assert_eq!(manager.get(&id.into()).unwrap().len(), 5);

        assert!(matches!(
            manager.create_index(fields(&["_id"]), &docs),
            Err(QuillError::DuplicateIndex(_))
        ));
        assert!(matches!(
            manager.create_index(vec![], &docs),
            Err(QuillError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_list_and_drop() {
        let docs = books();
        let mut manager = IndexManager::new();
        let title = manager.create_index(fields(&["title"]), &docs).unwrap();
        manager
            .create_index(fields(&["author", "published_year"]), &docs)
            .unwrap();

        let names: Vec<_> = manager.list_indexes(docs.len()).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["_id_", "title_1", "author_1_published_year_1"]);

        assert!(matches!(
            manager.drop_index(&"_id_".into()),
            Err(QuillError::InvalidIndex(_))
        ));
        manager.drop_index(&title.into()).unwrap();
        assert!(matches!(
            manager.drop_index(&"title_1".into()),
            Err(QuillError::NotFound(_))
        ));
        assert_eq!(manager.list_indexes(0).len(), 2);
    }

    #[test]
    fn test_equality_prefix_scan() {
        let docs = books();
        let mut manager = IndexManager::new();
        manager
            .create_index(fields(&["author", "published_year"]), &docs)
            .unwrap();

        let filter = Filter::eq("author", "George Orwell");
        let choice = manager.choose(&filter).unwrap();
        assert_eq!(choice.prefix_len, 1);
        let index = manager.get(&choice.id.into()).unwrap();
        assert_eq!(index.scan(&choice.bounds), vec![DocumentId(2), DocumentId(1)]);
    }

    #[test]
    fn test_range_scan_stays_in_bracket() {
        let docs = books();
        let mut manager = IndexManager::new();
        manager.create_index(fields(&["published_year"]), &docs).unwrap();

        let filter = Filter::gt("published_year", 1940);
        let choice = manager.choose(&filter).unwrap();
        assert!(choice.uses_range);
        let index = manager.get(&choice.id.into()).unwrap();
        // the string "1932" is outside the numeric bracket
        assert_eq!(
            index.scan(&choice.bounds),
            vec![DocumentId(2), DocumentId(1), DocumentId(4)]
        );

        let between = Filter::and(vec![
            Filter::gte("published_year", 1945),
            Filter::lt("published_year", 1965),
        ]);
        let choice = manager.choose(&between).unwrap();
        assert_eq!(index.scan(&choice.bounds), vec![DocumentId(2), DocumentId(1)]);

        let inverted = Filter::and(vec![
            Filter::gt("published_year", 2000),
            Filter::lt("published_year", 1900),
        ]);
        let choice = manager.choose(&inverted).unwrap();
        assert!(index.scan(&choice.bounds).is_empty());
    }

    #[test]
    fn test_compound_prefix_plus_range() {
        let docs = books();
        let mut manager = IndexManager::new();
        manager
            .create_index(fields(&["author", "published_year"]), &docs)
            .unwrap();

        let filter = Filter::and(vec![
            Filter::eq("author", "George Orwell"),
            Filter::lte("published_year", 1945),
        ]);
        let choice = manager.choose(&filter).unwrap();
        assert_eq!((choice.prefix_len, choice.uses_range), (1, true));
        let index = manager.get(&choice.id.into()).unwrap();
        assert_eq!(index.scan(&choice.bounds), vec![DocumentId(2)]);
    }

    #[test]
    fn test_choose_prefers_longer_prefix_then_creation_order() {
        let docs = books();
        let mut manager = IndexManager::new();
        let author = manager.create_index(fields(&["author"]), &docs).unwrap();
        let compound = manager
            .create_index(fields(&["author", "published_year"]), &docs)
            .unwrap();
        manager.create_index(fields(&["price"]), &docs).unwrap();

        let filter = Filter::and(vec![
            Filter::eq("author", "George Orwell"),
            Filter::eq("published_year", 1949),
        ]);
        assert_eq!(manager.choose(&filter).unwrap().id, compound);

        // both cover one equality field; the older index wins
        assert_eq!(manager.choose(&Filter::eq("author", "x")).unwrap().id, author);

        assert!(manager.choose(&Filter::eq("genre", "x")).is_none());
        assert!(manager
            .choose(&Filter::or(vec![Filter::eq("author", "x")]))
            .is_none());
    }

    #[test]
    fn test_maintenance_hooks() {
        let docs = books();
        let mut manager = IndexManager::new();
        let id = manager.create_index(fields(&["price"]), &docs).unwrap();

        let mut updated = docs[2].clone();
        let patch = json!({"price": 12.5}).as_object().unwrap().clone();
        updated.apply_patch(&patch).unwrap();
        manager.on_update(&docs[2], &updated);

        let choice = manager.choose(&Filter::eq("price", 12.5)).unwrap();
        let index = manager.get(&id.into()).unwrap();
        assert_eq!(index.scan(&choice.bounds), vec![DocumentId(3)]);
        assert!(index
            .scan(&manager.choose(&Filter::eq("price", 14.99)).unwrap().bounds)
            .is_empty());

        manager.on_remove(&updated);
        assert_eq!(manager.get(&id.into()).unwrap().len(), 4);
    }

    #[test]
    fn test_missing_fields_index_as_null() {
        let docs = books();
        let mut manager = IndexManager::new();
        manager.create_index(fields(&["price"]), &docs).unwrap();
        let choice = manager.choose(&Filter::eq("price", Value::Null)).unwrap();
        let index = manager.iter().next().unwrap();
        assert_eq!(index.scan(&choice.bounds), vec![DocumentId(4), DocumentId(5)]);
    }
}
