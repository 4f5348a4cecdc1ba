// quillbase-core/src/collection_core.rs
// Collection logic over a pluggable storage backend
//
// FILE STRUCTURE:
// ├── Constructor / configuration
// ├── CRUD Operations
// │   ├── insert_one, insert_many, get
// │   ├── update_one, update_many
// │   └── delete_one, delete_many
// ├── Query Operations
// │   ├── find, find_with_options, find_one
// │   ├── count_documents, distinct
// │   └── query_plan, explain, explain_with_options
// ├── Aggregation
// ├── Index Operations
// │   └── create_index, drop_index, list_indexes
// └── Private Helpers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::aggregation::Pipeline;
use crate::cursor::{CursorSource, Deadline, ExecutionStats, FindCursor};
use crate::document::{Document, DocumentId};
use crate::error::{QuillError, Result};
use crate::find_options::{apply_limit_skip, apply_sort, FindOptions, Hint};
use crate::index::{IndexId, IndexManager, IndexRef, IndexSpec};
use crate::query::Filter;
use crate::query_planner::{QueryPlan, QueryPlanner};
use crate::storage::Storage;
use crate::value_utils::canonical_json_string;
use crate::{log_debug, log_info, log_trace};

/// Result of insert_many operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub inserted_count: usize,
}

/// Result of update_one / update_many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: u64,
    /// Documents whose stored value actually changed
    pub modified_count: u64,
}

/// Result of delete_one / delete_many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Everything one collection lock guards
pub(crate) struct CollectionState<S: Storage> {
    storage: S,
    indexes: IndexManager,
    /// Allowed top-level field names; `None` accepts any field
    schema: Option<Vec<String>>,
}

/// Handle to one collection
///
/// Cloning is cheap; clones share the same documents, indexes and lock.
/// Writers take the lock exclusively and update documents and indexes in
/// the same critical section.
pub struct CollectionCore<S: Storage> {
    pub name: String,
    state: Arc<RwLock<CollectionState<S>>>,
    timeout: Option<Duration>,
    open: Arc<AtomicBool>,
}

impl<S: Storage> Clone for CollectionCore<S> {
    fn clone(&self) -> Self {
        CollectionCore {
            name: self.name.clone(),
            state: Arc::clone(&self.state),
            timeout: self.timeout,
            open: Arc::clone(&self.open),
        }
    }
}

impl<S: Storage> CollectionCore<S> {
    // ========== CONSTRUCTOR ==========

    /// Standalone collection over `storage`: no schema, no deadline
    pub fn new(name: impl Into<String>, storage: S) -> Self {
        CollectionCore {
            name: name.into(),
            state: Arc::new(RwLock::new(CollectionState {
                storage,
                indexes: IndexManager::new(),
                schema: None,
            })),
            timeout: None,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Bound every scan by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share the owning client's open flag
    pub(crate) fn with_connection(mut self, open: Arc<AtomicBool>) -> Self {
        self.open = open;
        self
    }

    /// Restrict filters to `fields` (plus `_id`); `None` removes the schema
    pub fn set_schema(&self, fields: Option<&[&str]>) {
        let mut state = self.state.write();
        state.schema = fields.map(|f| {
            let mut names: Vec<String> = f.iter().map(|s| s.to_string()).collect();
            if !names.iter().any(|n| n == "_id") {
                names.insert(0, "_id".to_string());
            }
            names
        });
        log_debug!("collection '{}' schema set to {:?}", self.name, state.schema);
    }

    pub fn schema(&self) -> Option<Vec<String>> {
        self.state.read().schema.clone()
    }

    // ========== CRUD OPERATIONS ==========

    /// Insert one document; any caller `_id` is replaced
    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        self.check_open()?;
        let mut state = self.state.write();
        let id = state.storage.allocate_id()?;
        let doc = Document::new(id, document)?;
        state.storage.insert_document(doc.clone())?;
        state.indexes.on_insert(&doc);
        log_trace!("inserted {} into '{}'", id, self.name);
        Ok(id)
    }

    /// Insert several documents under one write lock
    ///
    /// Every input is checked before the first insert, so a non-object
    /// input leaves the collection unchanged.
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        self.check_open()?;
        if let Some(bad) = documents.iter().find(|d| !d.is_object()) {
            return Err(QuillError::Serialization(format!(
                "document must be a JSON object, got {}",
                bad
            )));
        }

        let mut state = self.state.write();
        let mut inserted_ids = Vec::with_capacity(documents.len());
        for document in documents {
            let id = state.storage.allocate_id()?;
            let doc = Document::new(id, document)?;
            state.storage.insert_document(doc.clone())?;
            state.indexes.on_insert(&doc);
            inserted_ids.push(id);
        }
        log_debug!("inserted {} documents into '{}'", inserted_ids.len(), self.name);

        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    /// Document by id, `NotFound` when absent
    pub fn get(&self, id: DocumentId) -> Result<Value> {
        self.fetch(id)?
            .map(Document::into_value)
            .ok_or_else(|| QuillError::NotFound(format!("document {} in '{}'", id, self.name)))
    }

    /// Merge `update` into the first matching document (in id order)
    ///
    /// `update` is `{"$set": {...}}` or a bare field map.
    pub fn update_one(&self, filter: &Filter, update: &Value) -> Result<UpdateResult> {
        self.update(filter, update, false)
    }

    /// Merge `update` into every matching document
    pub fn update_many(&self, filter: &Filter, update: &Value) -> Result<UpdateResult> {
        self.update(filter, update, true)
    }

    /// Remove the first matching document (in id order)
    pub fn delete_one(&self, filter: &Filter) -> Result<DeleteResult> {
        self.delete(filter, false)
    }

    pub fn delete_many(&self, filter: &Filter) -> Result<DeleteResult> {
        self.delete(filter, true)
    }

    // ========== QUERY OPERATIONS ==========

    /// Lazy cursor over matching documents in id order
    pub fn find(&self, filter: &Filter) -> Result<FindCursor<'_, S>> {
        self.find_with_options(filter, FindOptions::default())
    }

    /// Find with projection, sort, skip, limit and hint
    pub fn find_with_options(&self, filter: &Filter, options: FindOptions) -> Result<FindCursor<'_, S>> {
        self.check_open()?;
        let started = Instant::now();
        let mut deadline = Deadline::new(self.timeout);
        log_debug!("find on '{}' with filter {}", self.name, filter);

        let (source, stats) = {
            let state = self.state.read();
            if options.sort.is_empty() {
                self.validate_filter(&state, filter)?;
                let plan = QueryPlanner::plan(filter, &state.indexes, options.hint.as_ref())?;
                let (ids, stats) = Self::candidates(&state, &plan)?;
                (CursorSource::Lazy(ids), stats)
            } else {
                let mut matched = Vec::new();
                let mut stats =
                    self.visit_matches(&state, filter, options.hint.as_ref(), &deadline, |doc| {
                        matched.push((doc.id(), doc.into_value()));
                        true
                    })?;
                // counted again as the cursor hands documents out
                stats.n_returned = 0;
                apply_sort(&mut matched, &options.sort);
                let page = apply_limit_skip(matched, options.limit, options.skip);
                (CursorSource::Buffered(page.into_iter().map(|(_, v)| v).collect()), stats)
            }
        };
        deadline.check()?;
        deadline.pause();

        Ok(FindCursor::new(
            self,
            filter.clone(),
            source,
            options.projection,
            options.skip,
            options.limit,
            deadline,
            stats,
            started,
        ))
    }

    /// First matching document in id order
    pub fn find_one(&self, filter: &Filter) -> Result<Option<Value>> {
        let mut found = None;
        self.read_matches(filter, None, |doc| {
            found = Some(doc.into_value());
            false
        })?;
        Ok(found)
    }

    pub fn count_documents(&self, filter: &Filter) -> Result<u64> {
        Ok(self.read_matches(filter, None, |_| true)?.n_returned)
    }

    /// Distinct values of `field` among matching documents, first-seen order
    ///
    /// Array values contribute their elements; documents missing the field
    /// contribute nothing.
    pub fn distinct(&self, field: &str, filter: &Filter) -> Result<Vec<Value>> {
        let mut seen = AHashSet::new();
        let mut values = Vec::new();
        self.read_matches(filter, None, |doc| {
            let items = match doc.get(field) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => return true,
            };
            for item in items {
                if seen.insert(canonical_json_string(&item)) {
                    values.push(item);
                }
            }
            true
        })?;
        Ok(values)
    }

    /// Access path `find` would use
    pub fn query_plan(&self, filter: &Filter, hint: Option<&Hint>) -> Result<QueryPlan> {
        self.check_open()?;
        let state = self.state.read();
        self.validate_filter(&state, filter)?;
        QueryPlanner::plan(filter, &state.indexes, hint)
    }

    /// Plan and run `filter`, returning statistics only
    pub fn explain(&self, filter: &Filter) -> Result<ExecutionStats> {
        self.explain_with_options(filter, &FindOptions::default())
    }

    /// Like [`explain`](Self::explain) but honouring `options.hint`
    ///
    /// Sort, skip, limit and projection do not affect the statistics;
    /// `nReturned` counts every match.
    pub fn explain_with_options(&self, filter: &Filter, options: &FindOptions) -> Result<ExecutionStats> {
        let stats = self.read_matches(filter, options.hint.as_ref(), |_| true)?;
        log_info!(
            "explain on '{}': stage={} index={:?} examined={} returned={}",
            self.name,
            stats.stage,
            stats.index_used,
            stats.documents_examined,
            stats.n_returned
        );
        Ok(stats)
    }

    // ========== AGGREGATION ==========

    /// Run `pipeline` over the collection
    ///
    /// A leading `$match` is planned like a find and may use an index. Any
    /// error discards every partial result.
    ///
    /// # Example
    /// ```
    /// use quillbase_core::aggregation::Pipeline;
    /// use quillbase_core::{CollectionCore, MemoryStorage};
    /// use serde_json::json;
    ///
    /// let books = CollectionCore::new("books", MemoryStorage::new());
    /// books.insert_one(json!({"genre": "Fantasy", "price": 10})).unwrap();
    /// books.insert_one(json!({"genre": "Fantasy", "price": 20})).unwrap();
    ///
    /// let pipeline = Pipeline::from_json(&json!([
    ///     {"$group": {"_id": "$genre", "averagePrice": {"$avg": "$price"}}}
    /// ])).unwrap();
    /// let out = books.aggregate(&pipeline).unwrap();
    /// assert_eq!(out, vec![json!({"_id": "Fantasy", "averagePrice": 15.0})]);
    /// ```
    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Value>> {
        self.check_open()?;
        let deadline = Deadline::new(self.timeout);

        let everything = Filter::all();
        let (filter, first_stage) = match pipeline.leading_match() {
            Some(filter) => (filter, 1),
            None => (&everything, 0),
        };

        let mut docs = Vec::new();
        let stats = {
            let state = self.state.read();
            self.visit_matches(&state, filter, None, &deadline, |doc| {
                docs.push(doc.into_value());
                true
            })?
        };
        log_debug!("aggregate on '{}' fed from {}", self.name, stats.stage);

        let out = pipeline.execute_from(first_stage, docs)?;
        deadline.check()?;
        log_debug!("aggregate on '{}' produced {} documents", self.name, out.len());
        Ok(out)
    }

    /// Parse and run a JSON pipeline
    pub fn aggregate_json(&self, pipeline: &Value) -> Result<Vec<Value>> {
        self.aggregate(&Pipeline::from_json(pipeline)?)
    }

    // ========== INDEX OPERATIONS ==========

    /// Create an index over `fields` (declared order) and backfill it
    pub fn create_index<I, F>(&self, fields: I) -> Result<IndexId>
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        self.check_open()?;
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();

        let mut state = self.state.write();
        if let Some(schema) = &state.schema {
            if let Some(unknown) = fields.iter().find(|f| {
                let top = f.split('.').next().unwrap_or(f.as_str());
                !schema.iter().any(|s| s == top)
            }) {
                return Err(QuillError::InvalidIndex(format!(
                    "field '{}' is not in the '{}' schema",
                    unknown, self.name
                )));
            }
        }
        let docs = state.storage.scan_documents()?;
        let id = state.indexes.create_index(fields.clone(), &docs)?;
        log_info!(
            "created index {} on '{}' {:?} ({} documents)",
            id,
            self.name,
            fields,
            docs.len()
        );
        Ok(id)
    }

    /// Drop a secondary index by id or name
    pub fn drop_index(&self, target: impl Into<IndexRef>) -> Result<()> {
        self.check_open()?;
        let target = target.into();
        let spec = self.state.write().indexes.drop_index(&target)?;
        log_info!("dropped index {} on '{}'", spec.name, self.name);
        Ok(())
    }

    /// `_id_` first, then secondary indexes in creation order
    pub fn list_indexes(&self) -> Result<Vec<IndexSpec>> {
        self.check_open()?;
        let state = self.state.read();
        let count = state.storage.count()?;
        Ok(state.indexes.list_indexes(count))
    }

    // ========== PRIVATE HELPER METHODS ==========

    /// Single-document read used by cursors, one lock acquisition per call
    pub(crate) fn fetch(&self, id: DocumentId) -> Result<Option<Document>> {
        self.check_open()?;
        self.state.read().storage.read_document(id)
    }

    /// Flush the backing store; used by `Client::close`
    pub(crate) fn flush(&self) -> Result<()> {
        self.state.write().storage.flush()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(QuillError::ConnectionLost(format!(
                "client closed; collection '{}' is unavailable",
                self.name
            )))
        }
    }

    fn validate_filter(&self, state: &CollectionState<S>, filter: &Filter) -> Result<()> {
        match &state.schema {
            Some(schema) => {
                let names: Vec<&str> = schema.iter().map(String::as_str).collect();
                filter.validate_fields(&names)
            }
            None => Ok(()),
        }
    }

    /// Candidate ids for `plan`, ascending so output follows insertion order
    fn candidates(state: &CollectionState<S>, plan: &QueryPlan) -> Result<(Vec<DocumentId>, ExecutionStats)> {
        let mut stats = ExecutionStats {
            stage: plan.stage().to_string(),
            index_used: plan.index_name().map(str::to_string),
            ..ExecutionStats::default()
        };

        let ids = match plan {
            QueryPlan::IdLookup { id: Some(id) } => {
                if state.storage.read_document(*id)?.is_some() {
                    stats.keys_examined = 1;
                    vec![*id]
                } else {
                    Vec::new()
                }
            }
            QueryPlan::IdLookup { id: None } => Vec::new(),
            QueryPlan::IndexScan { index_name, bounds } => {
                let index = state
                    .indexes
                    .get(&IndexRef::Name(index_name.clone()))
                    .ok_or_else(|| QuillError::NotFound(format!("index {}", index_name)))?;
                let mut ids = index.scan(bounds);
                stats.keys_examined = ids.len() as u64;
                ids.sort_unstable();
                ids
            }
            QueryPlan::CollectionScan => state.storage.document_ids()?,
        };
        Ok((ids, stats))
    }

    /// Plan and evaluate `filter` against one consistent view of `state`
    ///
    /// Matches reach `visit` in id order; returning `false` stops the scan.
    /// `nReturned` counts the matches visited.
    fn visit_matches<F>(
        &self,
        state: &CollectionState<S>,
        filter: &Filter,
        hint: Option<&Hint>,
        deadline: &Deadline,
        mut visit: F,
    ) -> Result<ExecutionStats>
    where
        F: FnMut(Document) -> bool,
    {
        self.validate_filter(state, filter)?;
        let plan = QueryPlanner::plan(filter, &state.indexes, hint)?;
        let (ids, mut stats) = Self::candidates(state, &plan)?;

        for id in ids {
            deadline.check()?;
            let doc = match state.storage.read_document(id)? {
                Some(doc) => doc,
                None => continue,
            };
            stats.documents_examined += 1;
            if filter.matches(&doc) {
                stats.n_returned += 1;
                if !visit(doc) {
                    break;
                }
            }
        }
        Ok(stats)
    }

    /// Whole-result read under a single read lock
    fn read_matches<F>(&self, filter: &Filter, hint: Option<&Hint>, visit: F) -> Result<ExecutionStats>
    where
        F: FnMut(Document) -> bool,
    {
        self.check_open()?;
        let started = Instant::now();
        let deadline = Deadline::new(self.timeout);
        let state = self.state.read();
        let mut stats = self.visit_matches(&state, filter, hint, &deadline, visit)?;
        stats.execution_time_millis = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Matching documents in id order, at most one unless `multi`
    fn matching_documents(
        &self,
        state: &CollectionState<S>,
        filter: &Filter,
        multi: bool,
        deadline: &Deadline,
    ) -> Result<Vec<Document>> {
        let mut matched = Vec::new();
        self.visit_matches(state, filter, None, deadline, |doc| {
            matched.push(doc);
            multi
        })?;
        Ok(matched)
    }

    fn update(&self, filter: &Filter, update: &Value, multi: bool) -> Result<UpdateResult> {
        self.check_open()?;
        let patch = parse_patch(update)?;
        let deadline = Deadline::new(self.timeout);

        let mut state = self.state.write();
        let matched = self.matching_documents(&state, filter, multi, &deadline)?;

        let mut result = UpdateResult {
            matched_count: matched.len() as u64,
            modified_count: 0,
        };
        for old in matched {
            let mut doc = old.clone();
            if doc.apply_patch(&patch)? {
                state.storage.replace_document(doc.clone())?;
                state.indexes.on_update(&old, &doc);
                result.modified_count += 1;
            }
        }
        log_debug!(
            "update on '{}' matched {} modified {}",
            self.name,
            result.matched_count,
            result.modified_count
        );
        Ok(result)
    }

    fn delete(&self, filter: &Filter, multi: bool) -> Result<DeleteResult> {
        self.check_open()?;
        let deadline = Deadline::new(self.timeout);

        let mut state = self.state.write();
        let matched = self.matching_documents(&state, filter, multi, &deadline)?;

        let mut result = DeleteResult::default();
        for doc in matched {
            if let Some(removed) = state.storage.remove_document(doc.id())? {
                state.indexes.on_remove(&removed);
                result.deleted_count += 1;
            }
        }
        log_debug!("delete on '{}' removed {}", self.name, result.deleted_count);
        Ok(result)
    }
}

/// `{"$set": {...}}` or a bare field map
fn parse_patch(update: &Value) -> Result<Map<String, Value>> {
    let map = update.as_object().ok_or_else(|| {
        QuillError::InvalidFilter(format!("update must be an object, got {}", update))
    })?;

    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(map.clone());
    }
    match map.get("$set") {
        Some(Value::Object(fields)) if map.len() == 1 => Ok(fields.clone()),
        Some(_) if map.len() == 1 => Err(QuillError::InvalidFilter(
            "$set expects an object".to_string(),
        )),
        _ => Err(QuillError::InvalidFilter(format!(
            "unsupported update operator in {}",
            update
        ))),
    }
}
