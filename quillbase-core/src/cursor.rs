// quillbase-core/src/cursor.rs
// Lazy find cursor and per-query execution statistics

use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::collection_core::CollectionCore;
use crate::document::DocumentId;
use crate::error::{QuillError, Result};
use crate::find_options::Projection;
use crate::query::Filter;
use crate::storage::Storage;
use crate::log_warn;

/// Statistics for one query execution; created per query, never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Documents fetched and evaluated against the filter
    pub documents_examined: u64,
    /// Index entries visited
    pub keys_examined: u64,
    pub n_returned: u64,
    pub execution_time_millis: u64,
    /// Index name, `None` for a collection scan
    pub index_used: Option<String>,
    /// COLLSCAN, IXSCAN or IDHACK
    pub stage: String,
}

/// Time budget for one operation
///
/// Only time spent inside the engine counts; a cursor idle between pulls
/// does not consume its budget.
#[derive(Debug, Clone)]
pub(crate) struct Deadline {
    limit: Option<Duration>,
    spent: Duration,
    slice: Instant,
}

impl Deadline {
    pub(crate) fn new(limit: Option<Duration>) -> Self {
        Deadline {
            limit,
            spent: Duration::ZERO,
            slice: Instant::now(),
        }
    }

    pub(crate) fn resume(&mut self) {
        self.slice = Instant::now();
    }

    pub(crate) fn pause(&mut self) {
        self.spent += self.slice.elapsed();
    }

    pub(crate) fn check(&self) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.spent + self.slice.elapsed() >= limit {
                log_warn!("operation exceeded its {} ms budget", limit.as_millis());
                return Err(QuillError::Timeout(limit.as_millis()));
            }
        }
        Ok(())
    }
}

/// Where a cursor's documents come from
pub(crate) enum CursorSource {
    /// Candidate ids, fetched and evaluated one pull at a time
    Lazy(Vec<DocumentId>),
    /// Sorted, skipped and limited page built under the planning lock
    Buffered(Vec<Value>),
}

/// Streaming result of `find`
///
/// Without a sort, documents are fetched and evaluated only as the consumer
/// pulls them; work stops once the limit is reached or the cursor is
/// dropped. The collection lock is taken per pull, never held between
/// pulls. With a sort, every match is buffered and ordered when the cursor
/// is created, under the same read lock that planned the query.
pub struct FindCursor<'a, S: Storage> {
    collection: &'a CollectionCore<S>,
    filter: Filter,
    ids: std::vec::IntoIter<DocumentId>,
    buffered: Option<std::vec::IntoIter<Value>>,
    projection: Option<Projection>,
    skip_remaining: usize,
    limit_remaining: Option<usize>,
    deadline: Deadline,
    stats: ExecutionStats,
    started: Instant,
    elapsed: Option<Duration>,
    finished: bool,
}

impl<'a, S: Storage> FindCursor<'a, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        collection: &'a CollectionCore<S>,
        filter: Filter,
        source: CursorSource,
        projection: Option<Projection>,
        skip: usize,
        limit: usize,
        deadline: Deadline,
        stats: ExecutionStats,
        started: Instant,
    ) -> Self {
        let (ids, buffered, skip_remaining, limit_remaining) = match source {
            CursorSource::Lazy(ids) => (ids, None, skip, (limit > 0).then_some(limit)),
            CursorSource::Buffered(page) => (Vec::new(), Some(page.into_iter()), 0, None),
        };
        FindCursor {
            collection,
            filter,
            ids: ids.into_iter(),
            buffered,
            projection,
            skip_remaining,
            limit_remaining,
            deadline,
            stats,
            started,
            elapsed: None,
            finished: false,
        }
    }

    /// Fetch the next chunk of documents (up to `chunk_size`)
    pub fn next_chunk(&mut self, chunk_size: usize) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(chunk_size.min(64));
        while results.len() < chunk_size {
            match self.pull()? {
                Some(doc) => results.push(doc),
                None => break,
            }
        }
        Ok(results)
    }

    /// Pull every remaining document
    pub fn fetch_all(&mut self) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        while let Some(doc) = self.pull()? {
            results.push(doc);
        }
        Ok(results)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Statistics so far; final once the cursor is exhausted
    pub fn stats(&self) -> ExecutionStats {
        let mut stats = self.stats.clone();
        let elapsed = self.elapsed.unwrap_or_else(|| self.started.elapsed());
        stats.execution_time_millis = elapsed.as_millis() as u64;
        stats
    }

    fn pull(&mut self) -> Result<Option<Value>> {
        if self.finished {
            return Ok(None);
        }
        self.deadline.resume();
        let out = if self.buffered.is_some() {
            self.pull_buffered()
        } else {
            self.pull_streaming()
        };
        self.deadline.pause();

        if !matches!(out, Ok(Some(_))) {
            self.finished = true;
            self.elapsed = Some(self.started.elapsed());
        }
        out
    }

    fn pull_streaming(&mut self) -> Result<Option<Value>> {
        if self.limit_remaining == Some(0) {
            return Ok(None);
        }
        while let Some(id) = self.ids.next() {
            self.deadline.check()?;
            // deleted since planning
            let doc = match self.collection.fetch(id)? {
                Some(doc) => doc,
                None => continue,
            };
            self.stats.documents_examined += 1;
            if !self.filter.matches(&doc) {
                continue;
            }
            if self.skip_remaining > 0 {
                self.skip_remaining -= 1;
                continue;
            }
            if let Some(remaining) = self.limit_remaining.as_mut() {
                *remaining -= 1;
            }
            self.stats.n_returned += 1;
            return Ok(Some(self.project(doc.into_value())));
        }
        Ok(None)
    }

    fn pull_buffered(&mut self) -> Result<Option<Value>> {
        self.collection.check_open()?;
        match self.buffered.as_mut().and_then(Iterator::next) {
            Some(doc) => {
                self.stats.n_returned += 1;
                Ok(Some(self.project(doc)))
            }
            None => Ok(None),
        }
    }

    fn project(&self, doc: Value) -> Value {
        match &self.projection {
            Some(projection) => projection.apply(doc),
            None => doc,
        }
    }
}

impl<'a, S: Storage> Iterator for FindCursor<'a, S> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_serialize_camel_case() {
        let stats = ExecutionStats {
            documents_examined: 12,
            keys_examined: 0,
            n_returned: 3,
            execution_time_millis: 1,
            index_used: None,
            stage: "COLLSCAN".to_string(),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["documentsExamined"], 12);
        assert_eq!(json["nReturned"], 3);
        assert_eq!(json["indexUsed"], serde_json::Value::Null);
        assert_eq!(json["executionTimeMillis"], 1);
    }

    #[test]
    fn test_deadline_zero_budget_times_out() {
        let deadline = Deadline::new(Some(Duration::ZERO));
        assert!(matches!(deadline.check(), Err(QuillError::Timeout(0))));
        assert!(Deadline::new(None).check().is_ok());
        assert!(Deadline::new(Some(Duration::from_secs(60))).check().is_ok());
    }

    #[test]
    fn test_deadline_pause_excludes_idle_time() {
        let mut deadline = Deadline::new(Some(Duration::from_millis(40)));
        deadline.pause();
        std::thread::sleep(Duration::from_millis(60));
        deadline.resume();
        assert!(deadline.check().is_ok());
    }
}
