// quillbase-core/src/query_planner.rs
// Access-path selection for find / explain / aggregate

use serde_json::{json, Value};

use crate::document::DocumentId;
use crate::error::{QuillError, Result};
use crate::find_options::Hint;
use crate::index::{IndexBounds, IndexManager, IndexRef, PRIMARY_INDEX_NAME};
use crate::query::{CompareOp, Filter};
use crate::{log_debug, log_trace};

/// Execution stage names reported in stats
pub const STAGE_COLLSCAN: &str = "COLLSCAN";
pub const STAGE_IXSCAN: &str = "IXSCAN";
pub const STAGE_IDHACK: &str = "IDHACK";

/// Chosen access path
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Direct primary-key lookup for `_id` equality; `None` when the
    /// literal can never be an id
    IdLookup { id: Option<DocumentId> },
    /// Range scan of a secondary index
    IndexScan {
        index_name: String,
        bounds: IndexBounds,
    },
    /// Every document in id order
    CollectionScan,
}

impl QueryPlan {
    pub fn stage(&self) -> &'static str {
        match self {
            QueryPlan::IdLookup { .. } => STAGE_IDHACK,
            QueryPlan::IndexScan { .. } => STAGE_IXSCAN,
            QueryPlan::CollectionScan => STAGE_COLLSCAN,
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        match self {
            QueryPlan::IdLookup { .. } => Some(PRIMARY_INDEX_NAME),
            QueryPlan::IndexScan { index_name, .. } => Some(index_name),
            QueryPlan::CollectionScan => None,
        }
    }

    /// JSON description used by `explain` output
    pub fn describe(&self) -> Value {
        match self {
            QueryPlan::IdLookup { id } => json!({
                "stage": STAGE_IDHACK,
                "indexName": PRIMARY_INDEX_NAME,
                "id": id.map(|i| i.as_u64()),
            }),
            QueryPlan::IndexScan { index_name, bounds } => json!({
                "stage": STAGE_IXSCAN,
                "indexName": index_name,
                "indexBounds": bounds.description,
            }),
            QueryPlan::CollectionScan => json!({"stage": STAGE_COLLSCAN}),
        }
    }
}

pub struct QueryPlanner;

impl QueryPlanner {
    /// Choose an access path for `filter`
    ///
    /// Without a hint: `_id` equality beats secondary indexes, which beat a
    /// collection scan.
    pub fn plan(filter: &Filter, indexes: &IndexManager, hint: Option<&Hint>) -> Result<QueryPlan> {
        let plan = match hint {
            Some(hint) => Self::plan_with_hint(filter, indexes, hint)?,
            None => Self::analyze_query(filter, indexes),
        };
        log_debug!("planned {} for filter {}", plan.stage(), filter);
        Ok(plan)
    }

    /// Automatic plan selection
    pub fn analyze_query(filter: &Filter, indexes: &IndexManager) -> QueryPlan {
        if let Some(plan) = Self::id_lookup(filter) {
            return plan;
        }
        match indexes.choose(filter) {
            Some(choice) => {
                log_trace!(
                    "index {} covers {} equality field(s), range: {}",
                    choice.name,
                    choice.prefix_len,
                    choice.uses_range
                );
                QueryPlan::IndexScan {
                    index_name: choice.name,
                    bounds: choice.bounds,
                }
            }
            None => QueryPlan::CollectionScan,
        }
    }

    fn id_lookup(filter: &Filter) -> Option<QueryPlan> {
        filter
            .conjuncts()
            .into_iter()
            .find(|p| p.field == "_id" && p.op == CompareOp::Eq)
            .map(|p| QueryPlan::IdLookup {
                id: DocumentId::from_value(&p.value),
            })
    }

    fn plan_with_hint(filter: &Filter, indexes: &IndexManager, hint: &Hint) -> Result<QueryPlan> {
        let index = match hint {
            Hint::Natural => return Ok(QueryPlan::CollectionScan),
            Hint::Name(name) if name == PRIMARY_INDEX_NAME => {
                return Ok(Self::id_lookup(filter).unwrap_or(QueryPlan::CollectionScan))
            }
            Hint::Fields(fields) if fields.len() == 1 && fields[0] == "_id" => {
                return Ok(Self::id_lookup(filter).unwrap_or(QueryPlan::CollectionScan))
            }
            Hint::Name(name) => indexes.get(&IndexRef::Name(name.clone())),
            Hint::Fields(fields) => indexes.get_by_fields(fields),
        }
        .ok_or_else(|| QuillError::NotFound(format!("hinted index {}", hint)))?;

        // A hinted index that cannot narrow the filter is walked end to end
        let conjuncts = filter.conjuncts();
        let (bounds, _, _) = IndexBounds::for_predicates(index.fields(), &conjuncts);
        Ok(QueryPlan::IndexScan {
            index_name: index.name().to_string(),
            bounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn manager_with(fields: &[&[&str]]) -> IndexManager {
        let docs: Vec<Document> = Vec::new();
        let mut manager = IndexManager::new();
        for f in fields {
            manager
                .create_index(f.iter().map(|s| s.to_string()).collect(), &docs)
                .unwrap();
        }
        manager
    }

    #[test]
    fn test_collection_scan_without_indexes() {
        let manager = IndexManager::new();
        let plan = QueryPlanner::plan(&Filter::eq("title", "Emma"), &manager, None).unwrap();
        assert_eq!(plan, QueryPlan::CollectionScan);
        assert_eq!(plan.stage(), "COLLSCAN");
        assert_eq!(plan.index_name(), None);
    }

    #[test]
    fn test_id_equality_uses_idhack() {
        let manager = manager_with(&[&["title"]]);
        let filter = Filter::and(vec![Filter::eq("title", "Emma"), Filter::eq("_id", 4)]);
        let plan = QueryPlanner::plan(&filter, &manager, None).unwrap();
        assert_eq!(plan, QueryPlan::IdLookup { id: Some(DocumentId(4)) });
        assert_eq!(plan.index_name(), Some("_id_"));

        let plan = QueryPlanner::plan(&Filter::eq("_id", "abc"), &manager, None).unwrap();
        assert_eq!(plan, QueryPlan::IdLookup { id: None });
    }

    #[test]
    fn test_secondary_index_selected() {
        let manager = manager_with(&[&["title"], &["author", "published_year"]]);
        let plan = QueryPlanner::plan(&Filter::eq("author", "George Orwell"), &manager, None).unwrap();
        assert_eq!(plan.index_name(), Some("author_1_published_year_1"));
        assert_eq!(plan.stage(), "IXSCAN");
        assert_eq!(plan.describe()["indexName"], "author_1_published_year_1");
    }

    #[test]
    fn test_hints() {
        let manager = manager_with(&[&["title"]]);
        let filter = Filter::eq("title", "Emma");

        let natural = QueryPlanner::plan(&filter, &manager, Some(&Hint::Natural)).unwrap();
        assert_eq!(natural, QueryPlan::CollectionScan);

        let by_fields = QueryPlanner::plan(&filter, &manager, Some(&Hint::fields(["title"]))).unwrap();
        assert_eq!(by_fields.index_name(), Some("title_1"));

        // unusable index is still honoured, as a full walk
        let other = Filter::eq("genre", "Fantasy");
        let forced = QueryPlanner::plan(&other, &manager, Some(&Hint::name("title_1"))).unwrap();
        match forced {
            QueryPlan::IndexScan { bounds, .. } => assert_eq!(bounds, IndexBounds::full()),
            other => panic!("unexpected plan {:?}", other),
        }

        let missing = QueryPlanner::plan(&filter, &manager, Some(&Hint::name("price_1")));
        assert!(matches!(missing, Err(QuillError::NotFound(_))));
    }
}
