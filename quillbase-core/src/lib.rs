// quillbase-core/src/lib.rs
// Document query and aggregation engine for book records

pub mod aggregation;
pub mod bookstore;
pub mod collection_core;
pub mod config;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod index;
pub mod logging;
pub mod query;
pub mod query_planner;
pub mod storage;
pub mod value_utils;

// Public exports
pub use aggregation::{Accumulator, Expr, GroupStage, Pipeline, ProjectStage, Stage};
pub use bookstore::{sample_books, Book, BOOK_FIELDS};
pub use collection_core::{CollectionCore, DeleteResult, InsertManyResult, UpdateResult};
pub use config::StoreConfig;
pub use cursor::{ExecutionStats, FindCursor};
pub use database::{Client, Database};
pub use document::{Document, DocumentId};
pub use error::{QuillError, Result};
pub use find_options::{FindOptions, Hint, Projection, SortDirection};
pub use index::{IndexId, IndexRef, IndexSpec};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use query::{CompareOp, Filter, Predicate};
pub use query_planner::QueryPlan;
pub use storage::{Backend, MemoryBackend, MemoryStorage, Storage};
