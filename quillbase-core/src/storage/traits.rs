// quillbase-core/src/storage/traits.rs
//! Storage abstraction traits for QuillBase
//!
//! A [`Storage`] holds the documents of one collection; a [`Backend`] hands
//! out those stores and owns whatever connection they share.
//!
//! ```text
//! Backend (acquired by Client::connect, released once)
//!   └── Storage per collection
//!         ├── MemoryStorage (in-process BTreeMap)
//!         └── test doubles injecting Timeout / ConnectionLost
//! ```
//!
//! Every call returns `Result` so a remote or slow backend can surface
//! `QuillError::Timeout` and `QuillError::ConnectionLost`.

use crate::document::{Document, DocumentId};
use crate::error::Result;

/// Document store for a single collection
///
/// Ids are handed out by the store and are strictly increasing, so id order
/// is insertion order.
pub trait Storage: Send + Sync {
    // ========================================================================
    // DOCUMENT OPERATIONS
    // ========================================================================

    /// Reserve the next document id
    fn allocate_id(&mut self) -> Result<DocumentId>;

    /// Store a new document under `doc.id()`
    fn insert_document(&mut self, doc: Document) -> Result<()>;

    /// Read a document by its ID
    fn read_document(&self, id: DocumentId) -> Result<Option<Document>>;

    /// Replace the stored document with the same id
    fn replace_document(&mut self, doc: Document) -> Result<()>;

    /// Remove a document, returning it if it existed
    fn remove_document(&mut self, id: DocumentId) -> Result<Option<Document>>;

    /// All live ids in ascending (insertion) order
    fn document_ids(&self) -> Result<Vec<DocumentId>>;

    /// All live documents in insertion order; finite and restartable
    fn scan_documents(&self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        for id in self.document_ids()? {
            if let Some(doc) = self.read_document(id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.document_ids()?.len())
    }

    // ========================================================================
    // PERSISTENCE & FLUSHING
    // ========================================================================

    /// Flush pending writes; a no-op for in-memory stores
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source of per-collection stores
pub trait Backend: Send + Sync + 'static {
    type Store: Storage + 'static;

    /// Acquire the backend; called once by `Client::connect_with`
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Open (or create) the store for `database.collection`
    fn open_collection(&self, database: &str, collection: &str) -> Result<Self::Store>;

    /// Release the backend; called exactly once per client
    fn release(&self) -> Result<()> {
        Ok(())
    }
}
