// quillbase-core/src/storage/memory_storage.rs
//! Pure in-memory storage implementation
//!
//! ```text
//! MemoryStorage (Storage trait implementation)
//!      ↓
//! BTreeMap<DocumentId, Document> (id order = insertion order)
//! ```

use std::collections::BTreeMap;

use crate::document::{Document, DocumentId};
use crate::error::{QuillError, Result};
use crate::storage::{Backend, Storage};

/// In-memory storage backend
///
/// Data lives as long as the store; nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: BTreeMap<DocumentId, Document>,
    last_id: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn allocate_id(&mut self) -> Result<DocumentId> {
        let id = DocumentId::new_auto(self.last_id);
        self.last_id = id.as_u64();
        Ok(id)
    }

    fn insert_document(&mut self, doc: Document) -> Result<()> {
        let id = doc.id();
        if self.documents.contains_key(&id) {
            return Err(QuillError::Serialization(format!("document {} already stored", id)));
        }
        self.last_id = self.last_id.max(id.as_u64());
        self.documents.insert(id, doc);
        Ok(())
    }

    fn read_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.get(&id).cloned())
    }

    fn replace_document(&mut self, doc: Document) -> Result<()> {
        match self.documents.get_mut(&doc.id()) {
            Some(slot) => {
                *slot = doc;
                Ok(())
            }
            None => Err(QuillError::NotFound(format!("document {}", doc.id()))),
        }
    }

    fn remove_document(&mut self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.remove(&id))
    }

    fn document_ids(&self) -> Result<Vec<DocumentId>> {
        Ok(self.documents.keys().copied().collect())
    }

    fn scan_documents(&self) -> Result<Vec<Document>> {
        Ok(self.documents.values().cloned().collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.documents.len())
    }
}

/// Backend handing out fresh [`MemoryStorage`] stores
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    type Store = MemoryStorage;

    fn open_collection(&self, _database: &str, _collection: &str) -> Result<MemoryStorage> {
        Ok(MemoryStorage::new())
    }
}

// ============================================================================
// TESTS
// ============================================================================
