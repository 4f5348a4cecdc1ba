// quillbase-core/src/database.rs
// Client lifecycle and database / collection handles

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collection_core::CollectionCore;
use crate::config::StoreConfig;
use crate::error::{QuillError, Result};
use crate::logging::set_log_level;
use crate::storage::{Backend, MemoryBackend};
use crate::{log_debug, log_info, log_warn};

type CollectionKey = (String, String);

struct ClientInner<B: Backend> {
    backend: B,
    config: StoreConfig,
    /// Shared with every collection handle; false once the client is closed
    open: Arc<AtomicBool>,
    collections: RwLock<HashMap<CollectionKey, CollectionCore<B::Store>>>,
}

/// Scoped connection to a backend
///
/// `close` releases the backend exactly once; dropping an unclosed client
/// releases it as well. Handles obtained from the client keep working
/// until then and fail with `ConnectionLost` afterwards.
///
/// ```
/// use quillbase_core::{Client, StoreConfig};
/// use quillbase_core::query::Filter;
/// use serde_json::json;
///
/// let client = Client::connect(StoreConfig::default()).unwrap();
/// let books = client.database("plp_bookstore").collection("books").unwrap();
/// books.insert_one(json!({"title": "Emma"})).unwrap();
/// assert_eq!(books.count_documents(&Filter::all()).unwrap(), 1);
///
/// client.close().unwrap();
/// assert!(books.count_documents(&Filter::all()).is_err());
/// ```
pub struct Client<B: Backend = MemoryBackend> {
    inner: Arc<ClientInner<B>>,
    released: AtomicBool,
}

impl Client<MemoryBackend> {
    /// Connect to the in-memory backend
    pub fn connect(config: StoreConfig) -> Result<Self> {
        Client::connect_with(config, MemoryBackend)
    }
}

impl<B: Backend> Client<B> {
    /// Validate `config`, apply its log level and acquire `backend`
    pub fn connect_with(config: StoreConfig, backend: B) -> Result<Self> {
        config.validate()?;
        set_log_level(config.log_level());
        backend.connect()?;
        log_info!("client connected (default database '{}')", config.database);

        Ok(Client {
            inner: Arc::new(ClientInner {
                backend,
                config,
                open: Arc::new(AtomicBool::new(true)),
                collections: RwLock::new(HashMap::new()),
            }),
            released: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn database(&self, name: &str) -> Database<B> {
        Database {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Database named by `config.database`
    pub fn default_database(&self) -> Database<B> {
        self.database(&self.inner.config.database)
    }

    /// Flush every open collection and release the backend
    pub fn close(self) -> Result<()> {
        self.release_once()
    }

    fn release_once(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.open.store(false, Ordering::Release);

        let collections: Vec<_> = self.inner.collections.write().drain().collect();
        let mut first_error = None;
        for ((db, name), collection) in collections {
            if let Err(e) = collection.flush() {
                log_warn!("flush of {}.{} failed on close: {}", db, name, e);
                first_error.get_or_insert(e);
            }
        }
        let released = self.inner.backend.release();
        log_info!("client closed");
        match first_error {
            Some(e) => Err(e),
            None => released,
        }
    }
}

impl<B: Backend> Drop for Client<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release_once() {
            log_warn!("release on drop failed: {}", e);
        }
    }
}

/// Named database within a client
pub struct Database<B: Backend = MemoryBackend> {
    name: String,
    inner: Arc<ClientInner<B>>,
}

impl<B: Backend> Database<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schemaless collection handle, opened on first use
    pub fn collection(&self, name: &str) -> Result<CollectionCore<B::Store>> {
        if !self.inner.open.load(Ordering::Acquire) {
            return Err(QuillError::ConnectionLost("client is closed".to_string()));
        }
        let key = (self.name.clone(), name.to_string());
        if let Some(existing) = self.inner.collections.read().get(&key) {
            return Ok(existing.clone());
        }

        let mut collections = self.inner.collections.write();
        if let Some(existing) = collections.get(&key) {
            return Ok(existing.clone());
        }
        let store = self.inner.backend.open_collection(&self.name, name)?;
        let collection = CollectionCore::new(name, store)
            .with_timeout(self.inner.config.operation_timeout())
            .with_connection(Arc::clone(&self.inner.open));
        log_debug!("opened collection {}.{}", self.name, name);
        collections.insert(key, collection.clone());
        Ok(collection)
    }

    /// Collection whose filters are checked against `fields`
    ///
    /// The schema only applies when `validate_fields` is enabled.
    pub fn collection_with_schema(&self, name: &str, fields: &[&str]) -> Result<CollectionCore<B::Store>> {
        let collection = self.collection(name)?;
        if self.inner.config.validate_fields {
            collection.set_schema(Some(fields));
        }
        Ok(collection)
    }

    /// Names of collections opened in this database
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .collections
            .read()
            .keys()
            .filter(|(db, _)| *db == self.name)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingBackend {
        releases: Arc<AtomicUsize>,
    }

    impl Backend for CountingBackend {
        type Store = MemoryStorage;

        fn open_collection(&self, _database: &str, _collection: &str) -> Result<MemoryStorage> {
            Ok(MemoryStorage::new())
        }

        fn release(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_handles_share_state() {
        let client = Client::connect(StoreConfig::default()).unwrap();
        let db = client.database("plp_bookstore");
        db.collection("books").unwrap().insert_one(json!({"title": "Emma"})).unwrap();
        let again = client.default_database().collection("books").unwrap();
        assert_eq!(again.count_documents(&Filter::all()).unwrap(), 1);

        let other = client.database("other").collection("books").unwrap();
        assert_eq!(other.count_documents(&Filter::all()).unwrap(), 0);
        assert_eq!(db.list_collections(), vec!["books".to_string()]);
    }

    #[test]
    fn test_close_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            releases: Arc::clone(&releases),
        };
        let client = Client::connect_with(StoreConfig::default(), backend).unwrap();
        let books = client.database("db").collection("books").unwrap();
        client.close().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(matches!(
            books.insert_one(json!({"title": "x"})),
            Err(QuillError::ConnectionLost(_))
        ));
    }

    #[test]
    fn test_drop_releases() {
        let releases = Arc::new(AtomicUsize::new(0));
        {
            let backend = CountingBackend {
                releases: Arc::clone(&releases),
            };
            let client = Client::connect_with(StoreConfig::default(), backend).unwrap();
            assert!(client.is_open());
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schema_toggle() {
        let client = Client::connect(StoreConfig::default().with_field_validation(false)).unwrap();
        let books = client
            .database("db")
            .collection_with_schema("books", &["title"])
            .unwrap();
        assert!(books.schema().is_none());
        assert!(books.find(&Filter::eq("isbn", 1)).is_ok());

        let strict = Client::connect(StoreConfig::default()).unwrap();
        let books = strict
            .database("db")
            .collection_with_schema("books", &["title"])
            .unwrap();
        assert_eq!(books.schema(), Some(vec!["_id".to_string(), "title".to_string()]));
        assert!(books.find(&Filter::eq("isbn", 1)).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoreConfig {
            log_level: "LOUD".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(Client::connect(config), Err(QuillError::Config(_))));

        let zero = StoreConfig::default().with_timeout(Some(std::time::Duration::ZERO));
        assert!(matches!(Client::connect(zero), Err(QuillError::Config(_))));
    }
}
