// fault_tests.rs
// Backend failures, operation deadlines and client shutdown

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quillbase_core::bookstore::sample_documents;
use quillbase_core::{
    Backend, Client, Document, DocumentId, Filter, MemoryStorage, QuillError, Result, Storage,
    StoreConfig,
};
use serde_json::json;

/// Fault switches shared between a test and its backend
#[derive(Clone)]
struct Faults {
    /// Successful reads left before the connection drops; negative = unlimited
    reads_left: Arc<AtomicI64>,
    scan_timeout: Arc<AtomicBool>,
    refuse_connect: Arc<AtomicBool>,
    read_delay: Duration,
    releases: Arc<AtomicUsize>,
}

impl Faults {
    fn new() -> Self {
        Faults {
            reads_left: Arc::new(AtomicI64::new(-1)),
            scan_timeout: Arc::new(AtomicBool::new(false)),
            refuse_connect: Arc::new(AtomicBool::new(false)),
            read_delay: Duration::ZERO,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn drop_after(&self, reads: i64) {
        self.reads_left.store(reads, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.reads_left.store(-1, Ordering::SeqCst);
        self.scan_timeout.store(false, Ordering::SeqCst);
    }
}

struct FlakyStorage {
    inner: MemoryStorage,
    faults: Faults,
}

impl FlakyStorage {
    fn consume_read(&self) -> Result<()> {
        if !self.faults.read_delay.is_zero() {
            std::thread::sleep(self.faults.read_delay);
        }
        let left = self.faults.reads_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(QuillError::ConnectionLost("backend connection reset".into()));
        }
        if left > 0 {
            self.faults.reads_left.store(left - 1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Storage for FlakyStorage {
    fn allocate_id(&mut self) -> Result<DocumentId> {
        self.inner.allocate_id()
    }

    fn insert_document(&mut self, doc: Document) -> Result<()> {
        self.inner.insert_document(doc)
    }

    fn read_document(&self, id: DocumentId) -> Result<Option<Document>> {
        self.consume_read()?;
        self.inner.read_document(id)
    }

    fn replace_document(&mut self, doc: Document) -> Result<()> {
        self.inner.replace_document(doc)
    }

    fn remove_document(&mut self, id: DocumentId) -> Result<Option<Document>> {
        self.inner.remove_document(id)
    }

    fn document_ids(&self) -> Result<Vec<DocumentId>> {
        if self.faults.scan_timeout.load(Ordering::SeqCst) {
            return Err(QuillError::Timeout(250));
        }
        self.inner.document_ids()
    }
}

struct FlakyBackend {
    faults: Faults,
}

impl Backend for FlakyBackend {
    type Store = FlakyStorage;

    fn connect(&self) -> Result<()> {
        if self.faults.refuse_connect.load(Ordering::SeqCst) {
            return Err(QuillError::ConnectionLost("connection refused".into()));
        }
        Ok(())
    }

    fn open_collection(&self, _database: &str, _collection: &str) -> Result<FlakyStorage> {
        Ok(FlakyStorage {
            inner: MemoryStorage::new(),
            faults: self.faults.clone(),
        })
    }

    fn release(&self) -> Result<()> {
        self.faults.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn flaky_client(faults: &Faults, config: StoreConfig) -> Client<FlakyBackend> {
    let backend = FlakyBackend {
        faults: faults.clone(),
    };
    Client::connect_with(config, backend).unwrap()
}

// ========== BACKEND FAILURES ==========

#[test]
fn test_connect_failure_surfaces() {
    let faults = Faults::new();
    faults.refuse_connect.store(true, Ordering::SeqCst);
    let backend = FlakyBackend { faults };
    assert!(matches!(
        Client::connect_with(StoreConfig::default(), backend),
        Err(QuillError::ConnectionLost(_))
    ));
}

#[test]
fn test_aggregate_discards_partial_results() {
    let faults = Faults::new();
    let client = flaky_client(&faults, StoreConfig::default());
    let books = client.default_database().collection("books").unwrap();
    books.insert_many(sample_documents().unwrap()).unwrap();

    let pipeline = json!([{"$group": {"_id": "$genre", "n": {"$sum": 1}}}]);
    faults.drop_after(5);
    assert!(matches!(
        books.aggregate_json(&pipeline),
        Err(QuillError::ConnectionLost(_))
    ));

    faults.heal();
    let out = books.aggregate_json(&pipeline).unwrap();
    let total: u64 = out.iter().map(|g| g["n"].as_u64().unwrap()).sum();
    assert_eq!(total, 12);
}

#[test]
fn test_cursor_reports_mid_stream_failure() {
    let faults = Faults::new();
    let client = flaky_client(&faults, StoreConfig::default());
    let books = client.default_database().collection("books").unwrap();
    books.insert_many(sample_documents().unwrap()).unwrap();

    faults.drop_after(3);
    let results: Vec<Result<serde_json::Value>> = books.find(&Filter::all()).unwrap().collect();
    assert_eq!(results.len(), 4);
    assert!(results[..3].iter().all(|r| r.is_ok()));
    assert!(matches!(results[3], Err(QuillError::ConnectionLost(_))));
}

#[test]
fn test_backend_timeout_propagates() {
    let faults = Faults::new();
    let client = flaky_client(&faults, StoreConfig::default());
    let books = client.default_database().collection("books").unwrap();
    books.insert_one(json!({"title": "Emma"})).unwrap();

    faults.scan_timeout.store(true, Ordering::SeqCst);
    assert!(matches!(
        books.count_documents(&Filter::all()),
        Err(QuillError::Timeout(250))
    ));
    assert!(matches!(
        books.update_many(&Filter::all(), &json!({"price": 1})),
        Err(QuillError::Timeout(_))
    ));
    // id lookups do not scan
    assert_eq!(books.count_documents(&Filter::eq("_id", 1)).unwrap(), 1);
}

// ========== DEADLINES ==========

#[test]
fn test_slow_scan_hits_operation_timeout() {
    let mut faults = Faults::new();
    faults.read_delay = Duration::from_millis(10);
    let config = StoreConfig::default().with_timeout(Some(Duration::from_millis(30)));
    let client = flaky_client(&faults, config);
    let books = client.default_database().collection("books").unwrap();
    books.insert_many(sample_documents().unwrap()).unwrap();

    assert!(matches!(
        books.find(&Filter::all()).unwrap().fetch_all(),
        Err(QuillError::Timeout(30))
    ));
    assert!(matches!(
        books.aggregate_json(&json!([{"$limit": 1}])),
        Err(QuillError::Timeout(30))
    ));
}

#[test]
fn test_idle_cursor_keeps_its_budget() {
    let client = Client::connect(
        StoreConfig::default().with_timeout(Some(Duration::from_millis(200))),
    )
    .unwrap();
    let books = client.default_database().collection("books").unwrap();
    books.insert_many(sample_documents().unwrap()).unwrap();

    let mut cursor = books.find(&Filter::all()).unwrap();
    assert_eq!(cursor.next_chunk(2).unwrap().len(), 2);
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(cursor.fetch_all().unwrap().len(), 10);
    assert!(cursor.is_finished());
}

// ========== SHUTDOWN ==========

#[test]
fn test_close_releases_once_and_blocks_handles() {
    let faults = Faults::new();
    let client = flaky_client(&faults, StoreConfig::default());
    let db = client.default_database();
    let books = db.collection("books").unwrap();
    books.insert_one(json!({"title": "Emma"})).unwrap();

    client.close().unwrap();
    assert_eq!(faults.releases.load(Ordering::SeqCst), 1);

    assert!(matches!(books.find_one(&Filter::all()), Err(QuillError::ConnectionLost(_))));
    assert!(matches!(books.list_indexes(), Err(QuillError::ConnectionLost(_))));
    assert!(matches!(db.collection("books"), Err(QuillError::ConnectionLost(_))));
}

#[test]
fn test_cursor_fails_after_close() {
    let client = Client::connect(StoreConfig::default()).unwrap();
    let books = client.default_database().collection("books").unwrap();
    books.insert_many(sample_documents().unwrap()).unwrap();

    let mut cursor = books.find(&Filter::all()).unwrap();
    assert!(cursor.next().unwrap().is_ok());
    client.close().unwrap();
    assert!(matches!(cursor.next(), Some(Err(QuillError::ConnectionLost(_)))));
}
