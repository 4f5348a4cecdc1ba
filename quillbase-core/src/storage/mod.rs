// quillbase-core/src/storage/mod.rs
pub mod memory_storage;
pub mod traits;

pub use memory_storage::{MemoryBackend, MemoryStorage};
pub use traits::{Backend, Storage};
