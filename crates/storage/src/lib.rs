pub mod error;
pub mod history;
pub mod kv;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use history::HistoryStore;
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use types::{HISTORY_KEY, StoredMessage, StoredRole};
