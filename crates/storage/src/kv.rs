use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use snafu::{ResultExt, ensure};

use super::error::{
    CreateDirectorySnafu, InvalidKeySnafu, QuotaExceededSnafu, ReadRecordSnafu,
    RemoveRecordSnafu, ReplaceRecordSnafu, StorageResult, UnavailableSnafu, WriteRecordSnafu,
};

/// Durable string slots addressed by a plain key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

fn ensure_plain_key(key: &str, stage: &'static str) -> StorageResult<()> {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'));
    ensure!(
        plain,
        InvalidKeySnafu {
            stage,
            key: key.to_string(),
        }
    );
    Ok(())
}

/// One `<key>.json` file per record inside a directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    directory: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        ensure_plain_key(key, "file-get-validate-key")?;
        let path = self.record_path(key);

        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadRecordSnafu {
                stage: "file-get-read",
                key,
                path,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure_plain_key(key, "file-set-validate-key")?;
        std::fs::create_dir_all(&self.directory).context(CreateDirectorySnafu {
            stage: "file-set-create-directory",
            path: self.directory.clone(),
        })?;

        let path = self.record_path(key);
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, value).context(WriteRecordSnafu {
            stage: "file-set-write-temporary",
            key,
            path: temp_path.clone(),
        })?;

        // Rename keeps the previous record intact if the write above fails midway.
        std::fs::rename(&temp_path, &path).context(ReplaceRecordSnafu {
            stage: "file-set-rename-temporary",
            key,
            from: temp_path,
            to: path,
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        ensure_plain_key(key, "file-remove-validate-key")?;
        let path = self.record_path(key);

        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(RemoveRecordSnafu {
                stage: "file-remove",
                key,
                path,
            }),
        }
    }
}

/// In-process store with an optional byte quota, mainly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    records: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Makes every later call fail, as disabled platform storage would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records
            .read()
            .map(|records| records.contains_key(key))
            .unwrap_or(false)
    }

    fn ensure_available(&self, stage: &'static str) -> StorageResult<()> {
        ensure!(
            !self.unavailable.load(Ordering::SeqCst),
            UnavailableSnafu {
                stage,
                details: "memory store was switched off".to_string(),
            }
        );
        Ok(())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.ensure_available("memory-get")?;
        let records = self.records.read().map_err(|_| {
            UnavailableSnafu {
                stage: "memory-get-lock",
                details: "record map lock poisoned".to_string(),
            }
            .build()
        })?;
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.ensure_available("memory-set")?;
        let mut records = self.records.write().map_err(|_| {
            UnavailableSnafu {
                stage: "memory-set-lock",
                details: "record map lock poisoned".to_string(),
            }
            .build()
        })?;

        if let Some(limit) = self.quota_bytes {
            let others = records
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(existing, stored)| existing.len() + stored.len())
                .sum::<usize>();
            let attempted = others + key.len() + value.len();
            ensure!(
                attempted <= limit,
                QuotaExceededSnafu {
                    stage: "memory-set-quota",
                    key,
                    limit,
                    attempted,
                }
            );
        }

        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.ensure_available("memory-remove")?;
        let mut records = self.records.write().map_err(|_| {
            UnavailableSnafu {
                stage: "memory-remove-lock",
                details: "record map lock poisoned".to_string(),
            }
            .build()
        })?;
        records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn file_store_round_trips_and_removes() {
        let directory = tempfile::tempdir().expect("temp dir");
        let store = FileKeyValueStore::new(directory.path().join("nested"));

        assert_eq!(store.get("chat_messages").expect("get absent"), None);

        store.set("chat_messages", "[]").expect("first write");
        store.set("chat_messages", "[1]").expect("overwrite");
        assert_eq!(
            store.get("chat_messages").expect("get").as_deref(),
            Some("[1]")
        );
        assert!(!directory.path().join("nested/chat_messages.json.tmp").exists());

        store.remove("chat_messages").expect("remove");
        store.remove("chat_messages").expect("remove absent");
        assert_eq!(store.get("chat_messages").expect("get removed"), None);
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let directory = tempfile::tempdir().expect("temp dir");
        let store = FileKeyValueStore::new(directory.path());

        let error = store.set("../escape", "x").expect_err("path key");
        assert!(matches!(error, StorageError::InvalidKey { .. }));
    }

    #[test]
    fn memory_quota_counts_replaced_value_once() {
        let store = MemoryKeyValueStore::with_quota(12);

        store.set("k", "0123456789").expect("fits");
        store.set("k", "abcdefghij").expect("replacement still fits");

        let error = store.set("k", "0123456789ab").expect_err("over quota");
        assert!(matches!(error, StorageError::QuotaExceeded { limit: 12, .. }));
        assert_eq!(store.get("k").expect("get").as_deref(), Some("abcdefghij"));
    }

    #[test]
    fn unavailable_memory_store_fails_every_call() {
        let store = MemoryKeyValueStore::new();
        store.set("k", "v").expect("set");
        store.set_unavailable(true);

        assert!(matches!(
            store.get("k"),
            Err(StorageError::Unavailable { .. })
        ));
        assert!(store.remove("k").is_err());

        store.set_unavailable(false);
        assert_eq!(store.get("k").expect("get").as_deref(), Some("v"));
    }
}
