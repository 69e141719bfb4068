use std::sync::Arc;

use snafu::ResultExt;

use super::error::{ParseHistorySnafu, SerializeHistorySnafu, StorageResult};
use super::kv::KeyValueStore;
use super::types::{HISTORY_KEY, StoredMessage};

/// Reads and writes the conversation history under [`HISTORY_KEY`].
///
/// `load`, `save`, and `clear` never fail toward the caller: persistence problems are
/// logged and swallowed so an active generation is never interrupted. The `try_*`
/// variants expose the underlying error for callers that want it.
#[derive(Clone)]
pub struct HistoryStore {
    backend: Arc<dyn KeyValueStore>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn try_load(&self) -> StorageResult<Vec<StoredMessage>> {
        let Some(record) = self.backend.get(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&record).context(ParseHistorySnafu {
            stage: "history-load-parse",
        })
    }

    /// Returns the stored history, or an empty one when the record is absent or unusable.
    pub fn load(&self) -> Vec<StoredMessage> {
        match self.try_load() {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(
                    key = HISTORY_KEY,
                    error = %error,
                    "failed to load persisted history; starting empty"
                );
                Vec::new()
            }
        }
    }

    pub fn try_save(&self, messages: &[StoredMessage]) -> StorageResult<()> {
        let record = serde_json::to_string(messages).context(SerializeHistorySnafu {
            stage: "history-save-serialize",
        })?;
        self.backend.set(HISTORY_KEY, &record)
    }

    pub fn save(&self, messages: &[StoredMessage]) {
        if let Err(error) = self.try_save(messages) {
            tracing::warn!(
                key = HISTORY_KEY,
                message_count = messages.len(),
                error = %error,
                "failed to persist history"
            );
        }
    }

    pub fn try_clear(&self) -> StorageResult<()> {
        self.backend.remove(HISTORY_KEY)
    }

    pub fn clear(&self) {
        if let Err(error) = self.try_clear() {
            tracing::warn!(key = HISTORY_KEY, error = %error, "failed to clear persisted history");
        }
    }
}
