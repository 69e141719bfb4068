use murmur_llm::ProviderMessage;
use murmur_storage::HistoryStore;

use super::message::{CancelPolicy, Message, SessionRejection, SessionStatus};

/// Authoritative in-memory history and generation status.
///
/// Every accepted mutation is persisted before the call returns. A rejected call
/// leaves history, status, and the persisted record untouched.
pub struct SessionStore {
    history: Vec<Message>,
    status: SessionStatus,
    persistence: HistoryStore,
}

impl SessionStore {
    /// Restores the persisted history, or starts empty when none is usable.
    pub fn restore(persistence: HistoryStore) -> Self {
        let history = persistence
            .load()
            .into_iter()
            .map(Message::from_stored)
            .collect::<Vec<_>>();
        tracing::debug!(message_count = history.len(), "restored session history");

        Self {
            history,
            status: SessionStatus::Idle,
            persistence,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn trailing(&self) -> Option<&Message> {
        self.history.last()
    }

    pub fn append_user(&mut self, text: &str) -> Result<usize, SessionRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionRejection::EmptyInput);
        }
        if self.status != SessionStatus::Idle {
            return Err(SessionRejection::AlreadyStreaming);
        }

        self.history.push(Message::user(text));
        self.status = SessionStatus::Streaming;
        self.persist();
        Ok(self.history.len() - 1)
    }

    /// Replaces the in-progress Model text with `accumulated`, starting one if needed.
    ///
    /// `accumulated` is always the full text so far, so re-applying an update is harmless.
    pub fn apply_stream_update(&mut self, accumulated: &str) -> Result<usize, SessionRejection> {
        self.ensure_streaming()?;

        match self.history.last_mut() {
            Some(message) if message.is_streaming_model() => {
                message.text.clear();
                message.text.push_str(accumulated);
            }
            _ => self.history.push(Message::model_streaming(accumulated)),
        }

        self.persist();
        Ok(self.history.len() - 1)
    }

    pub fn complete_stream(&mut self) -> Result<(), SessionRejection> {
        self.ensure_streaming()?;

        self.finalize_trailing();
        self.status = SessionStatus::Idle;
        self.persist();
        Ok(())
    }

    /// Appends a visible error marker after any partial output.
    pub fn apply_stream_error(&mut self, message: &str) -> Result<usize, SessionRejection> {
        self.ensure_streaming()?;

        self.finalize_trailing();
        self.history.push(Message::model(format!("Error: {message}")));
        self.status = SessionStatus::Idle;
        self.persist();
        Ok(self.history.len() - 1)
    }

    /// Ends the active generation without an error marker.
    pub fn cancel_stream(&mut self, policy: CancelPolicy) -> Result<(), SessionRejection> {
        self.ensure_streaming()?;
        self.status = SessionStatus::Cancelling;

        match policy {
            CancelPolicy::Retain => self.finalize_trailing(),
            CancelPolicy::Discard => {
                if self.history.last().is_some_and(Message::is_streaming_model) {
                    self.history.pop();
                }
            }
        }

        self.status = SessionStatus::Idle;
        self.persist();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.status = SessionStatus::Idle;
        self.persistence.clear();
    }

    /// Settled history in provider vocabulary; blank and in-progress entries are skipped.
    pub fn provider_messages(&self) -> Vec<ProviderMessage> {
        self.history
            .iter()
            .filter(|message| !message.in_progress && !message.text.trim().is_empty())
            .map(Message::to_provider)
            .collect()
    }

    fn ensure_streaming(&self) -> Result<(), SessionRejection> {
        if self.status.is_streaming() {
            Ok(())
        } else {
            Err(SessionRejection::NotStreaming)
        }
    }

    fn finalize_trailing(&mut self) {
        if let Some(message) = self.history.last_mut() {
            message.in_progress = false;
        }
    }

    fn persist(&self) {
        let stored = self
            .history
            .iter()
            .map(Message::to_stored)
            .collect::<Vec<_>>();
        self.persistence.save(&stored);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use murmur_llm::Role as ProviderRole;
    use murmur_storage::{
        HISTORY_KEY, KeyValueStore, MemoryKeyValueStore, StoredMessage, StoredRole,
    };

    use super::*;

    fn store_with_backend() -> (SessionStore, Arc<MemoryKeyValueStore>) {
        let backend = Arc::new(MemoryKeyValueStore::new());
        let store = SessionStore::restore(HistoryStore::new(backend.clone()));
        (store, backend)
    }

    fn persisted(backend: &Arc<MemoryKeyValueStore>) -> Vec<StoredMessage> {
        HistoryStore::new(backend.clone()).load()
    }

    #[test]
    fn prefix_extended_updates_grow_one_model_entry() {
        let (mut store, backend) = store_with_backend();
        store.append_user("hi").expect("append");
        let before = store.history().len();

        for text in ["H", "Hel", "Hello", "Hello there"] {
            assert_eq!(store.apply_stream_update(text), Ok(before));
        }

        assert_eq!(store.history().len(), before + 1);
        assert_eq!(store.history()[before], Message::model_streaming("Hello there"));
        assert_eq!(
            persisted(&backend).last(),
            Some(&StoredMessage::new(StoredRole::Model, "Hello there"))
        );
    }

    #[test]
    fn reapplying_an_update_is_harmless() {
        let (mut store, _) = store_with_backend();
        store.append_user("hi").expect("append");

        store.apply_stream_update("Hello").expect("update");
        store.apply_stream_update("Hello").expect("repeat");

        assert_eq!(store.history().len(), 2);
        assert_eq!(store.history()[1].text, "Hello");
    }

    #[test]
    fn blank_input_is_rejected_without_mutation() {
        let (mut store, backend) = store_with_backend();

        assert_eq!(store.append_user("  \n\t "), Err(SessionRejection::EmptyInput));
        assert_eq!(store.append_user(""), Err(SessionRejection::EmptyInput));
        assert!(store.history().is_empty());
        assert_eq!(store.status(), SessionStatus::Idle);
        assert!(!backend.contains(HISTORY_KEY));
    }

    #[test]
    fn user_text_is_trimmed_and_starts_streaming() {
        let (mut store, _) = store_with_backend();

        assert_eq!(store.append_user("  hello  "), Ok(0));
        assert_eq!(store.history(), &[Message::user("hello")]);
        assert_eq!(store.status(), SessionStatus::Streaming);
        assert_eq!(store.append_user("again"), Err(SessionRejection::AlreadyStreaming));
    }

    #[test]
    fn stream_operations_require_streaming() {
        let (mut store, _) = store_with_backend();

        assert_eq!(store.apply_stream_update("x"), Err(SessionRejection::NotStreaming));
        assert_eq!(store.complete_stream(), Err(SessionRejection::NotStreaming));
        assert_eq!(store.apply_stream_error("x"), Err(SessionRejection::NotStreaming));
        assert_eq!(
            store.cancel_stream(CancelPolicy::Retain),
            Err(SessionRejection::NotStreaming)
        );
        assert!(store.history().is_empty());
    }

    #[test]
    fn completion_finalizes_trailing_model() {
        let (mut store, _) = store_with_backend();
        store.append_user("hi").expect("append");
        store.apply_stream_update("Hello").expect("update");

        store.complete_stream().expect("complete");

        assert_eq!(store.status(), SessionStatus::Idle);
        assert_eq!(store.trailing(), Some(&Message::model("Hello")));
    }

    #[test]
    fn next_generation_starts_a_fresh_model_entry() {
        let (mut store, _) = store_with_backend();
        store.append_user("one").expect("append");
        store.apply_stream_update("first").expect("update");
        store.complete_stream().expect("complete");

        store.append_user("two").expect("append");
        store.apply_stream_update("second").expect("update");

        let texts = store
            .history()
            .iter()
            .map(|message| message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, ["one", "first", "two", "second"]);
    }

    #[test]
    fn error_marker_follows_partial_output() {
        let (mut store, _) = store_with_backend();
        store.append_user("hi").expect("append");
        store.apply_stream_update("Hel").expect("update");

        assert_eq!(store.apply_stream_error("connection reset"), Ok(2));

        assert_eq!(
            store.history(),
            &[
                Message::user("hi"),
                Message::model("Hel"),
                Message::model("Error: connection reset"),
            ]
        );
        assert_eq!(store.status(), SessionStatus::Idle);
    }

    #[test]
    fn cancel_retains_or_discards_partial_text() {
        let (mut retained, _) = store_with_backend();
        retained.append_user("hi").expect("append");
        retained.apply_stream_update("Hel").expect("update");
        retained.cancel_stream(CancelPolicy::Retain).expect("cancel");

        assert_eq!(retained.history(), &[Message::user("hi"), Message::model("Hel")]);
        assert_eq!(retained.status(), SessionStatus::Idle);

        let (mut discarded, backend) = store_with_backend();
        discarded.append_user("hi").expect("append");
        discarded.apply_stream_update("Hel").expect("update");
        discarded.cancel_stream(CancelPolicy::Discard).expect("cancel");

        assert_eq!(discarded.history(), &[Message::user("hi")]);
        assert_eq!(persisted(&backend), vec![StoredMessage::new(StoredRole::User, "hi")]);
    }

    #[test]
    fn discard_without_partial_keeps_user_message() {
        let (mut store, _) = store_with_backend();
        store.append_user("hi").expect("append");

        store.cancel_stream(CancelPolicy::Discard).expect("cancel");

        assert_eq!(store.history(), &[Message::user("hi")]);
    }

    #[test]
    fn reset_clears_history_and_record_from_any_status() {
        let (mut store, backend) = store_with_backend();
        store.append_user("hi").expect("append");
        store.apply_stream_update("Hel").expect("update");
        assert!(backend.contains(HISTORY_KEY));

        store.reset();

        assert!(store.history().is_empty());
        assert_eq!(store.status(), SessionStatus::Idle);
        assert!(!backend.contains(HISTORY_KEY));
    }

    #[test]
    fn restore_reads_persisted_history() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend
            .set(
                HISTORY_KEY,
                r#"[{"role":"user","text":"hi"},{"role":"model","text":"hello"}]"#,
            )
            .expect("seed");

        let store = SessionStore::restore(HistoryStore::new(backend));

        assert_eq!(store.history(), &[Message::user("hi"), Message::model("hello")]);
        assert_eq!(store.status(), SessionStatus::Idle);
    }

    #[test]
    fn persistence_failure_does_not_disturb_the_session() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend.set_unavailable(true);
        let mut store = SessionStore::restore(HistoryStore::new(backend));

        store.append_user("hi").expect("append");
        store.apply_stream_update("Hello").expect("update");
        store.complete_stream().expect("complete");

        assert_eq!(store.history().len(), 2);
        assert_eq!(store.status(), SessionStatus::Idle);
    }

    #[test]
    fn provider_messages_skip_in_progress_and_blank_entries() {
        let (mut store, _) = store_with_backend();
        store.append_user("hi").expect("append");
        store.apply_stream_update("").expect("empty update");
        store.complete_stream().expect("complete");
        store.append_user("again").expect("append");
        store.apply_stream_update("partial").expect("update");

        let messages = store.provider_messages();

        assert_eq!(
            messages,
            vec![
                ProviderMessage::new(ProviderRole::User, "hi"),
                ProviderMessage::new(ProviderRole::User, "again"),
            ]
        );
    }
}
