use serde::{Deserialize, Serialize};

/// Fixed key under which the conversation history is stored.
pub const HISTORY_KEY: &str = "chat_messages";

/// Storage-local message role, intentionally decoupled from chat-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredRole {
    User,
    Model,
}

/// One persisted `{role, text}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: StoredRole,
    pub text: String,
}

impl StoredMessage {
    pub fn new(role: StoredRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}
