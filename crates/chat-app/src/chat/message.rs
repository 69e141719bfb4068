use serde::{Deserialize, Serialize};

use murmur_llm::{ProviderMessage, Role as ProviderRole};
use murmur_storage::{StoredMessage, StoredRole};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Model,
}

impl Role {
    // Keep role mapping explicit at each crate boundary so llm and storage types stay
    // decoupled from chat domain enums.
    pub fn to_provider(self) -> ProviderRole {
        match self {
            Self::User => ProviderRole::User,
            Self::Model => ProviderRole::Assistant,
        }
    }

    /// Maps a provider role back; system turns have no chat counterpart.
    pub fn from_provider(role: ProviderRole) -> Option<Self> {
        match role {
            ProviderRole::User => Some(Self::User),
            ProviderRole::Assistant => Some(Self::Model),
            ProviderRole::System => None,
        }
    }

    fn to_stored(self) -> StoredRole {
        match self {
            Self::User => StoredRole::User,
            Self::Model => StoredRole::Model,
        }
    }

    fn from_stored(role: StoredRole) -> Self {
        match role {
            StoredRole::User => Self::User,
            StoredRole::Model => Self::Model,
        }
    }
}

/// One history entry. Only the trailing Model message may be in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub in_progress: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            in_progress: false,
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            in_progress: false,
        }
    }

    /// Creates the Model entry an active stream extends.
    pub fn model_streaming(text: impl Into<String>) -> Self {
        Self {
            in_progress: true,
            ..Self::model(text)
        }
    }

    pub fn is_streaming_model(&self) -> bool {
        self.role == Role::Model && self.in_progress
    }

    pub fn to_stored(&self) -> StoredMessage {
        StoredMessage::new(self.role.to_stored(), self.text.clone())
    }

    pub fn from_stored(stored: StoredMessage) -> Self {
        Self {
            role: Role::from_stored(stored.role),
            text: stored.text,
            in_progress: false,
        }
    }

    pub fn to_provider(&self) -> ProviderMessage {
        ProviderMessage::new(self.role.to_provider(), self.text.clone())
    }
}

/// Generation status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Streaming,
    /// Held only while a cancellation policy is applied.
    Cancelling,
}

impl SessionStatus {
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

/// What to do with the partial Model message when a generation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Keep the partial text the user has already seen.
    #[default]
    Retain,
    Discard,
}

/// Rejection reason for a session operation whose precondition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    EmptyInput,
    AlreadyStreaming,
    NotStreaming,
}
