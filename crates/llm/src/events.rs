use std::fmt;

/// Identifier for one generation attempt.
///
/// This must change on every submit so events from a superseded channel can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationHandle(pub u64);

impl GenerationHandle {
    /// Creates a typed generation handle.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for GenerationHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "gen-{}", self.0)
    }
}

/// Speaker role in provider vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Provider-agnostic lifecycle payload emitted by one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    /// Full accumulated text so far, never a delta.
    Update(String),
    Done,
    Error(String),
}

/// One channel event, tagged with the handle of the invocation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub handle: GenerationHandle,
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    pub fn update(handle: GenerationHandle, accumulated: impl Into<String>) -> Self {
        Self {
            handle,
            payload: StreamEventPayload::Update(accumulated.into()),
        }
    }

    pub fn done(handle: GenerationHandle) -> Self {
        Self {
            handle,
            payload: StreamEventPayload::Done,
        }
    }

    pub fn error(handle: GenerationHandle, message: impl Into<String>) -> Self {
        Self {
            handle,
            payload: StreamEventPayload::Error(message.into()),
        }
    }
}
