use super::message::SessionStatus;

/// History or status change applied by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    /// A user message was appended at `index`.
    UserAppended { index: usize },
    /// The in-progress Model message at `index` was created or extended.
    ModelUpdated { index: usize },
    /// The active generation finished normally.
    Completed,
    /// The active generation failed; the error marker sits at `index`.
    Failed { index: usize },
    /// The active generation was cancelled by the user or superseded.
    Stopped,
    /// History was cleared.
    Reset,
}

/// Broadcast to subscribers after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionNotification {
    pub change: SessionChange,
    pub status: SessionStatus,
    /// Whether the display should be forced to the newest content.
    pub scroll_to_bottom: bool,
}
