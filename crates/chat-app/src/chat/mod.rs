/// Generation lifecycle over a session and a transport channel.
pub mod controller;
/// Change notifications published by the controller.
pub mod events;
/// Domain entities and session status boundaries.
pub mod message;
pub mod scroll_manager;
pub mod session;

pub use controller::{ControllerOptions, STREAM_DEBOUNCE_MS, SessionController};
pub use events::{SessionChange, SessionNotification};
pub use message::{CancelPolicy, Message, Role, SessionRejection, SessionStatus};
pub use scroll_manager::{FOLLOW_TOLERANCE, ScrollManager, ScrollMetrics, ScrollOrigin};
pub use session::SessionStore;
