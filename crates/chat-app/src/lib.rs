#![deny(unsafe_code)]

/// Line-oriented terminal front end.
pub mod app;
/// Chat session engine: history, generation lifecycle, and viewport follow.
pub mod chat;
/// Settings persistence.
pub mod settings;
