pub mod state;

pub use state::{ResolvedProvider, Settings, SettingsError, SettingsStore};
