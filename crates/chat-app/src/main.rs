use std::process::ExitCode;
use std::sync::Arc;

use murmur::app::TerminalApp;
use murmur::chat::{ControllerOptions, SessionController, SessionStore};
use murmur::settings::SettingsStore;
use murmur_llm::create_provider;
use murmur_storage::{FileKeyValueStore, HistoryStore};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Terminal entry point.
///
/// Logs go to stderr so streamed chat output on stdout stays readable; `RUST_LOG`
/// raises verbosity above the default `warn`.
#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();

    let mut options = ControllerOptions::default()
        .with_model(settings.model.clone())
        .with_preamble(settings.preamble())
        .with_update_interval(settings.update_interval())
        .with_cancel_policy(settings.cancel_policy);

    let mut provider_error = None;
    let provider = match settings.resolve_provider(|name| std::env::var(name).ok()) {
        Some(resolved) => {
            options = options.with_model(resolved.model);
            match create_provider(resolved.config) {
                Ok(provider) => Some(provider),
                Err(error) => {
                    tracing::warn!(error = %error, "failed to create provider");
                    provider_error = Some(error.to_string());
                    None
                }
            }
        }
        None => {
            tracing::info!("no API key configured; generations will report it");
            None
        }
    };

    let history_dir = settings.history_dir();
    tracing::debug!(path = ?history_dir, "opening history store");
    let history = HistoryStore::new(Arc::new(FileKeyValueStore::new(history_dir)));

    let mut controller = SessionController::new(SessionStore::restore(history), provider, options);
    if let Some(error) = provider_error {
        controller = controller.with_provider_error(error);
    }

    let mut app = TerminalApp::new(controller, settings_store, tokio::io::stdout());
    match app.run(BufReader::new(tokio::io::stdin())).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "terminal session failed");
            ExitCode::FAILURE
        }
    }
}
