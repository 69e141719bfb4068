//! Transport channel for streaming generations from a remote model backend.
//!
//! Every invocation is bound to one [`GenerationHandle`] and emits zero or more
//! `Update` events carrying the accumulated text, followed by exactly one `Done`
//! or `Error`. A cancelled invocation emits nothing further.
use std::sync::Arc;

mod events;
mod model;
mod provider;
mod rig_adapter;

pub use events::{GenerationHandle, Role, StreamEvent, StreamEventPayload};
pub use model::{DEFAULT_OPENAI_MODEL, DEFAULT_SYSTEM_PREAMBLE};
pub use provider::{
    LlmProvider, ProviderConfig, ProviderError, ProviderEventStream, ProviderMessage,
    ProviderResult, ProviderStreamHandle, ProviderWorker, StreamRequest, event_channel,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
