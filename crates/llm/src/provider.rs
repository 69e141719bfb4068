use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::events::{GenerationHandle, Role, StreamEvent};

/// Backend credentials and location, handed to the provider per construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub handle: GenerationHandle,
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
}

impl StreamRequest {
    pub fn new(
        handle: GenerationHandle,
        model_id: impl Into<String>,
        messages: Vec<ProviderMessage>,
    ) -> Self {
        Self {
            handle,
            model_id: model_id.into(),
            messages,
            preamble: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("stream request for {handle} has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        handle: GenerationHandle,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Receiving side of one Transport Channel invocation.
///
/// Dropping the stream signals cancellation to the worker that feeds it.
pub struct ProviderEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Waits for the next event. Cancel-safe.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Signals the worker to stop. Returns false if it was already signalled or is gone.
    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn default_model(&self) -> &str;
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

/// Builds the sender, stream, and cancellation receiver for one invocation.
///
/// Providers keep the sender and cancellation receiver inside their worker and hand
/// the stream back to the caller.
pub fn event_channel(
    handle: GenerationHandle,
) -> (
    mpsc::UnboundedSender<StreamEvent>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let handle = GenerationHandle::new(3);
        let (event_tx, mut stream, _cancel_rx) = event_channel(handle);

        event_tx.send(StreamEvent::update(handle, "He")).ok();
        event_tx.send(StreamEvent::update(handle, "Hello")).ok();
        event_tx.send(StreamEvent::done(handle)).ok();
        drop(event_tx);

        assert_eq!(stream.recv().await, Some(StreamEvent::update(handle, "He")));
        assert_eq!(stream.recv().await, Some(StreamEvent::update(handle, "Hello")));
        assert_eq!(stream.recv().await, Some(StreamEvent::done(handle)));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn cancel_signals_worker_once() {
        let (_event_tx, mut stream, cancel_rx) = event_channel(GenerationHandle::new(1));

        assert!(stream.cancel());
        assert!(stream.is_cancelled());
        assert!(!stream.cancel());
        assert!(cancel_rx.await.is_ok());
    }

    #[tokio::test]
    async fn dropping_stream_signals_cancellation() {
        let (event_tx, stream, cancel_rx) = event_channel(GenerationHandle::new(1));
        drop(stream);

        assert!(cancel_rx.await.is_ok());
        assert!(event_tx.send(StreamEvent::done(GenerationHandle::new(1))).is_err());
    }

    #[test]
    fn provider_config_trims_fields() {
        let config = ProviderConfig::new(" openai ", " sk-test\n", " https://example.test/v1 ");

        assert_eq!(config.provider_id, "openai");
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.endpoint, "https://example.test/v1");
    }
}
