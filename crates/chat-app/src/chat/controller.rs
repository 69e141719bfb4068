use std::sync::Arc;
use std::time::Duration;

use murmur_llm::{
    DEFAULT_OPENAI_MODEL, DEFAULT_SYSTEM_PREAMBLE, GenerationHandle, LlmProvider,
    ProviderEventStream, ProviderStreamHandle, StreamEvent, StreamEventPayload, StreamRequest,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::events::{SessionChange, SessionNotification};
use super::message::{CancelPolicy, Message, SessionStatus};
use super::scroll_manager::ScrollManager;
use super::session::SessionStore;

pub const STREAM_DEBOUNCE_MS: u64 = 50;
const NOTIFICATION_CAPACITY: usize = 256;
const PROVIDER_NOT_CONFIGURED: &str =
    "Provider is not configured. Please set an API key in settings.";
const CHANNEL_CLOSED_EARLY: &str = "provider stream ended before a terminal event";

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    pub model_id: String,
    pub preamble: Option<String>,
    /// Minimum spacing between applied updates; `None` applies every update.
    pub update_interval: Option<Duration>,
    pub cancel_policy: CancelPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_OPENAI_MODEL.to_string(),
            preamble: Some(DEFAULT_SYSTEM_PREAMBLE.to_string()),
            update_interval: Some(Duration::from_millis(STREAM_DEBOUNCE_MS)),
            cancel_policy: CancelPolicy::Retain,
        }
    }
}

impl ControllerOptions {
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_preamble(mut self, preamble: Option<String>) -> Self {
        self.preamble = preamble;
        self
    }

    pub fn with_update_interval(mut self, update_interval: Option<Duration>) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn with_cancel_policy(mut self, cancel_policy: CancelPolicy) -> Self {
        self.cancel_policy = cancel_policy;
        self
    }
}

/// Controller-side bookkeeping for the one live channel.
struct ActiveGeneration {
    handle: GenerationHandle,
    stream: ProviderEventStream,
    worker: JoinHandle<()>,
}

/// Newest held update and the instant it must be applied by.
#[derive(Debug, Default)]
struct PendingUpdate {
    text: Option<String>,
    flush_at: Option<Instant>,
}

enum Received {
    Event(Option<StreamEvent>),
    FlushDue,
}

/// Serializes generations against one session.
///
/// Every channel event is tagged with the handle of the invocation that produced it,
/// and only events tagged with the current handle reach the [`SessionStore`]. Starting,
/// stopping, or resetting invalidates the current handle synchronously, so nothing the
/// old channel emits afterwards, even if already queued, can mutate history.
pub struct SessionController {
    store: SessionStore,
    provider: Option<Arc<dyn LlmProvider>>,
    provider_error: Option<String>,
    options: ControllerOptions,
    active: Option<ActiveGeneration>,
    pending_update: PendingUpdate,
    viewport: ScrollManager,
    notifier: broadcast::Sender<SessionNotification>,
    next_handle: u64,
}

impl SessionController {
    pub fn new(
        store: SessionStore,
        provider: Option<Arc<dyn LlmProvider>>,
        options: ControllerOptions,
    ) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            store,
            provider,
            provider_error: None,
            options,
            active: None,
            pending_update: PendingUpdate::default(),
            viewport: ScrollManager::new(),
            notifier,
            next_handle: 1,
        }
    }

    /// Records why no provider is available, shown when the user tries to send.
    pub fn with_provider_error(mut self, error: impl Into<String>) -> Self {
        self.provider_error = Some(error.into());
        self
    }

    pub fn history(&self) -> &[Message] {
        self.store.history()
    }

    pub fn status(&self) -> SessionStatus {
        self.store.status()
    }

    pub fn is_streaming(&self) -> bool {
        self.store.status().is_streaming()
    }

    pub fn active_handle(&self) -> Option<GenerationHandle> {
        self.active.as_ref().map(|active| active.handle)
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifier.subscribe()
    }

    pub fn viewport(&self) -> &ScrollManager {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ScrollManager {
        &mut self.viewport
    }

    /// Applies to the next generation; an active one keeps its model.
    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.options.model_id = model_id.into();
    }

    /// Sends user text and starts a generation for it.
    ///
    /// Blank input is ignored and returns `None`. An active generation is cancelled
    /// first. Must be called from within a tokio runtime.
    pub fn send_user(&mut self, text: &str) -> Option<GenerationHandle> {
        if text.trim().is_empty() {
            tracing::debug!("ignoring blank user input");
            return None;
        }

        if self.invalidate_active("superseded") {
            self.publish(SessionChange::Stopped);
        }

        let handle = self.alloc_handle();
        let index = match self.store.append_user(text) {
            Ok(index) => index,
            Err(rejection) => {
                tracing::warn!(%handle, ?rejection, "session refused user message");
                return None;
            }
        };
        self.publish(SessionChange::UserAppended { index });
        self.open_channel(handle);

        Some(handle)
    }

    /// Cancels the active generation without adding any message. Returns false when idle.
    pub fn stop(&mut self) -> bool {
        if !self.invalidate_active("stopped") {
            return false;
        }

        self.publish(SessionChange::Stopped);
        true
    }

    /// Cancels any generation and clears history along with its persisted record.
    pub fn reset(&mut self) {
        self.invalidate_active("reset");
        self.store.reset();
        self.publish(SessionChange::Reset);
    }

    /// Applies one channel event, discarding it unless it carries the current handle.
    pub fn handle_event(&mut self, event: StreamEvent) -> Option<SessionChange> {
        if !self.is_current(event.handle) {
            tracing::debug!(
                handle = %event.handle,
                active = ?self.active_handle(),
                "discarding stale stream event"
            );
            return None;
        }

        match event.payload {
            StreamEventPayload::Update(text) => match self.options.update_interval {
                Some(interval) => {
                    // Coalesce bursts: keep only the newest text and apply it once per interval.
                    self.pending_update.text = Some(text);
                    if self.pending_update.flush_at.is_none() {
                        self.pending_update.flush_at = Some(Instant::now() + interval);
                    }
                    None
                }
                None => self.apply_update(&text),
            },
            StreamEventPayload::Done => {
                self.flush_pending_update();
                self.finish_active();
                match self.store.complete_stream() {
                    Ok(()) => Some(self.publish(SessionChange::Completed)),
                    Err(rejection) => {
                        tracing::warn!(?rejection, "session refused stream completion");
                        None
                    }
                }
            }
            StreamEventPayload::Error(message) => {
                self.flush_pending_update();
                self.finish_active();
                tracing::warn!(handle = %event.handle, error = %message, "generation failed");
                self.fail_generation(&message)
            }
        }
    }

    /// Waits for the next visible change from the active generation.
    ///
    /// Returns `None` once no generation is active. Cancel-safe: dropping the future
    /// loses no event.
    pub async fn next_change(&mut self) -> Option<SessionChange> {
        loop {
            let flush_at = self.pending_update.flush_at;
            let active = self.active.as_mut()?;
            let handle = active.handle;

            let received = match flush_at {
                Some(deadline) => tokio::select! {
                    event = active.stream.recv() => Received::Event(event),
                    () = tokio::time::sleep_until(deadline) => Received::FlushDue,
                },
                None => Received::Event(active.stream.recv().await),
            };

            let change = match received {
                Received::FlushDue => self.flush_pending_update(),
                Received::Event(Some(event)) => self.handle_event(event),
                Received::Event(None) => self.handle_channel_closed(handle),
            };

            if change.is_some() {
                return change;
            }
        }
    }

    fn open_channel(&mut self, handle: GenerationHandle) {
        let Some(provider) = self.provider.clone() else {
            let message = match &self.provider_error {
                Some(error) => format!("Provider configuration error: {error}"),
                None => PROVIDER_NOT_CONFIGURED.to_string(),
            };
            self.fail_generation(&message);
            return;
        };

        let mut request = StreamRequest::new(
            handle,
            self.options.model_id.clone(),
            self.store.provider_messages(),
        );
        if let Some(preamble) = &self.options.preamble {
            request = request.with_preamble(preamble.clone());
        }

        match provider.stream_chat(request) {
            Ok(ProviderStreamHandle { stream, worker }) => {
                tracing::debug!(
                    %handle,
                    provider_id = %provider.id(),
                    model_id = %self.options.model_id,
                    "generation started"
                );
                self.active = Some(ActiveGeneration {
                    handle,
                    stream,
                    worker: tokio::spawn(worker),
                });
            }
            Err(error) => {
                tracing::error!(%handle, error = %error, "failed to open generation channel");
                self.fail_generation(&error.to_string());
            }
        }
    }

    /// Drops the current handle and signals its channel. Returns false when idle.
    fn invalidate_active(&mut self, reason: &'static str) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };

        // The worker may run briefly after this; its stream is gone, so nothing it
        // emits can be observed.
        active.stream.cancel();
        self.pending_update = PendingUpdate::default();

        if let Err(rejection) = self.store.cancel_stream(self.options.cancel_policy) {
            tracing::debug!(?rejection, "no streaming session to cancel");
        }

        tracing::debug!(handle = %active.handle, reason, "generation invalidated");
        true
    }

    fn finish_active(&mut self) {
        self.active = None;
        self.pending_update = PendingUpdate::default();
    }

    fn handle_channel_closed(&mut self, handle: GenerationHandle) -> Option<SessionChange> {
        if !self.is_current(handle) {
            self.active = None;
            return None;
        }

        self.flush_pending_update();
        self.finish_active();
        tracing::warn!(%handle, "generation channel closed without a terminal event");
        self.fail_generation(CHANNEL_CLOSED_EARLY)
    }

    fn apply_update(&mut self, text: &str) -> Option<SessionChange> {
        match self.store.apply_stream_update(text) {
            Ok(index) => Some(self.publish(SessionChange::ModelUpdated { index })),
            Err(rejection) => {
                tracing::debug!(?rejection, "session refused stream update");
                None
            }
        }
    }

    fn flush_pending_update(&mut self) -> Option<SessionChange> {
        self.pending_update.flush_at = None;
        let text = self.pending_update.text.take()?;
        self.apply_update(&text)
    }

    fn fail_generation(&mut self, message: &str) -> Option<SessionChange> {
        match self.store.apply_stream_error(message) {
            Ok(index) => Some(self.publish(SessionChange::Failed { index })),
            Err(rejection) => {
                tracing::warn!(?rejection, "session refused stream error");
                None
            }
        }
    }

    fn is_current(&self, handle: GenerationHandle) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.handle == handle)
            && self.store.status().is_streaming()
    }

    fn alloc_handle(&mut self) -> GenerationHandle {
        let handle = GenerationHandle::new(self.next_handle);
        self.next_handle = self.next_handle.saturating_add(1);
        handle
    }

    fn publish(&mut self, change: SessionChange) -> SessionChange {
        let scroll_to_bottom = self.viewport.observe_change(&change);
        // Sending fails only when nobody subscribed.
        let _ = self.notifier.send(SessionNotification {
            change,
            status: self.store.status(),
            scroll_to_bottom,
        });
        change
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stream.cancel();
            active.worker.abort();
        }
    }
}
