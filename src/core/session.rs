use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::api::turn::TurnInitiator;
use crate::api::{ChunkEvent, HistoryMessage, TurnRequest};
use crate::channel::{ChannelError, EventChannel};
use crate::core::message::{Message, MessageStore, Role};
use crate::core::reducer::{ChunkOutcome, TurnBuffers};

#[derive(Debug)]
pub enum SessionError {
    /// `send_message` was called with text that trims to empty.
    EmptyMessage,
    /// The turn-initiation call failed; the optimistic placeholder was
    /// rolled back.
    TurnStart(String),
    /// The channel connection for the new request id could not be
    /// established.
    Channel(ChannelError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptyMessage => write!(f, "message is empty"),
            SessionError::TurnStart(message) => write!(f, "{message}"),
            SessionError::Channel(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Channel(source) => Some(source),
            _ => None,
        }
    }
}

/// Org/entity context forwarded with every turn of this session.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub org_id: Option<String>,
    pub current_entity_id: Option<String>,
    pub current_entity_type: Option<String>,
}

struct Subscription {
    request_id: String,
    rx: mpsc::UnboundedReceiver<ChunkEvent>,
}

/// Orchestrates conversational turns end to end.
///
/// Owns the message store, the per-turn buffers, and at most one live channel
/// subscription. Per turn the state machine is
/// `idle -> loading -> streaming -> (done | error)`; terminal states exit only
/// through a fresh [`send_message`](Self::send_message) or
/// [`reset`](Self::reset).
pub struct ChatSession {
    initiator: Arc<dyn TurnInitiator>,
    channel: Arc<dyn EventChannel>,
    context: TurnContext,
    store: MessageStore,
    buffers: TurnBuffers,
    subscription: Option<Subscription>,
    request_id: Option<String>,
    conversation_id: Option<String>,
    loading: bool,
    streaming: bool,
    error: Option<String>,
}

impl ChatSession {
    pub fn new(initiator: Arc<dyn TurnInitiator>, channel: Arc<dyn EventChannel>) -> Self {
        Self::with_context(initiator, channel, TurnContext::default())
    }

    pub fn with_context(
        initiator: Arc<dyn TurnInitiator>,
        channel: Arc<dyn EventChannel>,
        context: TurnContext,
    ) -> Self {
        Self {
            initiator,
            channel,
            context,
            store: MessageStore::new(),
            buffers: TurnBuffers::new(),
            subscription: None,
            request_id: None,
            conversation_id: None,
            loading: false,
            streaming: false,
            error: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.store.snapshot()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Start a new turn.
    ///
    /// Rejects text that trims to empty without side effects. Tears down any
    /// live subscription from a previous turn before establishing the new
    /// one, so chunks from a stale turn can never land in this list. On
    /// initiation or connect failure the optimistic assistant placeholder is
    /// rolled back and the failure is recorded in [`error`](Self::error).
    pub async fn send_message(&mut self, text: &str) -> Result<(), SessionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        self.release_subscription();
        self.error = None;
        self.streaming = false;

        let history = self.history();
        self.store.append(Role::User, trimmed);
        self.store.append(Role::Assistant, "");
        self.buffers.clear();
        self.loading = true;

        let request = TurnRequest {
            message: trimmed.to_string(),
            conversation_id: self.conversation_id.clone(),
            history,
            org_id: self.context.org_id.clone(),
            current_entity_id: self.context.current_entity_id.clone(),
            current_entity_type: self.context.current_entity_type.clone(),
        };

        let response = match self.initiator.start_turn(&request).await {
            Ok(response) => response,
            Err(err) => {
                let message = err.to_string();
                self.roll_back_failed_start(message.clone());
                return Err(SessionError::TurnStart(message));
            }
        };

        debug!(
            request_id = %response.request_id,
            conversation_id = %response.conversation_id,
            "turn started"
        );

        // Register the consumer before connecting so nothing the server
        // pushes can be missed.
        let rx = self.channel.subscribe(&response.request_id);
        if let Err(err) = self.channel.connect(&response.request_id).await {
            self.channel.unsubscribe(&response.request_id);
            self.roll_back_failed_start(err.to_string());
            return Err(SessionError::Channel(err));
        }

        // The turn only counts against the conversation once the channel is
        // live; a turn that never streams must not advance its identity.
        self.conversation_id = Some(response.conversation_id);
        self.request_id = Some(response.request_id.clone());
        self.subscription = Some(Subscription {
            request_id: response.request_id,
            rx,
        });
        self.loading = false;
        self.streaming = true;
        Ok(())
    }

    /// Apply one chunk to the conversation. Chunks arriving outside an
    /// active turn (e.g. a stray delta after `done`) are dropped.
    pub fn handle_chunk(&mut self, chunk: ChunkEvent) {
        if !self.streaming {
            debug!("ignoring chunk delivered outside an active turn");
            return;
        }
        match self.buffers.apply(&mut self.store, chunk) {
            ChunkOutcome::Continue => {}
            ChunkOutcome::Completed => self.finish_turn(None),
            ChunkOutcome::Failed(message) => self.finish_turn(Some(message)),
        }
    }

    /// Await the next chunk and reduce it. Returns false once the turn has
    /// reached a terminal state or no subscription is active.
    ///
    /// A channel that closes without a terminal chunk leaves the session
    /// `streaming`: no client-side timeout exists for a stalled stream.
    pub async fn step(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.rx.recv().await {
            Some(chunk) => {
                self.handle_chunk(chunk);
                self.streaming
            }
            None => {
                debug!("chunk channel closed without a terminal chunk");
                false
            }
        }
    }

    /// Drain chunks until the turn completes or fails.
    pub async fn run_turn(&mut self) {
        while self.step().await {}
    }

    /// Drop the whole conversation: unsubscribe, release the channel route
    /// for the last known request id, and clear all state.
    pub fn reset(&mut self) {
        self.release_subscription();
        if let Some(request_id) = self.request_id.take() {
            self.channel.unsubscribe(&request_id);
        }
        self.store.clear();
        self.buffers.clear();
        self.conversation_id = None;
        self.error = None;
        self.loading = false;
        self.streaming = false;
    }

    fn history(&self) -> Vec<HistoryMessage> {
        self.store
            .snapshot()
            .iter()
            .filter(|m| m.kind.is_plain() && !m.content.is_empty())
            .map(|m| HistoryMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn roll_back_failed_start(&mut self, message: String) {
        self.store.remove_trailing_empty_assistant();
        self.loading = false;
        self.streaming = false;
        self.error = Some(message);
    }

    fn finish_turn(&mut self, error: Option<String>) {
        self.streaming = false;
        self.loading = false;
        self.error = error;
        self.buffers.clear();
        self.release_subscription();
    }

    fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.channel.unsubscribe(&subscription.request_id);
        }
    }
}

impl Drop for ChatSession {
    /// Chunks must never be delivered to a discarded session.
    fn drop(&mut self) {
        self.release_subscription();
    }
}
