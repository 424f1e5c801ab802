//! The agentic loop.
//!
//! One [`Orchestrator`] owns one conversation. A call to [`Orchestrator::send`]
//! is an exchange: the model's reply is streamed into a placeholder assistant
//! message, and while the finished reply is a function-call directive the
//! named tool runs and its result is fed back as a system message. The chain
//! is a plain loop bounded by `max_steps`.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::{StreamError, StreamingClient, TextStream};
use crate::core::coerce::coerce;
use crate::core::directive;
use crate::core::message::{Conversation, Message};
use crate::core::prompt;
use crate::tools::ToolRegistry;

pub const ABORTED_MESSAGE: &str = "Message stream aborted";
pub const STEP_BUDGET_MESSAGE: &str = "Max function steps reached, function calling cancelled.";

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("an exchange is already in progress")]
    Busy,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// How an exchange that did not fail came to rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The last reply had no directive and stands as the answer.
    Answered,
    /// The model asked for a tool that is not registered.
    ToolNotFound(String),
    /// The model kept calling tools past `max_steps`.
    StepBudgetExhausted,
    /// The exchange was cancelled through its [`AbortHandle`].
    Aborted,
}

/// Progress notifications for front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    MessageAppended(Message),
    /// Full text so far of the trailing assistant message.
    AssistantUpdated(String),
    MessageRemoved(Message),
    ToolInvoked {
        name: String,
        arguments: String,
        result: String,
    },
}

/// Cancels whichever exchange is currently running.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl AbortHandle {
    /// Returns `false` when nothing was running.
    pub fn abort(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install(&self, token: CancellationToken) -> ActiveExchange<'_> {
        *self.slot() = Some(token);
        ActiveExchange(self)
    }
}

/// Clears the abort slot when the exchange ends, including on drop.
struct ActiveExchange<'a>(&'a AbortHandle);

impl Drop for ActiveExchange<'_> {
    fn drop(&mut self) {
        self.0.slot().take();
    }
}

struct ExchangeState {
    conversation: Conversation,
    steps: usize,
}

pub struct Orchestrator {
    client: Arc<dyn StreamingClient>,
    registry: ToolRegistry,
    max_steps: usize,
    state: tokio::sync::Mutex<ExchangeState>,
    abort: AbortHandle,
    events: Option<mpsc::UnboundedSender<ExchangeEvent>>,
}

impl Orchestrator {
    /// Start a conversation seeded with the tool instructions for `registry`.
    pub fn new(client: Arc<dyn StreamingClient>, registry: ToolRegistry, max_steps: usize) -> Self {
        let today = chrono::Local::now().date_naive();
        let seed = prompt::tool_system_prompt(&registry, today);
        Self::with_system_prompt(client, registry, max_steps, seed)
    }

    pub fn with_system_prompt(
        client: Arc<dyn StreamingClient>,
        registry: ToolRegistry,
        max_steps: usize,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            registry,
            max_steps,
            state: tokio::sync::Mutex::new(ExchangeState {
                conversation: Conversation::new(system_prompt),
                steps: 0,
            }),
            abort: AbortHandle::default(),
            events: None,
        }
    }

    /// Publish [`ExchangeEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ExchangeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn client(&self) -> &dyn StreamingClient {
        self.client.as_ref()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Snapshot of the conversation; waits for a running exchange to finish.
    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    pub async fn steps(&self) -> usize {
        self.state.lock().await.steps
    }

    /// Drop everything but the seed message and zero the step counter.
    pub fn reset(&self) -> Result<(), ExchangeError> {
        let mut state = self.state.try_lock().map_err(|_| ExchangeError::Busy)?;
        state.conversation.reset();
        state.steps = 0;
        debug!("Conversation reset");
        Ok(())
    }

    /// Run one exchange for a user message.
    ///
    /// Recoverable endings (abort, unknown tool, step budget) are recorded
    /// as system messages and reported through the outcome. Stream failures
    /// are returned and leave nothing in the conversation but the user
    /// message and any partial reply.
    pub async fn send(&self, user_text: &str) -> Result<ExchangeOutcome, ExchangeError> {
        let mut state = self.state.try_lock().map_err(|_| ExchangeError::Busy)?;
        let token = CancellationToken::new();
        let _active = self.abort.install(token.clone());

        let result = self
            .run_chain(&mut state, Message::user(user_text), &token)
            .await;
        state.steps = 0;

        match &result {
            Ok(outcome) => debug!(?outcome, "Exchange finished"),
            Err(err) => warn!(error = %err, "Exchange failed"),
        }
        result
    }

    async fn run_chain(
        &self,
        state: &mut ExchangeState,
        inbound: Message,
        token: &CancellationToken,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        self.append(state, inbound);

        loop {
            let stream = self.client.stream(state.conversation.messages(), token.clone());
            self.append(state, Message::assistant(""));

            let text = match self.consume(state, stream).await {
                Ok(text) => text,
                Err(StreamError::Aborted) => {
                    self.drop_empty_placeholder(state);
                    self.append(state, Message::system(ABORTED_MESSAGE));
                    return Ok(ExchangeOutcome::Aborted);
                }
                Err(err) => {
                    self.drop_empty_placeholder(state);
                    return Err(err.into());
                }
            };

            let call = match directive::parse(&text) {
                Ok(Some(call)) => call,
                Ok(None) => return Ok(ExchangeOutcome::Answered),
                Err(err) => {
                    warn!(error = %err, "Ignoring malformed function call");
                    return Ok(ExchangeOutcome::Answered);
                }
            };

            if let Some(removed) = state.conversation.pop_assistant() {
                self.emit(ExchangeEvent::MessageRemoved(removed));
            }

            if state.steps >= self.max_steps {
                info!(max_steps = self.max_steps, "Step budget exhausted");
                self.append(state, Message::system(STEP_BUDGET_MESSAGE));
                return Ok(ExchangeOutcome::StepBudgetExhausted);
            }

            let Some(tool) = self.registry.lookup(&call.name) else {
                warn!(name = %call.name, "Model called an unknown function");
                self.append(state, Message::system(format!("Function {} not found", call.name)));
                return Ok(ExchangeOutcome::ToolNotFound(call.name));
            };

            let args = coerce(&call.arguments, tool.declared_types());
            let arguments = args.joined_values();
            self.append(
                state,
                Message::system(format!("Calling function {}({})", call.name, arguments)),
            );

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.append(state, Message::system(ABORTED_MESSAGE));
                    return Ok(ExchangeOutcome::Aborted);
                }
                result = tool.invoke(&args) => result,
            };
            let value = result.unwrap_or_else(|err| {
                warn!(name = %call.name, error = %err, "Tool failed; reporting the error to the model");
                err.to_string()
            });
            debug!(name = %call.name, step = state.steps + 1, "Tool returned");
            self.emit(ExchangeEvent::ToolInvoked {
                name: call.name.clone(),
                arguments,
                result: value.clone(),
            });

            state.steps += 1;
            self.append(
                state,
                Message::system(format!(
                    "Function '{}' was called and returned {}.",
                    call.name, value
                )),
            );
        }
    }

    /// Replace the placeholder with each fragment; the last one is the reply.
    ///
    /// Raw completions often open with blank lines, so leading whitespace
    /// is dropped before the text is stored.
    async fn consume(
        &self,
        state: &mut ExchangeState,
        mut stream: TextStream,
    ) -> Result<String, StreamError> {
        let mut latest = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?.trim_start().to_string();
            state.conversation.update_last_assistant(&fragment);
            self.emit(ExchangeEvent::AssistantUpdated(fragment.clone()));
            latest = fragment;
        }
        Ok(latest)
    }

    fn append(&self, state: &mut ExchangeState, message: Message) {
        state.conversation.push(message.clone());
        self.emit(ExchangeEvent::MessageAppended(message));
    }

    fn drop_empty_placeholder(&self, state: &mut ExchangeState) {
        let is_empty_placeholder = state
            .conversation
            .last()
            .is_some_and(|m| m.role.is_assistant() && m.content.is_empty());
        if is_empty_placeholder {
            if let Some(removed) = state.conversation.pop_assistant() {
                self.emit(ExchangeEvent::MessageRemoved(removed));
            }
        }
    }

    fn emit(&self, event: ExchangeEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
