//! Form dialogue session
//!
//! A session owns the message history of one form conversation. Each call to
//! [`FormSession::run`] performs one turn: it asks the model for a reply,
//! streams text to an optional sink, interprets the completion directive and
//! commits the turn to the history.

pub mod state;

#[cfg(test)]
mod proptests;

pub use state::{transition, CompletedPolicy, Event, FormState, TransitionError};

use crate::delta::StreamingAccumulator;
use crate::interpret::{
    interpret_for_schema, COMPLETION_DIRECTIVE, COMPLETION_DIRECTIVE_DESCRIPTION,
};
use crate::llm::{FunctionDefinition, LlmError, LlmRequest, LlmService, Message};
use crate::prompt::{build_system_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::schema::{FormSchema, FormValues};
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Role description the system prompt starts with
    pub system_prompt: String,
    pub locale: String,
    /// Name of the function the model calls when the form is complete
    pub directive_name: String,
    pub completed_policy: CompletedPolicy,
    pub temperature: Option<f32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            locale: "en".to_string(),
            directive_name: COMPLETION_DIRECTIVE.to_string(),
            completed_policy: CompletedPolicy::default(),
            temperature: None,
        }
    }
}

/// Result of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    pub is_valid: bool,
    pub values: Option<FormValues>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Turn was cancelled")]
    Cancelled,
    #[error("LLM request failed: {0}")]
    Backend(#[from] LlmError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Incremental output of a streaming turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// Newly generated text
    Token(String),
    /// The model started filling in the completion directive
    Working,
    /// The turn is over
    Done,
}

/// Receiver of streaming output, called synchronously as fragments arrive
pub trait TokenSink: Send {
    fn emit(&mut self, event: TokenEvent);
}

impl TokenSink for mpsc::UnboundedSender<TokenEvent> {
    fn emit(&mut self, event: TokenEvent) {
        if self.send(event).is_err() {
            tracing::debug!("Token receiver dropped");
        }
    }
}

impl TokenSink for Vec<TokenEvent> {
    fn emit(&mut self, event: TokenEvent) {
        self.push(event);
    }
}

/// One form conversation
pub struct FormSession {
    llm: Arc<dyn LlmService>,
    schema: FormSchema,
    known_values: FormValues,
    messages: Vec<Message>,
    state: FormState,
    options: SessionOptions,
}

impl FormSession {
    /// Start or resume a conversation.
    ///
    /// The system prompt always comes first; `prior_messages` follow it
    /// unmodified.
    pub fn new(
        llm: Arc<dyn LlmService>,
        schema: FormSchema,
        known_values: FormValues,
        prior_messages: Vec<Message>,
        options: SessionOptions,
    ) -> Self {
        let system_prompt =
            build_system_prompt(&options.system_prompt, &options.locale, &known_values);

        let mut messages = Vec::with_capacity(prior_messages.len() + 1);
        messages.push(Message::system(system_prompt));
        messages.extend(prior_messages);

        Self {
            llm,
            schema,
            known_values,
            messages,
            state: FormState::default(),
            options,
        }
    }

    /// Resume a conversation whose state was persisted by the caller
    #[must_use]
    pub fn with_state(mut self, state: FormState) -> Self {
        self.state = state;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn state(&self) -> FormState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn known_values(&self) -> &FormValues {
        &self.known_values
    }

    pub fn locale(&self) -> &str {
        &self.options.locale
    }

    pub fn system_prompt(&self) -> &str {
        self.messages.first().map_or("", |m| m.content.as_str())
    }

    /// Run one turn.
    ///
    /// With a sink the reply is streamed; without one a single blocking
    /// request is made. `utterance` may be `None` to let the model open the
    /// conversation. History is only updated when the turn succeeds.
    ///
    /// # Errors
    /// Fails on backend errors, on cancellation, or when the form is
    /// completed and the policy rejects further turns.
    pub async fn run(
        &mut self,
        utterance: Option<&str>,
        mut sink: Option<&mut dyn TokenSink>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let policy = self.options.completed_policy;
        let state = transition(self.state, policy, Event::TurnRequested)?;

        let user_message = utterance.map(Message::user);
        let request = self.build_request(user_message.as_ref());

        tracing::debug!(
            model = %self.llm.model_id(),
            messages = request.messages.len(),
            streaming = sink.is_some(),
            "Starting form turn"
        );

        let reply = match sink.as_deref_mut() {
            Some(sink) => self.stream_reply(&request, sink, cancel).await?,
            None => self.complete_reply(&request, cancel).await?,
        };

        let interpretation =
            interpret_for_schema(&reply, &self.options.directive_name, &self.schema);
        let next_state = transition(
            state,
            policy,
            Event::TurnFinished {
                is_valid: interpretation.is_valid,
            },
        )?;

        // Commit
        self.messages.extend(user_message);
        self.messages
            .push(Message::assistant(interpretation.display_text.clone()));
        if next_state != self.state {
            tracing::info!(from = ?self.state, to = ?next_state, "Form state changed");
        }
        self.state = next_state;

        if let Some(sink) = sink {
            if interpretation.is_valid {
                sink.emit(TokenEvent::Token(format!("\n{}", interpretation.display_text)));
            }
            sink.emit(TokenEvent::Done);
        }

        tracing::info!(
            is_valid = interpretation.is_valid,
            messages = self.messages.len(),
            "Form turn finished"
        );

        Ok(TurnOutcome {
            answer: interpretation.display_text,
            is_valid: interpretation.is_valid,
            values: interpretation.values,
        })
    }

    fn build_request(&self, user_message: Option<&Message>) -> LlmRequest {
        let mut messages = self.messages.clone();
        messages.extend(user_message.cloned());

        LlmRequest {
            messages,
            functions: vec![FunctionDefinition {
                name: self.options.directive_name.clone(),
                description: COMPLETION_DIRECTIVE_DESCRIPTION.to_string(),
                parameters: self.schema.to_value(),
            }],
            temperature: self.options.temperature,
            max_tokens: None,
        }
    }

    async fn complete_reply(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, SessionError> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = self.llm.complete(request) => result?,
        };
        Ok(response.message)
    }

    async fn stream_reply(
        &self,
        request: &LlmRequest,
        sink: &mut dyn TokenSink,
        cancel: &CancellationToken,
    ) -> Result<Message, SessionError> {
        let mut fragments = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = self.llm.stream(request) => result?,
        };

        let mut accumulator = StreamingAccumulator::new();
        let mut working_sent = false;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(fragments = accumulator.fragments(), "Stream cancelled");
                    return Err(SessionError::Cancelled);
                }
                next = fragments.next() => next,
            };
            let Some(fragment) = next else {
                break;
            };
            let fragment = fragment?;
            accumulator.push(&fragment);

            if accumulator.has_function_call() {
                if !working_sent {
                    sink.emit(TokenEvent::Working);
                    working_sent = true;
                }
            } else if let Some(text) = fragment.text().filter(|t| !t.is_empty()) {
                sink.emit(TokenEvent::Token(text.to_string()));
            }
        }

        tracing::debug!(
            fragments = accumulator.fragments(),
            function_call = accumulator.has_function_call(),
            "Stream finished"
        );
        Ok(accumulator.into_message())
    }
}
