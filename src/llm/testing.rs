//! Mock LLM client for testing
//!
//! Replies are queued ahead of time and consumed in order; every request is
//! recorded so tests can assert on what the engine sent.

use super::{FragmentStream, LlmError, LlmRequest, LlmResponse, LlmService, Message, Usage};
use crate::delta::PartialMessage;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

enum Scripted {
    Response(Result<LlmResponse, LlmError>),
    Fragments(Vec<Result<PartialMessage, LlmError>>),
    /// Fragments followed by a stream that never ends
    Stalled(Vec<Result<PartialMessage, LlmError>>),
    Channel(UnboundedReceiverStream<Result<PartialMessage, LlmError>>),
}

/// Mock LLM client that returns queued replies
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Scripted>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, reply: Scripted) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Queue a blocking reply
    pub fn queue_response(&self, message: Message) {
        self.push(Scripted::Response(Ok(LlmResponse {
            message,
            usage: Usage::default(),
        })));
    }

    /// Queue an error for `complete`, or for `stream` before any fragment
    pub fn queue_error(&self, error: LlmError) {
        self.push(Scripted::Response(Err(error)));
    }

    /// Queue a finite fragment stream
    pub fn queue_fragments(&self, fragments: Vec<Result<PartialMessage, LlmError>>) {
        self.push(Scripted::Fragments(fragments));
    }

    /// Queue fragments after which the stream hangs until dropped
    pub fn queue_stalled_fragments(&self, fragments: Vec<PartialMessage>) {
        self.push(Scripted::Stalled(fragments.into_iter().map(Ok).collect()));
    }

    /// Queue a stream fed live by the test through the returned sender
    pub fn queue_channel(&self) -> mpsc::UnboundedSender<Result<PartialMessage, LlmError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Scripted::Channel(UnboundedReceiverStream::new(rx)));
        tx
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &LlmRequest) -> Option<Scripted> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match self.next_reply(request) {
            Some(Scripted::Response(result)) => result,
            Some(_) => Err(LlmError::unknown("Mock expected a streaming call")),
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        match self.next_reply(request) {
            Some(Scripted::Fragments(items)) => Ok(Box::pin(futures::stream::iter(items))),
            Some(Scripted::Stalled(items)) => Ok(Box::pin(
                futures::stream::iter(items).chain(futures::stream::pending()),
            )),
            Some(Scripted::Channel(stream)) => Ok(Box::pin(stream)),
            Some(Scripted::Response(Err(error))) => Err(error),
            Some(Scripted::Response(Ok(_))) => {
                Err(LlmError::unknown("Mock expected a blocking call"))
            }
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Text fragments, one per chunk
pub fn text_fragments(chunks: &[&str]) -> Vec<Result<PartialMessage, LlmError>> {
    chunks
        .iter()
        .map(|chunk| Ok(PartialMessage::content(*chunk)))
        .collect()
}

/// Fragments for a completion directive whose arguments arrive in pieces
pub fn directive_fragments(
    name: &str,
    argument_chunks: &[&str],
) -> Vec<Result<PartialMessage, LlmError>> {
    std::iter::once(Ok(PartialMessage::function_name(name)))
        .chain(
            argument_chunks
                .iter()
                .map(|chunk| Ok(PartialMessage::function_arguments(*chunk))),
        )
        .collect()
}
