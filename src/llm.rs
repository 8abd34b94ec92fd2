//! LLM provider abstraction
//!
//! The dialogue engine talks to the model only through [`LlmService`], so a
//! session can be driven by the `OpenAI` adapter in production and by a scripted
//! mock in tests.

mod error;
mod openai;
mod sse;
mod types;

#[cfg(test)]
pub mod testing;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAIService;
pub use sse::decode_sse;
pub use types::*;

use crate::delta::PartialMessage;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

/// Finite, non-restartable sequence of message deltas
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<PartialMessage, LlmError>> + Send>>;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a blocking completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Make a streaming completion request.
    ///
    /// Errors that happen before the first fragment are returned directly;
    /// later ones arrive as items of the stream.
    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        (**self).stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        let start = std::time::Instant::now();
        match self.inner.stream(request).await {
            Ok(fragments) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    messages = request.messages.len(),
                    "LLM stream opened"
                );
                let model_id = self.model_id.clone();
                Ok(Box::pin(fragments.inspect(move |item| {
                    if let Err(e) = item {
                        tracing::error!(
                            model = %model_id,
                            error = %e.message,
                            retryable = e.kind.is_retryable(),
                            "LLM stream failed"
                        );
                    }
                })))
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM stream request failed"
                );
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
