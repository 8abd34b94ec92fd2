//! `OpenAI` and `OpenAI`-compatible chat completions provider
//!
//! Declares the completion directive through the `functions` field and reads
//! it back from `function_call`, in both blocking and streaming mode.

use super::sse::decode_sse;
use super::types::{FunctionCall, LlmRequest, LlmResponse, Message, Role, Usage};
use super::{FragmentStream, LlmError, LlmService};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI-compatible service implementation
pub struct OpenAIService {
    client: Client,
    api_key: String,
    model_id: String,
    endpoint: String,
}

impl OpenAIService {
    /// Create a service for `model_id`.
    ///
    /// `base_url` points at any OpenAI-compatible API root (defaults to the
    /// public `OpenAI` API). No overall request timeout is applied; streams may
    /// legitimately run for minutes and callers impose their own deadlines.
    ///
    /// # Errors
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model_id: impl Into<String>,
        base_url: Option<&str>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        let base_url = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');

        Ok(Self {
            client,
            api_key: api_key.into(),
            model_id: model_id.into(),
            endpoint: format!("{base_url}/chat/completions"),
        })
    }

    fn translate_request(&self, request: &LlmRequest, stream: bool) -> ChatRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| WireMessage {
                role: msg.role.as_str().to_string(),
                // A pure function-call turn carries no text
                content: if msg.content.is_empty() && msg.function_call.is_some() {
                    None
                } else {
                    Some(msg.content.clone())
                },
                function_call: msg.function_call.as_ref().map(|call| WireFunctionCall {
                    name: Some(call.name.clone()),
                    arguments: Some(call.arguments.clone()),
                }),
            })
            .collect();

        let functions = if request.functions.is_empty() {
            None
        } else {
            Some(
                request
                    .functions
                    .iter()
                    .map(|f| WireFunction {
                        name: f.name.clone(),
                        description: f.description.clone(),
                        parameters: f.parameters.clone(),
                    })
                    .collect(),
            )
        };

        ChatRequest {
            model: self.model_id.clone(),
            messages,
            functions,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    fn normalize_response(resp: ChatResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let role = choice
            .message
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or(Role::Assistant);

        let function_call = choice.message.function_call.and_then(|call| {
            let name = call.name.filter(|name| !name.is_empty())?;
            Some(FunctionCall {
                name,
                arguments: call.arguments.unwrap_or_default(),
            })
        });

        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        Ok(LlmResponse {
            message: Message {
                role,
                content: choice.message.content.unwrap_or_default(),
                function_call,
            },
            usage,
        })
    }

    async fn send(&self, body: &ChatRequest) -> Result<Response, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read error response: {e}")))?;

        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map_or(body, |resp| resp.error.message);
        let error = LlmError::from_status(status.as_u16(), &message);

        Err(match retry_after {
            Some(delay) => error.with_retry_after(delay),
            None => error,
        })
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = self.translate_request(request, false);
        let response = self.send(&body).await?;

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        let chat_response: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {text}"))
        })?;

        Self::normalize_response(chat_response)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        let body = self.translate_request(request, true);
        let response = self.send(&body).await?;
        Ok(decode_sse(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<Vec<WireFunction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
