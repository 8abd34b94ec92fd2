//! formchat - conversational form filling
//!
//! Drives a natural-language dialogue with an LLM until the answers satisfy a
//! JSON-schema-like form description. Streaming replies are folded delta by
//! delta, and completion is recognized from a dedicated function call.

// Public library surface; results are routinely used by callers
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod delta;
pub mod interpret;
pub mod llm;
pub mod prompt;
pub mod schema;
pub mod schema_generator;
pub mod session;
pub mod store;

pub use delta::{reduce, Fragment, PartialMessage, StreamingAccumulator};
pub use interpret::{interpret, interpret_for_schema, Interpretation, COMPLETION_DIRECTIVE};
pub use llm::{LlmError, LlmService, Message, Role};
pub use schema::{FormSchema, FormValues, SchemaError};
pub use session::{
    CompletedPolicy, FormSession, FormState, SessionError, SessionOptions, TokenEvent, TokenSink,
    TurnOutcome,
};
