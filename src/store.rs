//! Conversation history persistence boundary
//!
//! The engine never persists anything itself. Callers load stored messages,
//! rebuild a session from them and append the new messages after each turn.

use crate::llm::{Message, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Message already stored: {0}")]
    DuplicateMessage(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Author of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFrom {
    Human,
    Agent,
}

impl MessageFrom {
    pub fn role(self) -> Role {
        match self {
            MessageFrom::Human => Role::User,
            MessageFrom::Agent => Role::Assistant,
        }
    }
}

/// Persisted message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub from: MessageFrom,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn new(from: MessageFrom, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::new(MessageFrom::Human, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(MessageFrom::Agent, text)
    }

    /// Record for a dialogue message; system messages are never stored
    pub fn from_message(message: &Message) -> Option<Self> {
        match message.role {
            Role::User => Some(Self::human(message.content.clone())),
            Role::Assistant => Some(Self::agent(message.content.clone())),
            Role::System => None,
        }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.from.role(), self.text.clone())
    }
}

/// Dialogue messages for stored history, oldest first
pub fn history_to_messages(history: &[StoredMessage]) -> Vec<Message> {
    let mut ordered: Vec<&StoredMessage> = history.iter().collect();
    // Stable, so messages sharing a timestamp keep their stored order
    ordered.sort_by_key(|m| m.created_at);
    ordered.into_iter().map(StoredMessage::to_message).collect()
}

/// Storage for conversation history
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All messages of a conversation; empty for an unknown one
    ///
    /// # Errors
    /// Fails when the backing store cannot be read.
    async fn load(&self, conversation_id: &str) -> StoreResult<Vec<StoredMessage>>;

    /// Append the messages of one turn
    ///
    /// # Errors
    /// Fails on a message id that is already stored; nothing is written then.
    async fn append(&self, conversation_id: &str, messages: &[StoredMessage]) -> StoreResult<()>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load(&self, conversation_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, conversation_id: &str, messages: &[StoredMessage]) -> StoreResult<()> {
        let mut conversations = self.conversations.write().await;
        let stored = conversations.entry(conversation_id.to_string()).or_default();

        // Check the whole batch before writing so a failed append changes nothing
        for message in messages {
            let repeated = stored.iter().any(|m| m.id == message.id)
                || messages.iter().filter(|m| m.id == message.id).count() > 1;
            if repeated {
                return Err(StoreError::DuplicateMessage(message.id.clone()));
            }
        }

        stored.extend_from_slice(messages);
        tracing::debug!(
            conversation_id,
            appended = messages.len(),
            total = stored.len(),
            "Stored conversation messages"
        );
        Ok(())
    }
}
