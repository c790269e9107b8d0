//! Session state: conversation history and model preference, persisted in [`Storage`].
//!
//! Loading never fails: a missing or unreadable value falls back to an empty
//! conversation and the default model, and the corruption is logged.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{self, Level};
use crate::storage::{Storage, StorageError};

pub const MESSAGES_KEY: &str = "ollama-chat-messages";
pub const MODEL_KEY: &str = "ollama-chat-model";
pub const DEFAULT_MODEL: &str = "llama3";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preferences {
    pub model: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Ordered message history plus the selected model.
///
/// History only grows, except that the trailing assistant message may have
/// text appended while a response streams in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationState {
    messages: Vec<Message>,
    pub preferences: Preferences,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>, preferences: Preferences) -> Self {
        Self {
            messages,
            preferences,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn model(&self) -> &str {
        &self.preferences.model
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append `fragment` to the trailing assistant message. Returns false if the
    /// last message is not an assistant message.
    pub fn append_to_trailing(&mut self, fragment: &str) -> bool {
        match self.messages.last_mut() {
            Some(m) if m.role == Role::Assistant => {
                m.content.push_str(fragment);
                true
            }
            _ => false,
        }
    }

    /// Drop the trailing assistant message if nothing was ever written into it.
    pub(crate) fn discard_empty_placeholder(&mut self) -> bool {
        match self.messages.last() {
            Some(m) if m.role == Role::Assistant && m.content.is_empty() => {
                self.messages.pop();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear_messages(&mut self) {
        self.messages.clear();
    }
}

pub struct SessionStore {
    storage: Storage,
}

impl SessionStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Read the persisted conversation and model preference.
    pub fn load(&self) -> ConversationState {
        let messages = match self.storage.get(MESSAGES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) => messages,
                Err(e) => {
                    diagnostics::log(
                        Level::Warn,
                        "persisted conversation unreadable, starting empty",
                        Some(serde_json::json!({ "key": MESSAGES_KEY, "error": e.to_string() })),
                    );
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                diagnostics::log(
                    Level::Warn,
                    "conversation read failed, starting empty",
                    Some(serde_json::json!({ "key": MESSAGES_KEY, "error": e.to_string() })),
                );
                Vec::new()
            }
        };
        let model = match self.storage.get(MODEL_KEY) {
            Ok(Some(m)) if !m.trim().is_empty() => m,
            Ok(_) => DEFAULT_MODEL.to_string(),
            Err(e) => {
                diagnostics::log(
                    Level::Warn,
                    "model preference read failed, using default",
                    Some(serde_json::json!({ "key": MODEL_KEY, "error": e.to_string() })),
                );
                DEFAULT_MODEL.to_string()
            }
        };
        ConversationState::new(messages, Preferences { model })
    }

    /// Persist the full message history.
    pub fn save(&mut self, conversation: &ConversationState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(conversation.messages())?;
        self.storage.set(MESSAGES_KEY, &raw)
    }

    pub fn save_model(
        &mut self,
        conversation: &mut ConversationState,
        model: &str,
    ) -> Result<(), StorageError> {
        self.storage.set(MODEL_KEY, model)?;
        conversation.preferences.model = model.to_string();
        Ok(())
    }

    /// Empty the conversation and persist it. The model preference is kept.
    pub fn clear(&mut self, conversation: &mut ConversationState) -> Result<(), StorageError> {
        conversation.clear_messages();
        self.save(conversation)
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }
}
