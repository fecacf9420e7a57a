//! Chat session state: conversation turns, history, and the session actor.
//!
//! [`ChatSession`] owns the live history and KV cache behind a single task so
//! that every mutation is serialized. [`ModelSession`] pairs it with a
//! [`crate::cache::PromptCacheStore`] to prime the context once per run.

pub mod chat;
pub mod history;
pub mod model_session;

use serde::{Deserialize, Serialize};

pub use chat::{AnswerStream, ChatSession, SessionPhase};
pub use history::ConversationHistory;
pub use model_session::{ModelSession, PrefillResult};

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => f.write_str("system"),
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum Turn {
    System(String),
    User(String),
    Assistant(String),
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Turn::User(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn::Assistant(content.into())
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::System(_) => Role::System,
            Turn::User(_) => Role::User,
            Turn::Assistant(_) => Role::Assistant,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::System(text) | Turn::User(text) | Turn::Assistant(text) => text,
        }
    }
}
