//! Ordered conversation history.

use super::{Role, Turn};

/// Turns exchanged so far.
///
/// Only [`ConversationHistory::record_exchange`] appends, so the shape stays
/// valid: an optional leading `System`, then `User` turns each optionally
/// answered by one `Assistant`. An empty answer records the question alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History that opens with a system instruction.
    pub fn with_system(instruction: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::System(instruction.into())],
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Snapshot of the history followed by `question` as a new user turn.
    pub fn messages_with(&self, question: &str) -> Vec<Turn> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.extend(self.turns.iter().cloned());
        messages.push(Turn::User(question.to_string()));
        messages
    }

    /// Commit a finished exchange.
    pub fn record_exchange(&mut self, question: &str, answer: &str) {
        self.turns.push(Turn::User(question.to_string()));
        if !answer.is_empty() {
            self.turns.push(Turn::Assistant(answer.to_string()));
        }
    }

    /// Checks the ordering rules described on the type.
    pub fn is_well_formed(&self) -> bool {
        let mut previous: Option<Role> = None;
        for (idx, turn) in self.turns.iter().enumerate() {
            let ok = match turn.role() {
                Role::System => idx == 0,
                Role::User => true,
                Role::Assistant => previous == Some(Role::User),
            };
            if !ok {
                return false;
            }
            previous = Some(turn.role());
        }
        true
    }
}
