use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::providers::Message;

/// Number of turns kept in the conversation window
pub const MAX_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl From<&ConversationTurn> for Message {
    fn from(turn: &ConversationTurn) -> Self {
        match turn.role {
            TurnRole::User => Message::user(turn.content.as_str()),
            TurnRole::Assistant => Message::assistant(turn.content.as_str()),
        }
    }
}

/// Fixed-size sliding window of conversation turns, oldest evicted first
#[derive(Debug, Default, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self {
            turns: VecDeque::with_capacity(MAX_HISTORY + 1),
        }
    }

    pub fn push(&mut self, role: TurnRole, content: impl Into<String>) {
        self.turns.push_back(ConversationTurn { role, content: content.into() });
        while self.turns.len() > MAX_HISTORY {
            self.turns.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Message::from).collect()
    }
}
