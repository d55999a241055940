//! Per-session conversation memory.
//!
//! An ordered, append-only log of [`DialogTurn`]s. Existing turns are never
//! mutated; the log is only ever emptied by [`ConversationMemory::clear`]
//! or replaced wholesale by [`ConversationMemory::restore`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::DialogTurn;

/// One message of an externally stored chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl TranscriptMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<DialogTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed exchange and return it.
    pub fn append(&mut self, query: impl Into<String>, response: impl Into<String>) -> &DialogTurn {
        let ordinal = self.turns.len();
        self.turns.push(DialogTurn {
            id: Uuid::new_v4(),
            query: query.into(),
            response: response.into(),
            ordinal,
        });
        &self.turns[ordinal]
    }

    pub fn turns(&self) -> &[DialogTurn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Replace the conversation with the user/assistant pairs of `messages`.
    ///
    /// Messages are taken two at a time from the start; a pair whose roles
    /// are not `user` then `assistant` is skipped, as is a trailing odd
    /// message. Returns the number of turns kept.
    pub fn restore(&mut self, messages: &[TranscriptMessage]) -> usize {
        self.turns.clear();
        for pair in messages.chunks_exact(2) {
            let (user, assistant) = (&pair[0], &pair[1]);
            if user.role == "user" && assistant.role == "assistant" {
                self.append(user.content.clone(), assistant.content.clone());
            } else {
                tracing::debug!(
                    first = %user.role,
                    second = %assistant.role,
                    "skipping malformed transcript pair"
                );
            }
        }
        self.turns.len()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
