//! Chat transcript types
//!
//! The transcript is append-only. The one exception is the trailing assistant
//! message, which grows while its response is streaming and is frozen once the
//! stream ends.

use serde::{Deserialize, Serialize};

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    // true while the last message is an assistant reply still receiving fragments
    streaming: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.finish();
        self.messages.push(ChatMessage::new(ChatRole::User, content));
    }

    /// Open an empty assistant message that will receive streamed fragments.
    pub fn begin_assistant(&mut self) {
        self.finish();
        self.messages.push(ChatMessage::new(ChatRole::Assistant, String::new()));
        self.streaming = true;
    }

    /// Append a fragment to the in-progress assistant message.
    ///
    /// Returns false (and changes nothing) when no message is open.
    pub fn append_fragment(&mut self, fragment: &str) -> bool {
        if !self.streaming {
            return false;
        }
        match self.messages.last_mut() {
            Some(msg) if msg.role == ChatRole::Assistant => {
                msg.content.push_str(fragment);
                true
            }
            _ => false,
        }
    }

    /// Freeze the in-progress assistant message, if any.
    pub fn finish(&mut self) {
        self.streaming = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChatMessage> {
        self.messages.iter()
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Turns worth sending back to the model as context.
    ///
    /// A reply that came back empty is dropped together with the prompt it
    /// answered, so the history still alternates user/assistant.
    pub fn history(&self) -> Vec<ChatMessage> {
        let unanswered = |i: usize| {
            matches!(
                self.messages.get(i + 1),
                Some(next) if next.role == ChatRole::Assistant && next.content.is_empty()
            )
        };
        self.messages
            .iter()
            .enumerate()
            .filter(|(i, msg)| match msg.role {
                ChatRole::User => !unanswered(*i),
                ChatRole::Assistant => !msg.content.is_empty(),
            })
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}
