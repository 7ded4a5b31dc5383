//! Minimal chat-completion client. The assembled prompt has to reach some
//! model to produce a reply; which model and how it's called is explicitly
//! out of scope here, so this is a thin stand-in rather than a real
//! integration.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub content: String,
}

pub struct ChatClient;

impl ChatClient {
    pub fn new() -> Self {
        Self
    }

    /// Echoes the assembled message back, prefixed so callers can see the
    /// context injection took effect. Swap this out for a real completion
    /// call when one is wired up.
    pub async fn complete(&self, formatted_message: &str) -> ChatReply {
        ChatReply {
            content: format!("[stub reply]\n{formatted_message}"),
        }
    }
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}
