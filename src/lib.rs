//! Chagbot: a Discord bot that relays chat to a text-generation backend and
//! serves random pictures without uploading the same file twice.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod messaging;
pub mod supervisor;
#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Inbound message from the messaging platform.
///
/// Produced by the platform session and consumed once by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    /// Adapter name (e.g. "discord").
    pub source: String,
    /// Channel the message arrived in. Replies go back here.
    pub conversation_id: String,
    pub sender_id: String,
    /// Display label of the author, as shown to users and sent to the backend.
    pub author_label: String,
    pub content: String,
    /// True when the bot's own account authored the message.
    pub from_self: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl InboundMessage {
    /// Build a message for the given channel with default ids and timestamp.
    pub fn new(
        source: impl Into<String>,
        conversation_id: impl Into<String>,
        author_label: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let author_label = author_label.into();
        Self {
            id: String::new(),
            source: source.into(),
            conversation_id: conversation_id.into(),
            sender_id: author_label.clone(),
            author_label,
            content: content.into(),
            from_self: false,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Result of a successful file upload to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Id of the platform message that carried the file.
    pub message_id: String,
    /// Durable URL of the hosted attachment.
    pub url: String,
}
