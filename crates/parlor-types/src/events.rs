use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::Message;

/// Longest message body accepted from a client, in bytes.
pub const MAX_MESSAGE_LEN: usize = 10_000;

/// Frame sent FROM client TO server over the room socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub message: String,
}

impl ClientMessage {
    /// Parse and validate a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let msg: Self = serde_json::from_str(text)
            .map_err(|e| ChatError::invalid(format!("malformed message frame: {}", e)))?;

        if msg.message.trim().is_empty() {
            return Err(ChatError::invalid("message cannot be empty"));
        }
        if msg.message.len() > MAX_MESSAGE_LEN {
            return Err(ChatError::invalid(format!(
                "message cannot exceed {} bytes (got {})",
                MAX_MESSAGE_LEN,
                msg.message.len()
            )));
        }
        Ok(msg)
    }
}

/// One message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for HistoryEntry {
    fn from(msg: &Message) -> Self {
        Self {
            message: msg.content.clone(),
            username: msg.author.username.clone(),
            timestamp: msg.timestamp,
        }
    }
}

/// Events sent FROM server TO client over the room socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Persisted messages replayed once, right after joining
    ChatHistory { messages: Vec<HistoryEntry> },

    /// A message delivered live to everyone in the room, sender included
    ChatMessage {
        message: String,
        username: String,
        timestamp: DateTime<Utc>,
    },

    /// A frame from this connection was rejected; only sent to the offender
    Error { error: String },
}

impl ServerEvent {
    /// `None` when there is nothing to replay.
    pub fn history(messages: &[Message]) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }
        Some(Self::ChatHistory {
            messages: messages.iter().map(HistoryEntry::from).collect(),
        })
    }

    pub fn delivered(msg: &Message) -> Self {
        Self::ChatMessage {
            message: msg.content.clone(),
            username: msg.author.username.clone(),
            timestamp: msg.timestamp,
        }
    }
}
