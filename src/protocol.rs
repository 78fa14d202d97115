//! JSON shapes exchanged with the chat backend over REST and WebSocket.
//!
//! Frames on the realtime channel carry an explicit discriminant:
//!
//! ```json
//! {"type": "message", "payload": {"id": "m1", "conversation_id": "c1", ...}}
//! {"type": "status_update", "payload": {"messageId": "m1", "status": "READ", ...}}
//! ```
//!
//! Older servers send the bare payloads with no tag. Those are handled by
//! [`decode_untagged`], which is kept separate so it can be removed once every
//! backend emits tagged frames.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::models::{millis_to_datetime, Message, MessageStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub conversation_id: String,
    pub content: String,
    pub sender_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
}

/// Classification the backend attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub classification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub status: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    Message(MessageEnvelope),
    StatusUpdate(StatusUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Tagged,
    /// Bare payloads without a `type` field.
    Legacy,
}

impl WireFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tagged" => Some(WireFormat::Tagged),
            "legacy" => Some(WireFormat::Legacy),
            _ => None,
        }
    }
}

impl Frame {
    pub fn encode(&self, format: WireFormat) -> Result<String> {
        let text = match (format, self) {
            (WireFormat::Tagged, frame) => serde_json::to_string(frame)?,
            (WireFormat::Legacy, Frame::Message(envelope)) => serde_json::to_string(envelope)?,
            (WireFormat::Legacy, Frame::StatusUpdate(update)) => serde_json::to_string(update)?,
        };
        Ok(text)
    }

    /// Decodes one inbound text frame, accepting both tagged and untagged
    /// payloads.
    pub fn decode(text: &str) -> Result<Frame> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("type").is_some() {
            return Ok(serde_json::from_value(value)?);
        }
        decode_untagged(value)
    }
}

/// Compatibility path for servers that send bare envelopes: try a message
/// first, then a status update.
fn decode_untagged(value: serde_json::Value) -> Result<Frame> {
    if let Ok(envelope) = serde_json::from_value::<MessageEnvelope>(value.clone()) {
        return Ok(Frame::Message(envelope));
    }
    serde_json::from_value::<StatusUpdate>(value)
        .map(Frame::StatusUpdate)
        .map_err(|_| SyncError::Decode("frame matches neither message nor status update".into()))
}

impl MessageEnvelope {
    pub fn from_message(message: &Message) -> Self {
        MessageEnvelope {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            sender_id: message.sender_id.clone(),
            timestamp: message.timestamp.timestamp_millis(),
            status: message.status.as_str().to_string(),
            ai_analysis: None,
        }
    }

    pub fn into_message(self, current_user_id: &str) -> Result<Message> {
        let status = self.status.parse::<MessageStatus>()?;
        let timestamp = millis_to_datetime(self.timestamp)?;
        let is_from_current_user = self.sender_id == current_user_id;
        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            content: self.content,
            sender_id: self.sender_id,
            timestamp,
            status,
            is_from_current_user,
        })
    }

    pub fn classification(&self) -> Option<&str> {
        self.ai_analysis.as_ref().map(|a| a.classification.as_str())
    }
}

impl StatusUpdate {
    pub fn new(message_id: impl Into<String>, status: MessageStatus, timestamp: i64) -> Self {
        StatusUpdate {
            message_id: message_id.into(),
            status: status.as_str().to_string(),
            timestamp,
        }
    }
}
