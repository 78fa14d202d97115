//! Seams between the synchronizer and the network. [`crate::api::ApiClient`]
//! and [`crate::client::WsClient`] are the production implementations.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::protocol::{MessageEnvelope, StatusUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Request/response access to message history.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    async fn fetch_messages(&self, other_user_id: &str, limit: u32) -> Result<Vec<MessageEnvelope>>;
}

/// Duplex push channel.
///
/// Subscriptions only see frames that arrive after they were created.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn connect(&self, conversation_id: &str) -> Result<()>;
    async fn disconnect(&self);
    async fn send_message(&self, message: &MessageEnvelope) -> Result<()>;
    async fn send_status_update(&self, update: &StatusUpdate) -> Result<()>;
    fn incoming_messages(&self) -> broadcast::Receiver<MessageEnvelope>;
    fn status_updates(&self) -> broadcast::Receiver<StatusUpdate>;
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
