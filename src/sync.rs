//! Offline-first message synchronization.
//!
//! The local store is the only thing the UI reads. Sends are written locally
//! before they go out; pushes from the server are written locally when they
//! arrive; history fetches are written locally in one batch. Conflicting
//! writes to the same id resolve by last write wins.

use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::SessionContext;
use crate::classify::ClassificationRouter;
use crate::error::Result;
use crate::gateway::{MessageHistory, RealtimeChannel};
use crate::models::{millis_to_datetime, Message, MessageStatus};
use crate::protocol::{MessageEnvelope, StatusUpdate};
use crate::storage::MessageStore;

pub struct MessageSync {
    store: Arc<MessageStore>,
    history: Arc<dyn MessageHistory>,
    channel: Arc<dyn RealtimeChannel>,
    session: SessionContext,
    history_limit: u32,
    workers: Vec<JoinHandle<()>>,
}

impl MessageSync {
    /// Subscribes to the channel and spawns the two reconciliation workers.
    /// Must be called from within a Tokio runtime. The workers stop when the
    /// returned value is dropped.
    pub fn start(
        store: Arc<MessageStore>,
        history: Arc<dyn MessageHistory>,
        channel: Arc<dyn RealtimeChannel>,
        router: Option<ClassificationRouter>,
        session: SessionContext,
        history_limit: u32,
    ) -> Self {
        let inbound = tokio::spawn(reconcile_messages(
            channel.incoming_messages(),
            Arc::clone(&store),
            router,
            session.clone(),
        ));
        let statuses = tokio::spawn(reconcile_statuses(channel.status_updates(), Arc::clone(&store)));
        info!("message sync started for user {}", session.user_id);
        MessageSync {
            store,
            history,
            channel,
            session,
            history_limit,
            workers: vec![inbound, statuses],
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Live view of a conversation, newest first, with authorship computed
    /// against the session user on every emission.
    pub fn observe(&self, conversation_id: &str) -> BoxStream<'static, Result<Vec<Message>>> {
        let user_id = self.session.user_id.clone();
        self.store
            .observe(conversation_id)
            .map(move |snapshot| {
                snapshot.map(|messages| {
                    messages
                        .into_iter()
                        .map(|mut message| {
                            message.is_from_current_user = message.sender_id == user_id;
                            message
                        })
                        .collect()
                })
            })
            .boxed()
    }

    /// Stores the message as `Sending`, then transmits it. A failed transmit
    /// is logged and leaves the message in `Sending`; the returned message is
    /// the one initially stored.
    pub async fn send(&self, conversation_id: &str, content: &str) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            sender_id: self.session.user_id.clone(),
            timestamp: millis_to_datetime(Utc::now().timestamp_millis())?,
            status: MessageStatus::Sending,
            is_from_current_user: true,
        };
        self.store.upsert(&message).await?;

        match self.channel.send_message(&MessageEnvelope::from_message(&message)).await {
            Ok(()) => {
                self.store.update_status(&message.id, MessageStatus::Sent).await?;
            }
            Err(e) => warn!("message {} not sent, left in SENDING: {}", message.id, e),
        }
        Ok(message)
    }

    /// Writes `status` as given, with no ordering check against the stored
    /// value.
    pub async fn update_status(&self, message_id: &str, status: MessageStatus) -> Result<bool> {
        self.store.update_status(message_id, status).await
    }

    /// Marks a message read locally and tells the server, best effort.
    pub async fn mark_read(&self, message_id: &str) -> Result<bool> {
        if !self.store.update_status(message_id, MessageStatus::Read).await? {
            return Ok(false);
        }
        let update = StatusUpdate::new(message_id, MessageStatus::Read, Utc::now().timestamp_millis());
        if let Err(e) = self.channel.send_status_update(&update).await {
            warn!("read receipt for {} not sent: {}", message_id, e);
        }
        Ok(true)
    }

    /// Marks every unread message from the other side as read.
    pub async fn mark_all_read(&self, conversation_id: &str) -> Result<usize> {
        let unread: Vec<_> = self
            .store
            .messages(conversation_id)
            .await?
            .into_iter()
            .filter(|m| !self.session.is_me(&m.sender_id) && !m.status.is_read())
            .collect();
        let mut marked = 0;
        for message in unread {
            if self.mark_read(&message.id).await? {
                marked += 1;
            }
        }
        Ok(marked)
    }

    pub async fn delete(&self, message_id: &str) -> Result<bool> {
        self.store.delete(message_id).await
    }

    pub async fn purge(&self, conversation_id: &str) -> Result<usize> {
        self.store.delete_conversation(conversation_id).await
    }

    /// Pulls recent history with `other_user_id` into the store, filed under
    /// `conversation_id` whatever id the server reports.
    pub async fn sync(&self, conversation_id: &str, other_user_id: &str) -> Result<usize> {
        let envelopes = self.history.fetch_messages(other_user_id, self.history_limit).await?;
        let mut messages = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let id = envelope.id.clone();
            match envelope.into_message(&self.session.user_id) {
                Ok(mut message) => {
                    message.conversation_id = conversation_id.to_string();
                    messages.push(message);
                }
                Err(e) => warn!("skipping history message {}: {}", id, e),
            }
        }
        self.store.upsert_all(&messages).await?;
        debug!("synced {} message(s) for conversation {}", messages.len(), conversation_id);
        Ok(messages.len())
    }
}

impl Drop for MessageSync {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn reconcile_messages(
    mut inbound: broadcast::Receiver<MessageEnvelope>,
    store: Arc<MessageStore>,
    router: Option<ClassificationRouter>,
    session: SessionContext,
) {
    loop {
        let envelope = match inbound.recv().await {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(skipped)) => {
                warn!("inbound message worker lagged, {} frame(s) skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if let Some(router) = &router {
            router.route(&envelope).await;
        }
        let id = envelope.id.clone();
        match envelope.into_message(&session.user_id) {
            Ok(message) => {
                if let Err(e) = store.upsert(&message).await {
                    error!("failed to store inbound message {}: {}", id, e);
                }
            }
            Err(e) => warn!("dropping inbound message {}: {}", id, e),
        }
    }
}

async fn reconcile_statuses(mut updates: broadcast::Receiver<StatusUpdate>, store: Arc<MessageStore>) {
    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(RecvError::Lagged(skipped)) => {
                warn!("status worker lagged, {} update(s) skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let status = match update.status.parse::<MessageStatus>() {
            Ok(status) => status,
            Err(e) => {
                warn!("dropping status update for {}: {}", update.message_id, e);
                continue;
            }
        };
        match store.update_status(&update.message_id, status).await {
            Ok(true) => {}
            Ok(false) => debug!("status update for unknown message {}", update.message_id),
            Err(e) => error!("failed to apply status to {}: {}", update.message_id, e),
        }
    }
}
