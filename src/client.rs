use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::TokenStore;
use crate::error::{Result, SyncError};
use crate::gateway::{ConnectionState, RealtimeChannel};
use crate::protocol::{Frame, MessageEnvelope, StatusUpdate, WireFormat};

const CHANNEL_CAPACITY: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, WsMessage>;
type Reader = SplitStream<Socket>;

/// WebSocket client for `/ws/{token}`.
///
/// Owns the single socket: the write half sits behind a mutex so sends are
/// serialized, the read half lives in a spawned listener that fans frames out
/// to broadcast subscribers. There is no reconnection; once the socket drops,
/// nothing more arrives until `connect` is called again.
pub struct WsClient {
    ws_base_url: String,
    tokens: TokenStore,
    format: WireFormat,
    writer: Arc<Mutex<Option<Writer>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    messages: broadcast::Sender<MessageEnvelope>,
    statuses: broadcast::Sender<StatusUpdate>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl WsClient {
    pub fn new(ws_base_url: &str, tokens: TokenStore, format: WireFormat) -> Self {
        let (messages, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (statuses, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        WsClient {
            ws_base_url: ws_base_url.trim_end_matches('/').to_string(),
            tokens,
            format,
            writer: Arc::new(Mutex::new(None)),
            listener: Mutex::new(None),
            messages,
            statuses,
            state: Arc::new(state),
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let text = frame.encode(self.format)?;
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(SyncError::NotConnected)?;
        debug!("sending frame: {}", text);
        writer.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Stops the listener and closes the socket. The caller holds the
    /// listener slot, so connects and disconnects never interleave.
    async fn teardown(&self, listener: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = listener.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.close().await {
                debug!("error closing websocket: {}", e);
            }
        }
    }
}

#[async_trait]
impl RealtimeChannel for WsClient {
    /// `conversation_id` is informational only: the server scopes the socket
    /// by the token in the URL.
    async fn connect(&self, conversation_id: &str) -> Result<()> {
        let mut listener = self.listener.lock().await;
        self.teardown(&mut listener).await;
        self.state.send_replace(ConnectionState::Connecting);

        let Some(token) = self.tokens.get().await else {
            self.state.send_replace(ConnectionState::Error);
            return Err(SyncError::NotAuthenticated);
        };

        let url = format!("{}/ws/{}", self.ws_base_url, token.access_token);
        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                warn!("websocket connect to {}/ws/<token> failed: {}", self.ws_base_url, e);
                self.state.send_replace(ConnectionState::Error);
                return Err(e.into());
            }
        };
        info!(
            "websocket connected to {}/ws/<token> (conversation {})",
            self.ws_base_url, conversation_id
        );

        let (write, read) = socket.split();
        *self.writer.lock().await = Some(write);
        self.state.send_replace(ConnectionState::Connected);

        *listener = Some(tokio::spawn(listen(
            read,
            Arc::clone(&self.writer),
            self.messages.clone(),
            self.statuses.clone(),
            Arc::clone(&self.state),
        )));
        Ok(())
    }

    async fn disconnect(&self) {
        let mut listener = self.listener.lock().await;
        self.teardown(&mut listener).await;
        self.state.send_replace(ConnectionState::Disconnected);
        info!("websocket disconnected");
    }

    async fn send_message(&self, message: &MessageEnvelope) -> Result<()> {
        self.send_frame(&Frame::Message(message.clone())).await
    }

    async fn send_status_update(&self, update: &StatusUpdate) -> Result<()> {
        self.send_frame(&Frame::StatusUpdate(update.clone())).await
    }

    fn incoming_messages(&self) -> broadcast::Receiver<MessageEnvelope> {
        self.messages.subscribe()
    }

    fn status_updates(&self) -> broadcast::Receiver<StatusUpdate> {
        self.statuses.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

async fn listen(
    mut read: Reader,
    writer: Arc<Mutex<Option<Writer>>>,
    messages: broadcast::Sender<MessageEnvelope>,
    statuses: broadcast::Sender<StatusUpdate>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let final_state = loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => match Frame::decode(&text) {
                Ok(Frame::Message(envelope)) => {
                    debug!("received message {}", envelope.id);
                    let _ = messages.send(envelope);
                }
                Ok(Frame::StatusUpdate(update)) => {
                    debug!("received status {} for {}", update.status, update.message_id);
                    let _ = statuses.send(update);
                }
                Err(e) => warn!("dropping unrecognized websocket frame ({}): {}", e, text),
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                info!("websocket closed by server");
                break ConnectionState::Disconnected;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("websocket listener error: {}", e);
                break ConnectionState::Error;
            }
        }
    };
    writer.lock().await.take();
    state.send_replace(final_state);
}
