//! WebSocket relay client

use super::protocol::{RelayEvent, RelayRequest};
use super::transport::RelayTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type SenderSlot = Arc<RwLock<Option<mpsc::UnboundedSender<Message>>>>;

const NOT_CONNECTED: &str = "Connection is lost or has not been established yet";

/// Single persistent connection to the message relay
///
/// Inbound frames are decoded into [`RelayEvent`]s and broadcast to every
/// subscriber. Outbound requests are queued to a sender task; once the socket
/// is gone every send fails with [`Error::NotConnected`].
pub struct RelayClient {
    /// Relay URL
    url: String,

    /// Outgoing frame queue, `None` while disconnected
    tx: SenderSlot,

    /// Name confirmed by the relay, stamped as `from` on later requests
    user: Arc<RwLock<Option<String>>>,

    /// Inbound event fan-out
    events: broadcast::Sender<RelayEvent>,
}

impl RelayClient {
    /// Create a client for `url` without connecting
    pub fn new(url: &str, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));

        Self {
            url: url.to_string(),
            tx: Arc::new(RwLock::new(None)),
            user: Arc::new(RwLock::new(None)),
            events,
        }
    }

    /// Relay URL this client connects to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the WebSocket and start the background sender and receiver tasks
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            debug!("Relay already connected: {}", self.url);
            return Ok(());
        }

        info!("Connecting to relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to relay");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.write() = Some(tx.clone());

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(
            read,
            tx,
            self.tx.clone(),
            self.user.clone(),
            self.events.clone(),
        ));

        Ok(())
    }

    /// Close the socket; later sends fail with [`Error::NotConnected`]
    pub fn disconnect(&self) {
        if let Some(tx) = self.tx.write().take() {
            let _ = tx.send(Message::Close(None));
            info!("Disconnecting from relay");
        }
    }

    /// Name confirmed by the last successful registration
    pub fn registered_name(&self) -> Option<String> {
        self.user.read().clone()
    }

    fn send_request(&self, request: RelayRequest) -> Result<()> {
        let json = request.with_from(self.registered_name()).to_json()?;

        let guard = self.tx.read();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::NotConnected(NOT_CONNECTED.to_string()))?;

        tx.send(Message::Text(json))
            .map_err(|_| Error::NotConnected(NOT_CONNECTED.to_string()))
    }

    /// Sender task: drains the queue into the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send relay frame: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Relay sender task terminated");
    }

    /// Receiver task: decodes inbound frames and broadcasts them
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        own_tx: mpsc::UnboundedSender<Message>,
        slot: SenderSlot,
        user: Arc<RwLock<Option<String>>>,
        events: broadcast::Sender<RelayEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => Self::handle_frame(&text, &user, &events),
                Ok(Message::Close(_)) => {
                    info!("Relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("Relay WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        // A later connect() may already have replaced the slot
        {
            let mut slot = slot.write();
            if slot.as_ref().is_some_and(|tx| tx.same_channel(&own_tx)) {
                *slot = None;
            }
        }
        let _ = events.send(RelayEvent::Closed);

        debug!("Relay receiver task terminated");
    }

    fn handle_frame(
        text: &str,
        user: &Arc<RwLock<Option<String>>>,
        events: &broadcast::Sender<RelayEvent>,
    ) {
        debug!("Received relay frame: {}", text);

        let event = match RelayEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable relay frame: {}", e);
                return;
            }
        };

        if let RelayEvent::Registered(outcome) = &event {
            match (&outcome.result, &outcome.name) {
                (true, Some(name)) => {
                    info!(name = %name, "Registered with relay");
                    *user.write() = Some(name.clone());
                }
                _ => warn!("Relay rejected registration"),
            }
        }

        // No subscribers is not an error
        let _ = events.send(event);
    }
}

#[async_trait]
impl RelayTransport for RelayClient {
    async fn register(&self, name: &str) -> Result<()> {
        self.send_request(RelayRequest::register(name))
    }

    async fn communicate(&self, to: &str, message: &str) -> Result<()> {
        self.send_request(RelayRequest::communicate(to, message))
    }

    fn is_connected(&self) -> bool {
        self.tx.read().is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}
