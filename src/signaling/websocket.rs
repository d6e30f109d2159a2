//! WebSocket signaling transport

use super::{frame_event, ChannelEvent, ChannelEventSender, SignalingChannel};
use crate::error::{Result, SessionError};
use crate::peer::types::Message;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Signaling over a single WebSocket connection to the relay
pub struct WebSocketChannel {
    url: String,
    tx: Option<mpsc::UnboundedSender<WsMessage>>,
    open: Arc<AtomicBool>,
    handler: Option<ChannelEventSender>,
    receiver: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tx: None,
            open: Arc::new(AtomicBool::new(false)),
            handler: None,
            receiver: None,
        }
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, WsMessage>,
        mut rx: mpsc::UnboundedReceiver<WsMessage>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket frame: {}", e);
                break;
            }
        }
        let _ = write.close().await;
        debug!("Sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        open: Arc<AtomicBool>,
        handler: Option<ChannelEventSender>,
    ) {
        let deliver = |event: ChannelEvent| {
            if let Some(handler) = &handler {
                let _ = handler.send(event);
            }
        };

        let terminal = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    debug!("Received frame: {}", text);
                    deliver(frame_event(&text));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("WebSocket closed");
                    break ChannelEvent::Closed;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!("Ignoring binary frame of {} bytes", data.len());
                    deliver(ChannelEvent::Malformed("binary frame".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break ChannelEvent::Error(e.to_string());
                }
            }
        };

        // Local close already flipped the flag; only report remote loss
        if open.swap(false, Ordering::SeqCst) {
            deliver(terminal);
        }
        debug!("Receiver task terminated");
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(SessionError::Transport("already connected".into()));
        }
        if self.handler.is_none() {
            warn!("Connecting without an inbound handler; frames will be discarded");
        }

        info!("Connecting to signaling server: {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SessionError::Transport(format!("Failed to connect: {}", e)))?;
        info!("WebSocket opened");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        self.open.store(true, Ordering::SeqCst);

        if let Some(handler) = &self.handler {
            let _ = handler.send(ChannelEvent::Opened);
        }

        tokio::spawn(Self::sender_task(write, rx));
        self.receiver = Some(tokio::spawn(Self::receiver_task(
            read,
            self.open.clone(),
            self.handler.clone(),
        )));
        Ok(())
    }

    fn send(&self, msg: &Message) {
        if !self.is_open() {
            debug!("Transport not open, dropping {} frame", msg.kind());
            return;
        }
        let frame = match msg.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {} frame: {}", msg.kind(), e);
                return;
            }
        };
        debug!("Client sending message: {}", frame);
        if let Some(tx) = &self.tx {
            let _ = tx.send(WsMessage::Text(frame));
        }
    }

    fn on_message(&mut self, handler: ChannelEventSender) -> Result<()> {
        if self.handler.is_some() {
            return Err(SessionError::HandlerAlreadyRegistered);
        }
        self.handler = Some(handler);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(WsMessage::Close(None));
            info!("Closing signaling channel");
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}
