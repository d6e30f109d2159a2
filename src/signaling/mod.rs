//! Signaling transport abstraction and its implementations

mod memory;
mod websocket;

pub use memory::MemoryChannel;
pub use websocket::WebSocketChannel;

use crate::error::Result;
use crate::peer::types::Message;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// What the transport reports to its single inbound handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Transport is up; frames may be sent
    Opened,
    /// Schema-valid inbound frame
    Message(Message),
    /// Inbound frame that failed schema validation
    Malformed(String),
    /// Remote end closed the transport
    Closed,
    /// Transport failed
    Error(String),
}

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Duplex message transport between the two peers (via a relay).
///
/// `send` is fire-and-forget: frames are delivered in order while the
/// transport is open and silently dropped otherwise.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Establishes the transport; called once per process
    async fn connect(&mut self) -> Result<()>;

    fn send(&self, msg: &Message);

    /// Registers the inbound handler; a second registration is rejected
    fn on_message(&mut self, handler: ChannelEventSender) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Idempotent
    async fn close(&mut self);
}

/// Turns a raw text frame into a channel event
pub(crate) fn frame_event(frame: &str) -> ChannelEvent {
    match Message::decode(frame) {
        Ok(msg) => ChannelEvent::Message(msg),
        Err(e) => ChannelEvent::Malformed(format!("{}: {}", e, frame)),
    }
}
