//! In-process relay: two channel endpoints wired back to back

use super::{frame_event, ChannelEvent, ChannelEventSender, SignalingChannel};
use crate::error::{Result, SessionError};
use crate::peer::types::Message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

#[derive(Default)]
struct Endpoint {
    open: AtomicBool,
    connected_once: AtomicBool,
    handler: Mutex<Option<ChannelEventSender>>,
}

impl Endpoint {
    fn deliver(&self, event: ChannelEvent) {
        let handler = self.handler.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(handler) = handler {
            let _ = handler.send(event);
        }
    }
}

/// One side of an in-memory relay.
///
/// Frames go through the JSON codec like on the wire. A frame sent while the
/// other side is not connected is dropped, as a stateless relay would.
/// Clones are extra handles on the same side.
#[derive(Clone)]
pub struct MemoryChannel {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());
        (
            MemoryChannel {
                local: a.clone(),
                remote: b.clone(),
            },
            MemoryChannel {
                local: b,
                remote: a,
            },
        )
    }

    /// Simulates a transport failure on this side
    pub fn sever(&self, reason: &str) {
        if self.local.open.swap(false, Ordering::SeqCst) {
            self.local.deliver(ChannelEvent::Error(reason.to_string()));
        }
    }

    /// Delivers a raw frame to this side as if the relay had sent it
    pub fn inject_frame(&self, frame: &str) {
        if self.local.open.load(Ordering::SeqCst) {
            self.local.deliver(frame_event(frame));
        }
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.local.connected_once.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Transport("already connected".into()));
        }
        self.local.open.store(true, Ordering::SeqCst);
        self.local.deliver(ChannelEvent::Opened);
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
        if self.remote.open.load(Ordering::SeqCst) {
            self.remote.deliver(frame_event(&frame));
        } else {
            debug!("Relay has no peer connected, dropping {} frame", msg.kind());
        }
    }

    fn on_message(&mut self, handler: ChannelEventSender) -> Result<()> {
        let mut slot = self.local.handler.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(SessionError::HandlerAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.local.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.local.open.store(false, Ordering::SeqCst);
    }
}
