//! Session reactor: one task, one event at a time

use crate::config::SessionConfig;
use crate::error::Result;
use crate::logger::Reporter;
use crate::peer::connection::{PeerConnectionFactory, PeerEvent};
use crate::peer::ice::{needs_relay_discovery, IceCredentialProvider};
use crate::peer::negotiator::SessionNegotiator;
use crate::peer::state::ConnectionPhase;
use crate::peer::types::{IceServerConfig, Role};
use crate::signaling::{ChannelEvent, SignalingChannel};
use crate::utils::random_id;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

/// Requests from outside the reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Tear down locally without telling the peer
    Hangup,
    /// Say bye, tear down and close the channel
    Leave,
}

/// Cloneable remote control for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn hangup(&self) {
        let _ = self.tx.send(SessionCommand::Hangup);
    }

    pub fn leave(&self) {
        let _ = self.tx.send(SessionCommand::Leave);
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub phase: ConnectionPhase,
    pub role: Option<Role>,
}

pub struct Session {
    id: String,
    negotiator: SessionNegotiator,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    relay_rx: mpsc::UnboundedReceiver<Vec<IceServerConfig>>,
    awaiting_relays: bool,
}

impl Session {
    /// Registers the inbound handler, kicks off relay discovery and
    /// connects the channel. A connect failure is fatal and returned.
    ///
    /// While discovery runs the peer connection is not built; the wait is
    /// bounded by the configured discovery timeout.
    pub async fn start(
        mut channel: Box<dyn SignalingChannel>,
        factory: Arc<dyn PeerConnectionFactory>,
        config: &SessionConfig,
        reporter: Reporter,
    ) -> Result<(Session, SessionHandle)> {
        let id = random_id();
        info!("Starting session {} (initiator={})", id, config.initiator);

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        channel.on_message(channel_tx)?;

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let awaiting_relays = match &config.turn_discovery_url {
            Some(url) if needs_relay_discovery(&config.ice_servers, &config.signaling_url) => {
                let provider = IceCredentialProvider::new(config.discovery_timeout());
                let url = url.clone();
                tokio::spawn(async move {
                    if let Some(servers) = provider.resolve(&url).await {
                        let _ = relay_tx.send(servers);
                    }
                });
                true
            }
            _ => false,
        };

        if let Err(e) = channel.connect().await {
            reporter.emit_failure(&e);
            return Err(e);
        }

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut negotiator = SessionNegotiator::new(
            channel,
            factory,
            config.ice_servers.clone(),
            config.initiator,
            peer_tx,
            reporter,
        );
        if awaiting_relays {
            negotiator.await_relays();
        }

        Ok((
            Session {
                id,
                negotiator,
                channel_rx,
                peer_rx,
                command_rx,
                relay_rx,
                awaiting_relays,
            },
            SessionHandle { tx: command_tx },
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Processes events until the session is closed
    pub async fn run(mut self) -> SessionOutcome {
        let span = info_span!("session", id = %self.id);
        async move {
            while self.negotiator.phase() != ConnectionPhase::Closed {
                tokio::select! {
                    biased;
                    Some(command) = self.command_rx.recv() => match command {
                        SessionCommand::Hangup => self.negotiator.hangup().await,
                        SessionCommand::Leave => self.negotiator.leave().await,
                    },
                    Some(event) = self.channel_rx.recv() => {
                        self.negotiator.handle_channel_event(event).await;
                    }
                    Some(event) = self.peer_rx.recv() => {
                        self.negotiator.on_peer_event(event).await;
                    }
                    relays = self.relay_rx.recv(), if self.awaiting_relays => {
                        self.awaiting_relays = false;
                        self.negotiator.finish_relay_discovery(relays).await;
                    }
                    else => break,
                }
            }

            self.negotiator.close_channel().await;
            info!("Session finished in phase {}", self.negotiator.phase());
            SessionOutcome {
                phase: self.negotiator.phase(),
                role: self.negotiator.role(),
            }
        }
        .instrument(span)
        .await
    }
}
