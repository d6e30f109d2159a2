use crate::error::{Result, SessionError};
use crate::logger::Reporter;
use crate::peer::connection::{PeerConnectionFactory, PeerConnectionHandle, PeerEvent, PeerEventSender};
use crate::peer::ice::analyze_candidates;
use crate::peer::state::{ConnectionPhase, ConnectionState};
use crate::peer::types::{Candidate, DescType, IceServerConfig, Message, Role, SessionDescription};
use crate::signaling::{ChannelEvent, SignalingChannel};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives one peer connection through offer/answer and teardown.
///
/// Owned by a single reactor task; every method takes `&mut self` and runs
/// to completion before the next event is looked at, so inbound messages
/// are handled strictly in arrival order.
pub struct SessionNegotiator {
    state: ConnectionState,
    channel: Box<dyn SignalingChannel>,
    factory: Arc<dyn PeerConnectionFactory>,
    peer: Option<Box<dyn PeerConnectionHandle>>,
    /// Remote candidates received before a remote description was set
    pending: VecDeque<Candidate>,
    ice_servers: Vec<IceServerConfig>,
    intended_role: Option<Role>,
    join_acknowledged: bool,
    /// Relay discovery still running; construction waits for it
    relays_pending: bool,
    start_deferred: bool,
    deferred_offer: Option<SessionDescription>,
    local_candidates: Vec<String>,
    peer_events: PeerEventSender,
    reporter: Reporter,
}

impl SessionNegotiator {
    pub fn new(
        channel: Box<dyn SignalingChannel>,
        factory: Arc<dyn PeerConnectionFactory>,
        ice_servers: Vec<IceServerConfig>,
        initiator: bool,
        peer_events: PeerEventSender,
        reporter: Reporter,
    ) -> Self {
        Self {
            state: ConnectionState::new(),
            channel,
            factory,
            peer: None,
            pending: VecDeque::new(),
            ice_servers,
            intended_role: initiator.then_some(Role::Initiator),
            join_acknowledged: false,
            relays_pending: false,
            start_deferred: false,
            deferred_offer: None,
            local_candidates: Vec::new(),
            peer_events,
            reporter,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.phase()
    }

    pub fn role(&self) -> Option<Role> {
        self.state.role()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn has_peer_connection(&self) -> bool {
        self.peer.is_some()
    }

    pub fn ice_servers(&self) -> &[IceServerConfig] {
        &self.ice_servers
    }

    /// Holds peer connection construction until `finish_relay_discovery`
    pub fn await_relays(&mut self) {
        self.relays_pending = true;
    }

    pub fn relays_pending(&self) -> bool {
        self.relays_pending
    }

    /// Transport lifecycle and inbound frames
    pub async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                info!("Signaling channel opened, announcing ourselves");
                self.channel.send(&Message::Join);
            }
            ChannelEvent::Message(msg) => self.handle_inbound(msg).await,
            ChannelEvent::Malformed(reason) => {
                self.reporter
                    .emit_failure(&SessionError::Protocol(format!("malformed frame dropped: {}", reason)));
            }
            ChannelEvent::Closed => self.transport_lost("signaling channel closed".into()).await,
            ChannelEvent::Error(reason) => self.transport_lost(reason).await,
        }
    }

    pub async fn handle_inbound(&mut self, msg: Message) {
        if self.state.is_closed() {
            debug!("Session closed, dropping {} message", msg.kind());
            return;
        }
        debug!("Received message: {:?}", msg);

        match msg {
            Message::Join => self.on_join().await,
            Message::Bye => self.on_bye().await,
            Message::SessionDescription { sdp } => match sdp.desc_type {
                DescType::Offer => self.on_offer(sdp).await,
                DescType::Answer => self.on_answer(sdp).await,
            },
            Message::Candidate { ice } => self.on_candidate(ice).await,
        }
    }

    async fn on_join(&mut self) {
        info!("Peer joined the channel");
        self.channel_ready();

        if self.intended_role == Some(Role::Initiator) {
            self.maybe_start().await;
        } else if !self.join_acknowledged && self.state.phase() == ConnectionPhase::ChannelReady {
            // peer may have connected after our own join went nowhere
            self.join_acknowledged = true;
            self.channel.send(&Message::Join);
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription) {
        match self.state.role() {
            Some(Role::Initiator) => {
                self.anomaly("glare: remote offer ignored, keeping local offer");
                return;
            }
            Some(Role::Responder) => {
                if let Some(peer) = &self.peer {
                    if peer.has_remote_description().await {
                        self.anomaly("second offer ignored, renegotiation is not supported");
                        return;
                    }
                }
            }
            None => {
                self.intended_role = Some(Role::Responder);
                // an offer proves the peer is on the channel
                self.channel_ready();
                if self.relays_pending {
                    if self.deferred_offer.is_some() {
                        self.anomaly("second offer ignored while relay discovery is running");
                    } else {
                        info!("Holding remote offer until relay discovery completes");
                        self.deferred_offer = Some(offer);
                    }
                    return;
                }
                if !self.maybe_start().await {
                    return;
                }
            }
        }

        let applied = match &self.peer {
            Some(peer) => peer.set_remote_description(&offer).await,
            None => Err(SessionError::Protocol("offer without a peer connection".into())),
        };
        if let Err(e) = applied {
            self.reporter.emit_failure(&e);
            return;
        }

        self.flush_pending().await;
        if let Err(e) = self.answer_remote_offer().await {
            self.reporter.emit_failure(&e);
        }
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        if self.state.phase() != ConnectionPhase::Negotiating || self.state.role() != Some(Role::Initiator) {
            self.anomaly(&format!(
                "answer ignored in phase {} as {:?}",
                self.state.phase(),
                self.state.role()
            ));
            return;
        }

        let applied = match &self.peer {
            Some(peer) => peer.set_remote_description(&answer).await,
            None => Err(SessionError::Protocol("answer without a peer connection".into())),
        };
        match applied {
            Ok(()) => {
                info!("Remote answer applied");
                self.flush_pending().await;
            }
            Err(e) => self.reporter.emit_failure(&e),
        }
    }

    async fn on_candidate(&mut self, candidate: Candidate) {
        if !self.accepts_candidates().await {
            debug!(
                "Remote description not set yet, queuing candidate ({} pending)",
                self.pending.len() + 1
            );
            self.pending.push_back(candidate);
            return;
        }
        // keep wire order if anything is still queued
        self.flush_pending().await;
        self.apply_candidate(&candidate).await;
    }

    async fn on_bye(&mut self) {
        if self.state.phase() < ConnectionPhase::Negotiating {
            info!("Bye before negotiation started, ignoring");
            if self.deferred_offer.take().is_some() {
                debug!("Dropping held offer from the departed peer");
            }
            return;
        }
        info!("Session terminated by remote peer");
        self.stop().await;
        self.state.clear_role();
        self.intended_role = None;
    }

    /// Creates the peer connection once; idempotent.
    ///
    /// Returns whether a peer connection exists afterwards.
    pub async fn maybe_start(&mut self) -> bool {
        if self.peer.is_some() {
            return true;
        }
        let Some(role) = self.intended_role else {
            debug!("maybe_start: no role yet, waiting for an offer");
            return false;
        };
        if self.relays_pending {
            if !self.start_deferred && !self.state.is_closed() {
                info!("Waiting for relay discovery before creating the peer connection");
            }
            self.start_deferred = true;
            return false;
        }
        if !self.state.try_begin_negotiation(role) {
            return false;
        }
        self.reporter.emit_phase(self.state.phase());

        info!("Creating peer connection");
        match self.factory.create(&self.ice_servers, self.peer_events.clone()).await {
            Ok(peer) => self.peer = Some(peer),
            Err(e) => {
                let err = match e {
                    SessionError::Resource(_) => e,
                    other => SessionError::Resource(other.to_string()),
                };
                self.reporter.emit_failure(&err);
                self.stop().await;
                return false;
            }
        }

        if role == Role::Initiator {
            if let Err(e) = self.initiate_offer().await {
                self.reporter.emit_failure(&e);
            }
        }
        true
    }

    /// Produces, applies and sends the local offer
    pub async fn initiate_offer(&mut self) -> Result<()> {
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("offer requested without a peer connection".into()))?;

        info!("Sending offer to peer");
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        self.channel.send(&Message::SessionDescription { sdp: offer });
        Ok(())
    }

    /// Produces, applies and sends the local answer
    pub async fn answer_remote_offer(&mut self) -> Result<()> {
        let peer = self
            .peer
            .as_ref()
            .ok_or_else(|| SessionError::Protocol("answer requested without a peer connection".into()))?;

        info!("Sending answer to peer");
        let answer = peer.create_answer().await?;
        peer.set_local_description(&answer).await?;
        self.channel.send(&Message::SessionDescription { sdp: answer });
        Ok(())
    }

    /// Local hangup; the peer is not notified
    pub async fn hangup(&mut self) {
        info!("Hanging up");
        self.stop().await;
    }

    /// Orderly departure: tell the peer, then tear down and close the channel
    pub async fn leave(&mut self) {
        if !self.state.is_closed() {
            self.channel.send(&Message::Bye);
        }
        self.stop().await;
        self.channel.close().await;
    }

    /// Releases the peer connection if there is one; safe in any phase
    pub async fn stop(&mut self) {
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }
        self.deferred_offer = None;
        self.start_deferred = false;
        if !self.pending.is_empty() {
            debug!("Discarding {} pending candidates", self.pending.len());
            self.pending.clear();
        }
        if self.state.close() {
            self.reporter.emit_phase(ConnectionPhase::Closed);
        }
    }

    pub async fn close_channel(&mut self) {
        self.channel.close().await;
    }

    /// Local peer-connection events
    pub async fn on_peer_event(&mut self, event: PeerEvent) {
        if self.state.is_closed() {
            debug!("Session closed, ignoring peer event {:?}", event);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.local_candidates.push(candidate.candidate.clone());
                self.channel.send(&Message::Candidate { ice: candidate });
            }
            PeerEvent::CandidatesComplete => {
                info!("End of candidates");
                let (_, _, relay) = analyze_candidates(self.local_candidates.iter().map(String::as_str));
                if relay == 0 {
                    warn!("No TURN relay candidates found, connection through NAT may fail");
                }
            }
            PeerEvent::RemoteStreamAdded { track_id, kind } => {
                self.reporter.emit_stream_added(&track_id, &kind);
                if self.state.mark_established() {
                    self.reporter.emit_phase(ConnectionPhase::Established);
                    self.flush_pending().await;
                }
            }
            PeerEvent::RemoteStreamRemoved { track_id } => {
                self.reporter.emit_stream_removed(&track_id);
            }
            PeerEvent::ConnectionFailed => {
                self.reporter
                    .emit_failure(&SessionError::PeerConnection("ICE connectivity failed".into()));
            }
        }
    }

    /// Adds resolved relay servers while the pool is still open
    pub fn provide_relays(&mut self, servers: Vec<IceServerConfig>) -> bool {
        if self.peer.is_some() || self.state.phase() >= ConnectionPhase::Negotiating {
            warn!(
                "{} relay servers resolved after the peer connection was built, ignoring",
                servers.len()
            );
            return false;
        }
        info!("Adding {} relay servers", servers.len());
        self.ice_servers.extend(servers);
        true
    }

    /// Completion of relay discovery: `None` keeps the configured servers.
    /// Replays whatever start trigger arrived in the meantime.
    pub async fn finish_relay_discovery(&mut self, servers: Option<Vec<IceServerConfig>>) {
        match servers {
            Some(servers) => {
                self.provide_relays(servers);
            }
            None => debug!("No relay servers available, using defaults"),
        }
        if !std::mem::replace(&mut self.relays_pending, false) || self.state.is_closed() {
            return;
        }

        if let Some(offer) = self.deferred_offer.take() {
            self.start_deferred = false;
            self.on_offer(offer).await;
        } else if std::mem::replace(&mut self.start_deferred, false) {
            self.maybe_start().await;
        }
    }

    fn channel_ready(&mut self) {
        if self.state.mark_channel_ready() {
            self.reporter.emit_phase(ConnectionPhase::ChannelReady);
        }
    }

    async fn accepts_candidates(&self) -> bool {
        match &self.peer {
            Some(peer) => {
                self.state.phase() == ConnectionPhase::Established || peer.has_remote_description().await
            }
            None => false,
        }
    }

    /// Applies queued candidates in arrival order
    async fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        info!("Applying {} pending candidates", self.pending.len());
        while let Some(candidate) = self.pending.pop_front() {
            self.apply_candidate(&candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: &Candidate) {
        let Some(peer) = &self.peer else {
            return;
        };
        match peer.add_candidate(candidate).await {
            Ok(()) => debug!("Added remote candidate: {}", candidate.candidate),
            Err(e) => self.reporter.emit_failure(&e),
        }
    }

    async fn transport_lost(&mut self, reason: String) {
        if self.state.is_closed() {
            debug!("Transport gone after close: {}", reason);
            return;
        }
        self.reporter.emit_failure(&SessionError::Transport(reason));
        self.stop().await;
    }

    fn anomaly(&self, what: &str) {
        self.reporter.emit_failure(&SessionError::Protocol(what.to_string()));
    }
}
