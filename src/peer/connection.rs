use crate::error::{Result, SessionError};
use crate::logger::dump_candidate;
use crate::peer::types::{Candidate, DescType, IceServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::{ice_candidate::RTCIceCandidate, ice_candidate::RTCIceCandidateInit, ice_server::RTCIceServer},
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Events raised by a live peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Local candidate discovered (trickle)
    LocalCandidate(Candidate),
    /// Candidate gathering finished
    CandidatesComplete,
    /// First packets of a remote track are available
    RemoteStreamAdded { track_id: String, kind: String },
    /// Remote track ended
    RemoteStreamRemoved { track_id: String },
    /// Transport between the peers failed
    ConnectionFailed,
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Which media lines the local side asks to receive.
/// Local capture is not handled here; the offer only carries receive sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaLines {
    pub video: bool,
    pub audio: bool,
}

impl Default for MediaLines {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
        }
    }
}

/// The negotiated connection owned by the negotiator
#[async_trait]
pub trait PeerConnectionHandle: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;
    async fn has_remote_description(&self) -> bool;
    async fn add_candidate(&self, candidate: &Candidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Builds peer connections; the ICE server list is fixed at construction
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnectionHandle>>;
}

/// webrtc-rs backed factory
#[derive(Debug, Clone, Default)]
pub struct WebRtcFactory {
    media: MediaLines,
}

impl WebRtcFactory {
    pub fn new(media: MediaLines) -> Self {
        Self { media }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: PeerEventSender,
    ) -> Result<Box<dyn PeerConnectionHandle>> {
        let pc = new_peer(ice_servers, self.media, events).await?;
        Ok(Box::new(WebRtcHandle { pc }))
    }
}

/// Builds a peer connection and routes its callbacks into `events`
pub async fn new_peer(
    ice_servers: &[IceServerConfig],
    media: MediaLines,
    events: PeerEventSender,
) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| SessionError::Resource(format!("Failed to register codecs: {}", e)))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| SessionError::Resource(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(
        api.new_peer_connection(rtc_config(ice_servers))
            .await
            .map_err(|e| SessionError::Resource(format!("Failed to create peer connection: {}", e)))?,
    );
    info!("Created peer connection with {} ICE servers", ice_servers.len());

    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        Box::pin(async move {
            match cand {
                Some(c) => {
                    dump_candidate("LOCAL", &c);
                    match c.to_json() {
                        Ok(init) => {
                            let candidate =
                                Candidate::new(init.sdp_mline_index.unwrap_or(0), init.candidate);
                            let _ = events.send(PeerEvent::LocalCandidate(candidate));
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                }
                // None marks the end of gathering
                None => {
                    let _ = events.send(PeerEvent::CandidatesComplete);
                }
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!("Peer connection state changed to: {:?}", st);
        if st == RTCPeerConnectionState::Failed {
            let _ = state_events.send(PeerEvent::ConnectionFailed);
        }
        Box::pin(async {})
    }));

    let track_events = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _tr: Arc<RTCRtpTransceiver>| {
            let events = track_events.clone();
            Box::pin(async move {
                let track_id = track.id();
                info!("Remote track added: id={} kind={}", track_id, track.kind());
                let _ = events.send(PeerEvent::RemoteStreamAdded {
                    track_id: track_id.clone(),
                    kind: track.kind().to_string(),
                });

                // Rendering is external; drain packets until the track ends
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    let _ = events.send(PeerEvent::RemoteStreamRemoved { track_id });
                });
            })
        },
    ));

    for (wanted, kind) in [(media.video, RTPCodecType::Video), (media.audio, RTPCodecType::Audio)] {
        if !wanted {
            continue;
        }
        pc.add_transceiver_from_kind(
            kind,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| SessionError::Resource(format!("Failed to add {} transceiver: {}", kind, e)))?;
    }

    Ok(pc)
}

/// Peer connection configuration for the given servers
pub fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match desc.desc_type {
        DescType::Offer => RTCSessionDescription::offer(desc.body.clone()),
        DescType::Answer => RTCSessionDescription::answer(desc.body.clone()),
    };
    parsed.map_err(|e| SessionError::Negotiation(format!("Invalid {:?} body: {}", desc.desc_type, e)))
}

struct WebRtcHandle {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnectionHandle for WebRtcHandle {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| SessionError::Negotiation(format!("create_offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| SessionError::Negotiation(format!("create_answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| SessionError::Negotiation(format!("set_local_description: {}", e)))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| SessionError::Negotiation(format!("set_remote_description: {}", e)))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_candidate(&self, candidate: &Candidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: None,
            sdp_mline_index: Some(candidate.media_line_index),
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| SessionError::Negotiation(format!("add_ice_candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| SessionError::Resource(format!("close: {}", e)))
    }
}
