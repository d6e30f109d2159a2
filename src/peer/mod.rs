pub mod connection;
pub mod ice;
pub mod negotiator;
pub mod state;
pub mod types;

pub use connection::{
    MediaLines, PeerConnectionFactory, PeerConnectionHandle, PeerEvent, PeerEventSender, WebRtcFactory,
};
pub use ice::IceCredentialProvider;
pub use negotiator::SessionNegotiator;
pub use state::{ConnectionPhase, ConnectionState};
pub use types::{Candidate, DescType, IceServerConfig, Message, Role, SessionDescription};
