use thiserror::Error;

/// How a failure affects the running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Unexpected message for the current phase; dropped, session continues
    Anomaly,
    /// Description negotiation failed; phase is left as it was
    Recoverable,
    /// Session cannot continue and is closed
    Fatal,
}

/// Session-wide error type
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Protocol anomaly: {0}")]
    Protocol(String),

    #[error("Malformed signaling frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Peer connection failed: {0}")]
    PeerConnection(String),

    #[error("Peer connection unavailable: {0}")]
    Resource(String),

    #[error("Signaling transport failed: {0}")]
    Transport(String),

    #[error("Inbound handler already registered")]
    HandlerAlreadyRegistered,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn severity(&self) -> Severity {
        match self {
            SessionError::Protocol(_) | SessionError::MalformedFrame(_) => Severity::Anomaly,
            SessionError::Negotiation(_) | SessionError::PeerConnection(_) => Severity::Recoverable,
            SessionError::Resource(_) | SessionError::Transport(_) => Severity::Fatal,
            SessionError::HandlerAlreadyRegistered | SessionError::Config(_) | SessionError::Io(_) => {
                Severity::Fatal
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, SessionError>;
