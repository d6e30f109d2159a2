use crate::error::{SessionError, Severity};
use crate::peer::state::ConnectionPhase;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;

/// Installs the global subscriber; `RUST_LOG` wins over `level`
pub fn init_logging(level: &str) {
    let filter = format!("ssc_session={level},webrtc=warn");
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Dumps a trickled ICE candidate
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate, init.sdp_mid, init.sdp_mline_index
        );
    }
}

/// What a session reports to its subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    PhaseChanged(ConnectionPhase),
    RemoteStreamAdded { track_id: String, kind: String },
    RemoteStreamRemoved { track_id: String },
    Failure { severity: Severity, message: String },
}

/// Single reporting path: everything is logged, and forwarded to the
/// subscriber when one is attached.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<mpsc::UnboundedSender<SessionNotice>>,
}

impl Reporter {
    pub fn new(tx: mpsc::UnboundedSender<SessionNotice>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter that only logs
    pub fn silent() -> Self {
        Self::default()
    }

    fn emit(&self, notice: SessionNotice) {
        if let Some(tx) = &self.tx {
            if tx.send(notice).is_err() {
                debug!("Notice subscriber is gone");
            }
        }
    }

    pub fn emit_phase(&self, phase: ConnectionPhase) {
        info!("emit phase: {}", phase);
        self.emit(SessionNotice::PhaseChanged(phase));
    }

    pub fn emit_stream_added(&self, track_id: &str, kind: &str) {
        info!("Remote stream added: {} ({})", track_id, kind);
        self.emit(SessionNotice::RemoteStreamAdded {
            track_id: track_id.to_string(),
            kind: kind.to_string(),
        });
    }

    pub fn emit_stream_removed(&self, track_id: &str) {
        info!("Remote stream removed: {}", track_id);
        self.emit(SessionNotice::RemoteStreamRemoved {
            track_id: track_id.to_string(),
        });
    }

    pub fn emit_failure(&self, err: &SessionError) {
        let severity = err.severity();
        match severity {
            Severity::Anomaly => warn!("{}", err),
            Severity::Recoverable => warn!("Recoverable failure: {}", err),
            Severity::Fatal => error!("Fatal failure: {}", err),
        }
        self.emit(SessionNotice::Failure {
            severity,
            message: err.to_string(),
        });
    }
}
