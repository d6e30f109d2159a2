use crate::peer::types::IceServerConfig;
use crate::utils::is_local_endpoint;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default time allowed for the credential endpoint to answer
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)]
}

/// Body returned by the TURN credential endpoint
#[derive(Debug, Deserialize)]
struct RelayCredentials {
    username: String,
    password: String,
    turn: String,
}

/// Resolves relay servers from a credential provisioning endpoint.
///
/// Failure never fails the session: every error path yields `None` and the
/// caller keeps the default server list.
///
/// ```
/// # tokio_test::block_on(async {
/// use ssc_session::peer::IceCredentialProvider;
/// use std::time::Duration;
///
/// let provider = IceCredentialProvider::new(Duration::from_millis(500));
/// assert!(provider.resolve("http://127.0.0.1:1/turn").await.is_none());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct IceCredentialProvider {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for IceCredentialProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TIMEOUT)
    }
}

impl IceCredentialProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn resolve(&self, discovery_url: &str) -> Option<Vec<IceServerConfig>> {
        info!("Getting TURN server from {}", discovery_url);

        let response = match self
            .client
            .get(discovery_url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("TURN discovery request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("TURN discovery returned HTTP {}", response.status());
            return None;
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("TURN discovery body unreadable: {}", e);
                return None;
            }
        };

        let server = parse_relay_response(&body)?;
        info!("Got TURN server: {}", server.url);
        Some(vec![server])
    }
}

/// Maps `{username, password, turn}` to a TURN descriptor
pub fn parse_relay_response(body: &[u8]) -> Option<IceServerConfig> {
    match serde_json::from_slice::<RelayCredentials>(body) {
        Ok(creds) if !creds.turn.is_empty() => Some(IceServerConfig {
            url: format!("turn:{}", creds.turn),
            username: Some(creds.username),
            credential: Some(creds.password),
        }),
        Ok(_) => {
            warn!("TURN discovery response has an empty turn address");
            None
        }
        Err(e) => {
            warn!("Malformed TURN discovery response: {}", e);
            None
        }
    }
}

/// Discovery is pointless when a relay is already configured or the
/// signaling peer is on this machine.
pub fn needs_relay_discovery(servers: &[IceServerConfig], signaling_url: &str) -> bool {
    if servers.iter().any(IceServerConfig::is_turn) {
        debug!("TURN server already configured, skipping discovery");
        return false;
    }
    if is_local_endpoint(signaling_url) {
        debug!("Signaling endpoint is local, skipping discovery");
        return false;
    }
    true
}

pub fn analyze_candidates<'a>(candidates: impl IntoIterator<Item = &'a str>) -> (usize, usize, usize) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );
    (host_count, srflx_count, relay_count)
}
