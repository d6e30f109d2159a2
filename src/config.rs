//! Session configuration: a TOML file with command-line overrides on top

use crate::error::{Result, SessionError};
use crate::peer::connection::MediaLines;
use crate::peer::ice::{default_ice_servers, DEFAULT_DISCOVERY_TIMEOUT};
use crate::peer::types::IceServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay
    pub signaling_url: String,
    /// Send the first offer once the peer has joined
    pub initiator: bool,
    pub ice_servers: Vec<IceServerConfig>,
    /// TURN credential endpoint, queried once at startup
    pub turn_discovery_url: Option<String>,
    pub discovery_timeout_ms: u64,
    pub receive_video: bool,
    pub receive_audio: bool,
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".into(),
            initiator: false,
            ice_servers: default_ice_servers(),
            turn_discovery_url: None,
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64,
            receive_video: true,
            receive_audio: false,
            log_level: "info".into(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(text).map_err(|e| SessionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.signaling_url.is_empty() {
            return Err(SessionError::Config("signaling_url cannot be empty".into()));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(SessionError::Config("Server URL cannot be empty".into()));
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(SessionError::Config(format!(
                    "TURN server {} requires username and credential",
                    server.url
                )));
            }
        }
        Ok(())
    }

    pub fn media_lines(&self) -> MediaLines {
        MediaLines {
            video: self.receive_video,
            audio: self.receive_audio,
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}
