use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which side of the offer/answer exchange we are
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sends the first offer
    Initiator,
    /// Answers the peer's offer
    Responder,
}

/// Kind of session description
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DescType {
    Offer,
    Answer,
}

/// Session description: opaque SDP body plus its type
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "descType")]
    pub desc_type: DescType,
    pub body: String,
}

impl SessionDescription {
    pub fn offer(body: impl Into<String>) -> Self {
        Self {
            desc_type: DescType::Offer,
            body: body.into(),
        }
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self {
            desc_type: DescType::Answer,
            body: body.into(),
        }
    }
}

/// Trickled ICE candidate
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    #[serde(rename = "mediaLineIndex")]
    pub media_line_index: u16,
    pub candidate: String,
}

impl Candidate {
    pub fn new(media_line_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            media_line_index,
            candidate: candidate.into(),
        }
    }
}

/// Signaling envelope, one JSON object per frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Message {
    Join,
    Bye,
    #[serde(rename = "sdp")]
    SessionDescription { sdp: SessionDescription },
    #[serde(rename = "ice")]
    Candidate { ice: Candidate },
}

impl Message {
    pub fn offer(body: impl Into<String>) -> Self {
        Message::SessionDescription {
            sdp: SessionDescription::offer(body),
        }
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Message::SessionDescription {
            sdp: SessionDescription::answer(body),
        }
    }

    pub fn candidate(media_line_index: u16, candidate: impl Into<String>) -> Self {
        Message::Candidate {
            ice: Candidate::new(media_line_index, candidate),
        }
    }

    /// Validates a wire frame against the message schema
    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join => "join",
            Message::Bye => "bye",
            Message::SessionDescription { .. } => "sdp",
            Message::Candidate { .. } => "ice",
        }
    }
}

/// One STUN or TURN server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn is_turn(&self) -> bool {
        self.url.starts_with("turn:") || self.url.starts_with("turns:")
    }
}
