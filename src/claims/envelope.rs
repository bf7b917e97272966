//! Messages exchanged over a claims socket.
//!
//! Clients send `{"action": ...}` objects; the server answers with
//! `{"type": ...}` objects. Anything a client sends that does not decode into
//! an [`InboundMessage`] is dropped by the session.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ClaimRecord;
use crate::rooms::Frame;

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Full snapshot of a customer's (optionally filtered) claims.
    ClaimsUpdate {
        claims: Vec<ClaimRecord>,
        total_count: usize,
    },
    /// Reply to a client `ping`, echoing its timestamp untouched.
    Pong { timestamp: serde_json::Value },
}

impl OutboundMessage {
    pub fn claims_update(claims: Vec<ClaimRecord>) -> Self {
        let total_count = claims.len();
        Self::ClaimsUpdate {
            claims,
            total_count,
        }
    }

    pub fn pong(timestamp: serde_json::Value) -> Self {
        Self::Pong { timestamp }
    }

    /// Serialize once into a shareable text frame.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Resend the unfiltered snapshot.
    Refresh,
    /// Resend the snapshot narrowed to one status. The value is compared
    /// literally; it is not checked against [`super::ClaimStatus`].
    Filter {
        #[serde(default)]
        status: Option<String>,
    },
    /// Liveness probe; any JSON value is accepted as the timestamp.
    Ping {
        #[serde(default)]
        timestamp: serde_json::Value,
    },
}

impl InboundMessage {
    /// Decode a text frame, returning `None` for anything unrecognised.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(error = %e, len = raw.len(), "Dropping unrecognised client message");
                None
            }
        }
    }
}
