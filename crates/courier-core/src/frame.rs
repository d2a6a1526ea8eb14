use crate::error::CoreError;
use crate::ids::PeerId;
use crate::presence::{PeerSummary, PresenceStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SenderMeta {
    pub message_id: Uuid,
    pub username: String,
    pub created_at_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    KeyRequest {
        requesting_peer: PeerId,
        target_peer: PeerId,
    },
    KeyResponse {
        recipient: PeerId,
        generator_id: PeerId,
        key: String,
        pre_key_id: u32,
        signed_key_id: u32,
    },
    KeyAck {
        from: PeerId,
        to: PeerId,
    },
    Ciphertext {
        receiver: PeerId,
        sender: PeerId,
        ciphertext: String,
        sender_meta: SenderMeta,
    },
    PresenceUpdate {
        peer: PeerSummary,
        status: PresenceStatus,
    },
    Roster {
        peers: Vec<PeerSummary>,
    },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::KeyRequest { .. } => "key-request",
            Frame::KeyResponse { .. } => "key-response",
            Frame::KeyAck { .. } => "key-ack",
            Frame::Ciphertext { .. } => "ciphertext",
            Frame::PresenceUpdate { .. } => "presence-update",
            Frame::Roster { .. } => "roster",
        }
    }

    // None for relay-originated frames, which fan out to every mailbox.
    pub fn destination(&self) -> Option<&PeerId> {
        match self {
            Frame::KeyRequest { target_peer, .. } => Some(target_peer),
            Frame::KeyResponse { recipient, .. } => Some(recipient),
            Frame::KeyAck { to, .. } => Some(to),
            Frame::Ciphertext { receiver, .. } => Some(receiver),
            Frame::PresenceUpdate { .. } | Frame::Roster { .. } => None,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(frame).map_err(|e| CoreError::Codec(e.to_string()))
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Codec(e.to_string()))
}
