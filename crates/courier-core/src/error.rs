use crate::ids::PeerId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key bundle")]
    InvalidBundle,
    #[error("signed prekey signature mismatch")]
    SignatureMismatch,
    #[error("no session established")]
    NoSession,
    #[error("encrypt")]
    Encrypt,
    #[error("decrypt")]
    Decrypt,
    #[error("missing prekey {0}")]
    MissingPreKey(u32),
    #[error("peer identity changed")]
    IdentityMismatch,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("handshake not ready for {0}")]
    HandshakeNotReady(PeerId),
    #[error("unsolicited key response from {0}")]
    UnsolicitedKeyResponse(PeerId),
    #[error("drain already in flight for {0}")]
    DrainInFlight(PeerId),
    #[error("outbound queue full for {0}")]
    QueueFull(PeerId),
    #[error("crypto {0}")]
    Crypto(#[from] CryptoError),
    #[error("transport {0}")]
    Transport(String),
    #[error("codec {0}")]
    Codec(String),
    #[error("key request to {peer} not sent, message {message_id} kept queued: {reason}")]
    KeyRequestUnsent {
        peer: PeerId,
        message_id: Uuid,
        reason: String,
    },
    #[error("closed")]
    Closed,
}
